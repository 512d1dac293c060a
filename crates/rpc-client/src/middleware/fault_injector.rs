use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rpc_core::{header, Caller, IdlError, Payload, RpcCall, RpcContext, RpcError};

use crate::chain::ClientMiddleware;

const CLUSTER_LOCAL_SUFFIX: &str = ".svc.cluster.local";

/// Per-call delay/abort injection driven by inbound fault-injection
/// headers, for chaos-testing a specific downstream call without that
/// service actually misbehaving. Only applies when `Server-Address`
/// matches this middleware's configured `local_address` (ignoring a
/// `.svc.cluster.local` suffix on either side) and `Server-Method`, if
/// present, matches the call's method.
///
/// The random draw used for percentage selection is taken at most once
/// per call and reused for both the delay and abort dimensions, so the
/// two are correlated rather than sampled independently (§4.7).
pub struct FaultInjector {
    local_address: String,
}

impl FaultInjector {
    pub fn new(local_address: impl Into<String>) -> Self {
        Self {
            local_address: local_address.into(),
        }
    }
}

struct Wrapped {
    local_address: String,
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        if !self.targets_this_call(ctx, &call.method) {
            return self.next.call(ctx, call).await;
        }

        let roll: u8 = rand::thread_rng().gen_range(0..100);

        if let Some(delay_ms) = ctx.headers().get(header::FAULT_DELAY_MS).and_then(|v| v.parse::<u64>().ok()) {
            let pct = parse_percentage(ctx.headers().get(header::FAULT_DELAY_PERCENTAGE)).unwrap_or(100);
            if roll < pct {
                tracing::debug!(delay_ms, "fault injector: delaying call");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        if let Some(abort_code) = ctx.headers().get(header::FAULT_ABORT_CODE).and_then(|v| v.parse::<i32>().ok()) {
            let pct = parse_percentage(ctx.headers().get(header::FAULT_ABORT_PERCENTAGE)).unwrap_or(100);
            if roll < pct {
                let message = ctx
                    .headers()
                    .get(header::FAULT_ABORT_MESSAGE)
                    .unwrap_or("fault injected")
                    .to_string();
                tracing::debug!(abort_code, %message, "fault injector: aborting call");
                return Err(RpcError::Idl(IdlError::new(abort_code, message)));
            }
        }

        self.next.call(ctx, call).await
    }
}

impl Wrapped {
    fn targets_this_call(&self, ctx: &RpcContext, method: &str) -> bool {
        let Some(target_address) = ctx.headers().get(header::FAULT_SERVER_ADDRESS) else {
            return false;
        };
        if strip_cluster_suffix(target_address) != strip_cluster_suffix(&self.local_address) {
            return false;
        }
        match ctx.headers().get(header::FAULT_SERVER_METHOD) {
            Some(target_method) => target_method == method,
            None => true,
        }
    }
}

fn strip_cluster_suffix(address: &str) -> &str {
    address.strip_suffix(CLUSTER_LOCAL_SUFFIX).unwrap_or(address)
}

/// Parses a 0-100 percentage header value. A missing header yields `None`
/// (caller substitutes its own default); a malformed or out-of-range value
/// is logged and treated as "not selected" (percentage 0).
fn parse_percentage(value: Option<&str>) -> Option<u8> {
    let Some(raw) = value else { return None };
    match raw.parse::<u8>() {
        Ok(pct) if pct <= 100 => Some(pct),
        _ => {
            tracing::warn!(value = raw, "fault injector: malformed percentage header, treating as 0");
            Some(0)
        }
    }
}

impl ClientMiddleware for FaultInjector {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped {
            local_address: self.local_address.clone(),
            next,
        })
    }
}

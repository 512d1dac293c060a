//! Metric name validation (§6): an internal test utility asserting that a
//! metric name registered anywhere in this framework begins with an
//! allowed prefix, carries `client`/`server` as its second
//! underscore-separated part, has at least three parts, and — for the
//! three suffixes the framework standardizes on — carries the exact label
//! set that suffix documents.
//!
//! This is not itself a test; it's shared by `rpc-pool`/`rpc-client`/
//! `rpc-server`'s own `#[cfg(test)]` modules, each of which asserts the
//! contract against the literal metric names and label keys it actually
//! emits.

/// Prefixes a registered metric name is allowed to start with.
pub const ALLOWED_PREFIXES: &[&str] = &["thrift", "http", "grpc"];

/// The label set required for metrics ending in each of the three
/// standardized suffixes, before any client-side label extension.
fn required_labels(name: &str) -> Option<&'static [&'static str]> {
    if name.ends_with("_latency_seconds") {
        Some(&["method", "success"])
    } else if name.ends_with("_requests_total") {
        Some(&[
            "method",
            "success",
            "exception_type",
            "baseplate_status",
            "baseplate_status_code",
        ])
    } else if name.ends_with("_active_requests") {
        Some(&["method"])
    } else {
        None
    }
}

/// One failure found while validating a metric name against §6's contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricNameError(pub String);

impl std::fmt::Display for MetricNameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MetricNameError {}

/// Validate `name`'s shape, and — if it ends in one of the three
/// standardized suffixes — that `labels` is exactly the required set for
/// that suffix (order-independent). Client-side metrics (second part
/// `"client"`) are additionally expected to carry `slug` and
/// `client_name`, per §6's "Client: as above with extra labels slug,
/// client_name."
pub fn validate_metric_name(name: &str, labels: &[&str]) -> Result<(), MetricNameError> {
    let parts: Vec<&str> = name.split('_').collect();
    if parts.len() < 3 {
        return Err(MetricNameError(format!(
            "{name}: expected at least 3 underscore-separated parts, got {}",
            parts.len()
        )));
    }

    let prefix = parts[0];
    if !ALLOWED_PREFIXES.contains(&prefix) {
        return Err(MetricNameError(format!(
            "{name}: prefix {prefix:?} is not one of the allowed prefixes {ALLOWED_PREFIXES:?}"
        )));
    }

    let second = parts[1];
    if second != "client" && second != "server" {
        return Err(MetricNameError(format!(
            "{name}: second part {second:?} must be \"client\" or \"server\""
        )));
    }

    if let Some(required) = required_labels(name) {
        let mut expected: Vec<&str> = required.to_vec();
        if second == "client" {
            expected.push("slug");
            expected.push("client_name");
        }
        let mut got = labels.to_vec();
        got.sort_unstable();
        expected.sort_unstable();
        if got != expected {
            return Err(MetricNameError(format!(
                "{name}: expected labels {expected:?}, got {got:?}"
            )));
        }
    }

    Ok(())
}

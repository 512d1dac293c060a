use std::collections::{HashMap, HashSet};

/// Reserved, wire-level header keys. Names match the reference framework's
/// THeader string headers verbatim so traces captured off the wire line up
/// with these constants.
pub mod header {
    pub const TRACE: &str = "Trace";
    pub const SPAN: &str = "Span";
    pub const PARENT: &str = "Parent";
    pub const FLAGS: &str = "Flags";
    pub const SAMPLED: &str = "Sampled";
    pub const EDGE_REQUEST: &str = "Edge-Request";
    pub const DEADLINE_BUDGET: &str = "Deadline-Budget";
    pub const USER_AGENT: &str = "User-Agent";

    pub const FAULT_SERVER_ADDRESS: &str = "X-Bp-Fault-Server-Address";
    pub const FAULT_SERVER_METHOD: &str = "X-Bp-Fault-Server-Method";
    pub const FAULT_DELAY_MS: &str = "X-Bp-Fault-Delay-Ms";
    pub const FAULT_DELAY_PERCENTAGE: &str = "X-Bp-Fault-Delay-Percentage";
    pub const FAULT_ABORT_CODE: &str = "X-Bp-Fault-Abort-Code";
    pub const FAULT_ABORT_MESSAGE: &str = "X-Bp-Fault-Abort-Message";
    pub const FAULT_ABORT_PERCENTAGE: &str = "X-Bp-Fault-Abort-Percentage";

    /// Inbound header keys implicitly forwarded to any downstream call made
    /// from the same context.
    pub const DEFAULT_PROPAGATED: &[&str] = &[EDGE_REQUEST, TRACE, SPAN, PARENT, SAMPLED, FLAGS];
}

/// A string-to-string header map with a separately tracked *write-forward
/// list*: the subset of keys that must be copied onto any downstream call
/// made from a context carrying these headers.
#[derive(Clone, Debug, Default)]
pub struct RpcHeaders {
    values: HashMap<String, String>,
    forward: HashSet<String>,
}

impl RpcHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Set a header value. Does not, by itself, mark the key for
    /// forwarding — call [`RpcHeaders::mark_forward`] for that.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.forward.remove(key);
        self.values.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Add `key` to the write-forward list. The key need not currently be
    /// present in the map.
    pub fn mark_forward(&mut self, key: impl Into<String>) {
        self.forward.insert(key.into());
    }

    /// Remove `key` from the write-forward list, if present.
    pub fn unmark_forward(&mut self, key: &str) {
        self.forward.remove(key);
    }

    pub fn is_forwarded(&self, key: &str) -> bool {
        self.forward.contains(key)
    }

    pub fn forwarded_keys(&self) -> impl Iterator<Item = &str> {
        self.forward.iter().map(String::as_str)
    }

    /// Mark every header in [`header::DEFAULT_PROPAGATED`] that is present
    /// on this map as forwarded.
    pub fn forward_defaults(&mut self) {
        for key in header::DEFAULT_PROPAGATED {
            if self.contains(key) {
                self.mark_forward(*key);
            }
        }
    }

    /// Build the headers a downstream call should carry: only the keys
    /// marked for forwarding, with their current values.
    pub fn to_forward(&self) -> RpcHeaders {
        let mut out = RpcHeaders::new();
        for key in &self.forward {
            if let Some(value) = self.values.get(key) {
                out.set(key.clone(), value.clone());
                out.mark_forward(key.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_defaults_only_marks_present_keys() {
        let mut h = RpcHeaders::new();
        h.set(header::TRACE, "12345");
        h.set(header::SAMPLED, "1");
        h.forward_defaults();

        assert!(h.is_forwarded(header::TRACE));
        assert!(h.is_forwarded(header::SAMPLED));
        assert!(!h.is_forwarded(header::SPAN));
    }

    #[test]
    fn to_forward_carries_only_marked_keys() {
        let mut h = RpcHeaders::new();
        h.set(header::TRACE, "12345");
        h.set(header::USER_AGENT, "my-service");
        h.mark_forward(header::TRACE);

        let forwarded = h.to_forward();
        assert_eq!(forwarded.get(header::TRACE), Some("12345"));
        assert_eq!(forwarded.get(header::USER_AGENT), None);
    }

    #[test]
    fn remove_clears_forward_marker() {
        let mut h = RpcHeaders::new();
        h.set(header::EDGE_REQUEST, "token");
        h.mark_forward(header::EDGE_REQUEST);
        h.remove(header::EDGE_REQUEST);
        assert!(!h.is_forwarded(header::EDGE_REQUEST));
    }
}

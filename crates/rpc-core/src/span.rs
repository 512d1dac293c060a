use crate::headers::{header, RpcHeaders};

/// A trace/span/parent identifier triple, plus a flags integer and a
/// sampled bit. IDs are opaque strings: this crate neither generates nor
/// validates their format, beyond decoding them off the wire where they
/// happen to be decimal integers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_id: Option<String>,
    pub flags: i64,
    pub sampled: bool,
}

impl Span {
    pub fn root(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_id: None,
            flags: 0,
            sampled: false,
        }
    }

    /// Derive a child span sharing this span's trace, flags, and sampled
    /// bit, with `self` as its parent.
    pub fn child(&self, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: span_id.into(),
            parent_id: Some(self.span_id.clone()),
            flags: self.flags,
            sampled: self.sampled,
        }
    }

    /// Parse a span out of inbound headers. `None` if `Trace` or `Span` is
    /// absent. A malformed `Flags` value is silently dropped (treated as
    /// `0`) rather than failing the whole parse; `Sampled` is `true` only
    /// for the literal value `"1"`.
    pub fn from_headers(headers: &RpcHeaders) -> Option<Span> {
        let trace_id = headers.get(header::TRACE)?.to_string();
        let span_id = headers.get(header::SPAN)?.to_string();
        let parent_id = headers.get(header::PARENT).map(str::to_string);
        let flags = headers
            .get(header::FLAGS)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let sampled = headers.get(header::SAMPLED).map(|v| v == "1").unwrap_or(false);

        Some(Span {
            trace_id,
            span_id,
            parent_id,
            flags,
            sampled,
        })
    }

    /// Write this span's fields onto `headers` and mark them all for
    /// forwarding to downstream calls.
    pub fn write_headers(&self, headers: &mut RpcHeaders) {
        headers.set(header::TRACE, self.trace_id.clone());
        headers.set(header::SPAN, self.span_id.clone());
        if let Some(parent) = &self.parent_id {
            headers.set(header::PARENT, parent.clone());
        }
        headers.set(header::FLAGS, self.flags.to_string());
        headers.set(header::SAMPLED, if self.sampled { "1" } else { "0" });

        for key in [header::TRACE, header::SPAN, header::PARENT, header::FLAGS, header::SAMPLED] {
            if headers.contains(key) {
                headers.mark_forward(key);
            }
        }
    }
}

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// A conservative bound on edge-context size. The framework never parses
/// this payload, but a bound protects header-size limits enforced further
/// down the wire transport.
pub const MAX_LEN: usize = 16 * 1024;

/// An opaque, length-bounded byte string carrying caller identity. Passed
/// through unchanged on every downstream call made from a context that
/// holds one; never parsed by this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeContext(Vec<u8>);

#[derive(Debug, thiserror::Error)]
pub enum EdgeContextError {
    #[error("edge context of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    #[error("edge context header value was not valid base64")]
    InvalidEncoding(#[source] base64::DecodeError),
}

impl EdgeContext {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, EdgeContextError> {
        let bytes = bytes.into();
        if bytes.len() > MAX_LEN {
            return Err(EdgeContextError::TooLarge {
                len: bytes.len(),
                max: MAX_LEN,
            });
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decode an edge-context from the `Edge-Request` header's wire value
    /// (base64 of the opaque token).
    pub fn from_header_value(value: &str) -> Result<Self, EdgeContextError> {
        let bytes = STANDARD
            .decode(value)
            .map_err(EdgeContextError::InvalidEncoding)?;
        Self::new(bytes)
    }

    /// Encode this edge context for use as the `Edge-Request` header
    /// value.
    pub fn to_header_value(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_header_encoding() {
        let ec = EdgeContext::new(b"caller-identity".to_vec()).unwrap();
        let encoded = ec.to_header_value();
        let decoded = EdgeContext::from_header_value(&encoded).unwrap();
        assert_eq!(ec, decoded);
    }

    #[test]
    fn rejects_oversized_payloads() {
        let oversized = vec![0u8; MAX_LEN + 1];
        assert!(matches!(
            EdgeContext::new(oversized),
            Err(EdgeContextError::TooLarge { .. })
        ));
    }
}

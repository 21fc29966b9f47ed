//! Error types for the changelog protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while parsing or encoding changelog protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A cookie string could not be decoded.
    #[error("malformed cookie: {0}")]
    MalformedCookie(String),

    /// A change number string could not be decoded.
    #[error("malformed change number {value:?}: {reason}")]
    MalformedChangeNumber {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A domain identifier cannot be stored in a cookie.
    #[error("invalid domain identifier {0:?}")]
    InvalidDomain(String),

    /// A distinguished name could not be parsed.
    #[error("invalid DN {value:?}: {reason}")]
    InvalidDn {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A stored update payload could not be encoded or decoded.
    #[error("payload codec error: {0}")]
    Codec(String),
}

impl ProtocolError {
    /// Creates a malformed change number error.
    pub fn change_number(value: impl Into<String>, reason: &'static str) -> Self {
        Self::MalformedChangeNumber {
            value: value.into(),
            reason,
        }
    }

    /// Creates an invalid DN error.
    pub fn dn(value: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidDn {
            value: value.into(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::change_number("zz", "wrong length");
        assert!(err.to_string().contains("zz"));
        assert!(err.to_string().contains("wrong length"));

        let err = ProtocolError::MalformedCookie("missing ':'".into());
        assert_eq!(err.to_string(), "malformed cookie: missing ':'");
    }
}

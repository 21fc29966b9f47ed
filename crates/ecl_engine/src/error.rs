//! Error types for the changelog engine.

use ecl_protocol::{ProtocolError, ResultCode};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that end a changelog search.
///
/// Every variant maps to the result code reported to the client through
/// [`EngineError::result_code`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The search base is not a valid DN.
    #[error("invalid search base {base:?}: {source}")]
    InvalidBase {
        /// Base as received.
        base: String,
        /// Parse failure.
        #[source]
        source: ProtocolError,
    },

    /// The search filter could not be parsed.
    #[error("invalid search filter {filter:?}: {reason}")]
    InvalidFilter {
        /// Filter as received.
        filter: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No cookie exchange control came with the request.
    #[error("Cookie control expected")]
    MissingCookie,

    /// The cookie exchange control carried an undecodable cookie.
    #[error("malformed cookie: {0}")]
    MalformedCookie(#[source] ProtocolError),

    /// Access control refused a request control.
    #[error("insufficient access rights to use control {oid}")]
    ControlNotAllowed {
        /// Refused control.
        oid: String,
    },

    /// Proxied authorization without the required privilege.
    #[error("proxied authorization denied: {0}")]
    AuthorizationDenied(String),

    /// A critical control the engine does not handle.
    #[error("unavailable critical extension {oid}")]
    UnavailableCriticalExtension {
        /// Control OID.
        oid: String,
    },

    /// The assertion control could not be evaluated.
    #[error("cannot process assertion filter: {0}")]
    CannotEvaluateAssertion(String),

    /// The assertion filter did not match the base entry.
    #[error("assertion failed for entry {0}")]
    AssertionFailed(String),

    /// No update source is bound to the engine.
    #[error("changelog base {0} does not exist")]
    SourceUnavailable(String),

    /// The update source failed.
    #[error("update source error: {0}")]
    Source(String),

    /// Filter or scope evaluation failed.
    #[error("cannot evaluate search filter: {0}")]
    Matcher(String),

    /// Directory lookup failed.
    #[error("directory lookup failed: {0}")]
    Directory(String),

    /// The persistent search registry refused the search.
    #[error("persistent search registration failed: {0}")]
    Registry(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Builds an [`EngineError::InvalidFilter`].
    pub fn invalid_filter(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            filter: filter.into(),
            reason: reason.into(),
        }
    }

    /// The result code sent to the client.
    pub fn result_code(&self) -> ResultCode {
        match self {
            EngineError::InvalidBase { .. } => ResultCode::InvalidDnSyntax,
            EngineError::InvalidFilter { .. } => ResultCode::ProtocolError,
            EngineError::MissingCookie => ResultCode::OperationsError,
            EngineError::MalformedCookie(_) => ResultCode::ProtocolError,
            EngineError::ControlNotAllowed { .. } => ResultCode::InsufficientAccessRights,
            EngineError::AuthorizationDenied(_) => ResultCode::AuthorizationDenied,
            EngineError::UnavailableCriticalExtension { .. } => {
                ResultCode::UnavailableCriticalExtension
            }
            EngineError::CannotEvaluateAssertion(_) => ResultCode::ProtocolError,
            EngineError::AssertionFailed(_) => ResultCode::AssertionFailed,
            EngineError::SourceUnavailable(_) => ResultCode::OperationsError,
            EngineError::Source(_) => ResultCode::Other,
            EngineError::Matcher(_) => ResultCode::Other,
            EngineError::Directory(_) => ResultCode::Other,
            EngineError::Registry(_) => ResultCode::Other,
            EngineError::Cancelled => ResultCode::Canceled,
        }
    }

    /// Returns true for failures detected before any update source is opened.
    pub fn is_request_validation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidBase { .. }
                | EngineError::InvalidFilter { .. }
                | EngineError::MissingCookie
                | EngineError::MalformedCookie(_)
        )
    }
}

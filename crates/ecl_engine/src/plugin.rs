//! Pre- and post-operation plugin hooks.

use crate::operation::{SearchOutcome, SearchRequest};
use ecl_protocol::{Dn, ResultCode};

/// What a plugin decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginResult {
    /// Keep processing.
    Continue,
    /// End the operation with this result.
    Stop {
        /// Result code.
        code: ResultCode,
        /// Diagnostic message.
        message: Option<String>,
        /// Matched DN.
        matched_dn: Option<Dn>,
        /// Referral URLs.
        referrals: Vec<String>,
    },
}

impl PluginResult {
    /// A stop with only a result code and message.
    pub fn stop(code: ResultCode, message: impl Into<String>) -> Self {
        PluginResult::Stop {
            code,
            message: Some(message.into()),
            matched_dn: None,
            referrals: Vec::new(),
        }
    }
}

/// Plugin pipeline invoked around each search.
///
/// Each hook runs once per search; `post_operation` runs whenever
/// `pre_operation` ran, whatever the outcome.
pub trait SearchPlugins: Send + Sync {
    /// Runs before the update source is opened.
    fn pre_operation(&self, request: &SearchRequest) -> PluginResult;

    /// Runs after processing ends.
    fn post_operation(&self, request: &SearchRequest, outcome: &SearchOutcome) -> PluginResult;
}

/// No plugins.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPlugins;

impl SearchPlugins for NoopPlugins {
    fn pre_operation(&self, _request: &SearchRequest) -> PluginResult {
        PluginResult::Continue
    }

    fn post_operation(&self, _request: &SearchRequest, _outcome: &SearchOutcome) -> PluginResult {
        PluginResult::Continue
    }
}

//! Request and response controls, and result codes.
//!
//! Controls arrive already decoded by the protocol layer; this module only
//! gives them a typed shape.

use std::collections::BTreeSet;
use std::fmt;

/// OIDs of the controls the changelog understands.
pub mod oid {
    /// Cookie exchange (request) and entry changelog notification (response).
    pub const ECL_COOKIE_EXCHANGE: &str = "1.3.6.1.4.1.26027.1.5.4";
    /// LDAP assertion.
    pub const ASSERTION: &str = "1.3.6.1.1.12";
    /// Proxied authorization, version 1.
    pub const PROXIED_AUTH_V1: &str = "2.16.840.1.113730.3.4.12";
    /// Proxied authorization, version 2.
    pub const PROXIED_AUTH_V2: &str = "2.16.840.1.113730.3.4.18";
    /// Persistent search.
    pub const PERSISTENT_SEARCH: &str = "2.16.840.1.113730.3.4.3";
    /// LDAP subentries.
    pub const SUBENTRIES: &str = "1.3.6.1.4.1.4203.1.10.1";
    /// Matched values.
    pub const MATCHED_VALUES: &str = "1.2.826.0.1.3344810.2.3";
    /// Account usable.
    pub const ACCOUNT_USABLE: &str = "1.3.6.1.4.1.42.2.27.9.5.8";
    /// Real attributes only.
    pub const REAL_ATTRS_ONLY: &str = "2.16.840.1.113730.3.4.17";
    /// Virtual attributes only.
    pub const VIRTUAL_ATTRS_ONLY: &str = "2.16.840.1.113730.3.4.19";
    /// Get effective rights.
    pub const GET_EFFECTIVE_RIGHTS: &str = "1.3.6.1.4.1.42.2.27.9.5.2";
    /// Server-side sort.
    pub const SERVER_SIDE_SORT: &str = "1.2.840.113556.1.4.473";
    /// Virtual list view.
    pub const VLV: &str = "2.16.840.1.113730.3.4.9";
}

/// Change types a persistent search is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PersistentChangeType {
    /// Entry added.
    Add,
    /// Entry deleted.
    Delete,
    /// Entry modified.
    Modify,
    /// Entry renamed.
    ModDn,
}

/// A decoded request control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlKind {
    /// Resumption cookie, still in string form.
    CookieExchange {
        /// Raw cookie string.
        cookie: String,
    },
    /// Assertion filter evaluated against the search base entry.
    Assertion {
        /// Filter string.
        filter: String,
    },
    /// Proxied authorization, version 1 (authorization DN).
    ProxiedAuthV1 {
        /// DN to act as; empty for anonymous.
        authz_dn: String,
    },
    /// Proxied authorization, version 2 (authorization id resolved to a DN).
    ProxiedAuthV2 {
        /// DN to act as; empty for anonymous.
        authz_dn: String,
    },
    /// Persistent search.
    PersistentSearch {
        /// Change types to report.
        change_types: BTreeSet<PersistentChangeType>,
        /// Skip the initial backlog.
        changes_only: bool,
        /// Attach entry change notification controls.
        return_ecs: bool,
    },
    /// Return subentries.
    Subentries,
    /// Matched values filters.
    MatchedValues {
        /// Value filters.
        filters: Vec<String>,
    },
    /// Account usable.
    AccountUsable,
    /// Real attributes only.
    RealAttrsOnly,
    /// Virtual attributes only.
    VirtualAttrsOnly,
    /// Get effective rights; handled by access control.
    GetEffectiveRights,
    /// Anything else.
    Other {
        /// Control OID.
        oid: String,
    },
}

/// A request control with its criticality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestControl {
    /// Whether the server must reject the request if it cannot honour it.
    pub critical: bool,
    /// Decoded control.
    pub kind: ControlKind,
}

impl RequestControl {
    /// Creates a non-critical control.
    pub fn new(kind: ControlKind) -> Self {
        Self {
            critical: false,
            kind,
        }
    }

    /// Creates a critical control.
    pub fn critical(kind: ControlKind) -> Self {
        Self {
            critical: true,
            kind,
        }
    }

    /// Shorthand for a cookie exchange control.
    pub fn cookie(cookie: impl Into<String>) -> Self {
        Self::new(ControlKind::CookieExchange {
            cookie: cookie.into(),
        })
    }

    /// The control OID.
    pub fn oid(&self) -> &str {
        match &self.kind {
            ControlKind::CookieExchange { .. } => oid::ECL_COOKIE_EXCHANGE,
            ControlKind::Assertion { .. } => oid::ASSERTION,
            ControlKind::ProxiedAuthV1 { .. } => oid::PROXIED_AUTH_V1,
            ControlKind::ProxiedAuthV2 { .. } => oid::PROXIED_AUTH_V2,
            ControlKind::PersistentSearch { .. } => oid::PERSISTENT_SEARCH,
            ControlKind::Subentries => oid::SUBENTRIES,
            ControlKind::MatchedValues { .. } => oid::MATCHED_VALUES,
            ControlKind::AccountUsable => oid::ACCOUNT_USABLE,
            ControlKind::RealAttrsOnly => oid::REAL_ATTRS_ONLY,
            ControlKind::VirtualAttrsOnly => oid::VIRTUAL_ATTRS_ONLY,
            ControlKind::GetEffectiveRights => oid::GET_EFFECTIVE_RIGHTS,
            ControlKind::Other { oid } => oid,
        }
    }
}

/// A control attached to a returned entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseControl {
    /// Cookie after the change carried by the entry.
    EntryChangelogNotification {
        /// Encoded cookie.
        cookie: String,
    },
}

impl ResponseControl {
    /// The control OID.
    pub fn oid(&self) -> &'static str {
        match self {
            ResponseControl::EntryChangelogNotification { .. } => oid::ECL_COOKIE_EXCHANGE,
        }
    }

    /// Whether the control is marked critical.
    pub fn is_critical(&self) -> bool {
        true
    }
}

/// LDAP result codes used by the changelog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// 0
    Success,
    /// 1
    OperationsError,
    /// 2
    ProtocolError,
    /// 4
    SizeLimitExceeded,
    /// 12
    UnavailableCriticalExtension,
    /// 32
    NoSuchObject,
    /// 34
    InvalidDnSyntax,
    /// 50
    InsufficientAccessRights,
    /// 53
    UnwillingToPerform,
    /// 80
    Other,
    /// 118
    Canceled,
    /// 122
    AssertionFailed,
    /// 123
    AuthorizationDenied,
}

impl ResultCode {
    /// Numeric value on the wire.
    pub fn code(&self) -> u16 {
        match self {
            ResultCode::Success => 0,
            ResultCode::OperationsError => 1,
            ResultCode::ProtocolError => 2,
            ResultCode::SizeLimitExceeded => 4,
            ResultCode::UnavailableCriticalExtension => 12,
            ResultCode::NoSuchObject => 32,
            ResultCode::InvalidDnSyntax => 34,
            ResultCode::InsufficientAccessRights => 50,
            ResultCode::UnwillingToPerform => 53,
            ResultCode::Other => 80,
            ResultCode::Canceled => 118,
            ResultCode::AssertionFailed => 122,
            ResultCode::AuthorizationDenied => 123,
        }
    }

    /// Standard name.
    pub fn name(&self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::OperationsError => "operationsError",
            ResultCode::ProtocolError => "protocolError",
            ResultCode::SizeLimitExceeded => "sizeLimitExceeded",
            ResultCode::UnavailableCriticalExtension => "unavailableCriticalExtension",
            ResultCode::NoSuchObject => "noSuchObject",
            ResultCode::InvalidDnSyntax => "invalidDNSyntax",
            ResultCode::InsufficientAccessRights => "insufficientAccessRights",
            ResultCode::UnwillingToPerform => "unwillingToPerform",
            ResultCode::Other => "other",
            ResultCode::Canceled => "canceled",
            ResultCode::AssertionFailed => "assertionFailed",
            ResultCode::AuthorizationDenied => "authorizationDenied",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_oids() {
        assert_eq!(RequestControl::cookie("").oid(), oid::ECL_COOKIE_EXCHANGE);
        assert_eq!(
            RequestControl::critical(ControlKind::Other {
                oid: "1.2.3".into()
            })
            .oid(),
            "1.2.3"
        );
        assert_eq!(
            ResponseControl::EntryChangelogNotification {
                cookie: String::new()
            }
            .oid(),
            oid::ECL_COOKIE_EXCHANGE
        );
    }

    #[test]
    fn result_code_display() {
        assert_eq!(ResultCode::Success.code(), 0);
        assert_eq!(
            ResultCode::UnavailableCriticalExtension.to_string(),
            "12 (unavailableCriticalExtension)"
        );
    }
}

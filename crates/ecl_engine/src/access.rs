//! Access control for request controls.

use ecl_protocol::{Dn, RequestControl};
use std::collections::BTreeSet;

/// Privileges relevant to changelog searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Privilege {
    /// May act on behalf of another identity.
    ProxiedAuth,
}

/// Identity and bookkeeping of the client issuing a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    /// Connection id.
    pub connection_id: u64,
    /// Operation id within the connection.
    pub operation_id: u64,
    /// Protocol message id.
    pub message_id: u32,
    /// Bound identity; the root DN for anonymous clients.
    pub bind_dn: Dn,
    /// Granted privileges.
    pub privileges: BTreeSet<Privilege>,
}

impl ClientContext {
    /// Creates an anonymous client context.
    pub fn new(connection_id: u64, operation_id: u64, message_id: u32) -> Self {
        Self {
            connection_id,
            operation_id,
            message_id,
            bind_dn: Dn::root(),
            privileges: BTreeSet::new(),
        }
    }

    /// Sets the bound identity.
    pub fn with_bind_dn(mut self, dn: Dn) -> Self {
        self.bind_dn = dn;
        self
    }

    /// Grants a privilege.
    pub fn with_privilege(mut self, privilege: Privilege) -> Self {
        self.privileges.insert(privilege);
        self
    }

    /// Returns true if the privilege was granted.
    pub fn has_privilege(&self, privilege: Privilege) -> bool {
        self.privileges.contains(&privilege)
    }

    /// `conn=<c> op=<o> msgID=<m>`.
    pub fn operation_tag(&self) -> String {
        format!(
            "conn={} op={} msgID={}",
            self.connection_id, self.operation_id, self.message_id
        )
    }
}

/// Decides whether a client may use a request control.
pub trait AccessControl: Send + Sync {
    /// Returns true if `client` may attach `control` to a search of `base`.
    fn is_allowed(&self, base: &Dn, client: &ClientContext, control: &RequestControl) -> bool;
}

/// Allows every control.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn is_allowed(&self, _base: &Dn, _client: &ClientContext, _control: &RequestControl) -> bool {
        true
    }
}

/// Denies a fixed set of control OIDs to everyone.
#[derive(Debug, Clone, Default)]
pub struct DenyControls {
    denied: BTreeSet<String>,
}

impl DenyControls {
    /// Creates a policy denying nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Denies a control OID.
    pub fn deny(mut self, oid: impl Into<String>) -> Self {
        self.denied.insert(oid.into());
        self
    }
}

impl AccessControl for DenyControls {
    fn is_allowed(&self, _base: &Dn, _client: &ClientContext, control: &RequestControl) -> bool {
        !self.denied.contains(control.oid())
    }
}

//! Test fixtures for changelog scenarios.
//!
//! Provides ready-made update messages and a builder for update logs whose
//! cookies advance the way a changelog source would advance them.

use ecl_protocol::{
    Attribute, ChangeNumber, ChangelogUpdate, Modification, MultiDomainCookie, StoredPayload,
    UpdateMsg, UpdateOperation,
};
use uuid::Uuid;

/// Domain used by most fixtures.
pub const EXAMPLE_DOMAIN: &str = "dc=example,dc=com";

/// Second domain for multi-domain scenarios.
pub const OTHER_DOMAIN: &str = "o=test";

/// Timestamp of the first fixture change (2023-12-13T10:00:00Z).
pub const BASE_TIME: u64 = 1_702_461_600_000;

/// Change number `seq` of server 1, one second apart.
pub fn csn(seq: u32) -> ChangeNumber {
    csn_from(1, seq)
}

/// Change number `seq` of `server`, one second apart.
pub fn csn_from(server: u16, seq: u32) -> ChangeNumber {
    ChangeNumber::new(BASE_TIME + u64::from(seq) * 1000, server, seq)
}

/// Deterministic entry UUID.
pub fn entry_uuid(n: u128) -> Uuid {
    Uuid::from_u128(0x5b6e_7f00_0000_4000_8000_0000_0000_0000 | n)
}

/// Target DN of the person entry `uid`.
pub fn person_dn(uid: &str) -> String {
    format!("uid={uid},ou=People,{EXAMPLE_DOMAIN}")
}

/// Adds a person entry.
pub fn add_msg(csn: ChangeNumber, uid: &str) -> UpdateMsg {
    let attributes = vec![
        Attribute::new("objectClass", ["top", "person", "inetOrgPerson"]),
        Attribute::single("uid", uid),
        Attribute::single("cn", format!("User {uid}")),
        Attribute::single("sn", "User"),
    ];
    let operation = UpdateOperation::add(&attributes).expect("Failed to encode attributes");
    UpdateMsg::new(csn, person_dn(uid), entry_uuid(u128::from(csn.seqnum())), operation)
}

/// Replaces the description of a person entry.
pub fn modify_msg(csn: ChangeNumber, uid: &str, description: &str) -> UpdateMsg {
    let modifications = vec![Modification::replace("description", [description])];
    let operation =
        UpdateOperation::modify(&modifications).expect("Failed to encode modifications");
    UpdateMsg::new(csn, person_dn(uid), entry_uuid(u128::from(csn.seqnum())), operation)
}

/// Renames a person entry, optionally moving it under `new_superior`.
pub fn modrdn_msg(
    csn: ChangeNumber,
    uid: &str,
    new_uid: &str,
    new_superior: Option<&str>,
) -> UpdateMsg {
    let operation =
        UpdateOperation::modify_dn(format!("uid={new_uid}"), new_superior.map(String::from), true);
    UpdateMsg::new(csn, person_dn(uid), entry_uuid(u128::from(csn.seqnum())), operation)
}

/// Deletes a person entry, capturing its `uid`.
pub fn delete_msg(csn: ChangeNumber, uid: &str) -> UpdateMsg {
    let captured = vec![Attribute::single("uid", uid)];
    let operation = UpdateOperation::delete(&captured).expect("Failed to encode attributes");
    UpdateMsg::new(csn, person_dn(uid), entry_uuid(u128::from(csn.seqnum())), operation)
}

/// An add whose stored payload cannot be decoded.
pub fn corrupt_msg(csn: ChangeNumber, uid: &str) -> UpdateMsg {
    let operation = UpdateOperation::Add {
        attributes: StoredPayload::from_bytes(vec![0xff, 0x00, 0x13, 0x37]),
    };
    UpdateMsg::new(csn, person_dn(uid), entry_uuid(u128::from(csn.seqnum())), operation)
}

/// Builds a sequence of changelog updates with running cookies.
///
/// Each update carries the cookie obtained by advancing the previous one
/// with its own change number.
#[derive(Debug, Clone, Default)]
pub struct UpdateLog {
    cookie: MultiDomainCookie,
    updates: Vec<ChangelogUpdate>,
}

impl UpdateLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a change for `domain`.
    pub fn push(mut self, domain: &str, msg: UpdateMsg) -> Self {
        self.cookie
            .advance(domain, msg.csn)
            .expect("Invalid fixture domain");
        self.updates.push(ChangelogUpdate {
            service_id: domain.to_string(),
            cookie: self.cookie.clone(),
            update: msg,
        });
        self
    }

    /// Appends a change for [`EXAMPLE_DOMAIN`].
    pub fn example(self, msg: UpdateMsg) -> Self {
        self.push(EXAMPLE_DOMAIN, msg)
    }

    /// Cookie after the last update.
    pub fn cookie(&self) -> &MultiDomainCookie {
        &self.cookie
    }

    /// Cookie carried by update `index`.
    pub fn cookie_at(&self, index: usize) -> &MultiDomainCookie {
        &self.updates[index].cookie
    }

    /// The updates built so far.
    pub fn updates(&self) -> &[ChangelogUpdate] {
        &self.updates
    }

    /// Consumes the builder.
    pub fn build(self) -> Vec<ChangelogUpdate> {
        self.updates
    }
}

/// Add, modify, rename and delete of one entry in [`EXAMPLE_DOMAIN`].
pub fn lifecycle_log() -> UpdateLog {
    UpdateLog::new()
        .example(add_msg(csn(1), "jdoe"))
        .example(modify_msg(csn(2), "jdoe", "on leave"))
        .example(modrdn_msg(csn(3), "jdoe", "jsmith", None))
        .example(delete_msg(csn(4), "jsmith"))
}

/// Interleaved changes from [`EXAMPLE_DOMAIN`] and [`OTHER_DOMAIN`].
pub fn two_domain_log() -> UpdateLog {
    UpdateLog::new()
        .push(EXAMPLE_DOMAIN, add_msg(csn_from(1, 1), "alice"))
        .push(OTHER_DOMAIN, add_msg(csn_from(2, 1), "bob"))
        .push(EXAMPLE_DOMAIN, modify_msg(csn_from(1, 2), "alice", "admin"))
        .push(OTHER_DOMAIN, delete_msg(csn_from(2, 2), "bob"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecl_protocol::CookieOrdering;

    #[test]
    fn csns_are_increasing() {
        assert!(csn(1) < csn(2));
        assert!(csn_from(1, 5) < csn_from(2, 6));
    }

    #[test]
    fn log_cookies_advance() {
        let log = lifecycle_log();
        let updates = log.updates();
        assert_eq!(updates.len(), 4);
        for pair in updates.windows(2) {
            assert_eq!(pair[0].cookie.compare(&pair[1].cookie), CookieOrdering::Less);
        }
        assert_eq!(log.cookie().get(EXAMPLE_DOMAIN), Some(csn(4)));
    }

    #[test]
    fn two_domain_cookie_tracks_both() {
        let log = two_domain_log();
        assert_eq!(log.cookie().len(), 2);
        assert_eq!(log.cookie_at(0).len(), 1);
        assert_eq!(log.cookie().get(OTHER_DOMAIN), Some(csn_from(2, 2)));
    }

    #[test]
    fn corrupt_payload_does_not_decode() {
        let msg = corrupt_msg(csn(9), "broken");
        let UpdateOperation::Add { attributes } = &msg.operation else {
            panic!("expected add");
        };
        assert!(UpdateOperation::decode_attributes(attributes).is_err());
    }
}

//! Change record synthesis.
//!
//! Turns one [`ChangelogUpdate`] into a [`ChangeRecord`] and renders the
//! record as the change entry a search client receives.

use crate::cookie::MultiDomainCookie;
use crate::csn::ChangeNumber;
use crate::dn::{Dn, Rdn};
use crate::entry::{Attribute, Entry};
use crate::error::ProtocolError;
use crate::ldif::{encode_attributes, encode_modifications};
use crate::update::{ChangelogUpdate, UpdateOperation};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Attribute names of a change entry.
pub mod attr {
    /// Canonical change number.
    pub const REPLICATION_CSN: &str = "replicationCSN";
    /// UTC generalized time of the change.
    pub const CHANGE_TIME: &str = "changeTime";
    /// `add`, `modify`, `modrdn` or `delete`.
    pub const CHANGE_TYPE: &str = "changeType";
    /// Normalized target DN.
    pub const TARGET_DN: &str = "targetdn";
    /// Server id of the originating replica.
    pub const REPLICA_IDENTIFIER: &str = "replicaIdentifier";
    /// Unique id of the target entry.
    pub const TARGET_ENTRY_UUID: &str = "targetentryuuid";
    /// Cookie after this change.
    pub const COOKIE: &str = "cookie";
    /// Encoded change body of an add or modify.
    pub const CHANGES: &str = "changes";
    /// Encoded attributes of a deleted entry.
    pub const DELETED_ENTRY_ATTRS: &str = "deletedentryattrs";
    /// Same as `deletedentryattrs` without the trailing newline.
    pub const CLEAR_DELETED_ENTRY_ATTRS: &str = "clearDeletedEntryAttrs";
    /// New RDN of a rename.
    pub const NEW_RDN: &str = "newrdn";
    /// New parent of a move.
    pub const NEW_SUPERIOR: &str = "newsuperior";
    /// Whether the old RDN value was removed.
    pub const DELETE_OLD_RDN: &str = "deleteoldrdn";
}

/// Schema metadata for changelog entries.
///
/// Resolved once when the engine is configured and shared read-only by
/// every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogSchema {
    root_dn: Dn,
    object_classes: Vec<String>,
    change_entry_extra_class: String,
}

impl ChangelogSchema {
    /// Default changelog root.
    pub const DEFAULT_ROOT: &'static str = "cn=changelog";

    /// Creates the schema rooted at `root_dn`.
    pub fn new(root_dn: Dn) -> Self {
        Self {
            root_dn,
            object_classes: vec!["top".to_string(), "changeLogEntry".to_string()],
            change_entry_extra_class: "extensibleObject".to_string(),
        }
    }

    /// The changelog root DN.
    pub fn root_dn(&self) -> &Dn {
        &self.root_dn
    }

    /// Object classes shared by the root entry and change entries.
    pub fn object_classes(&self) -> &[String] {
        &self.object_classes
    }

    /// Builds the synthetic root entry.
    pub fn root_entry(&self) -> Entry {
        Entry::new(self.root_dn.clone(), self.object_classes.clone())
    }

    fn change_entry_classes(&self) -> Vec<String> {
        let mut classes = self.object_classes.clone();
        classes.push(self.change_entry_extra_class.clone());
        classes
    }
}

impl Default for ChangelogSchema {
    fn default() -> Self {
        Self::new(Dn::parse(Self::DEFAULT_ROOT).unwrap_or_default())
    }
}

/// Kind of change carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Entry added.
    Add,
    /// Entry modified.
    Modify,
    /// Entry renamed or moved.
    ModRdn,
    /// Entry deleted.
    Delete,
}

impl ChangeKind {
    /// Value of the `changeType` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Modify => "modify",
            ChangeKind::ModRdn => "modrdn",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific part of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangePayload {
    /// Encoded body of an add or modify.
    Changes(String),
    /// Encoded attributes captured when the entry was deleted.
    DeletedEntryAttrs(String),
    /// Rename details.
    ModRdn {
        /// New leaf RDN.
        new_rdn: String,
        /// New parent, if moved.
        new_superior: Option<String>,
        /// Whether the old RDN value was removed.
        delete_old_rdn: bool,
    },
}

/// A replicated change normalized for delivery to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Replication domain.
    pub service_id: String,
    /// Target entry DN.
    pub target_dn: Dn,
    /// Change number.
    pub csn: ChangeNumber,
    /// Rendered change time.
    pub change_time: String,
    /// Change kind.
    pub kind: ChangeKind,
    /// Unique id of the target entry.
    pub target_entry_uuid: Uuid,
    /// Kind-specific payload.
    pub payload: ChangePayload,
    /// Cookie after delivery of this record.
    pub cookie: MultiDomainCookie,
    entry_dn: Dn,
}

/// An update message that could not be turned into a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot synthesize change {csn} in domain {service_id:?}: {source}")]
pub struct SynthesisFailure {
    /// Domain of the rejected update.
    pub service_id: String,
    /// Change number of the rejected update.
    pub csn: ChangeNumber,
    /// Underlying decoding problem.
    #[source]
    pub source: ProtocolError,
}

/// Builds change records and entries against a fixed schema.
#[derive(Debug, Clone, Copy)]
pub struct Synthesizer<'a> {
    schema: &'a ChangelogSchema,
}

impl<'a> Synthesizer<'a> {
    /// Creates a synthesizer for `schema`.
    pub fn new(schema: &'a ChangelogSchema) -> Self {
        Self { schema }
    }

    /// Produces the record for one update.
    pub fn synthesize(&self, update: &ChangelogUpdate) -> Result<ChangeRecord, SynthesisFailure> {
        let msg = &update.update;
        let fail = |source: ProtocolError| SynthesisFailure {
            service_id: update.service_id.clone(),
            csn: msg.csn,
            source,
        };

        let target_dn = Dn::parse(&msg.dn).map_err(fail)?;
        let change_time = msg.csn.change_time().map_err(fail)?;
        let entry_dn = self.entry_dn(&update.service_id, msg.csn).map_err(fail)?;

        let (kind, payload) = match &msg.operation {
            UpdateOperation::Add { attributes } => {
                let attributes = UpdateOperation::decode_attributes(attributes).map_err(fail)?;
                (
                    ChangeKind::Add,
                    ChangePayload::Changes(encode_attributes(&attributes)),
                )
            }
            UpdateOperation::Modify { modifications } => {
                let modifications =
                    UpdateOperation::decode_modifications(modifications).map_err(fail)?;
                (
                    ChangeKind::Modify,
                    ChangePayload::Changes(encode_modifications(&modifications)),
                )
            }
            UpdateOperation::ModifyDn {
                new_rdn,
                new_superior,
                delete_old_rdn,
            } => (
                ChangeKind::ModRdn,
                ChangePayload::ModRdn {
                    new_rdn: new_rdn.clone(),
                    new_superior: new_superior.clone(),
                    delete_old_rdn: *delete_old_rdn,
                },
            ),
            UpdateOperation::Delete { deleted_attributes } => {
                let attributes =
                    UpdateOperation::decode_attributes(deleted_attributes).map_err(fail)?;
                (
                    ChangeKind::Delete,
                    ChangePayload::DeletedEntryAttrs(encode_attributes(&attributes)),
                )
            }
        };

        Ok(ChangeRecord {
            service_id: update.service_id.clone(),
            target_dn,
            csn: msg.csn,
            change_time,
            kind,
            target_entry_uuid: msg.entry_uuid,
            payload,
            cookie: update.cookie.clone(),
            entry_dn,
        })
    }

    /// `cn=<csn>,<domain>,<changelog root>`.
    fn entry_dn(&self, service_id: &str, csn: ChangeNumber) -> Result<Dn, ProtocolError> {
        let domain = Dn::parse(service_id)?;
        Ok(domain
            .under(self.schema.root_dn())
            .child(Rdn::new("cn", csn.to_string())))
    }

    /// Renders a record as a change entry.
    pub fn to_entry(&self, record: &ChangeRecord) -> Entry {
        let mut entry = Entry::new(record.entry_dn.clone(), self.schema.change_entry_classes());

        entry.add_user_attribute(Attribute::single(
            attr::REPLICATION_CSN,
            record.csn.to_string(),
        ));
        entry.add_user_attribute(Attribute::single(attr::CHANGE_TIME, &record.change_time));
        entry.add_user_attribute(Attribute::single(attr::CHANGE_TYPE, record.kind.as_str()));
        entry.add_user_attribute(Attribute::single(
            attr::TARGET_DN,
            record.target_dn.to_normalized_string(),
        ));
        entry.add_user_attribute(Attribute::single(
            attr::REPLICA_IDENTIFIER,
            record.csn.server_id().to_string(),
        ));

        match &record.payload {
            // The trailing newline forces base64 when the entry is written out.
            ChangePayload::Changes(text) => {
                entry.add_user_attribute(Attribute::single(attr::CHANGES, format!("{text}\n")));
            }
            ChangePayload::DeletedEntryAttrs(text) => {
                entry.add_user_attribute(Attribute::single(
                    attr::DELETED_ENTRY_ATTRS,
                    format!("{text}\n"),
                ));
                entry.add_operational_attribute(Attribute::single(
                    attr::CLEAR_DELETED_ENTRY_ATTRS,
                    text.as_str(),
                ));
            }
            ChangePayload::ModRdn {
                new_rdn,
                new_superior,
                delete_old_rdn,
            } => {
                entry.add_user_attribute(Attribute::single(attr::NEW_RDN, new_rdn.as_str()));
                if let Some(superior) = new_superior {
                    entry.add_user_attribute(Attribute::single(
                        attr::NEW_SUPERIOR,
                        superior.as_str(),
                    ));
                }
                entry.add_user_attribute(Attribute::single(
                    attr::DELETE_OLD_RDN,
                    delete_old_rdn.to_string(),
                ));
            }
        }

        entry.add_operational_attribute(Attribute::single(
            attr::TARGET_ENTRY_UUID,
            record.target_entry_uuid.to_string(),
        ));
        entry.add_operational_attribute(Attribute::single(attr::COOKIE, record.cookie.encode()));
        entry
    }
}

impl ChangeRecord {
    /// DN of the change entry for this record.
    pub fn entry_dn(&self) -> &Dn {
        &self.entry_dn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldif::Modification;
    use crate::update::{StoredPayload, UpdateMsg};

    const DOMAIN: &str = "dc=example,dc=com";

    fn update(csn: ChangeNumber, dn: &str, operation: UpdateOperation) -> ChangelogUpdate {
        ChangelogUpdate {
            service_id: DOMAIN.to_string(),
            cookie: MultiDomainCookie::new().advanced(DOMAIN, csn).unwrap(),
            update: UpdateMsg::new(csn, dn, Uuid::nil(), operation),
        }
    }

    #[test]
    fn delete_record() {
        let schema = ChangelogSchema::default();
        let synth = Synthesizer::new(&schema);
        let csn = ChangeNumber::new(1000, 5, 1);
        let update = update(
            csn,
            "uid=x,ou=People,dc=example,dc=com",
            UpdateOperation::delete(&[]).unwrap(),
        );

        let record = synth.synthesize(&update).unwrap();
        assert_eq!(record.kind, ChangeKind::Delete);
        assert_eq!(
            record.target_dn.to_normalized_string(),
            "uid=x,ou=people,dc=example,dc=com"
        );

        let entry = synth.to_entry(&record);
        assert_eq!(entry.first_value(attr::CHANGE_TYPE).as_deref(), Some("delete"));
        assert_eq!(
            entry.first_value(attr::TARGET_DN).as_deref(),
            Some("uid=x,ou=people,dc=example,dc=com")
        );
        assert_eq!(entry.first_value(attr::REPLICA_IDENTIFIER).as_deref(), Some("5"));
        let cookie = entry.first_value(attr::COOKIE).unwrap();
        assert!(!cookie.is_empty());
        assert_eq!(
            MultiDomainCookie::decode(&cookie).unwrap().get(DOMAIN),
            Some(csn)
        );
        assert_eq!(
            entry.first_value(attr::DELETED_ENTRY_ATTRS).as_deref(),
            Some("\n")
        );
    }

    #[test]
    fn entry_dn_and_fixed_attributes() {
        let schema = ChangelogSchema::default();
        let synth = Synthesizer::new(&schema);
        let csn = ChangeNumber::new(1_704_164_645_678, 3, 9);
        let record = synth
            .synthesize(&update(
                csn,
                "cn=Bob,dc=example,dc=com",
                UpdateOperation::add(&[Attribute::single("cn", "Bob")]).unwrap(),
            ))
            .unwrap();
        let entry = synth.to_entry(&record);

        assert_eq!(
            entry.dn().to_string(),
            format!("cn={csn},dc=example,dc=com,cn=changelog")
        );
        assert!(entry.has_object_class("extensibleObject"));
        assert!(entry.has_object_class("changeLogEntry"));
        assert_eq!(
            entry.first_value(attr::REPLICATION_CSN),
            Some(csn.to_string())
        );
        assert_eq!(
            entry.first_value(attr::CHANGE_TIME).as_deref(),
            Some("20240102030405Z")
        );
        assert_eq!(
            entry.first_value(attr::TARGET_ENTRY_UUID),
            Some(Uuid::nil().to_string())
        );
        assert_eq!(
            entry.first_value(attr::CHANGES).as_deref(),
            Some("cn: Bob\n\n")
        );
    }

    #[test]
    fn modify_record_payload() {
        let schema = ChangelogSchema::default();
        let synth = Synthesizer::new(&schema);
        let record = synth
            .synthesize(&update(
                ChangeNumber::new(1, 1, 1),
                "cn=Bob,dc=example,dc=com",
                UpdateOperation::modify(&[Modification::replace("cn", ["Bob"])]).unwrap(),
            ))
            .unwrap();
        assert_eq!(
            record.payload,
            ChangePayload::Changes("replace: cn\ncn: Bob\n-".to_string())
        );
        assert_eq!(
            synth.to_entry(&record).first_value(attr::CHANGES).as_deref(),
            Some("replace: cn\ncn: Bob\n-\n")
        );
    }

    #[test]
    fn modrdn_record_attributes() {
        let schema = ChangelogSchema::default();
        let synth = Synthesizer::new(&schema);
        let record = synth
            .synthesize(&update(
                ChangeNumber::new(1, 1, 1),
                "cn=Bob,dc=example,dc=com",
                UpdateOperation::modify_dn("cn=Robert", None, true),
            ))
            .unwrap();
        let entry = synth.to_entry(&record);
        assert_eq!(entry.first_value(attr::CHANGE_TYPE).as_deref(), Some("modrdn"));
        assert_eq!(entry.first_value(attr::NEW_RDN).as_deref(), Some("cn=Robert"));
        assert!(entry.attribute(attr::NEW_SUPERIOR).is_none());
        assert_eq!(entry.first_value(attr::DELETE_OLD_RDN).as_deref(), Some("true"));
        assert!(entry.attribute(attr::CHANGES).is_none());

        let moved = synth
            .synthesize(&update(
                ChangeNumber::new(2, 1, 1),
                "cn=Bob,dc=example,dc=com",
                UpdateOperation::modify_dn("cn=Bob", Some("ou=Other,dc=example,dc=com".into()), false),
            ))
            .unwrap();
        let entry = synth.to_entry(&moved);
        assert_eq!(
            entry.first_value(attr::NEW_SUPERIOR).as_deref(),
            Some("ou=Other,dc=example,dc=com")
        );
        assert_eq!(entry.first_value(attr::DELETE_OLD_RDN).as_deref(), Some("false"));
    }

    #[test]
    fn malformed_payload_is_a_synthesis_failure() {
        let schema = ChangelogSchema::default();
        let synth = Synthesizer::new(&schema);
        let csn = ChangeNumber::new(7, 1, 1);
        let bad = update(
            csn,
            "cn=Bob,dc=example,dc=com",
            UpdateOperation::Modify {
                modifications: StoredPayload::from_bytes(vec![0xff]),
            },
        );
        let err = synth.synthesize(&bad).unwrap_err();
        assert_eq!(err.csn, csn);
        assert_eq!(err.service_id, DOMAIN);
        assert!(matches!(err.source, ProtocolError::Codec(_)));
    }

    #[test]
    fn root_entry_has_fixed_classes_only() {
        let schema = ChangelogSchema::default();
        let root = schema.root_entry();
        assert_eq!(root.dn().to_string(), "cn=changelog");
        assert_eq!(root.object_classes(), ["top", "changeLogEntry"]);
        assert!(root.user_attributes().is_empty());
        assert!(root.operational_attributes().is_empty());
    }
}

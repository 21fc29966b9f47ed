//! Internal replication update messages.
//!
//! An [`UpdateMsg`] is what replication ships between servers. Attribute and
//! modification lists travel as stored CBOR payloads and are only decoded
//! when a change entry is synthesized, so a corrupted payload is detected at
//! that point rather than when the message is received.

use crate::cookie::MultiDomainCookie;
use crate::csn::ChangeNumber;
use crate::entry::Attribute;
use crate::error::{ProtocolError, ProtocolResult};
use crate::ldif::Modification;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// An encoded attribute or modification list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPayload(Vec<u8>);

impl StoredPayload {
    fn encode<T: Serialize>(value: &T) -> ProtocolResult<Self> {
        let mut bytes = Vec::new();
        ciborium::into_writer(value, &mut bytes)
            .map_err(|e| ProtocolError::Codec(e.to_string()))?;
        Ok(Self(bytes))
    }

    fn decode<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        ciborium::from_reader(self.0.as_slice()).map_err(|e| ProtocolError::Codec(e.to_string()))
    }

    /// Wraps raw bytes as received from the wire.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The operation carried by an update message.
///
/// Closed set: adding a variant forces every match in the synthesizer to be
/// updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOperation {
    /// Entry creation with its full attribute set.
    Add {
        /// Encoded `Vec<Attribute>`.
        attributes: StoredPayload,
    },
    /// Attribute modifications.
    Modify {
        /// Encoded `Vec<Modification>`.
        modifications: StoredPayload,
    },
    /// Rename and/or move.
    ModifyDn {
        /// New leaf RDN.
        new_rdn: String,
        /// New parent, if the entry moved.
        new_superior: Option<String>,
        /// Whether the old RDN value was removed from the entry.
        delete_old_rdn: bool,
    },
    /// Entry removal, with the attributes captured at deletion time.
    Delete {
        /// Encoded `Vec<Attribute>`; empty list when nothing was captured.
        deleted_attributes: StoredPayload,
    },
}

impl UpdateOperation {
    /// Builds an add operation.
    pub fn add(attributes: &[Attribute]) -> ProtocolResult<Self> {
        Ok(Self::Add {
            attributes: StoredPayload::encode(&attributes)?,
        })
    }

    /// Builds a modify operation.
    pub fn modify(modifications: &[Modification]) -> ProtocolResult<Self> {
        Ok(Self::Modify {
            modifications: StoredPayload::encode(&modifications)?,
        })
    }

    /// Builds a modify-DN operation.
    pub fn modify_dn(
        new_rdn: impl Into<String>,
        new_superior: Option<String>,
        delete_old_rdn: bool,
    ) -> Self {
        Self::ModifyDn {
            new_rdn: new_rdn.into(),
            new_superior,
            delete_old_rdn,
        }
    }

    /// Builds a delete operation.
    pub fn delete(deleted_attributes: &[Attribute]) -> ProtocolResult<Self> {
        Ok(Self::Delete {
            deleted_attributes: StoredPayload::encode(&deleted_attributes)?,
        })
    }

    /// Decodes the attribute list of an add or delete.
    pub fn decode_attributes(payload: &StoredPayload) -> ProtocolResult<Vec<Attribute>> {
        payload.decode()
    }

    /// Decodes the modification list of a modify.
    pub fn decode_modifications(payload: &StoredPayload) -> ProtocolResult<Vec<Modification>> {
        payload.decode()
    }
}

/// One replicated change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMsg {
    /// Change number assigned by the originating replica.
    pub csn: ChangeNumber,
    /// Target entry DN as written by the client.
    pub dn: String,
    /// Unique id of the target entry.
    pub entry_uuid: Uuid,
    /// What happened.
    pub operation: UpdateOperation,
}

impl UpdateMsg {
    /// Creates an update message.
    pub fn new(
        csn: ChangeNumber,
        dn: impl Into<String>,
        entry_uuid: Uuid,
        operation: UpdateOperation,
    ) -> Self {
        Self {
            csn,
            dn: dn.into(),
            entry_uuid,
            operation,
        }
    }
}

/// An update as delivered by the changelog source: the message, its domain,
/// and the client cookie after this change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogUpdate {
    /// Replication domain (service id) the change belongs to.
    pub service_id: String,
    /// Cookie reflecting delivery of exactly this change.
    pub cookie: MultiDomainCookie,
    /// The change itself.
    pub update: UpdateMsg,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldif::Modification;

    #[test]
    fn attribute_payload_roundtrip() {
        let attrs = vec![
            Attribute::new("objectClass", ["top", "person"]),
            Attribute::single("cn", "Bob"),
        ];
        let op = UpdateOperation::add(&attrs).unwrap();
        let UpdateOperation::Add { attributes } = op else {
            panic!("expected add");
        };
        assert_eq!(UpdateOperation::decode_attributes(&attributes).unwrap(), attrs);
    }

    #[test]
    fn modification_payload_roundtrip() {
        let mods = vec![Modification::replace("cn", ["Bob"])];
        let UpdateOperation::Modify { modifications } = UpdateOperation::modify(&mods).unwrap()
        else {
            panic!("expected modify");
        };
        assert_eq!(
            UpdateOperation::decode_modifications(&modifications).unwrap(),
            mods
        );
    }

    #[test]
    fn corrupted_payload_fails_to_decode() {
        let payload = StoredPayload::from_bytes(vec![0xff, 0x00, 0x13]);
        assert!(matches!(
            UpdateOperation::decode_modifications(&payload),
            Err(ProtocolError::Codec(_))
        ));
        assert!(UpdateOperation::decode_attributes(&StoredPayload::from_bytes(vec![])).is_err());
    }

    #[test]
    fn empty_delete_payload_decodes_to_no_attributes() {
        let UpdateOperation::Delete { deleted_attributes } = UpdateOperation::delete(&[]).unwrap()
        else {
            panic!("expected delete");
        };
        assert!(!deleted_attributes.is_empty());
        assert!(UpdateOperation::decode_attributes(&deleted_attributes)
            .unwrap()
            .is_empty());
    }
}

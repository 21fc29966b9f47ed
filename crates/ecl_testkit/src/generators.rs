//! Property-based test generators using proptest.
//!
//! Provides strategies for change numbers, cookies, attribute values and
//! update messages.

use ecl_protocol::{
    Attribute, AttributeDescription, ChangeNumber, Modification, ModificationType,
    MultiDomainCookie, UpdateMsg, UpdateOperation,
};
use proptest::prelude::*;
use uuid::Uuid;

/// Largest timestamp that still renders as a four-digit year.
pub const MAX_RENDERABLE_TIME: u64 = 253_402_300_799_999;

/// Strategy for change numbers with a renderable change time.
pub fn change_number_strategy() -> impl Strategy<Value = ChangeNumber> {
    (0..=MAX_RENDERABLE_TIME, any::<u16>(), any::<u32>())
        .prop_map(|(time, server, seq)| ChangeNumber::new(time, server, seq))
}

/// Strategy for domain ids shaped like suffix DNs.
pub fn domain_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("(dc|o|ou)=[a-z][a-z0-9-]{0,10}(,dc=[a-z]{2,6}){0,2}")
        .expect("Invalid regex")
}

/// Strategy for cookies over up to `max_domains` domains.
pub fn cookie_strategy(max_domains: usize) -> impl Strategy<Value = MultiDomainCookie> {
    prop::collection::btree_map(domain_strategy(), change_number_strategy(), 0..=max_domains)
        .prop_map(|domains| {
            let mut cookie = MultiDomainCookie::new();
            for (domain, csn) in domains {
                cookie
                    .advance(&domain, csn)
                    .expect("generated domains are valid");
            }
            cookie
        })
}

/// Strategy for arbitrary attribute values.
pub fn attribute_value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for values that are written without base64.
pub fn plain_value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9]([ -~]{0,30}[A-Za-z0-9])?").expect("Invalid regex")
}

/// Strategy for RDN values that need no DN escaping.
pub fn rdn_value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9.]{0,15}").expect("Invalid regex")
}

/// Strategy for attribute names.
pub fn attribute_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9]{0,15}").expect("Invalid regex")
}

/// Strategy for attributes with arbitrary values.
pub fn attribute_strategy() -> impl Strategy<Value = Attribute> {
    (
        attribute_name_strategy(),
        prop::collection::vec(attribute_value_strategy(), 1..4),
    )
        .prop_map(|(name, values)| Attribute::binary(AttributeDescription::new(name), values))
}

/// Strategy for modifications.
pub fn modification_strategy() -> impl Strategy<Value = Modification> {
    let mod_type = prop_oneof![
        Just(ModificationType::Add),
        Just(ModificationType::Delete),
        Just(ModificationType::Replace),
        Just(ModificationType::Increment),
    ];
    (mod_type, attribute_strategy()).prop_map(|(mod_type, attribute)| {
        Modification::new(mod_type, attribute)
    })
}

/// Strategy for update operations of every kind.
pub fn update_operation_strategy() -> impl Strategy<Value = UpdateOperation> {
    prop_oneof![
        prop::collection::vec(attribute_strategy(), 0..4).prop_map(|attrs| {
            UpdateOperation::add(&attrs).expect("attributes encode")
        }),
        prop::collection::vec(modification_strategy(), 1..4).prop_map(|mods| {
            UpdateOperation::modify(&mods).expect("modifications encode")
        }),
        (rdn_value_strategy(), any::<bool>(), any::<bool>()).prop_map(
            |(value, moved, delete_old)| {
                let superior = moved.then(|| "ou=Moved,dc=example,dc=com".to_string());
                UpdateOperation::modify_dn(format!("cn={value}"), superior, delete_old)
            }
        ),
        prop::collection::vec(attribute_strategy(), 0..4).prop_map(|attrs| {
            UpdateOperation::delete(&attrs).expect("attributes encode")
        }),
    ]
}

/// Strategy for update messages targeting entries below `dc=example,dc=com`.
pub fn update_msg_strategy() -> impl Strategy<Value = UpdateMsg> {
    (
        change_number_strategy(),
        rdn_value_strategy(),
        any::<u128>(),
        update_operation_strategy(),
    )
        .prop_map(|(csn, uid, id, operation)| {
            UpdateMsg::new(
                csn,
                format!("uid={uid},ou=People,dc=example,dc=com"),
                Uuid::from_u128(id),
                operation,
            )
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use ecl_protocol::ldif::{encode_attributes, needs_base64_encoding};
    use ecl_protocol::{ChangelogSchema, ChangelogUpdate, Synthesizer};

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn cookie_roundtrip(cookie in cookie_strategy(4)) {
            let encoded = cookie.encode();
            prop_assert_eq!(MultiDomainCookie::decode(&encoded).unwrap(), cookie);
        }

        #[test]
        fn change_number_roundtrip(csn in change_number_strategy()) {
            let text = csn.to_string();
            prop_assert_eq!(text.len(), 28);
            prop_assert_eq!(text.parse::<ChangeNumber>().unwrap(), csn);
            prop_assert!(csn.change_time().is_ok());
        }

        #[test]
        fn advance_never_regresses(
            cookie in cookie_strategy(3),
            domain in domain_strategy(),
            csn in change_number_strategy(),
        ) {
            let before = cookie.get(&domain);
            let after = cookie.clone().advanced(&domain, csn).unwrap();
            let seen = after.get(&domain).unwrap();
            prop_assert!(seen >= csn);
            if let Some(before) = before {
                prop_assert!(seen >= before);
            }
            prop_assert!(cookie.compare(&after) != ecl_protocol::CookieOrdering::Greater);
        }

        #[test]
        fn escaped_values_decode_to_original(
            name in attribute_name_strategy(),
            value in attribute_value_strategy(),
        ) {
            let attr = Attribute::binary(AttributeDescription::new(name.clone()), vec![value.clone()]);
            let line = encode_attributes(&[attr]);
            let body = line.strip_suffix('\n').unwrap();
            if let Some(encoded) = body.strip_prefix(&format!("{name}:: ")) {
                prop_assert!(needs_base64_encoding(&value) || std::str::from_utf8(&value).is_err());
                prop_assert_eq!(STANDARD.decode(encoded).unwrap(), value);
            } else {
                let plain = body.strip_prefix(&format!("{name}: ")).unwrap();
                prop_assert!(!needs_base64_encoding(&value));
                prop_assert_eq!(plain.as_bytes(), value.as_slice());
            }
        }

        #[test]
        fn plain_values_are_not_escaped(value in plain_value_strategy()) {
            prop_assert!(!needs_base64_encoding(value.as_bytes()));
        }

        #[test]
        fn every_update_synthesizes(msg in update_msg_strategy()) {
            let schema = ChangelogSchema::default();
            let synth = Synthesizer::new(&schema);
            let update = ChangelogUpdate {
                service_id: "dc=example,dc=com".to_string(),
                cookie: MultiDomainCookie::new().advanced("dc=example,dc=com", msg.csn).unwrap(),
                update: msg,
            };
            let record = synth.synthesize(&update).unwrap();
            let entry = synth.to_entry(&record);
            prop_assert_eq!(entry.first_value("replicationCSN"), Some(update.update.csn.to_string()));
            prop_assert!(entry.first_value("cookie").unwrap().contains("dc=example,dc=com:"));
        }
    }
}

//! Change payload and LDIF record encoder.
//!
//! Renders attribute and modification lists into the line-oriented text
//! carried by the `changes` and `deletedentryattrs` attributes of a change
//! entry. Every value goes through [`needs_base64_encoding`]; the same rule
//! applies to add, delete and modify payloads.

use crate::entry::{Attribute, Entry};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a single modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModificationType {
    /// Add values.
    Add,
    /// Delete values (or the whole attribute when none are given).
    Delete,
    /// Replace all values.
    Replace,
    /// Increment an integer value.
    Increment,
}

impl ModificationType {
    /// The LDIF keyword for this modification type.
    pub fn ldif_name(&self) -> &'static str {
        match self {
            ModificationType::Add => "add",
            ModificationType::Delete => "delete",
            ModificationType::Replace => "replace",
            ModificationType::Increment => "increment",
        }
    }
}

impl fmt::Display for ModificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ldif_name())
    }
}

/// One modification of a modify operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    /// What to do.
    pub mod_type: ModificationType,
    /// Which attribute, with the values involved.
    pub attribute: Attribute,
}

impl Modification {
    /// Creates a modification.
    pub fn new(mod_type: ModificationType, attribute: Attribute) -> Self {
        Self {
            mod_type,
            attribute,
        }
    }

    /// Shorthand for a replace with string values.
    pub fn replace<I, V>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self::new(ModificationType::Replace, Attribute::new(name, values))
    }
}

/// Returns true if `value` must be written as `name:: base64`.
///
/// A value needs escaping when it starts with a space, `:` or `<`, ends
/// with a space, or contains NUL, CR, LF or any byte outside 7-bit ASCII.
pub fn needs_base64_encoding(value: &[u8]) -> bool {
    let (Some(&first), Some(&last)) = (value.first(), value.last()) else {
        return false;
    };
    if matches!(first, b' ' | b':' | b'<') || last == b' ' {
        return true;
    }
    value
        .iter()
        .any(|&b| b == 0 || b == b'\n' || b == b'\r' || b > 0x7f)
}

/// Appends one `name: value` or `name:: base64` line, newline included.
fn push_value_line(out: &mut String, name: &str, value: &[u8]) {
    out.push_str(name);
    match std::str::from_utf8(value) {
        Ok(text) if !needs_base64_encoding(value) => {
            out.push_str(": ");
            out.push_str(text);
        }
        _ => {
            out.push_str(":: ");
            out.push_str(&STANDARD.encode(value));
        }
    }
    out.push('\n');
}

/// Encodes an attribute list, one line per value.
///
/// Used for the attributes of an added entry and the captured attributes
/// of a deleted entry. Attributes appear in the given order.
pub fn encode_attributes(attributes: &[Attribute]) -> String {
    let mut out = String::new();
    for attribute in attributes {
        let name = attribute.description().to_string();
        for value in attribute.values() {
            push_value_line(&mut out, &name, value);
        }
    }
    out
}

/// Encodes a modification list.
///
/// Each block is `<modtype>: <attr>`, the value lines, then `-`. Blocks are
/// separated by a newline and nothing follows the final `-`.
pub fn encode_modifications(modifications: &[Modification]) -> String {
    let mut out = String::new();
    for (i, modification) in modifications.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let name = modification.attribute.description().to_string();
        out.push_str(modification.mod_type.ldif_name());
        out.push_str(": ");
        out.push_str(&name);
        out.push('\n');
        for value in modification.attribute.values() {
            push_value_line(&mut out, &name, value);
        }
        out.push('-');
    }
    out
}

/// Writes an entry as an LDIF record: the `dn` line, object classes, user
/// attributes, then operational attributes. The record ends with a blank
/// line.
pub fn encode_entry(entry: &Entry) -> String {
    let mut out = String::new();
    push_value_line(&mut out, "dn", entry.dn().to_string().as_bytes());
    for object_class in entry.object_classes() {
        push_value_line(&mut out, "objectClass", object_class.as_bytes());
    }
    out.push_str(&encode_attributes(entry.user_attributes()));
    out.push_str(&encode_attributes(entry.operational_attributes()));
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::Dn;
    use crate::entry::AttributeDescription;

    #[test]
    fn safe_values_are_plain() {
        assert!(!needs_base64_encoding(b""));
        assert!(!needs_base64_encoding(b"Bob"));
        assert!(!needs_base64_encoding(b"a value: with colon"));
        assert!(!needs_base64_encoding(b"x<y"));
    }

    #[test]
    fn unsafe_values_need_base64() {
        assert!(needs_base64_encoding(b" leading"));
        assert!(needs_base64_encoding(b"trailing "));
        assert!(needs_base64_encoding(b":colon"));
        assert!(needs_base64_encoding(b"<url"));
        assert!(needs_base64_encoding(b"nul\0byte"));
        assert!(needs_base64_encoding(b"two\nlines"));
        assert!(needs_base64_encoding(b"cr\r"));
        assert!(needs_base64_encoding("caf\u{e9}".as_bytes()));
        assert!(needs_base64_encoding(&[0xff, 0xfe]));
    }

    #[test]
    fn modify_single_replace() {
        let mods = vec![Modification::replace("cn", ["Bob"])];
        assert_eq!(encode_modifications(&mods), "replace: cn\ncn: Bob\n-");
    }

    #[test]
    fn modify_blocks_are_separated_without_trailer() {
        let mods = vec![
            Modification::replace("cn", ["Bob"]),
            Modification::new(ModificationType::Add, Attribute::new("mail", ["a@x", "b@x"])),
            Modification::new(
                ModificationType::Delete,
                Attribute::empty(AttributeDescription::new("description")),
            ),
        ];
        assert_eq!(
            encode_modifications(&mods),
            "replace: cn\ncn: Bob\n-\nadd: mail\nmail: a@x\nmail: b@x\n-\ndelete: description\n-"
        );
    }

    #[test]
    fn modify_escapes_values() {
        let mods = vec![Modification::replace("sn", [" padded"])];
        assert_eq!(
            encode_modifications(&mods),
            "replace: sn\nsn:: IHBhZGRlZA==\n-"
        );
    }

    #[test]
    fn empty_modification_list() {
        assert_eq!(encode_modifications(&[]), "");
    }

    #[test]
    fn attributes_one_line_per_value() {
        let attrs = vec![
            Attribute::new("objectClass", ["top", "person"]),
            Attribute::new("cn;lang-fr", ["Jean"]),
            Attribute::binary(AttributeDescription::new("jpegPhoto"), vec![vec![0, 1, 2]]),
        ];
        assert_eq!(
            encode_attributes(&attrs),
            "objectClass: top\nobjectClass: person\ncn;lang-fr: Jean\njpegPhoto:: AAEC\n"
        );
    }

    #[test]
    fn base64_decodes_to_original_bytes() {
        let raw = b"\0 odd\xffbytes".to_vec();
        let attrs = vec![Attribute::binary(AttributeDescription::new("x"), vec![raw.clone()])];
        let line = encode_attributes(&attrs);
        let encoded = line
            .trim_end()
            .strip_prefix("x:: ")
            .expect("base64 line");
        assert_eq!(STANDARD.decode(encoded).unwrap(), raw);
    }

    #[test]
    fn entry_record() {
        let mut entry = Entry::new(
            Dn::parse("cn=changelog").unwrap(),
            vec!["top".into(), "container".into()],
        );
        entry.add_user_attribute(Attribute::single("changes", "replace: cn\n"));
        entry.add_operational_attribute(Attribute::single("cookie", "o=test:00;"));
        assert_eq!(
            encode_entry(&entry),
            "dn: cn=changelog\nobjectClass: top\nobjectClass: container\n\
             changes:: cmVwbGFjZTogY24K\ncookie: o=test:00;\n\n"
        );
    }
}

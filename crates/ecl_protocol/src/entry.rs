//! Directory entries and attributes.

use crate::dn::Dn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// An attribute name with its options (`cn;lang-fr`).
///
/// Options are kept sorted so that the rendered description is stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeDescription {
    name: String,
    options: BTreeSet<String>,
}

impl AttributeDescription {
    /// Creates a description without options.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: BTreeSet::new(),
        }
    }

    /// Parses `name;opt1;opt2`.
    pub fn parse(s: &str) -> Self {
        let mut parts = s.split(';');
        let name = parts.next().unwrap_or_default().trim().to_string();
        let options = parts
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        Self { name, options }
    }

    /// Adds an option.
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.insert(option.into());
        self
    }

    /// The attribute type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sorted options.
    pub fn options(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(String::as_str)
    }

    /// Case-insensitive match on the type name only.
    pub fn has_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for AttributeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for option in &self.options {
            write!(f, ";{option}")?;
        }
        Ok(())
    }
}

/// An attribute: a description plus its ordered values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    description: AttributeDescription,
    values: Vec<Vec<u8>>,
}

impl Attribute {
    /// Creates an attribute with no values.
    pub fn empty(description: AttributeDescription) -> Self {
        Self {
            description,
            values: Vec::new(),
        }
    }

    /// Creates an attribute from string values.
    pub fn new<I, V>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            description: AttributeDescription::parse(name),
            values: values.into_iter().map(|v| v.into().into_bytes()).collect(),
        }
    }

    /// Creates a single-valued attribute.
    pub fn single(name: &str, value: impl Into<String>) -> Self {
        Self::new(name, [value.into()])
    }

    /// Creates an attribute from raw byte values.
    pub fn binary(description: AttributeDescription, values: Vec<Vec<u8>>) -> Self {
        Self {
            description,
            values,
        }
    }

    /// The attribute description.
    pub fn description(&self) -> &AttributeDescription {
        &self.description
    }

    /// The attribute type name.
    pub fn name(&self) -> &str {
        self.description.name()
    }

    /// Raw values in order.
    pub fn values(&self) -> &[Vec<u8>] {
        &self.values
    }

    /// Values that are valid UTF-8, in order.
    pub fn string_values(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter_map(|v| std::str::from_utf8(v).ok())
    }

    /// The first value as UTF-8, if any.
    pub fn first_string(&self) -> Option<&str> {
        self.string_values().next()
    }

    /// Appends a value.
    pub fn push(&mut self, value: impl Into<Vec<u8>>) {
        self.values.push(value.into());
    }

    /// Returns true if the attribute has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A directory entry as returned to a search client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    dn: Dn,
    object_classes: Vec<String>,
    user_attributes: Vec<Attribute>,
    operational_attributes: Vec<Attribute>,
}

impl Entry {
    /// Creates an entry with the given object classes and no attributes.
    pub fn new(dn: Dn, object_classes: Vec<String>) -> Self {
        Self {
            dn,
            object_classes,
            user_attributes: Vec::new(),
            operational_attributes: Vec::new(),
        }
    }

    /// The entry DN.
    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// Object classes in declaration order.
    pub fn object_classes(&self) -> &[String] {
        &self.object_classes
    }

    /// User attributes in insertion order.
    pub fn user_attributes(&self) -> &[Attribute] {
        &self.user_attributes
    }

    /// Operational attributes in insertion order.
    pub fn operational_attributes(&self) -> &[Attribute] {
        &self.operational_attributes
    }

    /// Adds a user attribute.
    pub fn add_user_attribute(&mut self, attribute: Attribute) {
        self.user_attributes.push(attribute);
    }

    /// Adds an operational attribute.
    pub fn add_operational_attribute(&mut self, attribute: Attribute) {
        self.operational_attributes.push(attribute);
    }

    /// Returns true if the entry has the object class (case-insensitive).
    pub fn has_object_class(&self, name: &str) -> bool {
        self.object_classes
            .iter()
            .any(|oc| oc.eq_ignore_ascii_case(name))
    }

    /// Finds an attribute by type name among user then operational attributes.
    ///
    /// `objectClass` is answered from the object class list.
    pub fn attribute(&self, name: &str) -> Option<Attribute> {
        if name.eq_ignore_ascii_case("objectclass") {
            return Some(Attribute::new("objectClass", self.object_classes.clone()));
        }
        self.user_attributes
            .iter()
            .chain(&self.operational_attributes)
            .find(|a| a.description().has_name(name))
            .cloned()
    }

    /// Convenience accessor for the first string value of an attribute.
    pub fn first_value(&self, name: &str) -> Option<String> {
        self.attribute(name)
            .and_then(|a| a.first_string().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_options_are_sorted() {
        let desc = AttributeDescription::parse("cn;lang-fr;binary");
        assert_eq!(desc.name(), "cn");
        assert_eq!(desc.to_string(), "cn;binary;lang-fr");

        let built = AttributeDescription::new("cn")
            .with_option("lang-fr")
            .with_option("binary");
        assert_eq!(built, desc);
    }

    #[test]
    fn attribute_values() {
        let mut attr = Attribute::new("mail", ["a@example.com"]);
        attr.push(vec![0xff, 0x00]);
        assert_eq!(attr.values().len(), 2);
        assert_eq!(attr.string_values().count(), 1);
        assert_eq!(attr.first_string(), Some("a@example.com"));
    }

    #[test]
    fn entry_lookup() {
        let mut entry = Entry::new(
            Dn::parse("cn=changelog").unwrap(),
            vec!["top".into(), "changeLogEntry".into()],
        );
        entry.add_user_attribute(Attribute::single("changeType", "add"));
        entry.add_operational_attribute(Attribute::single("cookie", "o=test:00;"));

        assert!(entry.has_object_class("changelogentry"));
        assert_eq!(entry.first_value("changetype").as_deref(), Some("add"));
        assert_eq!(entry.first_value("COOKIE").as_deref(), Some("o=test:00;"));
        assert_eq!(
            entry.attribute("objectClass").unwrap().values().len(),
            2
        );
        assert!(entry.attribute("missing").is_none());
    }
}

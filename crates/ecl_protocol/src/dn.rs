//! Distinguished names.
//!
//! Only what the changelog needs: parsing, normalization for `targetdn`,
//! and ancestry tests for base/scope matching. Values are compared
//! case-insensitively, which matches the directory's default matching rule
//! for the naming attributes that appear in practice.

use crate::error::{ProtocolError, ProtocolResult};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// One relative distinguished name component (`type=value`).
#[derive(Debug, Clone)]
pub struct Rdn {
    attr: String,
    value: String,
}

impl Rdn {
    /// Creates an RDN from an attribute type and a raw (already escaped) value.
    pub fn new(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attr: attr.into(),
            value: value.into(),
        }
    }

    /// Attribute type as written.
    pub fn attr(&self) -> &str {
        &self.attr
    }

    /// Value as written, escapes preserved.
    pub fn value(&self) -> &str {
        &self.value
    }

    fn normalized(&self) -> String {
        format!(
            "{}={}",
            self.attr.to_ascii_lowercase(),
            self.value.to_lowercase()
        )
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr, self.value)
    }
}

/// A distinguished name, leaf RDN first.
///
/// Equality and hashing use the normalized form.
#[derive(Debug, Clone, Default)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// The empty (root) DN.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a DN string.
    pub fn parse(s: &str) -> ProtocolResult<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut rdns = Vec::new();
        for component in split_unescaped(trimmed, ',') {
            let (attr, value) = split_first_unescaped(component, '=')
                .ok_or_else(|| ProtocolError::dn(s, "RDN without '='"))?;
            let attr = attr.trim();
            if attr.is_empty() {
                return Err(ProtocolError::dn(s, "empty attribute type"));
            }
            if !attr
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            {
                return Err(ProtocolError::dn(s, "invalid attribute type"));
            }
            rdns.push(Rdn::new(attr, value.trim()));
        }
        Ok(Self { rdns })
    }

    /// Returns the RDNs, leaf first.
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Returns the leaf RDN, or `None` for the root DN.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// Returns true for the empty DN.
    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Number of RDN components.
    pub fn depth(&self) -> usize {
        self.rdns.len()
    }

    /// Returns the parent DN, or `None` for the root DN.
    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            return None;
        }
        Some(Dn {
            rdns: self.rdns[1..].to_vec(),
        })
    }

    /// Returns a new DN with `rdn` added below this one.
    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Dn { rdns }
    }

    /// Returns `self` placed below `suffix`.
    pub fn under(&self, suffix: &Dn) -> Dn {
        let mut rdns = self.rdns.clone();
        rdns.extend(suffix.rdns.iter().cloned());
        Dn { rdns }
    }

    /// Returns true if `self` equals `ancestor` or lies below it.
    pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
        if ancestor.rdns.len() > self.rdns.len() {
            return false;
        }
        let offset = self.rdns.len() - ancestor.rdns.len();
        self.rdns[offset..]
            .iter()
            .zip(&ancestor.rdns)
            .all(|(a, b)| a.normalized() == b.normalized())
    }

    /// Returns true if `self` is exactly one level below `parent`.
    pub fn is_child_of(&self, parent: &Dn) -> bool {
        self.rdns.len() == parent.rdns.len() + 1 && self.is_descendant_of(parent)
    }

    /// Normalized string form: trimmed components, lowercase types and values.
    pub fn to_normalized_string(&self) -> String {
        self.rdns
            .iter()
            .map(Rdn::normalized)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns.len() == other.rdns.len() && self.is_descendant_of(other)
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_normalized_string().hash(state);
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{rdn}")?;
        }
        Ok(())
    }
}

impl FromStr for Dn {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Splits at every `sep` that is not preceded by a backslash escape.
fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

fn split_first_unescaped(s: &str, sep: char) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            return Some((&s[..i], &s[i + c.len_utf8()..]));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_spacing() {
        let dn = Dn::parse("uid=x, ou=People ,DC=Example,dc=com").unwrap();
        assert_eq!(dn.to_normalized_string(), "uid=x,ou=people,dc=example,dc=com");
        assert_eq!(dn.to_string(), "uid=x,ou=People,DC=Example,dc=com");
        assert_eq!(dn.depth(), 4);
    }

    #[test]
    fn root_dn() {
        let root = Dn::parse("").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_normalized_string(), "");
        assert!(root.parent().is_none());
    }

    #[test]
    fn escaped_comma_stays_in_value() {
        let dn = Dn::parse(r"cn=Smith\, John,o=test").unwrap();
        assert_eq!(dn.depth(), 2);
        assert_eq!(dn.rdn().unwrap().value(), r"Smith\, John");
    }

    #[test]
    fn rejects_malformed() {
        assert!(Dn::parse("uid").is_err());
        assert!(Dn::parse("=x,o=test").is_err());
        assert!(Dn::parse("u id=x").is_err());
    }

    #[test]
    fn ancestry() {
        let base = Dn::parse("cn=changelog").unwrap();
        let entry = Dn::parse("cn=0001,o=test,CN=Changelog").unwrap();
        let child = Dn::parse("o=test,cn=changelog").unwrap();

        assert!(entry.is_descendant_of(&base));
        assert!(base.is_descendant_of(&base));
        assert!(!base.is_descendant_of(&entry));
        assert!(child.is_child_of(&base));
        assert!(!entry.is_child_of(&base));
        assert!(entry.is_descendant_of(&Dn::root()));
    }

    #[test]
    fn equality_uses_normalized_form() {
        assert_eq!(
            Dn::parse("O=Test").unwrap(),
            Dn::parse("o=test").unwrap()
        );
        assert_ne!(Dn::parse("o=test").unwrap(), Dn::parse("o=other").unwrap());
    }

    #[test]
    fn child_and_parent() {
        let base = Dn::parse("cn=changelog").unwrap();
        let child = base.child(Rdn::new("cn", "abc"));
        assert_eq!(child.to_string(), "cn=abc,cn=changelog");
        assert_eq!(child.parent().unwrap(), base);
    }
}

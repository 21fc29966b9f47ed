//! Multi-domain resumption cookies.
//!
//! A cookie records, for every replicated domain, the last change number a
//! client has been given. Its string form is the compatibility surface with
//! clients and must stay stable:
//!
//! ```text
//! dc=example,dc=com:0000018cc6e4a3a600010000002a;o=test:0000018cc6e4a3a7000200000001;
//! ```
//!
//! Entries are sorted by domain id and each one is terminated by `;`, so two
//! equal cookies always encode to the same string.

use crate::csn::ChangeNumber;
use crate::error::{ProtocolError, ProtocolResult};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::str::FromStr;

/// Result of comparing two cookies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieOrdering {
    /// Every domain of the left cookie is at or below the right cookie, and
    /// at least one is strictly below (or missing on the left).
    Less,
    /// Both cookies hold the same change number for every domain.
    Equal,
    /// Mirror of [`CookieOrdering::Less`].
    Greater,
    /// Each cookie is ahead of the other for some domain.
    Incomparable,
}

/// Last observed change number per replicated domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MultiDomainCookie {
    domains: BTreeMap<String, ChangeNumber>,
}

impl MultiDomainCookie {
    /// Creates an empty cookie (nothing observed for any domain).
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a cookie from its string form.
    ///
    /// Surrounding whitespace and empty segments are ignored. Each segment is
    /// split at its last `:` because domain ids are DNs and may themselves
    /// contain colons.
    pub fn decode(s: &str) -> ProtocolResult<Self> {
        let mut domains = BTreeMap::new();
        for segment in s.trim().split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (domain, csn) = segment.rsplit_once(':').ok_or_else(|| {
                ProtocolError::MalformedCookie(format!("segment {segment:?} has no ':'"))
            })?;
            let domain = domain.trim();
            if domain.is_empty() {
                return Err(ProtocolError::MalformedCookie(format!(
                    "segment {segment:?} has an empty domain"
                )));
            }
            let csn = ChangeNumber::from_str(csn.trim())
                .map_err(|e| ProtocolError::MalformedCookie(e.to_string()))?;
            if domains.insert(domain.to_string(), csn).is_some() {
                return Err(ProtocolError::MalformedCookie(format!(
                    "domain {domain:?} appears twice"
                )));
            }
        }
        Ok(Self { domains })
    }

    /// Encodes the cookie to its canonical string form.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Returns the change number recorded for `domain`, if any.
    pub fn get(&self, domain: &str) -> Option<ChangeNumber> {
        self.domains.get(domain).copied()
    }

    /// Returns true if the cookie has already seen `csn` for `domain`.
    pub fn covers(&self, domain: &str, csn: ChangeNumber) -> bool {
        self.get(domain).is_some_and(|seen| csn <= seen)
    }

    /// Records delivery of `csn` for `domain`.
    ///
    /// The stored value never regresses: advancing to an older change number
    /// leaves the cookie unchanged.
    pub fn advance(&mut self, domain: &str, csn: ChangeNumber) -> ProtocolResult<()> {
        validate_domain(domain)?;
        match self.domains.get_mut(domain) {
            Some(seen) => {
                if csn > *seen {
                    *seen = csn;
                }
            }
            None => {
                self.domains.insert(domain.to_string(), csn);
            }
        }
        Ok(())
    }

    /// Builder-style variant of [`MultiDomainCookie::advance`].
    pub fn advanced(mut self, domain: &str, csn: ChangeNumber) -> ProtocolResult<Self> {
        self.advance(domain, csn)?;
        Ok(self)
    }

    /// Advances every domain of `other` into `self`.
    pub fn merge(&mut self, other: &Self) {
        for (domain, csn) in &other.domains {
            match self.domains.get_mut(domain) {
                Some(seen) if *seen >= *csn => {}
                Some(seen) => *seen = *csn,
                None => {
                    self.domains.insert(domain.clone(), *csn);
                }
            }
        }
    }

    /// Keeps only the domains for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, ChangeNumber) -> bool) {
        self.domains.retain(|domain, csn| keep(domain, *csn));
    }

    /// Compares two cookies domain by domain.
    ///
    /// A domain missing from one side counts as below every change number.
    pub fn compare(&self, other: &Self) -> CookieOrdering {
        let mut less = false;
        let mut greater = false;

        for (domain, csn) in &self.domains {
            match other.domains.get(domain) {
                Some(theirs) if csn < theirs => less = true,
                Some(theirs) if csn > theirs => greater = true,
                Some(_) => {}
                None => greater = true,
            }
        }
        if other
            .domains
            .keys()
            .any(|domain| !self.domains.contains_key(domain))
        {
            less = true;
        }

        match (less, greater) {
            (false, false) => CookieOrdering::Equal,
            (true, false) => CookieOrdering::Less,
            (false, true) => CookieOrdering::Greater,
            (true, true) => CookieOrdering::Incomparable,
        }
    }

    /// Iterates over `(domain, change number)` pairs in domain order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ChangeNumber)> {
        self.domains.iter().map(|(d, c)| (d.as_str(), *c))
    }

    /// Returns the domain ids present in the cookie.
    pub fn domains(&self) -> btree_map::Keys<'_, String, ChangeNumber> {
        self.domains.keys()
    }

    /// Returns the number of domains recorded.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Returns true if no domain has been observed.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl fmt::Display for MultiDomainCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (domain, csn) in &self.domains {
            write!(f, "{domain}:{csn};")?;
        }
        Ok(())
    }
}

impl FromStr for MultiDomainCookie {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Checks that a domain id survives a round trip through the string form.
pub fn validate_domain(domain: &str) -> ProtocolResult<()> {
    if domain.trim().is_empty() || domain.trim() != domain || domain.contains(';') {
        return Err(ProtocolError::InvalidDomain(domain.to_string()));
    }
    Ok(())
}

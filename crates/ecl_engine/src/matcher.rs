//! Base, scope and filter matching.
//!
//! The engine only needs a yes/no answer per candidate entry, so matching is
//! behind [`EntryMatcher`]. [`BasicMatcher`] understands presence, equality,
//! `&`, `|` and `!`, which covers what changelog clients send in practice.

use crate::error::{EngineError, EngineResult};
use ecl_protocol::{Dn, Entry};

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchScope {
    /// The base entry only.
    BaseObject,
    /// Immediate children of the base.
    SingleLevel,
    /// The base and everything below it.
    WholeSubtree,
    /// Everything below the base, excluding it.
    Subordinates,
}

impl SearchScope {
    /// Returns true if `dn` is within this scope of `base`.
    pub fn contains(&self, base: &Dn, dn: &Dn) -> bool {
        match self {
            SearchScope::BaseObject => dn == base,
            SearchScope::SingleLevel => dn.is_child_of(base),
            SearchScope::WholeSubtree => dn.is_descendant_of(base),
            SearchScope::Subordinates => dn.is_descendant_of(base) && dn != base,
        }
    }
}

/// Decides whether entries belong to a search result.
///
/// A search parses its filter once with [`EntryMatcher::parse_filter`] and
/// hands the parsed form to every [`EntryMatcher::matches`] call.
pub trait EntryMatcher: Send + Sync {
    /// Parses a filter, rejecting filters that cannot be evaluated.
    fn parse_filter(&self, filter: &str) -> EngineResult<Filter>;

    /// Returns true if `entry` is in scope and matches `filter`.
    fn matches(
        &self,
        entry: &Entry,
        base: &Dn,
        scope: SearchScope,
        filter: &Filter,
    ) -> EngineResult<bool>;
}

/// A parsed search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `(&...)`
    And(Vec<Filter>),
    /// `(|...)`
    Or(Vec<Filter>),
    /// `(!...)`
    Not(Box<Filter>),
    /// `(attr=*)`
    Present(String),
    /// `(attr=value)`
    Equality(String, Vec<u8>),
}

impl Filter {
    /// Parses the string form. Outer parentheses may be omitted.
    pub fn parse(s: &str) -> EngineResult<Filter> {
        let trimmed = s.trim();
        let wrapped;
        let text = if trimmed.starts_with('(') {
            trimmed
        } else {
            wrapped = format!("({trimmed})");
            &wrapped
        };
        let mut parser = Parser {
            input: text.as_bytes(),
            pos: 0,
            source: s,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.input.len() {
            return Err(EngineError::invalid_filter(s, "trailing characters"));
        }
        Ok(filter)
    }

    /// Evaluates the filter against an entry.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Filter::And(parts) => parts.iter().all(|f| f.matches(entry)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(entry)),
            Filter::Not(inner) => !inner.matches(entry),
            Filter::Present(attr) => entry.attribute(attr).is_some_and(|a| !a.is_empty()),
            Filter::Equality(attr, value) => entry.attribute(attr).is_some_and(|a| {
                a.values()
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(value))
            }),
        }
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn fail(&self, reason: &str) -> EngineError {
        EngineError::invalid_filter(self.source, format!("{reason} at offset {}", self.pos))
    }

    fn expect(&mut self, byte: u8) -> EngineResult<()> {
        if self.input.get(self.pos) == Some(&byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.fail(&format!("expected '{}'", byte as char)))
        }
    }

    fn filter(&mut self) -> EngineResult<Filter> {
        self.expect(b'(')?;
        let filter = match self.input.get(self.pos) {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.fail("unexpected end")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn list(&mut self) -> EngineResult<Vec<Filter>> {
        let mut parts = Vec::new();
        while self.input.get(self.pos) == Some(&b'(') {
            parts.push(self.filter()?);
        }
        if parts.is_empty() {
            return Err(self.fail("empty filter list"));
        }
        Ok(parts)
    }

    fn item(&mut self) -> EngineResult<Filter> {
        let start = self.pos;
        while let Some(&b) = self.input.get(self.pos) {
            if b == b'=' || b == b'(' || b == b')' {
                break;
            }
            self.pos += 1;
        }
        let attr = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.fail("attribute is not UTF-8"))?
            .trim()
            .to_string();
        if attr.is_empty()
            || !attr
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ';' || c == '.')
        {
            return Err(self.fail("invalid attribute description"));
        }
        self.expect(b'=')?;

        let value_start = self.pos;
        while let Some(&b) = self.input.get(self.pos) {
            if b == b'(' || b == b')' {
                break;
            }
            self.pos += 1;
        }
        let raw = &self.input[value_start..self.pos];
        if raw == b"*" {
            return Ok(Filter::Present(attr));
        }
        if raw.contains(&b'*') {
            return Err(self.fail("substring filters are not supported"));
        }
        Ok(Filter::Equality(attr, self.unescape(raw)?))
    }

    fn unescape(&self, raw: &[u8]) -> EngineResult<Vec<u8>> {
        let mut out = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'\\' {
                let byte = match raw.get(i + 1..i + 3) {
                    Some(&[hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                        (hex_value(hi) << 4) | hex_value(lo)
                    }
                    _ => return Err(self.fail("bad escape")),
                };
                out.push(byte);
                i += 3;
            } else {
                out.push(raw[i]);
                i += 1;
            }
        }
        Ok(out)
    }
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Reference matcher over [`Filter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicMatcher;

impl EntryMatcher for BasicMatcher {
    fn parse_filter(&self, filter: &str) -> EngineResult<Filter> {
        Filter::parse(filter)
    }

    fn matches(
        &self,
        entry: &Entry,
        base: &Dn,
        scope: SearchScope,
        filter: &Filter,
    ) -> EngineResult<bool> {
        Ok(scope.contains(base, entry.dn()) && filter.matches(entry))
    }
}

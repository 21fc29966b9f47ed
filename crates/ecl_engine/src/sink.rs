//! Destinations for search result entries.

use ecl_protocol::{Entry, ResponseControl, ResultCode};

/// Why a sink refused an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRejected {
    /// Result code the search ends with.
    pub code: ResultCode,
    /// Diagnostic message.
    pub message: Option<String>,
}

impl EntryRejected {
    /// Creates a rejection.
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }
}

/// Receives the entries of one search.
pub trait SearchResultSink {
    /// Sends an entry to the client.
    ///
    /// A rejection ends the search; no further entries are offered.
    fn return_entry(
        &mut self,
        entry: &Entry,
        controls: &[ResponseControl],
    ) -> Result<(), EntryRejected>;
}

/// An entry together with its response controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnedEntry {
    /// The entry.
    pub entry: Entry,
    /// Attached controls.
    pub controls: Vec<ResponseControl>,
}

impl ReturnedEntry {
    /// Cookie of the entry changelog notification control, if any.
    pub fn cookie(&self) -> Option<&str> {
        self.controls.iter().find_map(|control| match control {
            ResponseControl::EntryChangelogNotification { cookie } => Some(cookie.as_str()),
        })
    }
}

/// Collects returned entries in memory, with an optional size limit.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    entries: Vec<ReturnedEntry>,
    size_limit: Option<usize>,
}

impl CollectingSink {
    /// Creates an unlimited sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses entries beyond `limit`.
    pub fn with_size_limit(mut self, limit: usize) -> Self {
        self.size_limit = Some(limit);
        self
    }

    /// Entries received so far.
    pub fn entries(&self) -> &[ReturnedEntry] {
        &self.entries
    }

    /// Consumes the sink.
    pub fn into_entries(self) -> Vec<ReturnedEntry> {
        self.entries
    }

    /// Number of entries received.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was received.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SearchResultSink for CollectingSink {
    fn return_entry(
        &mut self,
        entry: &Entry,
        controls: &[ResponseControl],
    ) -> Result<(), EntryRejected> {
        if self.size_limit.is_some_and(|limit| self.entries.len() >= limit) {
            return Err(EntryRejected::new(
                ResultCode::SizeLimitExceeded,
                "size limit exceeded",
            ));
        }
        self.entries.push(ReturnedEntry {
            entry: entry.clone(),
            controls: controls.to_vec(),
        });
        Ok(())
    }
}

impl<F> SearchResultSink for F
where
    F: FnMut(&Entry, &[ResponseControl]) -> Result<(), EntryRejected>,
{
    fn return_entry(
        &mut self,
        entry: &Entry,
        controls: &[ResponseControl],
    ) -> Result<(), EntryRejected> {
        self(entry, controls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecl_protocol::Dn;

    fn entry() -> Entry {
        Entry::new(Dn::parse("cn=changelog").unwrap(), vec!["top".into()])
    }

    #[test]
    fn size_limit() {
        let mut sink = CollectingSink::new().with_size_limit(1);
        assert!(sink.return_entry(&entry(), &[]).is_ok());
        let err = sink.return_entry(&entry(), &[]).unwrap_err();
        assert_eq!(err.code, ResultCode::SizeLimitExceeded);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn returned_entry_cookie() {
        let mut sink = CollectingSink::new();
        sink.return_entry(
            &entry(),
            &[ResponseControl::EntryChangelogNotification {
                cookie: "o=test:00;".into(),
            }],
        )
        .unwrap();
        sink.return_entry(&entry(), &[]).unwrap();
        let entries = sink.into_entries();
        assert_eq!(entries[0].cookie(), Some("o=test:00;"));
        assert_eq!(entries[1].cookie(), None);
    }

    #[test]
    fn closures_are_sinks() {
        let mut count = 0;
        let mut sink = |_: &Entry, _: &[ResponseControl]| -> Result<(), EntryRejected> {
            count += 1;
            Ok(())
        };
        sink.return_entry(&entry(), &[]).unwrap();
        sink.return_entry(&entry(), &[]).unwrap();
        assert_eq!(count, 2);
    }
}

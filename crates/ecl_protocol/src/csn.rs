//! Change numbers (replication CSNs).

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

/// Length of the canonical hex form.
const CSN_HEX_LEN: usize = 28;

/// `yyyyMMddHHmmssZ`, always rendered in UTC.
const CHANGE_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day][hour][minute][second]Z");

/// A logical timestamp that totally orders replicated changes.
///
/// Ordering is lexicographic on `(time, server_id, seqnum)`, which is the
/// field declaration order, so the derived `Ord` is the replication order.
///
/// The canonical string form is 28 lowercase hex digits:
/// 16 for the timestamp, 4 for the server id, 8 for the sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeNumber {
    time: u64,
    server_id: u16,
    seqnum: u32,
}

impl ChangeNumber {
    /// Creates a change number.
    pub const fn new(time: u64, server_id: u16, seqnum: u32) -> Self {
        Self {
            time,
            server_id,
            seqnum,
        }
    }

    /// Wall-clock milliseconds since the Unix epoch.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Identifier of the replica that generated the change.
    pub fn server_id(&self) -> u16 {
        self.server_id
    }

    /// Per-replica sequence counter.
    pub fn seqnum(&self) -> u32 {
        self.seqnum
    }

    /// Renders the timestamp component as a UTC generalized time.
    pub fn change_time(&self) -> ProtocolResult<String> {
        let nanos = i128::from(self.time) * 1_000_000;
        let instant = OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|_| {
            ProtocolError::change_number(self.to_string(), "timestamp out of range")
        })?;
        instant
            .format(CHANGE_TIME_FORMAT)
            .map_err(|_| ProtocolError::change_number(self.to_string(), "timestamp out of range"))
    }
}

impl fmt::Display for ChangeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:04x}{:08x}", self.time, self.server_id, self.seqnum)
    }
}

impl FromStr for ChangeNumber {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CSN_HEX_LEN {
            return Err(ProtocolError::change_number(s, "expected 28 hex digits"));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::change_number(s, "invalid hex digit"));
        }
        let bad = |_| ProtocolError::change_number(s, "value out of range");
        let time = u64::from_str_radix(&s[0..16], 16).map_err(bad)?;
        let server_id = u16::from_str_radix(&s[16..20], 16).map_err(bad)?;
        let seqnum = u32::from_str_radix(&s[20..28], 16).map_err(bad)?;
        Ok(Self::new(time, server_id, seqnum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_form() {
        let csn = ChangeNumber::new(1000, 5, 1);
        assert_eq!(csn.to_string(), "00000000000003e8000500000001");
        assert_eq!(csn.to_string().len(), 28);
    }

    #[test]
    fn parse_roundtrip() {
        let csn = ChangeNumber::new(0x0123_4567_89ab_cdef, 0xfffe, 42);
        let parsed: ChangeNumber = csn.to_string().parse().unwrap();
        assert_eq!(parsed, csn);

        let upper: ChangeNumber = csn.to_string().to_uppercase().parse().unwrap();
        assert_eq!(upper, csn);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("".parse::<ChangeNumber>().is_err());
        assert!("00000000000003e800050000000".parse::<ChangeNumber>().is_err());
        assert!("00000000000003e8000500000001ff".parse::<ChangeNumber>().is_err());
        assert!("g0000000000003e8000500000001".parse::<ChangeNumber>().is_err());
        assert!("+0000000000003e8000500000001".parse::<ChangeNumber>().is_err());
    }

    #[test]
    fn ordering_is_time_then_server_then_seqnum() {
        let a = ChangeNumber::new(1, 9, 9);
        let b = ChangeNumber::new(2, 0, 0);
        let c = ChangeNumber::new(2, 1, 0);
        let d = ChangeNumber::new(2, 1, 1);
        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
    }

    #[test]
    fn change_time_is_utc_generalized_time() {
        // 2024-01-02T03:04:05.678Z
        let csn = ChangeNumber::new(1_704_164_645_678, 1, 1);
        assert_eq!(csn.change_time().unwrap(), "20240102030405Z");

        assert_eq!(ChangeNumber::new(0, 0, 0).change_time().unwrap(), "19700101000000Z");
    }

    #[test]
    fn change_time_out_of_range() {
        assert!(ChangeNumber::new(u64::MAX, 0, 0).change_time().is_err());
    }
}

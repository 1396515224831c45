//! Log record layout: a bit-packed header plus a serialized key/value pair.

use crate::address::{Address, INVALID_ADDRESS};
use serde::{Deserialize, Serialize};

/// Header bits carried alongside every record in the log.
///
/// Mirrors FASTER's `RecordInfo`: a previous-address chain pointer for
/// hash-bucket collisions, a tombstone bit for logical deletes, an
/// invalid bit so in-place updates can be abandoned without shifting
/// the rest of the page, and an in-new-version bit the checkpoint phase
/// walk uses to tell which version wrote a record during a fuzzy region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub previous_address: Address,
    pub tombstone: bool,
    pub invalid: bool,
    pub in_new_version: bool,
}

impl RecordHeader {
    pub fn new(previous_address: Address) -> Self {
        Self {
            previous_address,
            tombstone: false,
            invalid: false,
            in_new_version: false,
        }
    }

    pub fn tombstoned(previous_address: Address) -> Self {
        Self {
            previous_address,
            tombstone: true,
            invalid: false,
            in_new_version: false,
        }
    }
}

impl Default for RecordHeader {
    fn default() -> Self {
        Self {
            previous_address: INVALID_ADDRESS,
            tombstone: false,
            invalid: false,
            in_new_version: false,
        }
    }
}

/// A single record stored in the hybrid log: header plus key/value.
///
/// `value` is `None` for tombstoned (deleted) records — the header bit
/// is the authoritative delete marker, but dropping the payload keeps
/// the page bytes for a deleted key small.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record<K, V> {
    pub header: RecordHeader,
    pub key: K,
    pub value: Option<V>,
}

impl<K, V> Record<K, V> {
    pub fn new(key: K, value: V, previous_address: Address) -> Self {
        Self {
            header: RecordHeader::new(previous_address),
            key,
            value: Some(value),
        }
    }

    pub fn tombstone(key: K, previous_address: Address) -> Self {
        Self {
            header: RecordHeader::tombstoned(previous_address),
            key,
            value: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.header.tombstone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_not_tombstoned() {
        let r = Record::new("k", 1u64, INVALID_ADDRESS);
        assert!(!r.is_tombstone());
        assert_eq!(r.value, Some(1));
    }

    #[test]
    fn tombstone_clears_value() {
        let r: Record<&str, u64> = Record::tombstone("k", INVALID_ADDRESS);
        assert!(r.is_tombstone());
        assert_eq!(r.value, None);
    }
}

//! Duplicate dispositions over the final sorted stream.
//!
//! FirstOnly and LastOnly both reduce to "emit the first record of each
//! equal-key group": which record arrives first is decided upstream by
//! the sign of the ordinals (LastOnly negates them, so the latest record
//! wins the tie-break). Reverse keeps every record and flips the whole
//! ordering at key-encode time instead.

use crate::proxy::RecordProxy;

/// What to do with records whose keys collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateDisposition {
    /// Emit every record.
    #[default]
    Original,
    /// Keep the earliest record of each key.
    FirstOnly,
    /// Keep the latest record of each key.
    LastOnly,
    /// Emit everything in reverse key order.
    Reverse,
}

impl DuplicateDisposition {
    /// Parse a disposition name.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "original" => Some(DuplicateDisposition::Original),
            "firstonly" => Some(DuplicateDisposition::FirstOnly),
            "lastonly" => Some(DuplicateDisposition::LastOnly),
            "reverse" => Some(DuplicateDisposition::Reverse),
            _ => None,
        }
    }

    /// True when ordinals must be negated so later records win key ties.
    pub fn negates_ordinals(&self) -> bool {
        matches!(self, DuplicateDisposition::LastOnly | DuplicateDisposition::Reverse)
    }

    /// True when every key direction must be inverted at encode time.
    pub fn reverses_keys(&self) -> bool {
        matches!(self, DuplicateDisposition::Reverse)
    }

    fn drops_duplicates(&self) -> bool {
        matches!(self, DuplicateDisposition::FirstOnly | DuplicateDisposition::LastOnly)
    }
}

/// Streaming filter applied between the final merge and the output stage.
#[derive(Debug)]
pub struct DuplicateFilter {
    disposition: DuplicateDisposition,
    last_key: Vec<u8>,
    seen_any: bool,
    dropped: u64,
}

impl DuplicateFilter {
    /// Creates the filter for a disposition.
    pub fn new(disposition: DuplicateDisposition) -> Self {
        Self { disposition, last_key: Vec::new(), seen_any: false, dropped: 0 }
    }

    /// Decides whether this proxy reaches the output. Key equality is
    /// byte equality of the full encoded key.
    pub fn admit(&mut self, proxy: &RecordProxy) -> bool {
        if !self.disposition.drops_duplicates() {
            return true;
        }
        if self.seen_any && proxy.key() == self.last_key.as_slice() {
            self.dropped += 1;
            return false;
        }
        self.seen_any = true;
        self.last_key.clear();
        self.last_key.extend_from_slice(proxy.key());
        true
    }

    /// Records dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(key: &[u8], ordinal: i64) -> RecordProxy {
        let mut p = RecordProxy::default();
        p.set(key, key.len() as u32, 0, 0, ordinal);
        p
    }

    #[test]
    fn test_original_admits_everything() {
        let mut filter = DuplicateFilter::new(DuplicateDisposition::Original);
        assert!(filter.admit(&proxy(b"a", 1)));
        assert!(filter.admit(&proxy(b"a", 2)));
        assert_eq!(filter.dropped(), 0);
    }

    #[test]
    fn test_first_only_keeps_group_leader() {
        let mut filter = DuplicateFilter::new(DuplicateDisposition::FirstOnly);
        assert!(filter.admit(&proxy(b"a", 1)));
        assert!(!filter.admit(&proxy(b"a", 2)));
        assert!(filter.admit(&proxy(b"b", 3)));
        assert!(!filter.admit(&proxy(b"b", 4)));
        assert_eq!(filter.dropped(), 2);
    }

    #[test]
    fn test_last_only_relies_on_negated_ordinals() {
        // With negated ordinals the latest record sorts first within its
        // key group, so keeping the leader keeps the last record.
        let mut filter = DuplicateFilter::new(DuplicateDisposition::LastOnly);
        assert!(filter.admit(&proxy(b"a", -4)));
        assert!(!filter.admit(&proxy(b"a", -1)));
        assert_eq!(filter.dropped(), 1);
    }

    #[test]
    fn test_disposition_flags() {
        assert!(DuplicateDisposition::LastOnly.negates_ordinals());
        assert!(DuplicateDisposition::Reverse.negates_ordinals());
        assert!(!DuplicateDisposition::FirstOnly.negates_ordinals());
        assert!(DuplicateDisposition::Reverse.reverses_keys());
        assert_eq!(DuplicateDisposition::from_code("LastOnly"), Some(DuplicateDisposition::LastOnly));
        assert_eq!(DuplicateDisposition::from_code("nope"), None);
    }
}

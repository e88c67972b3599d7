//! Pooled record proxies — the fixed-shape tags the tournament sorts.
//!
//! A proxy carries the encoded key plus a locator back to the raw record
//! bytes. Sorting moves proxies, never records; the output stage follows
//! the locator to re-read the winning records in order.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::key::KeyCodec;

/// Process-wide count of proxy comparisons, for diagnostics.
static COMPARISON_COUNT: AtomicU64 = AtomicU64::new(0);

/// Total comparisons performed since process start.
pub fn comparison_count() -> u64 {
    COMPARISON_COUNT.load(AtomicOrdering::Relaxed)
}

/// A record surrogate: encoded key plus source locator.
///
/// The ordinal is the 1-relative record number across the whole input
/// pass; its sign encodes the duplicate disposition (negative when the
/// LastOnly or Reverse policies need later records to win key ties).
#[derive(Debug, Default)]
pub struct RecordProxy {
    key: Vec<u8>,
    /// Size of the raw record in bytes.
    pub original_size: u32,
    /// Absolute byte position of the record within its source.
    pub position: u64,
    /// Index of the source file the record came from.
    pub source_index: u32,
    /// Signed record ordinal; magnitudes strictly increase within a pass.
    pub ordinal: i64,
}

impl RecordProxy {
    fn with_capacity() -> Self {
        Self { key: Vec::with_capacity(KeyCodec::key_capacity()), ..Self::default() }
    }

    /// Fills every field of a (re)used proxy.
    pub fn set(&mut self, key: &[u8], size: u32, position: u64, source_index: u32, ordinal: i64) {
        self.key.clear();
        self.key.extend_from_slice(key);
        self.original_size = size;
        self.position = position;
        self.source_index = source_index;
        self.ordinal = ordinal;
    }

    /// The encoded key bytes.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Buffer to encode a key into directly, cleared.
    pub fn key_mut(&mut self) -> &mut Vec<u8> {
        self.key.clear();
        &mut self.key
    }

    /// Total order: raw byte compare of the encoded keys (a shorter key
    /// that is a prefix of a longer one orders first), then the signed
    /// ordinal as the stability tie-break.
    pub fn compare(&self, other: &RecordProxy) -> Ordering {
        COMPARISON_COUNT.fetch_add(1, AtomicOrdering::Relaxed);
        match self.key.cmp(&other.key) {
            Ordering::Equal => self.ordinal.cmp(&other.ordinal),
            unequal => unequal,
        }
    }
}

/// Free list of proxies.
///
/// Proxies are values; the pool only recycles their key-buffer
/// allocations. Acquiring beyond the reserved size allocates fresh
/// proxies that later return to the list like any other.
#[derive(Debug)]
pub struct ProxyPool {
    free: Vec<RecordProxy>,
    acquired: u64,
    released: u64,
}

impl ProxyPool {
    /// Creates a pool reserving `capacity` slots (typically 2M).
    pub fn with_capacity(capacity: usize) -> Self {
        Self { free: Vec::with_capacity(capacity), acquired: 0, released: 0 }
    }

    /// Hands out a proxy, recycling a released one when available.
    pub fn acquire(&mut self) -> RecordProxy {
        self.acquired += 1;
        self.free.pop().unwrap_or_else(RecordProxy::with_capacity)
    }

    /// Returns a proxy to the free list.
    pub fn release(&mut self, proxy: RecordProxy) {
        self.released += 1;
        self.free.push(proxy);
    }

    /// Proxies currently out of the pool.
    pub fn live(&self) -> u64 {
        self.acquired - self.released
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
    fn test_compare_by_key_bytes() {
        let a = proxy(b"abc", 1);
        let b = proxy(b"abd", 2);
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&a), Ordering::Greater);
    }

    #[test]
    fn test_shorter_prefix_key_orders_first() {
        let short = proxy(b"ab", 5);
        let long = proxy(b"abz", 1);
        assert_eq!(short.compare(&long), Ordering::Less);
    }

    #[test]
    fn test_equal_keys_tie_break_on_ordinal() {
        let first = proxy(b"same", 3);
        let second = proxy(b"same", 8);
        assert_eq!(first.compare(&second), Ordering::Less);
    }

    #[test]
    fn test_negated_ordinals_let_later_records_win() {
        // LastOnly negates ordinals upstream; the latest record has the
        // most negative ordinal and so wins the tie.
        let early = proxy(b"same", -3);
        let late = proxy(b"same", -8);
        assert_eq!(late.compare(&early), Ordering::Less);
    }

    #[test]
    fn test_comparison_counter_increments() {
        let before = comparison_count();
        let a = proxy(b"x", 1);
        let b = proxy(b"y", 2);
        let _ = a.compare(&b);
        assert!(comparison_count() > before);
    }

    #[test]
    fn test_pool_recycles_and_balances() {
        let mut pool = ProxyPool::with_capacity(4);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.live(), 2);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.live(), 0);

        // Recycled proxy keeps its buffer but is fully overwritten by set.
        let mut c = pool.acquire();
        c.set(b"k", 1, 9, 0, 42);
        assert_eq!(c.key(), b"k");
        assert_eq!(c.ordinal, 42);
        pool.release(c);
        assert_eq!(pool.live(), 0);
    }
}

// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Loop suppression for flooded publishes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Compute the deduplication fingerprint of a replicated publish.
///
/// Every node derives the same fingerprint from the message fields which
/// travel on the wire, so a message flooding back over another path is
/// recognized no matter how many hops it took.
#[must_use]
pub fn fingerprint(source_node: &str, topic: &str, payload: &[u8], ticks: i64) -> String {
    format!(
        "{source_node}:{topic}:{:016x}:{ticks}",
        fnv1a64(payload)
    )
}

/// FNV-1a, 64 bit. Stable across processes, unlike the std hasher.
fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Recently seen publish fingerprints with their first-seen time.
///
/// Entries expire after `ttl`; the owning app sweeps at half the ttl
/// cadence. The ttl has to exceed the widest end-to-end peer round trip,
/// otherwise a flooded publish can survive its own cache entry.
#[derive(Debug, Clone)]
pub struct MessageIdCache {
    map: HashMap<String, Instant>,
    ttl: Duration,
}

impl MessageIdCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            ttl,
        }
    }

    /// Record a fingerprint. Returns false when it was seen already.
    pub fn insert(&mut self, fingerprint: String) -> bool {
        if let Some(first_seen) = self.map.get(&fingerprint) {
            if first_seen.elapsed() < self.ttl {
                return false;
            }
        }
        self.map.insert(fingerprint, Instant::now());
        true
    }

    #[must_use]
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.map
            .get(fingerprint)
            .is_some_and(|first_seen| first_seen.elapsed() < self.ttl)
    }

    /// Drop expired entries.
    pub fn sweep(&mut self) {
        let ttl = self.ttl;
        let old_len = self.map.len();
        self.map.retain(|_fingerprint, first_seen| first_seen.elapsed() < ttl);
        let removed = old_len - self.map.len();
        if removed > 0 {
            log::debug!("cluster: swept {removed} expired message ids");
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint("n1", "t/hello", b"hi", 1_700_000_123);
        let b = fingerprint("n1", "t/hello", b"hi", 1_700_000_123);
        assert_eq!(a, b);

        // Different origin or payload changes the fingerprint.
        assert_ne!(a, fingerprint("n2", "t/hello", b"hi", 1_700_000_123));
        assert_ne!(a, fingerprint("n1", "t/hello", b"ho", 1_700_000_123));
    }

    #[test]
    fn test_duplicate_is_suppressed() {
        let mut cache = MessageIdCache::new(Duration::from_secs(60));
        let fp = fingerprint("n1", "t/hello", b"hi", 1);
        assert!(cache.insert(fp.clone()));
        assert!(!cache.insert(fp.clone()));
        assert!(cache.contains(&fp));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_reusable() {
        let mut cache = MessageIdCache::new(Duration::from_millis(0));
        let fp = fingerprint("n1", "t", b"x", 1);
        assert!(cache.insert(fp.clone()));
        // Zero ttl: the entry is expired immediately.
        assert!(cache.insert(fp));
        cache.sweep();
        assert!(cache.is_empty());
    }
}

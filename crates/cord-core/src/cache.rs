//! # Evaluation Cache
//!
//! Bounded cache keyed by the SHA-256 of the proposal text, with a TTL.
//! A hit returns a copy of the stored verdict with `cached = true`; the
//! stored copy is never handed out by reference, so callers cannot mutate
//! cache state. Eviction follows insertion order, and an expired entry is
//! deleted on the read that discovers it.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::verdict::Verdict;

struct CacheEntry {
    verdict: Verdict,
    inserted_at: Instant,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing (or an expired entry).
    pub misses: u64,
    /// Current entry count.
    pub size: usize,
    /// hits / (hits + misses), zero when empty.
    pub hit_rate: f64,
}

/// The bounded TTL cache.
pub struct EvalCache {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    insertion_order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl EvalCache {
    /// Empty cache with the given bounds.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Cache key for a proposal text.
    pub fn key_for(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    /// Look up a text. A live entry returns a copy marked `cached`; an
    /// expired entry is removed and counts as a miss.
    pub fn get(&mut self, text: &str) -> Option<Verdict> {
        let key = Self::key_for(text);
        let ttl = Duration::from_millis(self.config.ttl_ms);
        match self.entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() <= ttl => {
                self.hits += 1;
                let mut verdict = entry.verdict.clone();
                verdict.cached = true;
                Some(verdict)
            }
            Some(_) => {
                self.entries.remove(&key);
                self.insertion_order.retain(|k| k != &key);
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a fresh verdict. When full and the key is new, the oldest
    /// insertion is evicted first.
    pub fn insert(&mut self, text: &str, verdict: &Verdict) {
        if self.config.max_size == 0 {
            return;
        }
        let key = Self::key_for(text);
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= self.config.max_size {
                let Some(oldest) = self.insertion_order.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
            }
            self.insertion_order.push_back(key.clone());
        }
        self.entries.insert(
            key,
            CacheEntry {
                verdict: verdict.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.entries.len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                self.hits as f64 / total as f64
            },
        }
    }

    /// Drop all entries and counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
        self.hits = 0;
        self.misses = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cord_vigil::Decision;
    use std::collections::BTreeMap;

    fn verdict(score: f64) -> Verdict {
        Verdict::scored(Decision::Allow, score, BTreeMap::new(), vec![])
    }

    fn cache(max_size: usize, ttl_ms: u64) -> EvalCache {
        EvalCache::new(CacheConfig { max_size, ttl_ms })
    }

    #[test]
    fn test_miss_then_hit_with_marker() {
        let mut c = cache(10, 60_000);
        assert!(c.get("text").is_none());
        c.insert("text", &verdict(1.0));
        let hit = c.get("text").unwrap();
        assert!(hit.cached);
        assert_eq!(hit.score, 1.0);
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (1, 1, 1));
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_hit_is_a_copy() {
        let mut c = cache(10, 60_000);
        c.insert("text", &verdict(1.0));
        let mut first = c.get("text").unwrap();
        first.score = 42.0;
        // The stored verdict is unaffected by caller mutation.
        assert_eq!(c.get("text").unwrap().score, 1.0);
    }

    #[test]
    fn test_ttl_expiry_deletes_entry() {
        let mut c = cache(10, 0);
        c.insert("text", &verdict(1.0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(c.get("text").is_none());
        assert_eq!(c.stats().size, 0);
    }

    #[test]
    fn test_eviction_follows_insertion_order() {
        let mut c = cache(2, 60_000);
        c.insert("a", &verdict(1.0));
        c.insert("b", &verdict(2.0));
        c.insert("c", &verdict(3.0));
        assert!(c.get("a").is_none(), "oldest insertion evicted");
        assert!(c.get("b").is_some());
        assert!(c.get("c").is_some());
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let mut c = cache(2, 60_000);
        c.insert("a", &verdict(1.0));
        c.insert("b", &verdict(2.0));
        // Same key again: no eviction, value refreshed.
        c.insert("a", &verdict(9.0));
        assert_eq!(c.get("a").unwrap().score, 9.0);
        assert!(c.get("b").is_some());
    }

    #[test]
    fn test_distinct_texts_distinct_keys() {
        assert_ne!(EvalCache::key_for("a"), EvalCache::key_for("b"));
        assert_eq!(EvalCache::key_for("a").len(), 64);
    }
}

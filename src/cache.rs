//! Process-local cache of per-member affinity vectors.
//!
//! Entries expire lazily: a read at or past `expires_at` removes the entry and
//! reports a miss. Concurrent puts for the same member race; the last write wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A member's weighted taste profile: lowercased artist name → weight.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AffinityVector {
    pub user_id: i64,
    pub weights: HashMap<String, f64>,
}

impl AffinityVector {
    pub fn total_weight(&self) -> f64 {
        self.weights.values().sum()
    }
}

struct Entry {
    vector: Arc<AffinityVector>,
    expires_at: DateTime<Utc>,
}

pub struct AffinityCache {
    entries: DashMap<i64, Entry>,
    clock: Arc<dyn Clock>,
}

impl AffinityCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    pub fn get(&self, user_id: i64) -> Option<Arc<AffinityVector>> {
        let now = self.clock.now();

        let expired = match self.entries.get(&user_id) {
            Some(entry) if now < entry.expires_at => return Some(Arc::clone(&entry.vector)),
            Some(_) => true,
            None => false,
        };

        if expired {
            // Re-check under the shard lock: a fresh put may have landed meanwhile.
            self.entries.remove_if(&user_id, |_, e| now >= e.expires_at);
            log::debug!("Affinity cache entry for user {user_id} expired");
        }
        None
    }

    pub fn put(&self, user_id: i64, vector: Arc<AffinityVector>, ttl: Duration) {
        let now = self.clock.now();
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries.insert(user_id, Entry { vector, expires_at });
    }

    /// Entries currently held, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn vector(user_id: i64, artist: &str, weight: f64) -> Arc<AffinityVector> {
        Arc::new(AffinityVector {
            user_id,
            weights: HashMap::from([(artist.to_string(), weight)]),
        })
    }

    fn setup() -> (Arc<ManualClock>, AffinityCache) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let cache = AffinityCache::new(clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_hit_before_expiry_miss_after() {
        let (clock, cache) = setup();
        cache.put(1, vector(1, "low", 0.5), Duration::hours(12));

        clock.advance(Duration::hours(11) + Duration::minutes(59));
        assert_eq!(cache.get(1).unwrap().weights["low"], 0.5);

        clock.advance(Duration::minutes(2));
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expiry_boundary_is_a_miss() {
        let (clock, cache) = setup();
        cache.put(1, vector(1, "low", 0.5), Duration::hours(12));
        clock.advance(Duration::hours(12));
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn test_unknown_key_misses() {
        let (_, cache) = setup();
        assert!(cache.get(42).is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let (_, cache) = setup();
        cache.put(1, vector(1, "low", 0.5), Duration::hours(12));
        cache.put(1, vector(1, "low", 0.9), Duration::hours(12));
        assert_eq!(cache.get(1).unwrap().weights["low"], 0.9);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_rewrite_after_expiry_extends_lifetime() {
        let (clock, cache) = setup();
        cache.put(1, vector(1, "low", 0.5), Duration::hours(1));
        clock.advance(Duration::minutes(90));
        cache.put(1, vector(1, "low", 0.7), Duration::hours(1));
        assert_eq!(cache.get(1).unwrap().weights["low"], 0.7);
    }

    #[test]
    fn test_concurrent_puts_and_gets() {
        let (_, cache) = setup();
        std::thread::scope(|s| {
            for t in 0..8 {
                let cache = &cache;
                s.spawn(move || {
                    for id in 0..100 {
                        cache.put(id, vector(id, "low", t as f64), Duration::hours(1));
                        assert!(cache.get(id).is_some());
                    }
                });
            }
        });
        assert_eq!(cache.len(), 100);
    }
}

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::extensions::Clock;
use crate::response::ResponseEnvelope;
use crate::util::lock_unpoisoned;

struct CacheEntry {
    response: ResponseEnvelope,
    stored_at: Instant,
    ttl: Duration,
}

/// Time-boxed memoization of successful envelopes, keyed by request
/// fingerprint. Eviction is entirely lazy: a stale entry lives until the
/// next lookup touches it. There is no sweeper task.
pub(crate) struct CacheStore {
    entries: Mutex<BTreeMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    /// A hit while `now - stored_at < ttl`; anything older is evicted on
    /// the spot and reported as a miss.
    pub(crate) fn get(&self, key: &str) -> Option<ResponseEnvelope> {
        let now = self.clock.now();
        let mut entries = lock_unpoisoned(&self.entries);
        match entries.get(key) {
            Some(entry) if now.duration_since(entry.stored_at) < entry.ttl => {
                Some(entry.response.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores unconditionally, replacing any existing entry for the key.
    pub(crate) fn set(&self, key: String, response: ResponseEnvelope, ttl: Duration) {
        let entry = CacheEntry {
            response,
            stored_at: self.clock.now(),
            ttl,
        };
        lock_unpoisoned(&self.entries).insert(key, entry);
    }

    /// Drops every entry, or only those whose key contains the pattern.
    pub(crate) fn clear(&self, pattern: Option<&str>) {
        let mut entries = lock_unpoisoned(&self.entries);
        match pattern {
            Some(pattern) => entries.retain(|key, _| !key.contains(pattern)),
            None => entries.clear(),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use bytes::Bytes;
    use http::HeaderMap;

    use super::CacheStore;
    use crate::config::ResponseKind;
    use crate::extensions::Clock;
    use crate::response::ResponseEnvelope;
    use crate::transport::RawResponse;
    use crate::util::lock_unpoisoned;

    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        fn advance(&self, delta: Duration) {
            let mut now = lock_unpoisoned(&self.now);
            *now += delta;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *lock_unpoisoned(&self.now)
        }
    }

    fn envelope(body: &str) -> ResponseEnvelope {
        ResponseEnvelope::from_raw(
            RawResponse {
                status: 200,
                headers: HeaderMap::new(),
                body: Bytes::copy_from_slice(body.as_bytes()),
                cookies: Vec::new(),
            },
            ResponseKind::Json,
        )
    }

    #[test]
    fn hits_inside_the_ttl_and_misses_after() {
        let clock = Arc::new(ManualClock::new());
        let store = CacheStore::new(Arc::clone(&clock) as Arc<dyn Clock>);
        store.set("k".to_owned(), envelope(r#"{"v": 1}"#), Duration::from_millis(1000));

        clock.advance(Duration::from_millis(999));
        assert!(store.get("k").is_some());

        clock.advance(Duration::from_millis(2));
        assert!(store.get("k").is_none());
        // The stale entry was evicted by the lookup itself.
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn expiry_at_exactly_ttl_is_a_miss() {
        let clock = Arc::new(ManualClock::new());
        let store = CacheStore::new(Arc::clone(&clock) as Arc<dyn Clock>);
        store.set("k".to_owned(), envelope("1"), Duration::from_millis(500));
        clock.advance(Duration::from_millis(500));
        assert!(store.get("k").is_none());
    }

    #[test]
    fn set_overwrites_existing_entries() {
        let clock = Arc::new(ManualClock::new());
        let store = CacheStore::new(Arc::clone(&clock) as Arc<dyn Clock>);
        store.set("k".to_owned(), envelope("1"), Duration::from_secs(60));
        store.set("k".to_owned(), envelope("2"), Duration::from_secs(60));
        let hit = store.get("k").expect("entry present");
        assert_eq!(hit.data(), &serde_json::json!(2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn clear_supports_substring_patterns() {
        let clock = Arc::new(ManualClock::new());
        let store = CacheStore::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let ttl = Duration::from_secs(60);
        store.set("GET:https://a/users:?:".to_owned(), envelope("1"), ttl);
        store.set("GET:https://a/orders:?:".to_owned(), envelope("2"), ttl);
        store.set("GET:https://a/users/7:?:".to_owned(), envelope("3"), ttl);

        store.clear(Some("/users"));
        assert_eq!(store.len(), 1);
        assert!(store.get("GET:https://a/orders:?:").is_some());

        store.clear(None);
        assert_eq!(store.len(), 0);
    }
}

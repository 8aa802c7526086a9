use std::time::Duration;

use linked_hash_map::LinkedHashMap;
use tokio::time::Instant;

/// Represents a single value stored in an [EntryStore](EntryStore).
///
/// The entry remembers when it was written and when it expires. Note that an entry is never
/// removed once it expires. Expiry is judged when reading: a valid entry is served as is, an
/// expired (stale) one can still be served while a fresh value is being fetched.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    cached_at: Instant,
    expires_at: Instant,
    sequence: u64,
}

impl<V> CacheEntry<V> {
    /// Returns the cached value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns the timestamp at which this entry was written.
    pub fn cached_at(&self) -> Instant {
        self.cached_at
    }

    /// Returns the timestamp from which on this entry is considered stale.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Returns the sequence number of the fetch which produced this entry.
    ///
    /// This is only maintained for fenced writes (see [EntryStore::set_fenced]) and is **0** for
    /// entries written via [EntryStore::set].
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Determines if the entry is still valid at the given point in time.
    pub fn is_valid(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Computes the point in time at which an entry written at **now** expires.
///
/// TTLs which exceed the range of **Instant** (like **Duration::MAX** for "keep forever") are
/// capped at roughly thirty years from now.
fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Stores cache entries by their key.
///
/// This is a plain map which doesn't perform any locking. The [Cache](crate::cache::Cache) wraps
/// it in a mutex. Keys are kept in the order in which they were last written so that
/// [keys](EntryStore::keys) is deterministic.
///
/// # Examples
/// ```
/// # use callisto::cache::EntryStore;
/// # use std::time::Duration;
/// # use tokio::time::Instant;
/// let mut store = EntryStore::new();
/// let now = Instant::now();
///
/// store.set("users".to_owned(), vec![1, 2, 3], Duration::from_secs(5), now);
///
/// let entry = store.get("users").unwrap();
/// assert_eq!(entry.value(), &vec![1, 2, 3]);
/// assert_eq!(entry.is_valid(now + Duration::from_secs(4)), true);
/// assert_eq!(entry.is_valid(now + Duration::from_secs(5)), false);
///
/// // Expired entries remain readable until they are removed explicitly...
/// assert_eq!(store.get("users").is_some(), true);
/// store.delete("users");
/// assert_eq!(store.get("users").is_none(), true);
/// ```
pub struct EntryStore<V> {
    map: LinkedHashMap<String, CacheEntry<V>>,
}

impl<V> Default for EntryStore<V> {
    fn default() -> Self {
        EntryStore {
            map: LinkedHashMap::new(),
        }
    }
}

impl<V> EntryStore<V> {
    /// Creates a new and empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for the given key, no matter if it is valid or stale.
    pub fn get(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.map.get(key)
    }

    /// Stores the given value so that it expires **ttl** after **now**.
    ///
    /// Any previous entry for the key is replaced unconditionally.
    pub fn set(&mut self, key: String, value: V, ttl: Duration, now: Instant) {
        let _ = self.map.insert(
            key,
            CacheEntry {
                value,
                cached_at: now,
                expires_at: expiry(now, ttl),
                sequence: 0,
            },
        );
    }

    /// Stores the given value unless the present entry was produced by a newer fetch.
    ///
    /// Fetches complete in arbitrary order. A slow fetch which was issued early might settle after
    /// a quicker one which was issued later. Comparing the issue sequence numbers permits to
    /// discard such out of order results. Returns **true** if the value was stored.
    ///
    /// # Examples
    /// ```
    /// # use callisto::cache::EntryStore;
    /// # use std::time::Duration;
    /// # use tokio::time::Instant;
    /// let mut store = EntryStore::new();
    /// let ttl = Duration::from_secs(5);
    ///
    /// assert_eq!(store.set_fenced("key".to_owned(), "new", ttl, Instant::now(), 2), true);
    /// assert_eq!(store.set_fenced("key".to_owned(), "old", ttl, Instant::now(), 1), false);
    /// assert_eq!(store.get("key").unwrap().value(), &"new");
    /// ```
    pub fn set_fenced(
        &mut self,
        key: String,
        value: V,
        ttl: Duration,
        now: Instant,
        sequence: u64,
    ) -> bool {
        if let Some(present) = self.map.get(&key) {
            if present.sequence > sequence {
                return false;
            }
        }

        let _ = self.map.insert(
            key,
            CacheEntry {
                value,
                cached_at: now,
                expires_at: expiry(now, ttl),
                sequence,
            },
        );

        true
    }

    /// Removes the entry for the given key. Returns **true** if an entry was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Returns a snapshot of all keys, ordered from least to most recently written.
    pub fn keys(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    /// Returns the number of entries (valid or stale).
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the store is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::EntryStore;
    use std::time::Duration;
    use tokio::time::Instant;

    #[test]
    fn writes_replace_entries_and_recompute_expiry() {
        let mut store = EntryStore::new();
        let start = Instant::now();

        store.set("a".to_owned(), 1, Duration::from_secs(5), start);
        store.set(
            "a".to_owned(),
            2,
            Duration::from_secs(1),
            start + Duration::from_secs(3),
        );

        let entry = store.get("a").unwrap();
        assert_eq!(*entry.value(), 2);
        assert_eq!(entry.cached_at(), start + Duration::from_secs(3));
        assert_eq!(entry.expires_at(), start + Duration::from_secs(4));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn keys_reflect_the_write_order() {
        let mut store = EntryStore::new();
        let now = Instant::now();
        let ttl = Duration::from_secs(60);

        store.set("a".to_owned(), 1, ttl, now);
        store.set("b".to_owned(), 2, ttl, now);
        store.set("c".to_owned(), 3, ttl, now);
        store.set("a".to_owned(), 4, ttl, now);
        assert_eq!(store.keys(), vec!["b", "c", "a"]);

        // The snapshot is detached from the store...
        let keys = store.keys();
        for key in &keys {
            let _ = store.delete(key);
        }
        assert_eq!(store.is_empty(), true);
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn fenced_writes_accept_equal_and_newer_sequences() {
        let mut store = EntryStore::new();
        let now = Instant::now();
        let ttl = Duration::from_secs(60);

        assert_eq!(store.set_fenced("a".to_owned(), 1, ttl, now, 5), true);
        assert_eq!(store.set_fenced("a".to_owned(), 2, ttl, now, 5), true);
        assert_eq!(store.set_fenced("a".to_owned(), 3, ttl, now, 4), false);
        assert_eq!(store.set_fenced("a".to_owned(), 4, ttl, now, 6), true);
        assert_eq!(*store.get("a").unwrap().value(), 4);
        assert_eq!(store.get("a").unwrap().sequence(), 6);

        // Once deleted, any sequence is accepted again...
        assert_eq!(store.delete("a"), true);
        assert_eq!(store.set_fenced("a".to_owned(), 5, ttl, now, 1), true);
    }

    #[test]
    fn huge_ttls_never_expire() {
        let mut store = EntryStore::new();
        let now = Instant::now();

        store.set("a".to_owned(), 1, Duration::MAX, now);
        assert_eq!(store.set_fenced("b".to_owned(), 2, Duration::MAX, now, 1), true);

        let far_away = now + Duration::from_secs(10 * 365 * 24 * 60 * 60);
        assert_eq!(store.get("a").unwrap().is_valid(far_away), true);
        assert_eq!(store.get("b").unwrap().is_valid(far_away), true);
    }

    #[test]
    fn clear_removes_everything() {
        let mut store = EntryStore::new();
        let now = Instant::now();
        store.set("a".to_owned(), 1, Duration::from_secs(1), now);
        store.set("b".to_owned(), 2, Duration::from_secs(1), now);

        store.clear();
        assert_eq!(store.len(), 0);
        assert_eq!(store.get("a").is_none(), true);
        assert_eq!(store.delete("b"), false);
    }
}

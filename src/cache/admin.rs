use std::fmt::{Display, Formatter};
use std::sync::atomic::Ordering;

use regex::Regex;

use crate::cache::Cache;

/// Provides a snapshot of the counters of a [Cache](Cache).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// The number of entries currently stored.
    pub entries: usize,

    /// The number of fetches currently in flight.
    pub inflight: usize,

    /// The number of lookups performed by bindings.
    pub reads: usize,

    /// The number of lookups which found a valid entry.
    pub fresh_hits: usize,

    /// The number of lookups which found an expired entry.
    pub stale_hits: usize,

    /// The number of lookups which found nothing at all.
    pub misses: usize,

    /// The number of fetches which have been started.
    pub fetches: usize,

    /// The number of times a fetch in flight was joined instead of starting a new one.
    pub joins: usize,

    /// The number of fetches which failed.
    pub failures: usize,

    /// The number of results which were discarded as a newer one was already stored.
    pub discarded_writes: usize,
}

impl CacheStats {
    /// Returns the share of lookups which found a valid entry in percent.
    pub fn hit_rate(&self) -> f32 {
        if self.reads == 0 {
            0.
        } else {
            self.fresh_hits as f32 / self.reads as f32 * 100.
        }
    }
}

impl Display for CacheStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:<20} {:>10}", "Entries", self.entries)?;
        writeln!(f, "{:<20} {:>10}", "In flight", self.inflight)?;
        writeln!(f, "{:<20} {:>10}", "Reads", self.reads)?;
        writeln!(f, "{:<20} {:>10}", "Fresh hits", self.fresh_hits)?;
        writeln!(f, "{:<20} {:>10}", "Stale hits", self.stale_hits)?;
        writeln!(f, "{:<20} {:>10}", "Misses", self.misses)?;
        writeln!(f, "{:<20} {:>9.2}%", "Hit rate", self.hit_rate())?;
        writeln!(f, "{:<20} {:>10}", "Fetches", self.fetches)?;
        writeln!(f, "{:<20} {:>10}", "Joins", self.joins)?;
        writeln!(f, "{:<20} {:>10}", "Failures", self.failures)?;
        write!(f, "{:<20} {:>10}", "Discarded writes", self.discarded_writes)
    }
}

/// Administrative operations which act on the cache as a whole rather than on a single binding.
impl Cache {
    /// Removes all entries and forgets about all fetches in flight.
    ///
    /// Fetches in flight are not cancelled. They still settle and therefore re-populate their
    /// keys. However, as they are no longer registered, the next activation of any binding
    /// starts a new fetch rather than joining one of them.
    pub fn clear_all(&self) {
        let mut entries = self.entries();
        let mut inflight = self.inflight();
        log::debug!(
            "Removing all {} entries and {} operations in flight from the cache...",
            entries.len(),
            inflight.len()
        );
        entries.clear();
        inflight.clear();
    }

    /// Removes all entries and registered fetches whose key matches the given pattern.
    ///
    /// Note that [Regex::is_match] finds matches anywhere within the key. Use anchors (^ and $)
    /// to match whole keys. Returns the number of removed entries.
    ///
    /// # Examples
    /// ```
    /// # use callisto::cache::{Binding, Cache, CacheSettings};
    /// # use regex::Regex;
    /// # #[tokio::main]
    /// # async fn main() {
    /// let cache = Cache::new(CacheSettings::default());
    /// for key in ["user-1", "user-2", "project-1"] {
    ///     let binding: Binding<u32> = cache.bind(key, || async { Ok::<_, anyhow::Error>(1) });
    ///     binding.activate();
    ///     binding.settled().await;
    /// }
    ///
    /// assert_eq!(cache.clear_by_pattern(&Regex::new("^user-").unwrap()), 2);
    /// assert_eq!(cache.keys(), vec!["project-1"]);
    /// # }
    /// ```
    pub fn clear_by_pattern(&self, pattern: &Regex) -> usize {
        let mut entries = self.entries();
        let mut inflight = self.inflight();

        let mut removed = 0;
        for key in entries.keys() {
            if pattern.is_match(&key) && entries.delete(&key) {
                removed += 1;
            }
        }
        for key in inflight.keys() {
            if pattern.is_match(&key) {
                let _ = inflight.unregister(&key);
            }
        }

        log::debug!(
            "Removed {} entries matching '{}' from the cache.",
            removed,
            pattern.as_str()
        );

        removed
    }

    /// Removes the entry for the given key. Returns **true** if an entry was present.
    pub fn invalidate_key(&self, key: &str) -> bool {
        self.entries().delete(key)
    }

    /// Returns the number of entries (valid or stale).
    pub fn size(&self) -> usize {
        self.entries().len()
    }

    /// Returns a snapshot of all keys, ordered from least to most recently written.
    pub fn keys(&self) -> Vec<String> {
        self.entries().keys()
    }

    /// Returns a snapshot of all keys for which a fetch is in flight.
    pub fn inflight_keys(&self) -> Vec<String> {
        let mut keys = self.inflight().keys();
        keys.sort();
        keys
    }

    /// Returns a snapshot of the counters of this cache.
    pub fn stats(&self) -> CacheStats {
        let reads = self.metrics.reads.load(Ordering::Relaxed);
        let fresh_hits = self.metrics.fresh_hits.load(Ordering::Relaxed);
        let stale_hits = self.metrics.stale_hits.load(Ordering::Relaxed);

        CacheStats {
            entries: self.size(),
            inflight: self.inflight().len(),
            reads,
            fresh_hits,
            stale_hits,
            misses: reads.saturating_sub(fresh_hits + stale_hits),
            fetches: self.metrics.fetches.load(Ordering::Relaxed),
            joins: self.metrics.joins.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            discarded_writes: self.metrics.discarded_writes.load(Ordering::Relaxed),
        }
    }
}

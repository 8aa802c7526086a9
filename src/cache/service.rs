use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::future::{BoxFuture, FutureExt};
use tokio::time::Instant;

use crate::cache::{
    Binding, BindingOptions, CacheSettings, EntryStore, Fetcher, InflightRegistry, Operation,
    Outcome, Value,
};
use crate::fmt::format_duration;

/// Describes what a lookup in the entry store yielded.
pub(crate) enum Lookup {
    /// A valid entry was found.
    Fresh(Value),

    /// An entry was found, but it has already expired.
    Stale(Value),

    /// No entry is present at all.
    Missing,
}

/// Determines how a fetch treats an operation which is already in flight for the same key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum FetchMode {
    /// Joins the operation in flight (if any) instead of starting another one.
    Join,

    /// Always starts a new operation, which replaces the registered one.
    Fresh,
}

/// Counts what happened within a cache.
///
/// All counters are atomic so that they can be updated without holding any lock.
#[derive(Default)]
pub(crate) struct Metrics {
    pub(crate) reads: AtomicUsize,
    pub(crate) fresh_hits: AtomicUsize,
    pub(crate) stale_hits: AtomicUsize,
    pub(crate) fetches: AtomicUsize,
    pub(crate) joins: AtomicUsize,
    pub(crate) failures: AtomicUsize,
    pub(crate) discarded_writes: AtomicUsize,
}

impl Metrics {
    pub(crate) fn increment(counter: &AtomicUsize) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Provides the process wide cache for the results of asynchronous fetches.
///
/// The cache combines an [EntryStore](crate::cache::EntryStore) (which keeps the fetched values
/// along with their expiry) and an [InflightRegistry](crate::cache::InflightRegistry) (which keeps
/// track of fetches in progress). It is created once (most probably via
/// [install](crate::cache::install)) and then shared by all [Bindings](crate::cache::Binding).
///
/// Values of arbitrary types can be stored side by side, as each binding downcasts the values for
/// its key into the type it expects.
///
/// # Examples
/// ```
/// # use callisto::cache::{Binding, Cache, CacheSettings};
/// # #[tokio::main]
/// # async fn main() {
/// let cache = Cache::new(CacheSettings::default());
///
/// let users: Binding<Vec<String>> = cache.bind("users", || async {
///     Ok::<_, anyhow::Error>(vec!["Alice".to_owned(), "Bob".to_owned()])
/// });
/// users.activate();
///
/// let view = users.settled().await;
/// assert_eq!(view.data.unwrap().len(), 2);
/// assert_eq!(cache.keys(), vec!["users"]);
/// # }
/// ```
pub struct Cache {
    entries: Mutex<EntryStore<Value>>,
    inflight: Mutex<InflightRegistry>,
    settings: ArcSwap<CacheSettings>,
    next_operation: AtomicU64,
    pub(crate) metrics: Metrics,
}

impl Cache {
    /// Creates a new and empty cache using the given defaults.
    pub fn new(settings: CacheSettings) -> Arc<Self> {
        Arc::new(Cache {
            entries: Mutex::new(EntryStore::new()),
            inflight: Mutex::new(InflightRegistry::new()),
            settings: ArcSwap::new(Arc::new(settings)),
            next_operation: AtomicU64::new(1),
            metrics: Metrics::default(),
        })
    }

    /// Returns the currently active settings.
    pub fn settings(&self) -> Arc<CacheSettings> {
        self.settings.load_full()
    }

    /// Replaces the currently active settings.
    ///
    /// Existing bindings keep their options. Only bindings created afterwards pick up the new
    /// defaults. The setting for fenced writes however applies to all fetches settling from now
    /// on.
    pub fn update_settings(&self, settings: CacheSettings) {
        if *self.settings() != settings {
            log::info!("Updating cache settings to: {}", settings);
            self.settings.store(Arc::new(settings));
        }
    }

    /// Returns the binding options derived from the current settings.
    pub fn default_options(&self) -> BindingOptions {
        BindingOptions::from(self.settings().as_ref())
    }

    /// Creates a binding for the given key using the default options.
    ///
    /// Note that the binding is not yet activated. Call [Binding::activate] to actually
    /// read (or fetch) its value.
    pub fn bind<T, F>(self: &Arc<Self>, key: impl Into<String>, fetcher: F) -> Binding<T>
    where
        T: Send + Sync + 'static,
        F: Fetcher<T> + 'static,
    {
        let options = self.default_options();
        Binding::new(self.clone(), key, fetcher, options)
    }

    /// Creates a binding for the given key using the given options.
    pub fn bind_with<T, F>(
        self: &Arc<Self>,
        key: impl Into<String>,
        fetcher: F,
        options: BindingOptions,
    ) -> Binding<T>
    where
        T: Send + Sync + 'static,
        F: Fetcher<T> + 'static,
    {
        Binding::new(self.clone(), key, fetcher, options)
    }

    pub(crate) fn entries(&self) -> MutexGuard<'_, EntryStore<Value>> {
        // No operation on the store can panic half way, therefore a poisoned lock is still
        // consistent...
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn inflight(&self) -> MutexGuard<'_, InflightRegistry> {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Looks up the entry for the given key and judges if it is still valid.
    pub(crate) fn lookup(&self, key: &str) -> Lookup {
        Metrics::increment(&self.metrics.reads);

        let now = Instant::now();
        match self.entries().get(key) {
            Some(entry) if entry.is_valid(now) => {
                Metrics::increment(&self.metrics.fresh_hits);
                Lookup::Fresh(entry.value().clone())
            }
            Some(entry) => {
                Metrics::increment(&self.metrics.stale_hits);
                Lookup::Stale(entry.value().clone())
            }
            None => Lookup::Missing,
        }
    }

    /// Obtains the operation which provides the next value for the given key.
    ///
    /// Depending on the mode, this either joins an operation which is already in flight or starts
    /// a new one by invoking **fetch**. Checking the registry and registering the new operation
    /// happen while holding the registry lock, so that two concurrent callers can never both
    /// start a fetch for the same key in **Join** mode.
    ///
    /// The new operation is driven by its own task, it therefore completes (and writes its result
    /// into the entry store) even if nobody awaits it anymore.
    pub(crate) fn fetch<F>(
        self: &Arc<Self>,
        key: &str,
        fetch: F,
        ttl: Duration,
        mode: FetchMode,
    ) -> Operation
    where
        F: FnOnce() -> BoxFuture<'static, anyhow::Result<Value>>,
    {
        let mut inflight = self.inflight();
        if mode == FetchMode::Join {
            if let Some(operation) = inflight.get(key) {
                log::debug!(
                    "Joining operation {} which is already fetching {}...",
                    operation.id(),
                    key
                );
                Metrics::increment(&self.metrics.joins);
                return operation;
            }
        }

        let id = self.next_operation.fetch_add(1, Ordering::Relaxed);
        let cache = self.clone();
        let owned_key = key.to_owned();
        let pending = fetch();

        let operation = Operation::new(
            id,
            async move {
                let watch = Instant::now();
                let outcome = match AssertUnwindSafe(pending).catch_unwind().await {
                    Ok(result) => result.map_err(Arc::new),
                    Err(_) => Err(Arc::new(anyhow::anyhow!(
                        "The fetch for {} panicked.",
                        owned_key
                    ))),
                };
                cache.settle(&owned_key, id, ttl, watch, &outcome);
                outcome
            }
            .boxed(),
        );

        log::debug!("Starting operation {} to fetch {}...", id, key);
        Metrics::increment(&self.metrics.fetches);
        inflight.register(key.to_owned(), operation.clone());
        drop(inflight);

        let driver = operation.clone();
        crate::spawn!(async move {
            let _ = driver.wait().await;
        });

        operation
    }

    /// Records the outcome of an operation in the entry store and removes it from the registry.
    ///
    /// Both happen before any waiter of the operation is woken up.
    fn settle(&self, key: &str, id: u64, ttl: Duration, watch: Instant, outcome: &Outcome) {
        let _registration = Registration {
            cache: self,
            key,
            id,
        };

        match outcome {
            Ok(value) => {
                let now = Instant::now();
                let mut entries = self.entries();
                if self.settings().fenced_writes {
                    if !entries.set_fenced(key.to_owned(), value.clone(), ttl, now, id) {
                        Metrics::increment(&self.metrics.discarded_writes);
                        log::debug!(
                            "Discarding the result of operation {} for {} as a newer one is present.",
                            id,
                            key
                        );
                    }
                } else {
                    entries.set(key.to_owned(), value.clone(), ttl, now);
                }

                log::debug!(
                    "Operation {} fetched {} in {} (ttl: {}).",
                    id,
                    key,
                    format_duration(watch.elapsed()),
                    format_duration(ttl)
                );
            }
            Err(error) => {
                Metrics::increment(&self.metrics.failures);
                log::debug!("Operation {} failed to fetch {}: {:#}", id, key, error);
            }
        }
    }
}

/// Removes a settling operation from the registry once dropped, even if writing its result
/// panicked.
struct Registration<'a> {
    cache: &'a Cache,
    key: &'a str,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let _ = self.cache.inflight().unregister_if(self.key, self.id);
    }
}

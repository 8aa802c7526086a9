use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::FutureExt;
use tokio::sync::watch;

use crate::cache::service::{FetchMode, Lookup};
use crate::cache::{Cache, CacheSettings, FetchError, Outcome, Value};
use crate::fmt::format_duration;

/// Describes the function which provides the value for a binding.
///
/// This is most probably a REST call or a database query. Note that the cache never retries a
/// failed fetch. Retries, timeouts and the like are the duty of the fetcher itself.
///
/// A blanket implementation is provided for closures which return a future:
///
/// ```
/// # use callisto::cache::Fetcher;
/// # #[tokio::main]
/// # async fn main() {
/// let fetcher = || async { Ok::<_, anyhow::Error>(42) };
/// assert_eq!(fetcher.fetch().await.unwrap(), 42);
/// # }
/// ```
#[async_trait::async_trait]
pub trait Fetcher<T>: Send + Sync {
    /// Fetches the current value.
    async fn fetch(&self) -> anyhow::Result<T>;
}

#[async_trait::async_trait]
impl<T, F, Fut> Fetcher<T> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    async fn fetch(&self) -> anyhow::Result<T> {
        (self)().await
    }
}

/// Enumerates the states of a [Binding](Binding).
///
/// A binding starts out **Idle**. Once activated, it either serves a fresh value from the cache,
/// serves a stale value while revalidating it or loads the value from scratch. Once all of its
/// fetches have completed it is **Settled**. Changing the key, refetching or invalidating
/// re-enters one of the serving or loading states.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BindingState {
    /// The binding has not been activated yet.
    Idle,

    /// No usable value was cached, the binding waits for the first fetch to complete.
    ColdLoading,

    /// A valid value is being served.
    ServingCachedFresh,

    /// An expired value is being served while a fresh one is fetched.
    ServingStaleRevalidating,

    /// All fetches issued by this binding have completed.
    Settled,
}

/// Represents what a binding currently has to show.
///
/// The flags are not mutually exclusive. A stale value can be shown while **is_fetching** is set
/// and **is_loading** is not.
#[derive(Debug)]
pub struct View<T> {
    /// The value to show, if any is available.
    pub data: Option<Arc<T>>,

    /// Set while a cold key is loaded and therefore no value at all can be shown.
    pub is_loading: bool,

    /// Set while at least one fetch issued by the binding is outstanding.
    pub is_fetching: bool,

    /// Set while an expired value is shown and a fresh one is being fetched.
    pub is_stale: bool,

    /// Contains the error of the last failed fetch. Note that an error never clears **data**.
    pub error: Option<FetchError>,

    /// The state of the binding when this view was emitted.
    pub state: BindingState,
}

impl<T> Default for View<T> {
    fn default() -> Self {
        View {
            data: None,
            is_loading: false,
            is_fetching: false,
            is_stale: false,
            error: None,
            state: BindingState::Idle,
        }
    }
}

impl<T> Clone for View<T> {
    fn clone(&self) -> Self {
        View {
            data: self.data.clone(),
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
            error: self.error.clone(),
            state: self.state,
        }
    }
}

/// Specifies how a binding treats its key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BindingOptions {
    /// The time to live of values fetched by the binding.
    pub ttl: Duration,

    /// Determines if an expired value is served while a fresh one is fetched.
    pub stale_while_revalidate: bool,

    /// Determines if a fetch which is already in flight for the key is joined.
    pub dedupe: bool,
}

impl Default for BindingOptions {
    fn default() -> Self {
        BindingOptions::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for BindingOptions {
    fn from(settings: &CacheSettings) -> Self {
        BindingOptions {
            ttl: settings.ttl,
            stale_while_revalidate: settings.stale_while_revalidate,
            dedupe: settings.dedupe,
        }
    }
}

impl BindingOptions {
    /// Specifies the time to live.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Enables or disables stale-while-revalidate.
    #[must_use]
    pub fn with_stale_while_revalidate(mut self, stale_while_revalidate: bool) -> Self {
        self.stale_while_revalidate = stale_while_revalidate;
        self
    }

    /// Enables or disables the deduplication of concurrent fetches.
    #[must_use]
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }
}

impl Display for BindingOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ttl: {}, stale-while-revalidate: {}, dedupe: {}",
            format_duration(self.ttl),
            self.stale_while_revalidate,
            self.dedupe
        )
    }
}

/// Tracks the liveness and the outstanding fetches of a binding for its current key.
///
/// Changing the key of a binding starts a new generation. Fetches of a previous generation
/// still settle (and write into the cache), but they no longer touch the view.
struct Generation {
    alive: AtomicBool,
    pending: AtomicUsize,
}

impl Generation {
    fn new() -> Arc<Self> {
        Arc::new(Generation {
            alive: AtomicBool::new(true),
            pending: AtomicUsize::new(0),
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn dispose(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

/// Binds a single consumer to a cache key.
///
/// A binding decides whether to serve a cached value, to serve a stale one while revalidating it
/// or to fetch the value from scratch. It exposes the outcome as a [View](View) which can either
/// be read via [view](Binding::view) or observed via [subscribe](Binding::subscribe).
///
/// Fetches are issued through the shared [Cache](Cache), so that concurrent bindings for the same
/// key share a single fetch. Once a binding is disposed (or dropped), it no longer updates its
/// view. Fetches it issued keep running though, as other bindings might await them.
///
/// Note that all operations which might fetch a value spawn tokio tasks and therefore have to be
/// invoked within a tokio runtime.
///
/// # Examples
/// ```
/// # use callisto::cache::{Binding, BindingOptions, BindingState, Cache, CacheSettings};
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() {
/// let cache = Cache::new(CacheSettings::default());
/// let options = BindingOptions::default().with_ttl(Duration::from_secs(5));
///
/// let binding: Binding<u32> =
///     cache.bind_with("answer", || async { Ok::<_, anyhow::Error>(42) }, options);
///
/// // The key is cold, therefore the binding has to load it...
/// let view = binding.activate();
/// assert_eq!(view.is_loading, true);
/// assert_eq!(view.data, None);
///
/// let view = binding.settled().await;
/// assert_eq!(view.is_loading, false);
/// assert_eq!(view.data.as_deref(), Some(&42));
///
/// // Another binding for the same key is served from the cache right away...
/// let other: Binding<u32> =
///     cache.bind_with("answer", || async { Ok::<_, anyhow::Error>(0) }, options);
/// let view = other.activate();
/// assert_eq!(view.data.as_deref(), Some(&42));
/// assert_eq!(view.state, BindingState::ServingCachedFresh);
/// # }
/// ```
pub struct Binding<T: Send + Sync + 'static> {
    cache: Arc<Cache>,
    key: String,
    fetcher: Arc<dyn Fetcher<T>>,
    options: BindingOptions,
    view: Arc<watch::Sender<View<T>>>,
    generation: Arc<Generation>,
}

impl<T: Send + Sync + 'static> Binding<T> {
    /// Creates a new binding.
    ///
    /// Most probably [Cache::bind] or [Cache::bind_with] are more convenient.
    pub fn new<F>(
        cache: Arc<Cache>,
        key: impl Into<String>,
        fetcher: F,
        options: BindingOptions,
    ) -> Self
    where
        F: Fetcher<T> + 'static,
    {
        let (view, _) = watch::channel(View::default());

        Binding {
            cache,
            key: key.into(),
            fetcher: Arc::new(fetcher),
            options,
            view: Arc::new(view),
            generation: Generation::new(),
        }
    }

    /// Returns the key this binding is currently bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the options of this binding.
    pub fn options(&self) -> &BindingOptions {
        &self.options
    }

    /// Returns a snapshot of the current view.
    pub fn view(&self) -> View<T> {
        self.view.borrow().clone()
    }

    /// Returns the current state.
    pub fn state(&self) -> BindingState {
        self.view.borrow().state
    }

    /// Returns a receiver which is notified whenever the view changes.
    pub fn subscribe(&self) -> watch::Receiver<View<T>> {
        self.view.subscribe()
    }

    /// Determines if this binding still updates its view.
    pub fn is_alive(&self) -> bool {
        self.generation.is_alive()
    }

    /// Activates the binding and returns the view which results from it.
    ///
    /// * If a valid value is cached, it is served immediately and nothing is fetched.
    /// * If an expired value is cached and **stale_while_revalidate** is enabled, the expired
    ///   value is served immediately while a fresh one is fetched in the background.
    /// * Otherwise the value is fetched and the view reports **is_loading** until it arrives.
    ///
    /// Activating a disposed binding does nothing.
    pub fn activate(&self) -> View<T> {
        if !self.is_alive() {
            return self.view();
        }

        match self.cache.lookup(&self.key) {
            Lookup::Fresh(value) => match self.downcast(value) {
                Some(data) => {
                    log::debug!("Serving {} from the cache.", self.key);
                    self.update(|view| {
                        view.data = Some(data);
                        view.is_loading = false;
                        view.is_stale = false;
                        view.error = None;
                        view.state = BindingState::ServingCachedFresh;
                    });
                }
                None => self.load_cold(),
            },
            Lookup::Stale(value) if self.options.stale_while_revalidate => {
                match self.downcast(value) {
                    Some(data) => {
                        log::debug!("Serving a stale value for {} while revalidating it.", self.key);
                        self.begin(self.fetch_mode(), |view| {
                            view.data = Some(data);
                            view.is_loading = false;
                            view.is_stale = true;
                            view.error = None;
                            view.state = BindingState::ServingStaleRevalidating;
                        });
                    }
                    None => self.load_cold(),
                }
            }
            _ => self.load_cold(),
        }

        self.view()
    }

    /// Fetches the value again, no matter if the cached one is still valid.
    ///
    /// The cached value is kept (and still shown) until the fetch completes. If the fetch fails,
    /// the view reports the error but still shows the previous value.
    pub fn refetch(&self) {
        if self.is_alive() {
            log::debug!("Refetching {}...", self.key);
            self.begin(self.fetch_mode(), Self::refresh_state);
        }
    }

    /// Removes the cached value and immediately fetches a new one.
    ///
    /// In contrast to [refetch](Binding::refetch), this never joins a fetch which was already in
    /// flight, as its outcome might predate the invalidation.
    pub fn invalidate(&self) {
        let _ = self.cache.invalidate_key(&self.key);
        if self.is_alive() {
            log::debug!("Invalidated {}, fetching a new value...", self.key);
            self.begin(FetchMode::Fresh, Self::refresh_state);
        }
    }

    /// Removes the cached value without fetching a new one.
    ///
    /// The view is left untouched. The next activation (of any binding) for this key will
    /// observe a cold key.
    pub fn clear_cache(&self) -> bool {
        self.cache.invalidate_key(&self.key)
    }

    /// Binds to another key and activates the binding for it.
    ///
    /// Fetches which are still outstanding for the previous key complete and update the cache,
    /// but no longer affect the view. Note that this also revives a disposed binding.
    pub fn set_key(&mut self, key: impl Into<String>) -> View<T> {
        self.generation.dispose();
        self.generation = Generation::new();
        self.key = key.into();
        let _ = self.view.send_replace(View::default());

        self.activate()
    }

    /// Disposes the binding so that it no longer updates its view.
    ///
    /// Fetches issued by this binding keep running, as other bindings might await them. This is
    /// automatically invoked once the binding is dropped.
    ///
    /// The view itself stays untouched, but its receivers are notified so that pending
    /// [settled](Binding::settled) calls return.
    pub fn dispose(&self) {
        self.generation.dispose();
        self.view.send_modify(|_| ());
    }

    /// Waits until no fetch issued by this binding is outstanding and returns the view.
    ///
    /// Returns immediately for disposed bindings.
    pub async fn settled(&self) -> View<T> {
        let generation = self.generation.clone();
        let mut receiver = self.view.subscribe();
        let settled = match receiver
            .wait_for(|view| !view.is_fetching || !generation.is_alive())
            .await
        {
            Ok(view) => Some(view.clone()),
            Err(_) => None,
        };

        settled.unwrap_or_else(|| self.view())
    }

    fn fetch_mode(&self) -> FetchMode {
        if self.options.dedupe {
            FetchMode::Join
        } else {
            FetchMode::Fresh
        }
    }

    fn downcast(&self, value: Value) -> Option<Arc<T>> {
        match value.downcast::<T>() {
            Ok(data) => Some(data),
            Err(_) => {
                log::warn!(
                    "The value cached for {} is not a {} - treating it as absent.",
                    self.key,
                    std::any::type_name::<T>()
                );
                None
            }
        }
    }

    fn refresh_state(view: &mut View<T>) {
        view.state = if view.data.is_none() {
            view.is_loading = true;
            BindingState::ColdLoading
        } else if view.is_stale {
            BindingState::ServingStaleRevalidating
        } else {
            BindingState::ServingCachedFresh
        };
    }

    fn update(&self, modify: impl FnOnce(&mut View<T>)) {
        let generation = &self.generation;
        let _ = self.view.send_if_modified(|view| {
            if !generation.is_alive() {
                return false;
            }
            modify(view);
            true
        });
    }

    fn load_cold(&self) {
        log::debug!("Fetching {} as no usable value is cached...", self.key);
        self.begin(self.fetch_mode(), |view| {
            view.data = None;
            view.is_loading = true;
            view.is_stale = false;
            view.error = None;
            view.state = BindingState::ColdLoading;
        });
    }

    /// Issues a fetch and marks the view as fetching.
    ///
    /// The given closure is applied in the same modification, so that no observer ever sees
    /// the prepared state without **is_fetching** being set.
    fn begin(&self, mode: FetchMode, prepare: impl FnOnce(&mut View<T>)) {
        let generation = self.generation.clone();
        let _ = generation.pending.fetch_add(1, Ordering::AcqRel);
        self.update(|view| {
            prepare(view);
            view.is_fetching = true;
        });

        let fetcher = self.fetcher.clone();
        let operation = self.cache.fetch(
            &self.key,
            move || {
                async move {
                    let value: Value = Arc::new(fetcher.fetch().await?);
                    Ok::<Value, anyhow::Error>(value)
                }
                .boxed()
            },
            self.options.ttl,
            mode,
        );

        let view = self.view.clone();
        let key = self.key.clone();
        crate::spawn!(async move {
            let outcome = operation.wait().await;
            Self::complete(&view, &generation, &key, outcome);
        });
    }

    fn complete(
        view: &watch::Sender<View<T>>,
        generation: &Generation,
        key: &str,
        outcome: Outcome,
    ) {
        let remaining = generation
            .pending
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1);

        let _ = view.send_if_modified(|view| {
            if !generation.is_alive() {
                log::trace!("Dropping a result for {} as its binding is gone.", key);
                return false;
            }

            match outcome {
                Ok(value) => match value.downcast::<T>() {
                    Ok(data) => {
                        view.data = Some(data);
                        view.is_stale = false;
                        view.error = None;
                    }
                    Err(_) => {
                        view.error = Some(Arc::new(anyhow::anyhow!(
                            "The value fetched for {} is not a {}.",
                            key,
                            std::any::type_name::<T>()
                        )));
                    }
                },
                Err(error) => view.error = Some(error),
            }

            view.is_loading = false;
            view.is_fetching = remaining > 0;
            if remaining == 0 {
                view.is_stale = false;
                view.state = BindingState::Settled;
            }

            true
        });
    }
}

impl<T: Send + Sync + 'static> Drop for Binding<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: Send + Sync + 'static> Debug for Binding<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key)
            .field("options", &self.options)
            .field("state", &self.state())
            .field("alive", &self.is_alive())
            .finish()
    }
}

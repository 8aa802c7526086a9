//! Provides a cache for the results of asynchronous fetches.
//!
//! Each consumer which needs a remotely fetched value (most probably the result of a REST call)
//! creates a [Binding](Binding) for the key of this value. Once activated, the binding consults
//! the shared [Cache](Cache) and decides what to do:
//!
//! * If a **valid** value is cached, it is served right away. No fetch is performed.
//! * If an **expired** value is cached, it is served right away, but flagged as stale. At the
//!   same time a fresh value is fetched in the background (stale-while-revalidate).
//! * Otherwise the value is fetched and the binding reports that it is loading.
//!
//! As many consumers tend to ask for the same data at the same time, concurrent fetches for the
//! same key are collapsed into a single one. All bindings waiting for this key observe the very
//! same outcome, be it the value or the error. Errors are never cached, so that the next
//! activation simply tries again. Also, a failed fetch never destroys data which is already
//! shown.
//!
//! Values are kept until they are explicitly removed. Expiry only determines whether a value is
//! served as is or revalidated. The administrative operations like
//! [clear_all](Cache::clear_all) or [clear_by_pattern](Cache::clear_by_pattern) can be used to
//! remove values, e.g. when a user logs out.
//!
//! The defaults for all bindings (TTL, stale-while-revalidate and deduplication) are read from
//! the **cache** section of the system config (see [CacheSettings](CacheSettings)). The cache
//! picks up changes of this config without a restart. To enable this,
//! [install](install) has to be called.
//!
//! # Examples
//! ```
//! # use callisto::builder::Builder;
//! # use callisto::cache::{Binding, Cache};
//! # #[tokio::main]
//! # async fn main() {
//! let platform = Builder::new().enable_cache().build().await;
//! let cache = platform.require::<Cache>();
//!
//! let projects: Binding<Vec<String>> = cache.bind("projects", || async {
//!     Ok::<_, anyhow::Error>(vec!["Callisto".to_owned()])
//! });
//!
//! let view = projects.activate();
//! assert_eq!(view.is_loading, true);
//!
//! let view = projects.settled().await;
//! assert_eq!(view.data.unwrap()[0], "Callisto");
//! assert_eq!(view.error.is_none(), true);
//! # }
//! ```
use std::any::Any;
use std::sync::{Arc, Weak};

use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::platform::Platform;

mod admin;
mod binding;
mod inflight;
mod service;
mod settings;
mod store;

pub use admin::CacheStats;
pub use binding::{Binding, BindingOptions, BindingState, Fetcher, View};
pub use inflight::{InflightRegistry, Operation};
pub use service::Cache;
pub use settings::{CacheSettings, DEFAULT_TTL};
pub use store::{CacheEntry, EntryStore};

/// Represents a value as stored in the cache.
///
/// As a single cache holds values of all kinds of types, these are type erased. Each
/// [Binding](Binding) downcasts the values for its key into its own type.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Represents the error of a failed fetch.
///
/// All waiters of a fetch receive the identical error, therefore it is shared.
pub type FetchError = Arc<anyhow::Error>;

/// Represents the outcome of a fetch.
pub type Outcome = Result<Value, FetchError>;

/// Creates and installs the process wide [Cache](Cache) into the given platform.
///
/// If a [Config](crate::config::Config) is present, the settings are read from its **cache**
/// section and updated whenever the config changes. Otherwise the built-in defaults are used.
pub fn install(platform: &Arc<Platform>) -> Arc<Cache> {
    let config = platform.find::<Config>();
    let settings = config
        .as_ref()
        .and_then(|config| load_settings(config))
        .unwrap_or_default();

    log::info!("Installing cache ({})...", settings);
    let cache = Cache::new(settings);
    platform.register::<Cache>(cache.clone());

    if let Some(config) = config {
        run_config_listener(platform.clone(), &config, Arc::downgrade(&cache));
    }

    cache
}

/// Reads the settings from the given config.
///
/// Returns **None** if the config is invalid, so that the current settings remain active.
fn load_settings(config: &Config) -> Option<CacheSettings> {
    match CacheSettings::from_config(config.current().query("cache")) {
        Ok(settings) => Some(settings),
        Err(error) => {
            log::error!(
                "Invalid cache config: {:#}. Keeping the current settings.",
                error
            );
            None
        }
    }
}

/// Updates the settings of the cache whenever the config changes.
///
/// The listener only holds a weak reference to the cache and the config, so that it ends once
/// either of them is dropped or the platform is terminated.
fn run_config_listener(platform: Arc<Platform>, config: &Arc<Config>, cache: Weak<Cache>) {
    let mut config_changed = config.notifier();
    let config = Arc::downgrade(config);

    crate::spawn!(async move {
        while platform.is_running() {
            if let Err(RecvError::Closed) = config_changed.recv().await {
                return;
            }

            let (config, cache) = match (config.upgrade(), cache.upgrade()) {
                (Some(config), Some(cache)) => (config, cache),
                _ => return,
            };

            if let Some(settings) = load_settings(&config) {
                cache.update_settings(settings);
            }
        }
    });
}

//! Callisto is a library for caching the results of asynchronous fetches.
//!
//! # Introduction
//! Applications which talk to remote services tend to fetch the same data over and over again.
//! Several parts of an application ask for the same list of users or projects, often at the very
//! same time. **Callisto** sits in between these consumers and the remote services. It keeps the
//! fetched values along with a **time to live**, collapses concurrent requests for the same key
//! into a single fetch and permits to show an expired value while a fresh one is fetched in the
//! background (**stale-while-revalidate**).
//!
//! Each consumer creates a [Binding](cache::Binding) for the key it is interested in. Activating
//! the binding yields a [View](cache::View) which tells the consumer what to show: the data (if
//! any is available), whether it is still loading, whether a fetch is running in the background,
//! whether the shown data is stale and the error of the last failed fetch. Views can also be
//! observed via a **tokio::sync::watch** channel.
//!
//! # Features
//! * **Deduplication of concurrent fetches** - all consumers waiting for the same key observe
//!   the identical outcome of a single fetch.
//! * **Stale-while-revalidate** - expired values are still served while a fresh one is fetched.
//! * **Errors never destroy data** - a failed fetch is reported, but the last known value is
//!   still shown. Errors are never cached, so the next activation simply tries again.
//! * **Administrative operations** to wipe the whole cache (e.g. on logout) or all keys matching
//!   a pattern.
//! * **Reload-aware config facility** which permits to change the default TTL and friends
//!   without a restart.
//! * **100% Async/Await** - everything builds upon [tokio](https://tokio.rs/).
//!
//! # Modules
//! * **Cache**: The cache itself along with its bindings. More infos: [crate::cache]
//! * **Config**: The system configuration which is loaded from **config/settings.yml**. See
//!   [crate::config]
//!
//! # Examples
//! A short example on how to initialize the library can be found here [Builder](builder::Builder).
//! The usage of bindings is shown in the documentation of the [cache](cache) module.
#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned closure to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate callisto;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

pub mod builder;
pub mod cache;
pub mod config;
pub mod fmt;
pub mod platform;

/// Contains the version of the Callisto library.
pub const CALLISTO_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the Callisto build being used.
pub const CALLISTO_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests build several platforms within one process, but the logger can only be set once...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

//! Provides a builder which can be used to setup and initialize the framework.
//!
//! As Callisto provides some optional components, a builder permits to selectively enable or
//! disable them.
//!
//! # Example
//! Setting up the framework with all features enabled:
//! ```no_run
//! # use callisto::builder::Builder;
//! # use callisto::cache::{Binding, Cache};
//! #[tokio::main]
//! async fn main() {
//!     // Enable all features and build the platform...
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Obtain the cache and bind to some keys...
//!     let cache = platform.require::<Cache>();
//!     let users: Binding<Vec<String>> =
//!         cache.bind("users", || async { Ok::<_, anyhow::Error>(Vec::new()) });
//!     users.activate();
//! }
//! ```
use std::sync::Arc;

use crate::platform::Platform;
use crate::{init_logging, CALLISTO_REVISION, CALLISTO_VERSION};

/// Initializes the framework by creating and initializing all core components.
///
/// As Callisto provides a bunch of components of which some are optional, the actual setup
/// can be configured here.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    setup_config: bool,
    setup_cache: bool,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Builder {
            setup_logging: false,
            setup_config: false,
            setup_cache: false,
        }
    }

    /// Enables all features.
    ///
    /// Note that using this method (and then maybe disabling selected components) is quite
    /// convenient, but be aware that new components which might be added in a library update
    /// will then also be enabled by default.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.setup_config = true;
        self.setup_cache = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs [config::Config](crate::config::Config) and loads the **settings.yml**.
    ///
    /// For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables setting up a **Config** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Creates and installs the [Cache](crate::cache::Cache).
    ///
    /// If the config is enabled as well, the cache reads its defaults from there.
    pub fn enable_cache(mut self) -> Self {
        self.setup_cache = true;
        self
    }

    /// Disables setting up the **Cache** after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_cache(mut self) -> Self {
        self.setup_cache = false;
        self
    }

    /// Builds the [Platform](crate::platform::Platform) registry with all the enabled components
    /// being registered.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. CALLISTO (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            CALLISTO_VERSION,
            CALLISTO_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.setup_config {
            crate::config::install(platform.clone()).await;
        }

        if self.setup_cache {
            let _ = crate::cache::install(&platform);
        }

        platform
    }
}

//! Contains the system configuration.
//!
//! Provides access to the system configuration which is loaded from **config/settings.yml**. The
//! file is observed and reloaded once it changes. Therefore each user of the config should attach
//! itself to the [Config::notifier](Config::notifier) and re-process the config once a change
//! message is received. The cache does exactly this to pick up new default TTLs without a restart.
//!
//! The **Config** itself can be obtained from the **Platform** once and kept around. However, a
//! [Handle](Handle) obtained via **Config::current()** should not be stored, as it will not be
//! updated once a new config has been loaded.
//!
//! # Examples
//!
//! ```
//! # use callisto::config::Config;
//! let config = Config::new("settings.yml");
//! config.load_from_string("
//! cache:
//!     ttl: 30s
//!     dedupe: false
//! ", None).unwrap();
//!
//! assert_eq!(config.current().query("cache.ttl").as_str(), Some("30s"));
//! assert_eq!(config.current().query("cache.dedupe").as_bool(), Some(false));
//! assert_eq!(config.current().query("cache.unknown").is_badvalue(), true);
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::platform::Platform;

/// Provides access to the system configuration.
///
/// Most probably a config instance is installed by the [Builder](crate::builder::Builder) and
/// can be obtained via `platform.require::<Config>()`.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// The message itself carries no information. Once it is received, the config was changed and
/// needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Note that this will neither load the file nor install a change listener. This is done by
    /// [install](install).
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Hash(Default::default()), None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    #[cfg(not(test))]
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Forces the config to read the underlying file.
    ///
    /// A missing file is not an error, the cache simply runs with its built-in defaults.
    pub async fn load(&self) -> anyhow::Result<()> {
        match tokio::fs::metadata(&self.filename).await {
            Ok(metadata) if metadata.is_file() => (),
            _ => {
                log::info!(
                    "Config file {} doesn't exist - skipping config load.",
                    &self.filename
                );
                return Ok(());
            }
        }

        log::info!("Loading config file {}...", &self.filename);
        let config_data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        let last_modified = tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        self.load_from_string(config_data.as_str(), last_modified)
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// If the given data cannot be parsed, an error is returned and the previously loaded config
    /// remains active.
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let mut docs = YamlLoader::load_from_str(data).map_err(|error| {
            anyhow::anyhow!("Cannot parse config file {}: {}", &self.filename, error)
        })?;

        let doc = match docs.drain(..).next() {
            Some(doc @ Yaml::Hash(_)) => doc,
            _ => Yaml::Hash(Default::default()),
        };

        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Provides access to the root of the currently loaded configuration.
    pub fn root(&self) -> &Yaml {
        &self.config.0
    }

    /// Resolves a dotted path like **cache.ttl** against the loaded configuration.
    ///
    /// Returns **Yaml::BadValue** if any part of the path is missing.
    pub fn query(&self, path: impl AsRef<str>) -> &Yaml {
        path.as_ref()
            .split('.')
            .filter(|part| !part.is_empty())
            .fold(self.root(), |node, part| &node[part])
    }
}

/// Creates and installs a **Config** for the given platform.
///
/// This will read its contents from **config/settings.yml** and also install a change listener
/// for this file. Note that this listener only watches the "last modified" date of the file.
pub async fn install(platform: Arc<Platform>) {
    let path = Path::new("config");
    if let Err(error) = tokio::fs::create_dir_all(path).await {
        log::warn!(
            "Failed to create config base directory {}: {}",
            path.to_string_lossy(),
            error
        )
    }

    let config = Arc::new(Config::new("config/settings.yml"));
    platform.register::<Config>(config.clone());

    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    run_config_change_monitor(platform, config);
}

#[cfg(test)]
fn run_config_change_monitor(_platform: Arc<Platform>, _config: Arc<Config>) {
    // No automatic updates during testing...
}

#[cfg(not(test))]
fn run_config_change_monitor(platform: Arc<Platform>, config: Arc<Config>) {
    crate::spawn!(async move {
        while platform.is_running() {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            let last_modified = config.last_modified().await;
            let last_loaded = config.config.load().1;

            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => log::info!("System configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load system config: {:#}", error),
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use std::time::SystemTime;

    #[test]
    fn ensure_config_update_works() {
        crate::testing::test_async(async {
            let platform = Builder::new().enable_config().build().await;
            let config = platform.require::<Config>();

            config
                .load_from_string("cache:\n    ttl: 10s", Some(SystemTime::now()))
                .unwrap();

            let mut change_notifier = config.notifier();
            let (tx, rx) = tokio::sync::oneshot::channel();
            crate::spawn!(async move {
                if change_notifier.recv().await.is_ok() {
                    let _ = tx.send(());
                }
            });

            assert_eq!(config.current().query("cache.ttl").as_str(), Some("10s"));

            // A malformed config is rejected and the previous one stays active...
            assert_eq!(
                config
                    .load_from_string("cache: 'invalid", Some(SystemTime::now()))
                    .is_err(),
                true
            );
            assert_eq!(config.current().query("cache.ttl").as_str(), Some("10s"));

            config
                .load_from_string("cache:\n    ttl: 20s", Some(SystemTime::now()))
                .unwrap();

            assert_eq!(rx.await.is_ok(), true);
            assert_eq!(config.current().query("cache.ttl").as_str(), Some("20s"));
        });
    }

    #[test]
    fn a_non_mapping_document_yields_an_empty_config() {
        let config = Config::new("test.yml");
        config.load_from_string("- a\n- b", None).unwrap();

        assert_eq!(config.current().query("cache").is_badvalue(), true);
        assert_eq!(config.current().root().as_hash().unwrap().is_empty(), true);
    }
}

use std::fmt::{Display, Formatter};
use std::time::Duration;

use yaml_rust::Yaml;

use crate::fmt::{format_duration, parse_duration};

/// The TTL applied if neither the config nor the binding specify one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Contains the process wide defaults of a [Cache](crate::cache::Cache).
///
/// These are read from the **cache** section of the system config:
///
/// ```yaml
/// cache:
///     # Specifies the default time to live of values written by bindings which don't specify
///     # their own TTL. Supports common suffixes like: ms, s, m, h, d
///     ttl: 5m
///     # Determines if bindings serve stale values while fetching fresh ones.
///     stale_while_revalidate: true
///     # Determines if bindings join fetches which are already in flight for the same key.
///     dedupe: true
///     # Discards results of fetches which settle after a fetch for the same key which was
///     # issued later.
///     fenced_writes: false
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// The default time to live of new bindings.
    pub ttl: Duration,

    /// Determines if new bindings use stale-while-revalidate by default.
    pub stale_while_revalidate: bool,

    /// Determines if new bindings deduplicate concurrent fetches by default.
    pub dedupe: bool,

    /// Determines if out of order fetch results are discarded.
    pub fenced_writes: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            ttl: DEFAULT_TTL,
            stale_while_revalidate: true,
            dedupe: true,
            fenced_writes: false,
        }
    }
}

impl CacheSettings {
    /// Parses the settings from the given **cache** section of the config.
    ///
    /// Missing values fall back to their defaults. Values of the wrong type result in an error.
    ///
    /// # Examples
    /// ```
    /// # use callisto::cache::CacheSettings;
    /// # use std::time::Duration;
    /// # use yaml_rust::YamlLoader;
    /// let docs = YamlLoader::load_from_str("ttl: 30s\ndedupe: false").unwrap();
    /// let settings = CacheSettings::from_config(&docs[0]).unwrap();
    ///
    /// assert_eq!(settings.ttl, Duration::from_secs(30));
    /// assert_eq!(settings.dedupe, false);
    /// assert_eq!(settings.stale_while_revalidate, true);
    /// ```
    pub fn from_config(section: &Yaml) -> anyhow::Result<Self> {
        let defaults = CacheSettings::default();
        if section.is_badvalue() || section.is_null() {
            return Ok(defaults);
        }
        if section.as_hash().is_none() {
            return Err(anyhow::anyhow!("The cache config has to be an object."));
        }

        Ok(CacheSettings {
            ttl: parse_ttl(&section["ttl"], defaults.ttl)?,
            stale_while_revalidate: parse_flag(
                &section["stale_while_revalidate"],
                "stale_while_revalidate",
                defaults.stale_while_revalidate,
            )?,
            dedupe: parse_flag(&section["dedupe"], "dedupe", defaults.dedupe)?,
            fenced_writes: parse_flag(
                &section["fenced_writes"],
                "fenced_writes",
                defaults.fenced_writes,
            )?,
        })
    }
}

/// Accepts either a duration expression like "30s" or a plain number of milliseconds.
fn parse_ttl(value: &Yaml, default: Duration) -> anyhow::Result<Duration> {
    match value {
        Yaml::BadValue | Yaml::Null => Ok(default),
        Yaml::String(expression) => parse_duration(expression)
            .map_err(|error| anyhow::anyhow!("Failed to parse 'ttl': {}", error)),
        Yaml::Integer(millis) if *millis >= 0 => Ok(Duration::from_millis(*millis as u64)),
        _ => Err(anyhow::anyhow!(
            "Failed to parse 'ttl': Expected a duration like '5m' but got {:?}",
            value
        )),
    }
}

fn parse_flag(value: &Yaml, name: &str, default: bool) -> anyhow::Result<bool> {
    match value {
        Yaml::BadValue | Yaml::Null => Ok(default),
        Yaml::Boolean(flag) => Ok(*flag),
        _ => Err(anyhow::anyhow!(
            "Failed to parse '{}': Expected true or false but got {:?}",
            name,
            value
        )),
    }
}

impl Display for CacheSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ttl: {}, stale-while-revalidate: {}, dedupe: {}, fenced writes: {}",
            format_duration(self.ttl),
            self.stale_while_revalidate,
            self.dedupe,
            self.fenced_writes
        )
    }
}

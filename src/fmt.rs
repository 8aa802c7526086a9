//! Provides parsing and formatting helpers for durations.
//!
//! TTLs are specified in the system config using a compact notation like **30s** or **5m**.
//! These helpers translate between this notation and **std::time::Duration**.
use std::fmt::Write;
use std::time::Duration;

/// Lists the units known to [format_duration](format_duration) along with their length in
/// milliseconds, largest first.
const UNITS: [(&str, u128); 5] = [
    ("d", 24 * 60 * 60 * 1000),
    ("h", 60 * 60 * 1000),
    ("m", 60 * 1000),
    ("s", 1000),
    ("ms", 1),
];

/// Parses a duration from a given string.
///
/// This string can have the following suffixes:
/// * **ms** or **MS**: treats the value as milliseconds (this is also the default if no suffix
///   is given)
/// * **s** or **S**: treats the value as seconds
/// * **m** or **M**: treats the value as minutes
/// * **h** or **H**: treats the value as hours
/// * **d** or **D**: treats the value as days
///
/// Returns an **Err** if either a non-integer value is given or if an unknown suffix was provided.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(callisto::fmt::parse_duration("100 ms").unwrap(), Duration::from_millis(100));
/// assert_eq!(callisto::fmt::parse_duration("250").unwrap(), Duration::from_millis(250));
/// assert_eq!(callisto::fmt::parse_duration("12 s").unwrap(), Duration::from_secs(12));
/// assert_eq!(callisto::fmt::parse_duration("5m").unwrap(), Duration::from_secs(5 * 60));
/// assert_eq!(callisto::fmt::parse_duration("2 H").unwrap(), Duration::from_secs(2 * 60 * 60));
/// assert_eq!(callisto::fmt::parse_duration("1d").unwrap(), Duration::from_secs(24 * 60 * 60));
///
/// // An invalid suffix results in an error...
/// assert_eq!(callisto::fmt::parse_duration("3 Y").is_err(), true);
///
/// // Decimal or negative numbers result in an error...
/// assert_eq!(callisto::fmt::parse_duration("1.5s").is_err(), true);
/// assert_eq!(callisto::fmt::parse_duration("-1m").is_err(), true);
/// ```
pub fn parse_duration(str: impl AsRef<str>) -> anyhow::Result<Duration> {
    lazy_static::lazy_static! {
        static ref NUMBER_AND_UNIT: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *(ms|s|m|h|d|MS|S|M|H|D)? *$").unwrap();
    }

    let captures = NUMBER_AND_UNIT.captures(str.as_ref()).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a duration expression. \
             Expected a positive number and optionally 'ms', 's', 'm', 'h' or 'd' as suffix.",
            str.as_ref()
        )
    })?;

    let number = captures[1]
        .parse::<u64>()
        .map_err(|error| anyhow::anyhow!("Invalid duration '{}': {}", str.as_ref(), error))?;

    let unit = captures
        .get(2)
        .map(|unit| unit.as_str().to_lowercase())
        .unwrap_or_default();

    let factor = match unit.as_str() {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        _ => return Ok(Duration::from_millis(number)),
    };

    number
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("The duration '{}' is too large.", str.as_ref()))
}

/// Formats a duration into a string like "1d 3h 17m 2s 12ms".
///
/// Units which would be zero are omitted. A zero duration is rendered as "0ms".
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(callisto::fmt::format_duration(Duration::ZERO), "0ms");
/// assert_eq!(callisto::fmt::format_duration(Duration::from_millis(13)), "13ms");
/// assert_eq!(callisto::fmt::format_duration(Duration::from_millis(62_013)), "1m 2s 13ms");
/// assert_eq!(callisto::fmt::format_duration(Duration::from_secs(5 * 60)), "5m");
/// assert_eq!(callisto::fmt::format_duration(Duration::from_secs(24 * 60 * 60 + 59)), "1d 59s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let mut remaining = duration.as_millis();
    if remaining == 0 {
        return "0ms".to_owned();
    }

    let mut result = String::new();
    for (unit, millis) in UNITS {
        let amount = remaining / millis;
        if amount > 0 {
            if !result.is_empty() {
                result.push(' ');
            }
            let _ = write!(result, "{}{}", amount, unit);
            remaining %= millis;
        }
    }

    result
}

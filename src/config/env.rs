//! Environment variable helpers shared by the config sections.

use std::str::FromStr;

/// Parses `key` from the environment, ignoring unset or unparsable values.
#[must_use]
pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Reads a boolean flag. `false`, `0`, `no` and `off` are false; any other
/// set value is true.
#[must_use]
pub fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| {
        !matches!(
            v.trim().to_lowercase().as_str(),
            "false" | "0" | "no" | "off"
        )
    })
}

/// Reads a comma-separated list, dropping empty items.
#[must_use]
pub fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    })
}

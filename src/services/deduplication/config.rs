//! Duplicate detection and alert settings.

use crate::config::{env_flag, env_list, env_parse};
use std::collections::HashSet;

/// Default minimum duplicates before an alert is raised.
pub const DEFAULT_MIN_DUPLICATES: usize = 1;

/// Default cap on duplicates returned by one scan.
pub const DEFAULT_MAX_RESULTS: usize = 100;

/// Actions ignored by default. Login scans re-check every held item and would
/// flood the alert channel.
pub const DEFAULT_IGNORED_ACTIONS: &[&str] = &["LOGIN_SCAN"];

/// Configuration for duplicate detection and alerting.
///
/// # Environment Variables
///
/// | Variable | Type | Default |
/// |----------|------|---------|
/// | `ITEMTRACE_ALERTS_ENABLED` | bool | `true` |
/// | `ITEMTRACE_MIN_DUPLICATES` | usize | `1` |
/// | `ITEMTRACE_MAX_RESULTS` | usize | `100` |
/// | `ITEMTRACE_IGNORED_ACTIONS` | comma list | `LOGIN_SCAN` |
///
/// # Example
///
/// ```rust
/// use itemtrace::services::DetectionConfig;
///
/// let config = DetectionConfig::default();
/// assert!(config.alerts_enabled);
/// assert!(config.is_ignored("LOGIN_SCAN"));
/// assert!(!config.is_ignored("CRAFTED"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionConfig {
    /// Whether duplicate alerts are dispatched at all.
    pub alerts_enabled: bool,
    /// Minimum number of duplicates for an alert.
    pub min_duplicates: usize,
    /// Cap on duplicates returned per scan.
    pub max_results: usize,
    /// Actions that never raise alerts.
    pub ignored_actions: HashSet<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            alerts_enabled: true,
            min_duplicates: DEFAULT_MIN_DUPLICATES,
            max_results: DEFAULT_MAX_RESULTS,
            ignored_actions: DEFAULT_IGNORED_ACTIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl DetectionConfig {
    /// Applies `ITEMTRACE_*` detection overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_flag("ITEMTRACE_ALERTS_ENABLED") {
            self.alerts_enabled = v;
        }
        if let Some(v) = env_parse("ITEMTRACE_MIN_DUPLICATES") {
            self.min_duplicates = v;
        }
        if let Some(v) = env_parse("ITEMTRACE_MAX_RESULTS") {
            self.max_results = v;
        }
        if let Some(list) = env_list("ITEMTRACE_IGNORED_ACTIONS") {
            self.ignored_actions = list.into_iter().collect();
        }
        self
    }

    /// Returns true if `action` never raises alerts. Matching is case-insensitive.
    #[must_use]
    pub fn is_ignored(&self, action: &str) -> bool {
        self.ignored_actions
            .iter()
            .any(|ignored| ignored.eq_ignore_ascii_case(action))
    }

    /// Returns the effective alert threshold. Zero duplicates never alert.
    #[must_use]
    pub fn alert_threshold(&self) -> usize {
        self.min_duplicates.max(1)
    }

    /// Sets whether alerts are enabled.
    #[must_use]
    pub const fn with_alerts_enabled(mut self, enabled: bool) -> Self {
        self.alerts_enabled = enabled;
        self
    }

    /// Sets the minimum duplicates for an alert.
    #[must_use]
    pub const fn with_min_duplicates(mut self, min: usize) -> Self {
        self.min_duplicates = min;
        self
    }

    /// Sets the scan cap.
    #[must_use]
    pub const fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Replaces the ignored actions.
    #[must_use]
    pub fn with_ignored_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_actions = actions.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_list_is_case_insensitive() {
        let config = DetectionConfig::default().with_ignored_actions(["inventory_scan"]);
        assert!(config.is_ignored("INVENTORY_SCAN"));
        assert!(!config.is_ignored("LOGIN_SCAN"));
    }

    #[test]
    fn test_zero_threshold_is_raised_to_one() {
        let config = DetectionConfig::default().with_min_duplicates(0);
        assert_eq!(config.alert_threshold(), 1);
    }
}

//! Command handlers for the `itemtrace` binary.
//!
//! This module organizes the CLI command implementations into separate files:
//! - `inspect.rs`: register, check, lookup, scan, history and stats
//! - `config.rs`: configuration display
//! - `serve.rs`: long-running newline-delimited JSON mode
//!
//! One-shot commands start an engine on the configured data directory, do
//! their work, and shut down with a final flush.

// Command output goes to stdout.
#![allow(clippy::print_stdout)]

mod config;
mod inspect;
mod serve;

pub use config::cmd_config;
pub use inspect::{
    HistoryReport, LookupReport, RegistrationReport, ScanReport, StatsReport, SuspiciousItem,
    check, cmd_check, cmd_history, cmd_lookup, cmd_register, cmd_scan, cmd_stats, history,
    lookup, register, scan, stats,
};
pub use serve::{Request, Response, cmd_serve, handle_request, serve};

use crate::{Engine, EngineConfig};
use anyhow::Context;
use clap::ValueEnum;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Reads and parses a JSON file.
fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

/// Writes `value` back to `path` as pretty JSON.
fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn start_engine(config: &EngineConfig) -> anyhow::Result<Engine> {
    Engine::start(config.clone())
        .await
        .context("failed to start engine")
}

/// Formats a millisecond timestamp for display.
fn format_millis(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map_or_else(
            || millis.to_string(),
            |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_millis(1_700_000_000_000), "2023-11-14 22:13:20 UTC");
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("item.json");
        let item = crate::ItemContent::new("BOW", 1).with_modifier("POWER", 5);

        write_json(&path, &item).expect("write");
        let back: crate::ItemContent = read_json(&path).expect("read");

        assert_eq!(back, item);
        assert!(read_json::<crate::ItemContent>(&dir.path().join("missing.json")).is_err());
    }
}

//! Read-side and registration command handlers.
//!
//! Each operation has an engine-level function returning a serializable
//! report, shared with `serve`, and a `cmd_*` wrapper that runs it against a
//! freshly started engine and prints the result.

use super::{OutputFormat, format_millis, print_json, read_json, start_engine, write_json};
use crate::models::{ActionLogEntry, ItemContent, ItemId, NetworkRecord, TrackedRecord};
use crate::services::{CHECKED_ACTION, EngineStats};
use crate::sync::RemoteAction;
use crate::{Engine, EngineConfig, Fingerprinter};
use anyhow::Context;
use serde::Serialize;
use std::path::Path;

/// Duplicates listed per item in text output.
const SHOWN_DUPLICATES: usize = 3;

/// Outcome of registering or checking one item.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationReport {
    /// The item's id, or `None` if the content cannot be tracked.
    pub id: Option<ItemId>,
    /// True if this call created the record.
    pub newly_registered: bool,
    /// Content fingerprint, when the item is tracked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Local records sharing the fingerprint.
    pub duplicates: Vec<TrackedRecord>,
    /// The item with its id tag embedded.
    pub item: ItemContent,
}

/// What the store knows about one id.
#[derive(Debug, Clone, Serialize)]
pub struct LookupReport {
    /// The requested id.
    pub id: ItemId,
    /// The record, if the id is known locally.
    pub record: Option<TrackedRecord>,
    /// Local duplicates.
    pub duplicates: Vec<TrackedRecord>,
    /// Duplicates registered by other nodes.
    pub network_duplicates: Vec<NetworkRecord>,
}

/// A tagged inventory entry with duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspiciousItem {
    /// Position in the scanned inventory.
    pub slot: usize,
    /// Content type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Embedded id.
    pub id: ItemId,
    /// Number of local duplicates.
    pub duplicates: usize,
}

/// Outcome of scanning an inventory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    /// Trackable entries examined.
    pub scanned: usize,
    /// Entries carrying an id tag.
    pub tracked: usize,
    /// Tagged entries with at least one duplicate.
    pub suspicious: Vec<SuspiciousItem>,
}

/// Action history of one id.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryReport {
    /// The requested id.
    pub id: ItemId,
    /// Entries recorded by this process, oldest first.
    pub local: Vec<ActionLogEntry>,
    /// Entries shared by the fleet, oldest first.
    pub fleet: Vec<RemoteAction>,
}

/// Engine statistics with the most common types.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    /// Raw statistics.
    #[serde(flatten)]
    pub stats: EngineStats,
    /// Most registered content types, largest first.
    pub top_types: Vec<(String, u64)>,
}

/// Registers `item` under `action`.
pub fn register(
    engine: &Engine,
    mut item: ItemContent,
    action: &str,
    actor: &str,
) -> RegistrationReport {
    let was_tagged = item.embedded_id().is_some();
    let id = engine.tagger().register_item(&mut item, action, actor);
    let fingerprint = id.map(|_| Fingerprinter::fingerprint(&item));
    let duplicates = id.map(|id| engine.find_duplicates(id)).unwrap_or_default();

    RegistrationReport {
        id,
        newly_registered: id.is_some() && !was_tagged,
        fingerprint,
        duplicates,
        item,
    }
}

/// Checks a held item, registering it if it has no id yet.
pub fn check(engine: &Engine, item: ItemContent, actor: &str) -> RegistrationReport {
    register(engine, item, CHECKED_ACTION, actor)
}

/// Looks up `id` locally and across the fleet.
pub async fn lookup(engine: &Engine, id: ItemId) -> LookupReport {
    let record = engine.lookup(id);
    let (duplicates, network_duplicates) = if record.is_some() {
        let network = engine
            .find_network_duplicates(id)
            .await
            .into_iter()
            .filter(|r| r.origin_node != engine.node_name())
            .collect();
        (engine.find_duplicates(id), network)
    } else {
        (Vec::new(), Vec::new())
    };

    LookupReport {
        id,
        record,
        duplicates,
        network_duplicates,
    }
}

/// Scans an inventory for tagged items that have duplicates.
///
/// Untagged items are counted but not registered.
pub fn scan(engine: &Engine, inventory: &[ItemContent]) -> ScanReport {
    let mut report = ScanReport::default();
    for (slot, item) in inventory.iter().enumerate() {
        if !item.is_trackable() {
            continue;
        }
        report.scanned += 1;
        let Some(id) = item.embedded_id() else {
            continue;
        };
        report.tracked += 1;

        let duplicates = engine.find_duplicates(id).len();
        if duplicates > 0 {
            report.suspicious.push(SuspiciousItem {
                slot,
                kind: item.kind.clone(),
                id,
                duplicates,
            });
        }
    }
    report
}

/// Returns the last `limit` history entries of `id`, local and fleet.
pub async fn history(engine: &Engine, id: ItemId, limit: Option<usize>) -> HistoryReport {
    let mut local = engine.item_history(id);
    let mut fleet = engine.network_history(id).await;
    if let Some(limit) = limit {
        local.drain(..local.len().saturating_sub(limit));
        fleet.drain(..fleet.len().saturating_sub(limit));
    }
    HistoryReport { id, local, fleet }
}

/// Returns statistics with the `top` most common types.
#[must_use]
pub fn stats(engine: &Engine, top: usize) -> StatsReport {
    let stats = engine.stats();
    let top_types = stats.top_types(top);
    StatsReport { stats, top_types }
}

/// Register command.
///
/// # Errors
///
/// Returns an error if the item file cannot be read or written back, or the
/// engine cannot start.
pub async fn cmd_register(
    config: &EngineConfig,
    item_path: &Path,
    action: &str,
    actor: &str,
    write_back: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let item: ItemContent = read_json(item_path)?;
    let engine = start_engine(config).await?;
    let report = register(&engine, item, action, actor);
    engine.shutdown().await;

    finish_registration(item_path, &report, write_back, format)
}

/// Check command.
///
/// # Errors
///
/// Returns an error if the item file cannot be read or written back, or the
/// engine cannot start.
pub async fn cmd_check(
    config: &EngineConfig,
    item_path: &Path,
    actor: &str,
    write_back: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let item: ItemContent = read_json(item_path)?;
    let engine = start_engine(config).await?;
    let report = check(&engine, item, actor);
    engine.shutdown().await;

    finish_registration(item_path, &report, write_back, format)
}

fn finish_registration(
    item_path: &Path,
    report: &RegistrationReport,
    write_back: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if write_back && report.newly_registered {
        write_json(item_path, &report.item)?;
    }

    if format == OutputFormat::Json {
        return print_json(report);
    }

    let Some(id) = report.id else {
        println!("Item cannot be tracked (empty, air, or zero quantity)");
        return Ok(());
    };
    println!("Item ID: {id}");
    if report.newly_registered {
        println!("  Registered as new");
    }
    if let Some(fingerprint) = &report.fingerprint {
        println!("  Fingerprint: {}", &fingerprint[..16.min(fingerprint.len())]);
    }
    print_duplicates(&report.duplicates);
    Ok(())
}

/// Lookup command.
///
/// # Errors
///
/// Returns an error if `id` is not a number or the engine cannot start.
pub async fn cmd_lookup(
    config: &EngineConfig,
    id: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let id: ItemId = id.parse().with_context(|| format!("invalid item id '{id}'"))?;
    let engine = start_engine(config).await?;
    let report = lookup(&engine, id).await;
    engine.shutdown().await;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    let Some(record) = &report.record else {
        println!("No record for item {id}");
        return Ok(());
    };
    println!("Item ID: {id}");
    println!("  Creator: {}", record.creator);
    println!("  Created: {}", format_millis(record.created_at));
    println!("  Fingerprint: {}", record.fingerprint);
    print_duplicates(&report.duplicates);
    if !report.network_duplicates.is_empty() {
        println!("  On other nodes: {}", report.network_duplicates.len());
        for remote in report.network_duplicates.iter().take(SHOWN_DUPLICATES) {
            println!(
                "    - {} by {} on {}",
                remote.id, remote.creator, remote.origin_node
            );
        }
    }
    Ok(())
}

/// Scan command.
///
/// # Errors
///
/// Returns an error if the inventory file cannot be read or the engine
/// cannot start.
pub async fn cmd_scan(
    config: &EngineConfig,
    inventory_path: &Path,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let inventory: Vec<ItemContent> = read_json(inventory_path)?;
    let engine = start_engine(config).await?;
    let report = scan(&engine, &inventory);
    engine.shutdown().await;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    for item in &report.suspicious {
        println!(
            "Suspicious: slot {} {} (ID {}) has {} duplicate(s)",
            item.slot, item.kind, item.id, item.duplicates
        );
    }
    println!(
        "Scan complete: {} tracked, {} suspicious",
        report.tracked,
        report.suspicious.len()
    );
    Ok(())
}

/// History command.
///
/// # Errors
///
/// Returns an error if `id` is not a number or the engine cannot start.
pub async fn cmd_history(
    config: &EngineConfig,
    id: &str,
    limit: Option<usize>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let id: ItemId = id.parse().with_context(|| format!("invalid item id '{id}'"))?;
    let engine = start_engine(config).await?;
    let report = history(&engine, id, limit).await;
    engine.shutdown().await;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    if report.local.is_empty() && report.fleet.is_empty() {
        println!("No history for item {id}");
        return Ok(());
    }
    println!("History for item {id}:");
    for entry in &report.local {
        println!(
            "  {} {} by {}",
            format_millis(entry.timestamp),
            entry.action,
            entry.actor
        );
    }
    for remote in &report.fleet {
        println!(
            "  {} {} by {} (on {})",
            format_millis(remote.entry.timestamp),
            remote.entry.action,
            remote.entry.actor,
            remote.origin_node
        );
    }
    Ok(())
}

/// Stats command.
///
/// # Errors
///
/// Returns an error if the engine cannot start.
pub async fn cmd_stats(
    config: &EngineConfig,
    top: usize,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let engine = start_engine(config).await?;
    let report = stats(&engine, top);
    engine.shutdown().await;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    println!("Itemtrace Statistics");
    println!("====================");
    println!();
    println!("Node: {}", report.stats.node_name);
    println!("Tracked items: {}", report.stats.records);
    println!("Items with history: {}", report.stats.tracked_histories);
    println!("Sync: {}", report.stats.sync);
    if !report.top_types.is_empty() {
        println!();
        println!("Top types:");
        for (kind, count) in &report.top_types {
            println!("  {kind}: {count}");
        }
    }
    Ok(())
}

fn print_duplicates(duplicates: &[TrackedRecord]) {
    if duplicates.is_empty() {
        println!("  No duplicates");
        return;
    }
    println!("  Duplicates: {}", duplicates.len());
    for dupe in duplicates.iter().take(SHOWN_DUPLICATES) {
        println!("    - {} by {}", dupe.id, dupe.creator);
    }
}

//! Text encodings shared by every node in a fleet.
//!
//! | Key / channel | Kind | Value |
//! |---------------|------|-------|
//! | `itemtrace:alerts` | pub/sub channel | `origin\|actor\|id\|count` |
//! | `itemtrace:items` | hash, field `<id>` | `fingerprint\|creator\|timestamp` |
//! | `itemtrace:fingerprints:<fingerprint>` | hash, field `<id>` | `creator\|timestamp\|origin` |
//! | `itemtrace:history:<id>` | list | `id\|action\|actor\|origin\|timestamp` |
//!
//! Free-text fields (actor, creator, action) may contain `|`. Decoders take
//! the fixed-format fields from the ends of the value and leave the rest to
//! the free-text field, so such values still round-trip.

use crate::models::{ActionLogEntry, Alert, AlertSource, ItemId, NetworkRecord};
use crate::{Error, Result};

/// Pub/sub channel carrying duplicate alerts.
pub const ALERT_CHANNEL: &str = "itemtrace:alerts";

/// Hash mapping item ids to their fingerprint entry.
pub const ITEMS_KEY: &str = "itemtrace:items";

/// Prefix of the per-fingerprint hashes.
pub const FINGERPRINT_KEY_PREFIX: &str = "itemtrace:fingerprints:";

/// Prefix of the per-item history lists.
pub const HISTORY_KEY_PREFIX: &str = "itemtrace:history:";

const SEPARATOR: char = '|';

/// Returns the hash key listing every item with `fingerprint`.
#[must_use]
pub fn fingerprint_key(fingerprint: &str) -> String {
    format!("{FINGERPRINT_KEY_PREFIX}{fingerprint}")
}

/// Returns the list key holding the history of `id`.
#[must_use]
pub fn history_key(id: ItemId) -> String {
    format!("{HISTORY_KEY_PREFIX}{id}")
}

/// Encodes an alert as `origin|actor|id|count`.
#[must_use]
pub fn encode_alert(alert: &Alert) -> String {
    format!(
        "{}|{}|{}|{}",
        alert.origin_node, alert.actor, alert.id, alert.duplicate_count
    )
}

/// Decodes an alert published by another node.
///
/// The result is always marked as a network alert.
///
/// # Errors
///
/// Returns `InvalidInput` if the message is malformed.
pub fn decode_alert(message: &str) -> Result<Alert> {
    let (origin, rest) = split_first(message, "alert")?;
    let (rest, count) = split_last(rest, "alert")?;
    let (actor, id) = split_last(rest, "alert")?;

    Ok(Alert {
        actor: actor.to_string(),
        id: id.parse()?,
        duplicate_count: parse_number(count, "alert count")?,
        origin_node: origin.to_string(),
        source: AlertSource::Network,
    })
}

/// Encodes an `itemtrace:items` value as `fingerprint|creator|timestamp`.
#[must_use]
pub fn encode_item_entry(fingerprint: &str, creator: &str, timestamp: u64) -> String {
    format!("{fingerprint}|{creator}|{timestamp}")
}

/// Decodes an `itemtrace:items` value into `(fingerprint, creator, timestamp)`.
///
/// # Errors
///
/// Returns `InvalidInput` if the value is malformed.
pub fn decode_item_entry(value: &str) -> Result<(String, String, u64)> {
    let (fingerprint, rest) = split_first(value, "item entry")?;
    let (creator, timestamp) = split_last(rest, "item entry")?;
    Ok((
        fingerprint.to_string(),
        creator.to_string(),
        parse_number(timestamp, "item timestamp")?,
    ))
}

/// Encodes a fingerprint-hash value as `creator|timestamp|origin`.
#[must_use]
pub fn encode_fingerprint_entry(creator: &str, timestamp: u64, origin: &str) -> String {
    format!("{creator}|{timestamp}|{origin}")
}

/// Decodes one field of a fingerprint hash into a [`NetworkRecord`].
///
/// # Errors
///
/// Returns `InvalidInput` if the field or value is malformed.
pub fn decode_fingerprint_entry(field: &str, value: &str) -> Result<NetworkRecord> {
    let (rest, origin) = split_last(value, "fingerprint entry")?;
    let (creator, timestamp) = split_last(rest, "fingerprint entry")?;
    Ok(NetworkRecord {
        id: field.parse()?,
        creator: creator.to_string(),
        created_at: parse_number(timestamp, "fingerprint timestamp")?,
        origin_node: origin.to_string(),
    })
}

/// Encodes a history list entry as `id|action|actor|origin|timestamp`.
#[must_use]
pub fn encode_history_entry(id: ItemId, entry: &ActionLogEntry, origin: &str) -> String {
    format!(
        "{id}|{}|{}|{origin}|{}",
        entry.action, entry.actor, entry.timestamp
    )
}

/// Decodes a history list entry into `(id, entry, origin)`.
///
/// Actions are single tokens on the wire, so any extra separators belong to
/// the actor.
///
/// # Errors
///
/// Returns `InvalidInput` if the entry is malformed.
pub fn decode_history_entry(value: &str) -> Result<(ItemId, ActionLogEntry, String)> {
    let (id, rest) = split_first(value, "history entry")?;
    let (action, rest) = split_first(rest, "history entry")?;
    let (rest, timestamp) = split_last(rest, "history entry")?;
    let (actor, origin) = split_last(rest, "history entry")?;

    Ok((
        id.parse()?,
        ActionLogEntry {
            timestamp: parse_number(timestamp, "history timestamp")?,
            action: action.to_string(),
            actor: actor.to_string(),
        },
        origin.to_string(),
    ))
}

fn split_first<'a>(value: &'a str, what: &str) -> Result<(&'a str, &'a str)> {
    value
        .split_once(SEPARATOR)
        .ok_or_else(|| Error::InvalidInput(format!("malformed {what}: {value}")))
}

fn split_last<'a>(value: &'a str, what: &str) -> Result<(&'a str, &'a str)> {
    value
        .rsplit_once(SEPARATOR)
        .ok_or_else(|| Error::InvalidInput(format!("malformed {what}: {value}")))
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidInput(format!("invalid {what}: {value}")))
}

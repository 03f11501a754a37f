//! Content objects and their persistent metadata.
//!
//! An [`ItemContent`] is the host's view of an interactive object: its
//! content attributes (which feed the fingerprint) plus a [`PersistentTags`]
//! container that travels with the object across restarts.
//!
//! # Instance tag contract
//!
//! The item id lives under [`ITEM_ID_KEY`] as a [`TagValue::Long`]. A tag under
//! that key with any other value type is treated as absent. The tag is never
//! part of the fingerprint.

use super::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Namespaced key under which the item id is stored.
pub const ITEM_ID_KEY: &str = "itemtrace:item_id";

/// Content types that represent "nothing" and can never be registered.
pub const AIR_TYPES: &[&str] = &["AIR", "CAVE_AIR", "VOID_AIR"];

/// A value in an object's persistent metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagValue {
    /// 64-bit signed integer.
    Long(i64),
    /// UTF-8 string.
    String(String),
}

/// Durable key/value metadata attached to a content object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistentTags(BTreeMap<String, TagValue>);

impl PersistentTags {
    /// Creates an empty tag container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.0.get(key)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: TagValue) {
        self.0.insert(key.into(), value);
    }

    /// Removes the value stored under `key`.
    pub fn remove(&mut self, key: &str) -> Option<TagValue> {
        self.0.remove(key)
    }

    /// Returns the number of stored tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no tags are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An interactive content object.
///
/// Only `kind`, `quantity`, `display_name`, `lore`, `modifiers` and
/// `custom_model_data` describe content. `tags` is identity metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemContent {
    /// Content type identifier, e.g. `DIAMOND_SWORD`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Stack size.
    pub quantity: u32,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Optional ordered description lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lore: Option<Vec<String>>,
    /// Modifier id to level. Iteration order is not meaningful.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub modifiers: HashMap<String, u32>,
    /// Optional numeric custom-data tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_model_data: Option<i64>,
    /// Persistent metadata travelling with the object.
    #[serde(default, skip_serializing_if = "PersistentTags::is_empty")]
    pub tags: PersistentTags,
}

impl ItemContent {
    /// Creates content of the given type and quantity with no other attributes.
    #[must_use]
    pub fn new(kind: impl Into<String>, quantity: u32) -> Self {
        Self {
            kind: kind.into(),
            quantity,
            ..Self::default()
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the description lines.
    #[must_use]
    pub fn with_lore<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lore = Some(lines.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a modifier at the given level.
    #[must_use]
    pub fn with_modifier(mut self, id: impl Into<String>, level: u32) -> Self {
        self.modifiers.insert(id.into(), level);
        self
    }

    /// Sets the custom-data tag.
    #[must_use]
    pub const fn with_custom_model_data(mut self, value: i64) -> Self {
        self.custom_model_data = Some(value);
        self
    }

    /// Returns true if this content can be tracked.
    ///
    /// Empty types, air types and zero quantities are rejected.
    #[must_use]
    pub fn is_trackable(&self) -> bool {
        let kind = self.kind.trim();
        !kind.is_empty()
            && self.quantity > 0
            && !AIR_TYPES.iter().any(|air| air.eq_ignore_ascii_case(kind))
    }

    /// Returns the id embedded in the persistent tags, if any.
    #[must_use]
    pub fn embedded_id(&self) -> Option<ItemId> {
        match self.tags.get(ITEM_ID_KEY) {
            Some(TagValue::Long(raw)) => Some(ItemId::from_tag_value(*raw)),
            _ => None,
        }
    }

    /// Embeds `id` into the persistent tags.
    pub fn embed_id(&mut self, id: ItemId) {
        self.tags
            .set(ITEM_ID_KEY, TagValue::Long(id.to_tag_value()));
    }
}

//! Content fingerprinting.
//!
//! The fingerprint is a SHA-256 digest over a canonical encoding of the
//! content attributes. Each attribute is written as a one-byte marker
//! followed by a length-prefixed payload, in a fixed order, so values that
//! contain separator-like bytes cannot shift into a neighbouring attribute.
//! Optional attributes that are absent are skipped entirely, which keeps
//! "absent" distinct from "present but empty".
//!
//! The embedded id tag and all other persistent tags are excluded: two copies
//! of the same content hash identically regardless of their identity.

use crate::models::ItemContent;
use bytes::BufMut;
use sha2::{Digest, Sha256};

const MARKER_KIND: u8 = 0x01;
const MARKER_QUANTITY: u8 = 0x02;
const MARKER_DISPLAY_NAME: u8 = 0x03;
const MARKER_LORE: u8 = 0x04;
const MARKER_MODIFIERS: u8 = 0x05;
const MARKER_CUSTOM_MODEL_DATA: u8 = 0x06;

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

/// Deterministic content fingerprint generator.
///
/// # Example
///
/// ```rust
/// use itemtrace::{Fingerprinter, ItemContent};
///
/// let a = ItemContent::new("DIAMOND_SWORD", 1).with_modifier("sharpness", 5);
/// let b = ItemContent::new("DIAMOND_SWORD", 1).with_modifier("sharpness", 5);
///
/// let fp = Fingerprinter::fingerprint(&a);
/// assert_eq!(fp.len(), 64);
/// assert_eq!(fp, Fingerprinter::fingerprint(&b));
/// ```
pub struct Fingerprinter;

impl Fingerprinter {
    /// Computes the lowercase hex SHA-256 fingerprint of `content`.
    #[must_use]
    pub fn fingerprint(content: &ItemContent) -> String {
        let mut hasher = Sha256::new();
        hasher.update(Self::canonical_bytes(content));
        hex::encode(hasher.finalize())
    }

    /// Returns the canonical encoding that is fed to the hash.
    #[must_use]
    pub fn canonical_bytes(content: &ItemContent) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);

        put_field(&mut buf, MARKER_KIND, content.kind.as_bytes());
        put_field(&mut buf, MARKER_QUANTITY, &content.quantity.to_be_bytes());

        if let Some(name) = &content.display_name {
            put_field(&mut buf, MARKER_DISPLAY_NAME, name.as_bytes());
        }

        if let Some(lore) = &content.lore {
            let mut payload = Vec::new();
            put_len(&mut payload, lore.len());
            for line in lore {
                put_len(&mut payload, line.len());
                payload.put_slice(line.as_bytes());
            }
            put_field(&mut buf, MARKER_LORE, &payload);
        }

        if !content.modifiers.is_empty() {
            let mut modifiers: Vec<(&String, &u32)> = content.modifiers.iter().collect();
            modifiers.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            let mut payload = Vec::new();
            put_len(&mut payload, modifiers.len());
            for (id, level) in modifiers {
                put_len(&mut payload, id.len());
                payload.put_slice(id.as_bytes());
                payload.put_u32(*level);
            }
            put_field(&mut buf, MARKER_MODIFIERS, &payload);
        }

        if let Some(data) = content.custom_model_data {
            put_field(&mut buf, MARKER_CUSTOM_MODEL_DATA, &data.to_be_bytes());
        }

        buf
    }

    /// Returns true if `value` looks like a fingerprint (64 lowercase hex chars).
    #[must_use]
    pub fn is_valid(value: &str) -> bool {
        value.len() == FINGERPRINT_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

fn put_field(buf: &mut Vec<u8>, marker: u8, payload: &[u8]) {
    buf.put_u8(marker);
    put_len(buf, payload.len());
    buf.put_slice(payload);
}

// Attribute payloads are far below 4 GiB; saturate rather than wrap.
fn put_len(buf: &mut Vec<u8>, len: usize) {
    buf.put_u32(u32::try_from(len).unwrap_or(u32::MAX));
}

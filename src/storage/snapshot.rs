//! Binary snapshot format.
//!
//! All integers are big-endian.
//!
//! ```text
//! bytes[4] magic = "ITSN"
//! u16      format_version = 1
//! u32      record_count
//! repeat record_count times:
//!   u64 id
//!   u32 fingerprint_len ; bytes fingerprint (utf8)
//!   u64 created_at_ms
//!   u32 creator_len ; bytes creator (utf8)
//! ```
//!
//! Files written before the header existed start directly with
//! `record_count`; they are recognized by the missing magic and decoded as
//! version 0. Bytes after the last declared record are ignored.
//!
//! Decoding never fails outright: a truncated or malformed record stops the
//! decode at the last complete record, and the error travels alongside the
//! records that were read.

use crate::models::{ItemId, TrackedRecord};
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Leading bytes of a versioned snapshot.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"ITSN";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Version reported for header-less legacy snapshots.
pub const LEGACY_VERSION: u16 = 0;

/// Upper bound on pre-allocation, so a corrupt count cannot exhaust memory.
const MAX_PREALLOCATED_RECORDS: usize = 65_536;

/// Fixed bytes per record besides the two strings.
const RECORD_FIXED_LEN: usize = 8 + 4 + 8 + 4;

/// Result of decoding a snapshot.
#[derive(Debug, Default)]
pub struct DecodedSnapshot {
    /// Complete records, in file order.
    pub records: Vec<TrackedRecord>,
    /// Format version found in the file.
    pub version: u16,
    /// Set when decoding stopped early.
    pub error: Option<Error>,
}

impl DecodedSnapshot {
    /// Returns true if every declared record was decoded.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Encodes records into a versioned snapshot.
///
/// # Errors
///
/// Returns `InvalidInput` if the record count or a string length does not
/// fit in a `u32`.
pub fn encode(records: &[TrackedRecord]) -> Result<Bytes> {
    let count = u32::try_from(records.len())
        .map_err(|_| Error::InvalidInput(format!("too many records: {}", records.len())))?;

    let body_len: usize = records
        .iter()
        .map(|r| RECORD_FIXED_LEN + r.fingerprint.len() + r.creator.len())
        .sum();
    let mut buf = BytesMut::with_capacity(SNAPSHOT_MAGIC.len() + 2 + 4 + body_len);

    buf.put_slice(SNAPSHOT_MAGIC);
    buf.put_u16(SNAPSHOT_VERSION);
    buf.put_u32(count);

    for record in records {
        buf.put_u64(record.id.get());
        put_string(&mut buf, &record.fingerprint)?;
        buf.put_u64(record.created_at);
        put_string(&mut buf, &record.creator)?;
    }

    Ok(buf.freeze())
}

fn put_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    let len = u32::try_from(value.len())
        .map_err(|_| Error::InvalidInput(format!("string too long: {} bytes", value.len())))?;
    buf.put_u32(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

/// Decodes a snapshot, keeping every record before the first defect.
#[must_use]
pub fn decode(data: &[u8]) -> DecodedSnapshot {
    let mut buf = data;
    let mut decoded = DecodedSnapshot::default();

    if buf.starts_with(SNAPSHOT_MAGIC) {
        buf.advance(SNAPSHOT_MAGIC.len());
        if buf.remaining() < 2 {
            decoded.error = Some(corrupt(0, "truncated header"));
            return decoded;
        }
        decoded.version = buf.get_u16();
        if decoded.version != SNAPSHOT_VERSION {
            decoded.error = Some(corrupt(
                0,
                format!("unsupported format version {}", decoded.version),
            ));
            return decoded;
        }
    } else {
        decoded.version = LEGACY_VERSION;
    }

    if buf.remaining() < 4 {
        decoded.error = Some(corrupt(0, "missing record count"));
        return decoded;
    }
    let declared = buf.get_u32() as usize;
    decoded.records = Vec::with_capacity(declared.min(MAX_PREALLOCATED_RECORDS));

    for _ in 0..declared {
        match read_record(&mut buf) {
            Ok(record) => decoded.records.push(record),
            Err(reason) => {
                decoded.error = Some(corrupt(decoded.records.len(), reason));
                return decoded;
            },
        }
    }

    if buf.has_remaining() {
        tracing::debug!(
            trailing_bytes = buf.remaining(),
            "Ignoring bytes after the last snapshot record"
        );
    }

    decoded
}

fn read_record(buf: &mut &[u8]) -> std::result::Result<TrackedRecord, String> {
    if buf.remaining() < 8 {
        return Err("truncated id".to_string());
    }
    let id = ItemId::new(buf.get_u64());
    let fingerprint = read_string(buf, "fingerprint")?;
    if buf.remaining() < 8 {
        return Err(format!("truncated timestamp for record {id}"));
    }
    let created_at = buf.get_u64();
    let creator = read_string(buf, "creator")?;

    Ok(TrackedRecord {
        id,
        fingerprint,
        created_at,
        creator,
    })
}

fn read_string(buf: &mut &[u8], field: &str) -> std::result::Result<String, String> {
    if buf.remaining() < 4 {
        return Err(format!("truncated {field} length"));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(format!(
            "{field} declares {len} bytes but only {} remain",
            buf.remaining()
        ));
    }
    let value = std::str::from_utf8(&buf[..len])
        .map_err(|e| format!("{field} is not valid utf-8: {e}"))?
        .to_string();
    buf.advance(len);
    Ok(value)
}

fn corrupt(records_read: usize, reason: impl Into<String>) -> Error {
    Error::CorruptSnapshot {
        records_read,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<TrackedRecord> {
        vec![
            TrackedRecord::new(ItemId::new(1 << 40), "a".repeat(64), 1_700_000_000_000, "alice"),
            TrackedRecord::new(ItemId::new(7), "b".repeat(64), 1_700_000_000_123, "bob"),
            TrackedRecord::new(ItemId::new(u64::MAX), "c".repeat(64), 0, "ünïcødé"),
        ]
    }

    fn legacy_bytes(records: &[TrackedRecord]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(u32::try_from(records.len()).unwrap_or(u32::MAX));
        for r in records {
            buf.put_u64(r.id.get());
            buf.put_u32(u32::try_from(r.fingerprint.len()).unwrap_or(0));
            buf.put_slice(r.fingerprint.as_bytes());
            buf.put_u64(r.created_at);
            buf.put_u32(u32::try_from(r.creator.len()).unwrap_or(0));
            buf.put_slice(r.creator.as_bytes());
        }
        buf.to_vec()
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode(&[]).expect("encode");
        assert_eq!(&bytes[..], b"ITSN\x00\x01\x00\x00\x00\x00");
    }

    #[test]
    fn test_record_layout_is_big_endian() {
        let record = TrackedRecord::new(ItemId::new(0x0102), "ab", 0x0A0B, "z");
        let bytes = encode(std::slice::from_ref(&record)).expect("encode");
        let body = &bytes[10..];
        assert_eq!(
            body,
            &[
                0, 0, 0, 0, 0, 0, 0x01, 0x02, // id
                0, 0, 0, 2, b'a', b'b', // fingerprint
                0, 0, 0, 0, 0, 0, 0x0A, 0x0B, // created_at
                0, 0, 0, 1, b'z', // creator
            ][..]
        );
    }

    #[test]
    fn test_roundtrip() {
        let records = sample();
        let decoded = decode(&encode(&records).expect("encode"));
        assert!(decoded.is_complete());
        assert_eq!(decoded.version, SNAPSHOT_VERSION);
        assert_eq!(decoded.records, records);
    }

    #[test]
    fn test_legacy_layout_is_readable() {
        let records = sample();
        let decoded = decode(&legacy_bytes(&records));
        assert!(decoded.is_complete());
        assert_eq!(decoded.version, LEGACY_VERSION);
        assert_eq!(decoded.records, records);
    }

    #[test]
    fn test_truncated_mid_record_keeps_prefix() {
        let records = sample();
        let bytes = encode(&records).expect("encode");
        // Cut inside the third record's fingerprint.
        let third_start = bytes.len() - (RECORD_FIXED_LEN + 64 + "ünïcødé".len());
        let truncated = &bytes[..third_start + 20];

        let decoded = decode(truncated);
        assert_eq!(decoded.records, records[..2].to_vec());
        assert!(matches!(
            decoded.error,
            Some(Error::CorruptSnapshot { records_read: 2, .. })
        ));
    }

    #[test]
    fn test_every_truncation_point_is_safe() {
        let bytes = encode(&sample()).expect("encode");
        for cut in 0..bytes.len() {
            let decoded = decode(&bytes[..cut]);
            assert!(decoded.records.len() <= 3);
            assert!(decoded.error.is_some(), "cut at {cut} should be reported");
        }
    }

    #[test]
    fn test_unknown_version_is_corrupt() {
        let mut bytes = encode(&sample()).expect("encode").to_vec();
        bytes[5] = 9;
        let decoded = decode(&bytes);
        assert!(decoded.records.is_empty());
        assert!(matches!(
            decoded.error,
            Some(Error::CorruptSnapshot { records_read: 0, .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_stops_decode() {
        let record = TrackedRecord::new(ItemId::new(1), "ab", 5, "x");
        let mut bytes = encode(&[record.clone(), record]).expect("encode").to_vec();
        let last = bytes.len() - 1;
        bytes[last] = 0xFF;

        let decoded = decode(&bytes);
        assert_eq!(decoded.records.len(), 1);
        assert!(decoded.error.is_some());
    }

    #[test]
    fn test_huge_declared_count_does_not_preallocate() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(SNAPSHOT_MAGIC);
        bytes.put_u16(SNAPSHOT_VERSION);
        bytes.put_u32(u32::MAX);

        let decoded = decode(&bytes);
        assert!(decoded.records.is_empty());
        assert!(decoded.error.is_some());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = encode(&sample()).expect("encode").to_vec();
        bytes.extend_from_slice(&[1, 2, 3, 4, 5]);
        let decoded = decode(&bytes);
        assert!(decoded.is_complete());
        assert_eq!(decoded.records.len(), 3);
    }
}

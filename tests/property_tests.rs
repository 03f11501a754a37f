//! Property-based tests for fingerprints, ids, snapshots and duplicate scans.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use itemtrace::services::identity::FINGERPRINT_LEN;
use itemtrace::services::identity::id_gen::{compose_id, id_timestamp_millis};
use itemtrace::storage::{decode, encode};
use itemtrace::{Fingerprinter, ItemContent, ItemId, ItemStore, TrackedRecord};
use proptest::prelude::*;

fn content_strategy() -> impl Strategy<Value = ItemContent> {
    (
        "[A-Z_]{1,16}",
        1u32..=64,
        proptest::option::of("[ -~]{0,24}"),
        proptest::option::of(proptest::collection::vec("[ -~]{0,16}", 0..4)),
        proptest::collection::vec(("[a-z_]{1,12}", 0u32..10), 0..5),
        proptest::option::of(any::<i64>()),
    )
        .prop_map(|(kind, quantity, name, lore, modifiers, model)| {
            let mut content = ItemContent::new(kind, quantity);
            content.display_name = name;
            content.lore = lore;
            for (id, level) in modifiers {
                content = content.with_modifier(id, level);
            }
            content.custom_model_data = model;
            content
        })
}

fn record_strategy() -> impl Strategy<Value = TrackedRecord> {
    (any::<u64>(), "[0-9a-f]{64}", any::<u64>(), "\\PC{0,20}").prop_map(
        |(id, fingerprint, created_at, creator)| {
            TrackedRecord::new(ItemId::new(id), fingerprint, created_at, creator)
        },
    )
}

proptest! {
    /// Fingerprints are deterministic, well-formed lowercase hex.
    #[test]
    fn prop_fingerprint_deterministic(content in content_strategy()) {
        let first = Fingerprinter::fingerprint(&content);
        let second = Fingerprinter::fingerprint(&content.clone());

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), FINGERPRINT_LEN);
        prop_assert!(Fingerprinter::is_valid(&first));
    }

    /// Modifier insertion order never affects the fingerprint.
    #[test]
    fn prop_modifier_order_irrelevant(
        modifiers in proptest::collection::btree_map("[a-z_]{1,12}", 0u32..10, 0..8)
    ) {
        let mut forward = ItemContent::new("BOW", 1);
        for (id, level) in &modifiers {
            forward = forward.with_modifier(id.clone(), *level);
        }
        let mut reverse = ItemContent::new("BOW", 1);
        for (id, level) in modifiers.iter().rev() {
            reverse = reverse.with_modifier(id.clone(), *level);
        }

        prop_assert_eq!(
            Fingerprinter::fingerprint(&forward),
            Fingerprinter::fingerprint(&reverse)
        );
    }

    /// Embedding an id leaves the fingerprint unchanged.
    #[test]
    fn prop_identity_tag_excluded(content in content_strategy(), raw in any::<u64>()) {
        let before = Fingerprinter::fingerprint(&content);
        let mut tagged = content;
        tagged.embed_id(ItemId::new(raw));

        prop_assert_eq!(tagged.embedded_id(), Some(ItemId::new(raw)));
        prop_assert_eq!(Fingerprinter::fingerprint(&tagged), before);
    }

    /// Joining two lore lines into one yields a different fingerprint.
    #[test]
    fn prop_lore_boundaries_matter(a in "[ -~]{1,12}", b in "[ -~]{1,12}") {
        let split = ItemContent::new("BOOK", 1).with_lore([a.clone(), b.clone()]);
        let joined = ItemContent::new("BOOK", 1).with_lore([format!("{a}{b}")]);

        prop_assert_ne!(
            Fingerprinter::fingerprint(&split),
            Fingerprinter::fingerprint(&joined)
        );
    }

    /// The timestamp component of an id survives composition.
    #[test]
    fn prop_id_timestamp_recoverable(millis in 0u64..(1 << 43), random in any::<u64>()) {
        prop_assert_eq!(id_timestamp_millis(compose_id(millis, random)), millis);
    }

    /// Every field of every record survives a snapshot.
    #[test]
    fn prop_snapshot_preserves_records(
        records in proptest::collection::vec(record_strategy(), 0..32)
    ) {
        let bytes = encode(&records).expect("encode");
        let decoded = decode(&bytes);

        prop_assert!(decoded.is_complete());
        prop_assert_eq!(decoded.records, records);
    }

    /// A snapshot cut anywhere decodes to a prefix of the original records.
    #[test]
    fn prop_truncated_snapshot_is_prefix(
        records in proptest::collection::vec(record_strategy(), 1..16),
        cut in any::<prop::sample::Index>()
    ) {
        let bytes = encode(&records).expect("encode");
        let len = cut.index(bytes.len());
        let decoded = decode(&bytes[..len]);

        prop_assert!(!decoded.is_complete());
        prop_assert!(decoded.records.len() < records.len());
        prop_assert_eq!(&decoded.records[..], &records[..decoded.records.len()]);
    }

    /// Duplicate scans never return the queried record and respect the cap.
    #[test]
    fn prop_scan_excludes_self_and_respects_cap(
        copies in 1usize..40,
        others in 0usize..10,
        limit in 0usize..50
    ) {
        let store = ItemStore::new();
        let shared = "11".repeat(32);
        let other = "22".repeat(32);
        for raw in 0..copies {
            store.put(TrackedRecord::new(ItemId::new(raw as u64), shared.as_str(), 0, "dup"), None);
        }
        for raw in 0..others {
            let id = ItemId::new((1000 + raw) as u64);
            store.put(TrackedRecord::new(id, other.as_str(), 0, "other"), None);
        }

        let found = store.find_by_fingerprint(&shared, Some(ItemId::new(0)), limit);

        prop_assert!(found.len() <= limit);
        prop_assert_eq!(found.len(), (copies - 1).min(limit));
        prop_assert!(found.iter().all(|r| r.id != ItemId::new(0)));
        prop_assert!(found.iter().all(|r| r.fingerprint == shared));
    }
}

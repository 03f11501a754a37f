//! Item id generation.
//!
//! Ids are `(wall_clock_millis << 20) | random_20_bits`: roughly time-ordered,
//! with about a million random values per millisecond. Uniqueness is not
//! assumed; the tagger retries until the store accepts the id as unused.

use crate::current_timestamp_millis;
use crate::models::ItemId;

/// Number of low bits filled with randomness.
pub const RANDOM_BITS: u32 = 20;

const RANDOM_MASK: u64 = (1 << RANDOM_BITS) - 1;

/// Generates a candidate id from the current time and a random suffix.
#[must_use]
pub fn generate_id() -> ItemId {
    compose_id(current_timestamp_millis(), u64::from(rand::random::<u32>()))
}

/// Builds an id from a millisecond timestamp and random bits.
///
/// Only the low 20 bits of `random` are used.
#[must_use]
pub const fn compose_id(millis: u64, random: u64) -> ItemId {
    ItemId::new((millis << RANDOM_BITS) | (random & RANDOM_MASK))
}

/// Returns the millisecond timestamp encoded in an id.
#[must_use]
pub const fn id_timestamp_millis(id: ItemId) -> u64 {
    id.get() >> RANDOM_BITS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_masks_random_bits() {
        let id = compose_id(1, u64::MAX);
        assert_eq!(id.get(), (1 << 20) | 0xF_FFFF);
        assert_eq!(id_timestamp_millis(id), 1);
    }

    #[test]
    fn test_generated_id_carries_current_time() {
        let before = current_timestamp_millis();
        let id = generate_id();
        let after = current_timestamp_millis();

        let ts = id_timestamp_millis(id);
        assert!(ts >= before && ts <= after);
    }

    #[test]
    fn test_generated_ids_are_mostly_distinct() {
        let ids: std::collections::HashSet<_> = (0..1_000).map(|_| generate_id()).collect();
        // Collisions are possible in principle; a handful out of 1000 would
        // indicate broken randomness.
        assert!(ids.len() >= 995);
    }
}

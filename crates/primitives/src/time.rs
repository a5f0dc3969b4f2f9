use std::time::{SystemTime, UNIX_EPOCH};

use crate::Slot;

/// A UNIX timestamp in seconds.
pub type Timestamp = u64;

/// Helper function to convert a timestamp to an L2 slot,
/// using the L1 genesis timestamp and the L2 slot duration.
pub const fn timestamp_to_slot(
    timestamp: Timestamp,
    genesis_timestamp: Timestamp,
    slot_duration: u64,
) -> Slot {
    (timestamp.saturating_sub(genesis_timestamp)) / slot_duration
}

/// Helper function to convert an L2 slot to the timestamp at which it starts,
/// using the L1 genesis timestamp and the L2 slot duration.
pub const fn slot_to_timestamp(
    slot: Slot,
    genesis_timestamp: Timestamp,
    slot_duration: u64,
) -> Timestamp {
    genesis_timestamp + (slot * slot_duration)
}

/// Returns how many seconds into the given slot the timestamp is.
///
/// Saturates at zero for timestamps before the slot start, so a caller that is
/// marginally early (clock skew) reads a zero offset instead of underflowing.
pub const fn seconds_into_slot(
    timestamp: Timestamp,
    slot: Slot,
    genesis_timestamp: Timestamp,
    slot_duration: u64,
) -> u64 {
    timestamp.saturating_sub(slot_to_timestamp(slot, genesis_timestamp, slot_duration))
}

/// Get the current UNIX timestamp in seconds.
pub fn current_timestamp_seconds() -> Timestamp {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("Time went backwards").as_secs()
}

/// Get the current UNIX timestamp in milliseconds.
pub fn current_timestamp_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("Time went backwards").as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS: Timestamp = 1_700_000_000;
    const SLOT_DURATION: u64 = 36;

    #[test]
    fn timestamp_slot_conversions() {
        assert_eq!(timestamp_to_slot(GENESIS, GENESIS, SLOT_DURATION), 0);
        assert_eq!(timestamp_to_slot(GENESIS + 35, GENESIS, SLOT_DURATION), 0);
        assert_eq!(timestamp_to_slot(GENESIS + 36, GENESIS, SLOT_DURATION), 1);
        assert_eq!(slot_to_timestamp(10, GENESIS, SLOT_DURATION), GENESIS + 360);
    }

    #[test]
    fn timestamps_before_genesis_map_to_slot_zero() {
        assert_eq!(timestamp_to_slot(GENESIS - 100, GENESIS, SLOT_DURATION), 0);
    }

    #[test]
    fn seconds_into_slot_works() {
        let slot = 5;
        let slot_start = slot_to_timestamp(slot, GENESIS, SLOT_DURATION);
        assert_eq!(seconds_into_slot(slot_start, slot, GENESIS, SLOT_DURATION), 0);
        assert_eq!(seconds_into_slot(slot_start + 12, slot, GENESIS, SLOT_DURATION), 12);
        // Marginally early callers saturate to zero.
        assert_eq!(seconds_into_slot(slot_start - 1, slot, GENESIS, SLOT_DURATION), 0);
    }
}

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Quill sequencer primitive types, utilities and constants.

use alloy_primitives::B256;

/// Block, transaction and attestation types.
pub mod block;

/// Time-related utilities.
pub mod time;

/// Utility for summarizing objects into a string for logging purposes.
pub mod summary;

/// Utilities for triggering shutdown signals from active tasks.
pub mod shutdown;

/// An L2 slot number alias.
pub type Slot = u64;

/// An L2 epoch number alias.
pub type Epoch = u64;

/// A rollup-native account address. Unlike L1 addresses, these are full
/// 32-byte field elements.
pub type L2Address = B256;

/// Convert a slot number to an epoch number, given the epoch duration in slots.
pub trait SlotUtils: Sized {
    /// Convert a slot number to an epoch number.
    fn to_epoch(self, epoch_duration: u64) -> Epoch;

    /// Return the slot at the beginning of the epoch this slot belongs to.
    fn beginning_of_epoch(self, epoch_duration: u64) -> Slot {
        self.to_epoch(epoch_duration).to_slot(epoch_duration)
    }
}

impl SlotUtils for Slot {
    fn to_epoch(self, epoch_duration: u64) -> Epoch {
        self / epoch_duration.max(1)
    }
}

/// Convert an epoch number to a slot number, given the epoch duration in slots.
pub trait EpochUtils: Sized {
    /// Convert an epoch number to its first slot number.
    fn to_slot(self, epoch_duration: u64) -> Slot;
}

impl EpochUtils for Epoch {
    fn to_slot(self, epoch_duration: u64) -> Slot {
        self * epoch_duration
    }
}

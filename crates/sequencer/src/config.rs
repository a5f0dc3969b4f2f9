use alloy_primitives::{Address, B256, Bytes};
use derive_more::derive::Deref;
use quill_config::SequencerOpts;
use quill_interfaces::publisher::RollupConstants;
use quill_primitives::{
    Slot,
    time::{Timestamp, current_timestamp_seconds, seconds_into_slot, slot_to_timestamp,
        timestamp_to_slot},
};
use serde::Deserialize;

use crate::timetable::Timetable;

/// The hot-reloadable part of the sequencer configuration.
///
/// The main loop takes one snapshot of this per slot, so a reload never
/// changes budgets mid-iteration.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// The main loop cadence, in milliseconds.
    pub polling_interval_ms: u64,
    /// Minimum pending transactions required to build a block.
    pub min_txs_per_block: usize,
    /// Maximum transactions per block.
    pub max_txs_per_block: usize,
    /// Maximum DA gas per block.
    pub max_da_block_gas: u64,
    /// Maximum L2 gas per block.
    pub max_l2_block_gas: u64,
    /// Maximum block payload size, in bytes.
    pub max_block_size_bytes: usize,
    /// The L1 reward recipient. Falls back to the publisher sender address.
    pub coinbase: Option<Address>,
    /// The L2 fee recipient. Falls back to zero (fees burned).
    pub fee_recipient: Option<B256>,
    /// Contract functions permitted in public setup.
    pub tx_public_setup_allow_list: Vec<String>,
    /// Whether slot deadlines are enforced.
    pub enforce_timetable: bool,
    /// Whether to attach tx bodies to broadcast proposals.
    pub publish_txs_with_proposals: bool,
    /// The governance payload to vote for.
    pub governance_proposer_payload: Option<Bytes>,
    /// Override for the L1 inclusion deadline, seconds into the slot.
    pub max_l1_tx_inclusion_time_into_slot: Option<u64>,
}

impl SequencerConfig {
    /// Builds the runtime configuration from the parsed CLI options.
    pub fn from_opts(opts: &SequencerOpts) -> Self {
        Self {
            polling_interval_ms: opts.polling_interval_ms,
            min_txs_per_block: opts.min_txs_per_block,
            max_txs_per_block: opts.max_txs_per_block,
            max_da_block_gas: opts.max_da_block_gas,
            max_l2_block_gas: opts.max_l2_block_gas,
            max_block_size_bytes: opts.max_block_size_bytes,
            coinbase: opts.coinbase,
            fee_recipient: opts.fee_recipient,
            tx_public_setup_allow_list: opts.tx_public_setup_allow_list.clone(),
            enforce_timetable: opts.enforce_timetable,
            publish_txs_with_proposals: opts.publish_txs_with_proposals,
            governance_proposer_payload: opts.governance_proposer_payload.clone(),
            max_l1_tx_inclusion_time_into_slot: opts.max_l1_tx_inclusion_time_into_slot,
        }
    }

    /// Applies a partial update, returning whether anything changed.
    pub fn apply(&mut self, update: SequencerConfigUpdate) -> bool {
        let mut changed = false;

        macro_rules! merge {
            ($field:ident) => {
                if let Some(value) = update.$field {
                    changed |= self.$field != value;
                    self.$field = value;
                }
            };
        }

        merge!(polling_interval_ms);
        merge!(min_txs_per_block);
        merge!(max_txs_per_block);
        merge!(max_da_block_gas);
        merge!(max_l2_block_gas);
        merge!(max_block_size_bytes);
        merge!(enforce_timetable);
        merge!(publish_txs_with_proposals);

        if let Some(value) = update.max_l1_tx_inclusion_time_into_slot {
            changed |= self.max_l1_tx_inclusion_time_into_slot != Some(value);
            self.max_l1_tx_inclusion_time_into_slot = Some(value);
        }

        if let Some(coinbase) = update.coinbase {
            changed |= self.coinbase != Some(coinbase);
            self.coinbase = Some(coinbase);
        }
        if let Some(fee_recipient) = update.fee_recipient {
            changed |= self.fee_recipient != Some(fee_recipient);
            self.fee_recipient = Some(fee_recipient);
        }
        if let Some(allow_list) = update.tx_public_setup_allow_list {
            changed |= self.tx_public_setup_allow_list != allow_list;
            self.tx_public_setup_allow_list = allow_list;
        }
        if let Some(payload) = update.governance_proposer_payload {
            changed |= self.governance_proposer_payload.as_ref() != Some(&payload);
            self.governance_proposer_payload = Some(payload);
        }

        changed
    }
}

/// A partial configuration update, applied atomically between iterations.
/// Re-assignment rebuilds the timetable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequencerConfigUpdate {
    pub polling_interval_ms: Option<u64>,
    pub min_txs_per_block: Option<usize>,
    pub max_txs_per_block: Option<usize>,
    pub max_da_block_gas: Option<u64>,
    pub max_l2_block_gas: Option<u64>,
    pub max_block_size_bytes: Option<usize>,
    pub coinbase: Option<Address>,
    pub fee_recipient: Option<B256>,
    pub tx_public_setup_allow_list: Option<Vec<String>>,
    pub enforce_timetable: Option<bool>,
    pub publish_txs_with_proposals: Option<bool>,
    pub governance_proposer_payload: Option<Bytes>,
    pub max_l1_tx_inclusion_time_into_slot: Option<u64>,
}

/// The per-slot snapshot of configuration and protocol constants all
/// deadline arithmetic is derived from.
#[derive(Debug, Clone, Deref)]
pub(crate) struct RuntimeConfig {
    /// The hot-reloadable configuration, accessible as dereferenced fields.
    #[deref]
    pub cfg: SequencerConfig,
    /// The protocol constants read from the L1 rollup contract at startup.
    pub constants: RollupConstants,
}

impl RuntimeConfig {
    /// The timetable for this snapshot.
    pub(crate) fn timetable(&self) -> Timetable {
        Timetable::new(
            self.constants.slot_duration,
            self.constants.ethereum_slot_duration,
            self.cfg.max_l1_tx_inclusion_time_into_slot,
            self.cfg.enforce_timetable,
        )
    }

    /// The timestamp at which the given slot starts.
    pub(crate) const fn slot_start(&self, slot: Slot) -> Timestamp {
        slot_to_timestamp(slot, self.constants.l1_genesis_time, self.constants.slot_duration)
    }

    /// The timestamp at which the given slot ends.
    pub(crate) const fn slot_end(&self, slot: Slot) -> Timestamp {
        self.slot_start(slot) + self.constants.slot_duration
    }

    /// The slot the given timestamp falls in.
    pub(crate) const fn slot_at(&self, timestamp: Timestamp) -> Slot {
        timestamp_to_slot(timestamp, self.constants.l1_genesis_time, self.constants.slot_duration)
    }

    /// How many seconds into the given slot we currently are.
    pub(crate) fn seconds_into_slot(&self, slot: Slot) -> u64 {
        seconds_into_slot(
            current_timestamp_seconds(),
            slot,
            self.constants.l1_genesis_time,
            self.constants.slot_duration,
        )
    }
}

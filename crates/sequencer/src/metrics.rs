use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::state::SequencerState;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SequencerMetrics;

impl SequencerMetrics {
    // ################ COUNTERS ################ //

    /// Increments the amount of slots filled with a mined block proposal.
    pub(crate) fn increment_filled_slot() {
        counter!("sequencer_filled_slot").increment(1);
    }

    /// Increments the amount of failed block builds by reason.
    pub(crate) fn increment_failed_block(reason: String) {
        counter!("sequencer_failed_block", "reason" => reason).increment(1);
    }

    /// Increments the amount of iterations abandoned for being too slow.
    pub(crate) fn increment_too_slow(state: SequencerState) {
        counter!("sequencer_too_slow", "state" => state.to_string()).increment(1);
    }

    /// Increments the amount of transactions evicted from the pool after
    /// failing public processing.
    pub(crate) fn increment_evicted_txs(count: usize) {
        counter!("sequencer_evicted_txs").increment(count as u64);
    }

    /// Increments the amount of collaborator errors surfaced to the operator.
    pub(crate) fn increment_iteration_errors(kind: &'static str) {
        counter!("sequencer_iteration_errors", "kind" => kind).increment(1);
    }

    // ################ GAUGES ################ //

    /// Sets the current sequencer state.
    pub(crate) fn set_sequencer_state(state: SequencerState) {
        let displayed = state.to_string();

        for other in SequencerState::variant_names() {
            let other = (*other).to_string();
            if other == displayed {
                // Don't temporarily set the current state to 0.
                continue;
            }
            gauge!("sequencer_state", "state" => other).set(0);
        }

        gauge!("sequencer_state", "state" => displayed).set(1);
    }

    /// Sets the slot currently being filled.
    pub(crate) fn set_current_slot(slot: u64) {
        gauge!("sequencer_current_slot").set(slot as f64);
    }

    /// Sets the amount of pending transactions seen in the pool.
    pub(crate) fn set_pending_tx_count(count: usize) {
        gauge!("sequencer_pending_tx_count").set(count as f64);
    }

    /// Sets the size of the current epoch committee.
    pub(crate) fn set_committee_size(size: usize) {
        gauge!("sequencer_committee_size").set(size as f64);
    }

    /// Sets the amount of transactions included in the last built block.
    pub(crate) fn set_block_tx_count(count: usize) {
        gauge!("sequencer_block_tx_count").set(count as f64);
    }

    /// Sets the total mana used by the last built block.
    pub(crate) fn set_block_mana_used(mana: u64) {
        gauge!("sequencer_block_mana_used").set(mana as f64);
    }

    // ################ HISTOGRAMS ################ //

    /// Records the time spent assembling a block, forks to completion.
    pub(crate) fn record_block_build_time(elapsed: Duration) {
        histogram!("sequencer_block_build_time").record(elapsed.as_secs_f64());
    }

    /// Records the time spent collecting committee attestations.
    pub(crate) fn record_attestation_collection_time(elapsed: Duration) {
        histogram!("sequencer_attestation_collection_time").record(elapsed.as_secs_f64());
    }

    /// Records the duration of a full work iteration.
    pub(crate) fn record_iteration_time(elapsed: Duration) {
        histogram!("sequencer_iteration_time").record(elapsed.as_secs_f64());
    }
}

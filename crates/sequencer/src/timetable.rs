use crate::{error::SequencerError, state::SequencerState};

/// Allowance for the chain-tip consensus check, in seconds.
const SYNCHRONIZE_ALLOWANCE_SECS: u64 = 2;
/// Allowance for the L1 proposer eligibility round trip, in seconds.
const PROPOSER_CHECK_ALLOWANCE_SECS: u64 = 1;
/// Allowance for building global variables and the placeholder header, in seconds.
const INITIALIZE_PROPOSAL_ALLOWANCE_SECS: u64 = 1;
/// One-way peer-network propagation latency for proposals and attestations,
/// in seconds. Attestation collection needs a full round trip.
const ATTESTATION_PROPAGATION_SECS: u64 = 2;
/// Allowance for the post-assembly L1 validation and publisher enqueue, in seconds.
const BLOCK_VALIDATION_ALLOWANCE_SECS: u64 = 1;
/// The minimum public-processing budget worth entering `CreatingBlock` for,
/// in seconds.
const MIN_PROCESSING_SECS: u64 = 2;

/// The slot timetable: a pure function from (phase, seconds-into-slot) to
/// remaining budget.
///
/// Each phase consumes a non-overlapping slice of the slot; the tail after
/// [`Timetable::publish_deadline`] is reserved for L1 inclusion of the
/// propose transaction. All deadlines are expressed as seconds into the slot
/// by which a phase must be *entered*, so a sequencer that wakes up late in
/// its slot simply finds the early phases unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timetable {
    /// The L2 slot duration, in seconds.
    slot_duration: u64,
    /// The L1 slot duration, in seconds.
    ethereum_slot_duration: u64,
    /// The last second into the slot at which the propose transaction can
    /// still be sent to L1 and make it into a block.
    max_l1_tx_inclusion_time_into_slot: u64,
    /// Whether deadlines are enforced or advisory.
    enforce: bool,
}

impl Timetable {
    /// Creates a new timetable.
    ///
    /// When `max_l1_tx_inclusion_time_into_slot` is not provided, one full L1
    /// slot is reserved at the end of the L2 slot for inclusion.
    pub fn new(
        slot_duration: u64,
        ethereum_slot_duration: u64,
        max_l1_tx_inclusion_time_into_slot: Option<u64>,
        enforce: bool,
    ) -> Self {
        let max_inclusion = max_l1_tx_inclusion_time_into_slot
            .unwrap_or_else(|| slot_duration.saturating_sub(ethereum_slot_duration))
            .min(slot_duration);

        Self {
            slot_duration,
            ethereum_slot_duration,
            max_l1_tx_inclusion_time_into_slot: max_inclusion,
            enforce,
        }
    }

    /// Whether deadline enforcement is on.
    pub const fn enforced(&self) -> bool {
        self.enforce
    }

    /// The L2 slot duration, in seconds.
    pub const fn slot_duration(&self) -> u64 {
        self.slot_duration
    }

    /// The deadline for entering `PublishingBlock`: the last second into the
    /// slot at which the propose transaction can still land on L1.
    pub const fn publish_deadline(&self) -> u64 {
        self.max_l1_tx_inclusion_time_into_slot
    }

    /// The deadline for entering `CollectingAttestations`: a full
    /// peer-network round trip must fit before publication.
    pub const fn attestation_deadline(&self) -> u64 {
        self.publish_deadline().saturating_sub(2 * ATTESTATION_PROPAGATION_SECS)
    }

    /// The last instant, as seconds into the slot, at which the proposer's
    /// public processing may still be issuing work. This is the hard deadline
    /// handed to the public processor.
    ///
    /// The returned value never precedes `seconds_into_slot`, so the caller
    /// reads a zero remaining budget rather than a negative one.
    pub fn block_proposal_exec_end(&self, seconds_into_slot: u64) -> u64 {
        self.attestation_deadline()
            .saturating_sub(BLOCK_VALIDATION_ALLOWANCE_SECS)
            .max(seconds_into_slot)
    }

    /// The last instant, as seconds into the slot, at which a validator
    /// re-executing a foreign proposal may still be issuing work.
    ///
    /// Strictly earlier than [`Self::block_proposal_exec_end`]: the validator
    /// must finish re-executing early enough for its attestation to reach the
    /// proposer before the collection deadline.
    pub fn validator_reexec_end(&self, seconds_into_slot: u64) -> u64 {
        self.attestation_deadline()
            .saturating_sub(BLOCK_VALIDATION_ALLOWANCE_SECS + ATTESTATION_PROPAGATION_SECS)
            .max(seconds_into_slot)
    }

    /// The deadline for *entering* the given phase, as seconds into the slot.
    /// `None` means the phase carries no time constraint.
    pub fn max_allowed_time(&self, state: SequencerState) -> Option<u64> {
        let creating_deadline = self.attestation_deadline().saturating_sub(MIN_PROCESSING_SECS);
        let init_deadline = creating_deadline.saturating_sub(INITIALIZE_PROPOSAL_ALLOWANCE_SECS);
        let check_deadline = init_deadline.saturating_sub(PROPOSER_CHECK_ALLOWANCE_SECS);

        match state {
            SequencerState::Stopped | SequencerState::Idle => None,
            SequencerState::Synchronizing => {
                Some(check_deadline.saturating_sub(SYNCHRONIZE_ALLOWANCE_SECS))
            }
            SequencerState::ProposerCheck => Some(check_deadline),
            SequencerState::InitializingProposal => Some(init_deadline),
            SequencerState::CreatingBlock => Some(creating_deadline),
            SequencerState::CollectingAttestations => Some(self.attestation_deadline()),
            SequencerState::PublishingBlock => Some(self.publish_deadline()),
        }
    }

    /// Raises [`SequencerError::TooSlow`] if the deadline for entering
    /// `state` has passed and enforcement is on.
    pub fn assert_time_left(
        &self,
        state: SequencerState,
        seconds_into_slot: u64,
    ) -> Result<(), SequencerError> {
        let Some(max_allowed_secs) = self.max_allowed_time(state) else {
            return Ok(());
        };

        if seconds_into_slot > max_allowed_secs && self.enforce {
            return Err(SequencerError::TooSlow { state, seconds_into_slot, max_allowed_secs });
        }

        Ok(())
    }
}

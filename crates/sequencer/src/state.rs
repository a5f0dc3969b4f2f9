use std::fmt;

use derive_more::derive::IsVariant;
use quill_primitives::Slot;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{error::SequencerError, metrics::SequencerMetrics, timetable::Timetable};

/// The phase the sequencer is in within the current slot.
///
/// Phases advance strictly in this order within a slot, with every phase able
/// to bail back to [`SequencerState::Idle`]:
///
/// ```text
/// IDLE → SYNCHRONIZING → PROPOSER_CHECK → INITIALIZING_PROPOSAL
///      → CREATING_BLOCK → COLLECTING_ATTESTATIONS → PUBLISHING_BLOCK → IDLE
/// ```
///
/// `STOPPED` is sticky: only `start`/`restart` (which force the transition)
/// can leave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IsVariant, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerState {
    /// The sequencer is not running.
    Stopped,
    /// The sequencer is running and waiting for the next poll tick.
    Idle,
    /// Verifying that all upstream sources agree on the chain tip.
    Synchronizing,
    /// Asking the L1 rollup contract whether we may propose.
    ProposerCheck,
    /// Building global variables and the placeholder header for the proposal.
    InitializingProposal,
    /// Processing transactions and assembling the block on forked state.
    CreatingBlock,
    /// Broadcasting the proposal and waiting for committee attestations.
    CollectingAttestations,
    /// Enqueueing the block on the publisher.
    PublishingBlock,
}

impl SequencerState {
    /// Returns an iterable slice of the enum variant names.
    pub(crate) const fn variant_names() -> &'static [&'static str; 8] {
        &[
            "Stopped",
            "Idle",
            "Synchronizing",
            "ProposerCheck",
            "InitializingProposal",
            "CreatingBlock",
            "CollectingAttestations",
            "PublishingBlock",
        ]
    }
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Idle => write!(f, "Idle"),
            Self::Synchronizing => write!(f, "Synchronizing"),
            Self::ProposerCheck => write!(f, "ProposerCheck"),
            Self::InitializingProposal => write!(f, "InitializingProposal"),
            Self::CreatingBlock => write!(f, "CreatingBlock"),
            Self::CollectingAttestations => write!(f, "CollectingAttestations"),
            Self::PublishingBlock => write!(f, "PublishingBlock"),
        }
    }
}

/// The guarded state container. This is the only writer of the sequencer
/// state; all transitions go through [`StateMachine::set_state`].
#[derive(Debug)]
pub(crate) struct StateMachine {
    state_tx: watch::Sender<SequencerState>,
    state_rx: watch::Receiver<SequencerState>,
}

impl StateMachine {
    /// Creates a new state machine in the [`SequencerState::Stopped`] state.
    pub(crate) fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(SequencerState::Stopped);
        Self { state_tx, state_rx }
    }

    /// The current state.
    pub(crate) fn current(&self) -> SequencerState {
        *self.state_rx.borrow()
    }

    /// Attempts a transition to `next`.
    ///
    /// 1. A transition out of `Stopped` is rejected unless `force` is set.
    /// 2. `seconds_into_slot` of `None` means "no time constraint" (used for
    ///    `Idle`/`Stopped` and for phases before the slot is known).
    /// 3. The timetable decides whether `next` is still reachable; if not and
    ///    enforcement is on, the transition raises
    ///    [`SequencerError::TooSlow`] without committing.
    ///
    /// Returns `true` if the transition was committed.
    pub(crate) fn set_state(
        &self,
        next: SequencerState,
        seconds_into_slot: Option<u64>,
        force: bool,
        timetable: &Timetable,
    ) -> Result<bool, SequencerError> {
        let current = self.current();

        if current.is_stopped() && !force {
            warn!(%next, "Cannot transition out of Stopped without force; ignoring");
            return Ok(false);
        }

        if let Some(seconds) = seconds_into_slot {
            timetable.assert_time_left(next, seconds)?;
        }

        if current != next {
            debug!(old = %current, new = %next, "Sequencer state updated");
        }

        self.state_tx.send_replace(next);
        SequencerMetrics::set_sequencer_state(next);

        Ok(true)
    }

    /// Forces the state, bypassing the guard. Reserved for the loop-level
    /// recovery paths (`start`, `stop`, and the return to idle).
    pub(crate) fn force(&self, next: SequencerState) {
        let current = self.current();
        if current != next {
            debug!(old = %current, new = %next, "Sequencer state forced");
        }
        self.state_tx.send_replace(next);
        SequencerMetrics::set_sequencer_state(next);
    }

    /// Converts a slot-relative offset into the optional constraint form used
    /// by [`Self::set_state`]: slot zero carries no time constraint.
    pub(crate) const fn constraint_for(slot: Slot, seconds_into_slot: u64) -> Option<u64> {
        if slot == 0 { None } else { Some(seconds_into_slot) }
    }
}

use quill_interfaces::CollaboratorError;
use thiserror::Error;

use crate::state::SequencerState;

/// The errors that can occur during a sequencer iteration.
///
/// Note that none of these halt the main loop once it has started: the loop
/// logs them according to their severity and returns to idle for the next
/// slot.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// The slot budget for the attempted phase transition is exhausted.
    /// Caught at the loop level and logged as a warning: this is an expected
    /// operational condition, not a bug.
    #[error(
        "too slow to transition to {state} at {seconds_into_slot}s into slot (deadline {max_allowed_secs}s)"
    )]
    TooSlow {
        /// The phase that could not be entered in time.
        state: SequencerState,
        /// How far into the slot the transition was attempted.
        seconds_into_slot: u64,
        /// The deadline for entering the phase, as seconds into the slot.
        max_allowed_secs: u64,
    },
    /// The block cannot be built or published this slot: pre- or
    /// post-assembly validation failed, or too few transactions processed.
    #[error("cannot build block: {0}")]
    BlockInvalid(String),
    /// Two components disagree about chain state in a way that should be
    /// impossible. Fatal for the iteration and operator-visible.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),
    /// A collaborator raised. Propagated to the loop, which logs it at error
    /// level.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl SequencerError {
    /// A short label for the error kind, used as a metrics dimension.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TooSlow { .. } => "too_slow",
            Self::BlockInvalid(_) => "block_invalid",
            Self::Inconsistent(_) => "inconsistent",
            Self::Collaborator(_) => "collaborator",
        }
    }
}

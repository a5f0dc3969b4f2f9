#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! The Quill sequencer core.
//!
//! Once per network slot in which the local operator is eligible, the
//! sequencer:
//! - verifies all upstream data sources are synchronized to the chain tip,
//! - assembles a candidate L2 block from the transaction pool under strict
//!   time, size and gas budgets,
//! - solicits and orders a supermajority of attestations from the epoch
//!   committee,
//! - submits the block, bundled with governance and slashing votes, for
//!   inclusion on L1.
//!
//! It is a time-boxed state machine: every phase transition is checked
//! against the slot [`timetable`], and a slot that cannot be finished in time
//! is abandoned without leaving side effects on committed world state.

/// The main sequencer loop and its public control surface.
mod sequencer;
pub use sequencer::{Sequencer, SequencerCollaborators, SequencerStatus};

/// The guarded phase state machine.
mod state;
pub use state::SequencerState;

/// The slot timetable: phase deadlines and processing budgets.
mod timetable;
pub use timetable::Timetable;

/// The eligibility and sync gate.
mod tip;

/// The block assembly pipeline over forked world state.
mod assembly;

/// Deferred world-state fork release.
mod forks;

/// Runtime configuration snapshots and hot reload.
mod config;
pub use config::{SequencerConfig, SequencerConfigUpdate};

/// Iteration errors and the loop-level error policy.
mod error;
pub use error::SequencerError;

/// Prometheus metrics for the sequencer.
mod metrics;

#[cfg(test)]
mod tests;

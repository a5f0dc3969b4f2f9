#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Interfaces of the collaborators consumed by the Quill sequencer core.
//!
//! The sequencer is an orchestrator: every upstream subsystem (L1 publisher,
//! validator client, peer transaction pool, world state, block and message
//! sources, public processor, block builder) is injected behind one of these
//! narrow traits. Concrete implementations live in their own services; tests
//! use the mockall mocks compiled under the `mocks` feature.

use thiserror::Error;

/// The L1 publisher interface.
pub mod publisher;
pub use publisher::SequencerPublisher;

/// The validator client interface.
pub mod validator;
pub use validator::ValidatorClient;

/// The peer network transaction pool interface.
pub mod tx_pool;
pub use tx_pool::TxPool;

/// The world-state synchronizer and fork interfaces.
pub mod world_state;
pub use world_state::{WorldStateFork, WorldStateSynchronizer};

/// The canonical L2 block source and the L1-to-L2 message source interfaces.
pub mod block_source;
pub use block_source::{L1ToL2MessageSource, L2BlockSource};

/// The public processor interface.
pub mod processor;
pub use processor::{PublicProcessor, PublicProcessorFactory, TxValidator};

/// The block builder interface.
pub mod builder;
pub use builder::{BlockBuilder, BlockBuilderFactory};

/// An error raised by one of the injected collaborators.
///
/// The sequencer core does not inspect these beyond logging; the variant
/// records which subsystem failed so operators can route the alert.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("publisher error: {0}")]
    Publisher(String),
    #[error("validator client error: {0}")]
    Validator(String),
    #[error("tx pool error: {0}")]
    TxPool(String),
    #[error("world state error: {0}")]
    WorldState(String),
    #[error("block source error: {0}")]
    BlockSource(String),
    #[error("message source error: {0}")]
    MessageSource(String),
    #[error("public processor error: {0}")]
    Processor(String),
    #[error("block builder error: {0}")]
    Builder(String),
}

/// Convenience alias for collaborator call results.
pub type Result<T> = std::result::Result<T, CollaboratorError>;

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use futures::stream::BoxStream;
use quill_primitives::block::{BlockResourceUsage, FailedTx, GlobalVariables, ProcessedTx, Tx};
use tokio::time::Instant;

use crate::{Result, world_state::WorldStateFork};

/// The budget a single [`PublicProcessor::process`] run must respect.
///
/// All limits are optional: a validator re-executing a foreign proposal runs
/// with only the deadline set, since the proposer already selected the
/// transactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessorLimits {
    /// The instant at which the processor must stop issuing work.
    pub deadline: Option<Instant>,
    /// The maximum number of transactions to include.
    pub max_transactions: Option<usize>,
    /// The maximum total block size, in bytes.
    pub max_block_size: Option<usize>,
    /// The maximum DA gas for the block.
    pub max_da_gas: Option<u64>,
    /// The maximum L2 gas for the block.
    pub max_l2_gas: Option<u64>,
}

/// The outcome of processing a stream of transactions.
#[derive(Debug, Default)]
pub struct ProcessedOutput {
    /// The transactions that executed successfully, in inclusion order.
    pub processed: Vec<ProcessedTx>,
    /// The transactions that were rejected, with reasons.
    pub failed: Vec<FailedTx>,
    /// The aggregate resource usage of the processed transactions.
    pub used: BlockResourceUsage,
}

/// A per-slot transaction validity check, built from a world-state fork, the
/// slot's global variables, and the public-setup allow list.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait TxValidator: Debug + Send + Sync {
    /// Returns true if the transaction may be included in the block.
    async fn validate(&self, tx: &Tx) -> Result<bool>;
}

/// A public processor bound to one world-state fork and one slot.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait PublicProcessor: Send + Sync {
    /// Replays the publicly visible portion of each transaction against the
    /// fork, under the given limits, skipping transactions the validator
    /// rejects.
    async fn process(
        &mut self,
        txs: BoxStream<'static, Tx>,
        limits: ProcessorLimits,
        validator: Arc<dyn TxValidator>,
    ) -> Result<ProcessedOutput>;
}

/// Factory creating per-slot processors and validators.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait PublicProcessorFactory: Debug + Send + Sync {
    /// Creates a processor bound to the given fork and global variables.
    fn create_processor(
        &self,
        fork: Arc<dyn WorldStateFork>,
        globals: GlobalVariables,
        proposer: bool,
    ) -> Box<dyn PublicProcessor>;

    /// Creates the per-slot transaction validator.
    fn create_validator(
        &self,
        fork: Arc<dyn WorldStateFork>,
        globals: GlobalVariables,
        public_setup_allow_list: Vec<String>,
    ) -> Arc<dyn TxValidator>;
}

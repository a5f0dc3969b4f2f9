use std::{fmt::Debug, sync::Arc};

use alloy_primitives::B256;
use async_trait::async_trait;
use quill_primitives::block::{BlockHeader, GlobalVariables, L2Block, ProcessedTx};

use crate::{Result, world_state::WorldStateFork};

/// A block builder bound to one world-state fork.
///
/// The builder inserts transaction effects into the fork's trees; calling
/// [`BlockBuilder::set_block_completed`] pads the block to the fixed tree
/// shape and computes the content commitment and archive root.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait BlockBuilder: Send + Sync {
    /// Starts a new block with the given globals, cross-chain messages, and
    /// previous block header (`None` at genesis).
    async fn start_new_block(
        &mut self,
        globals: GlobalVariables,
        l1_to_l2_messages: Vec<B256>,
        previous_header: Option<BlockHeader>,
    ) -> Result<()>;

    /// Inserts the effects of the given processed transactions.
    async fn add_txs(&mut self, txs: Vec<ProcessedTx>) -> Result<()>;

    /// Completes the block, returning it with its content commitment and
    /// archive root filled in.
    async fn set_block_completed(&mut self) -> Result<L2Block>;
}

/// Factory creating per-slot block builders.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait BlockBuilderFactory: Debug + Send + Sync {
    /// Creates a builder bound to the given fork.
    fn create_builder(&self, fork: Arc<dyn WorldStateFork>) -> Box<dyn BlockBuilder>;
}

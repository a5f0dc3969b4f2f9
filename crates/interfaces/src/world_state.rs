use std::{fmt::Debug, sync::Arc};

use alloy_primitives::B256;
use async_trait::async_trait;
use quill_primitives::block::BlockHeader;

use crate::Result;

/// Summary of the world-state synchronizer's progress.
#[derive(Debug, Clone, Copy)]
pub struct WorldStateSyncSummary {
    /// The latest block number the world state has applied.
    pub latest_block_number: u64,
    /// The hash of that block, if any has been applied.
    pub latest_block_hash: Option<B256>,
}

/// The status of the world-state synchronizer.
#[derive(Debug, Clone, Copy)]
pub struct WorldStateStatus {
    /// The synchronization summary.
    pub sync_summary: WorldStateSyncSummary,
}

/// A copy-on-write view over the world-state trees at a given block.
///
/// Forks can be mutated freely without affecting the committed state; they
/// are never merged back. Closing releases the underlying snapshot.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait WorldStateFork: Debug + Send + Sync {
    /// The block number this fork was opened at.
    fn block_number(&self) -> u64;

    /// The header of the block at the fork point, or `None` at genesis.
    async fn get_initial_header(&self) -> Result<Option<BlockHeader>>;

    /// Releases the fork's snapshot. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// The world-state synchronizer: maintains the committed Merkle trees and
/// hands out forks for speculative execution.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait WorldStateSynchronizer: Debug + Send + Sync {
    /// The current synchronization status.
    async fn status(&self) -> Result<WorldStateStatus>;

    /// Forces a synchronous catch-up to at least the given block, returning
    /// the block number actually reached.
    async fn sync_immediate(&self, block: u64) -> Result<u64>;

    /// Opens a fork of the world state at the given block.
    async fn fork(&self, block: u64) -> Result<Arc<dyn WorldStateFork>>;

    /// The archive root of the committed (non-forked) world state.
    async fn get_committed_archive_root(&self) -> Result<B256>;
}

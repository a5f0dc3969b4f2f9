use std::fmt::Debug;

use alloy_primitives::B256;
use async_trait::async_trait;
use quill_primitives::block::{L2Block, L2Tips};

use crate::Result;

/// The canonical L2 block source, backed by the archiver.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait L2BlockSource: Debug + Send + Sync {
    /// Fetches a block by number, if it exists.
    async fn get_block(&self, number: u64) -> Result<Option<L2Block>>;

    /// The source's view of the chain tips.
    async fn get_l2_tips(&self) -> Result<L2Tips>;
}

/// The source of L1-to-L2 messages to be consumed by L2 blocks.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait L1ToL2MessageSource: Debug + Send + Sync {
    /// The messages that must be included in the given block.
    async fn get_l1_to_l2_messages(&self, block_number: u64) -> Result<Vec<B256>>;

    /// The source's view of the chain tips.
    async fn get_l2_tips(&self) -> Result<L2Tips>;
}

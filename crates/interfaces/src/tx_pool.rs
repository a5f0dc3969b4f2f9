use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use quill_primitives::block::{BlockId, Tx, TxHash};

use crate::Result;

/// The synchronization status of the peer network.
#[derive(Debug, Clone, Copy)]
pub struct TxPoolStatus {
    /// The latest L2 block the peer network has synced its pool against.
    pub synced_to_l2_block: BlockId,
}

/// The peer network's pending transaction pool.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait TxPool: Debug + Send + Sync {
    /// The number of pending transactions available for inclusion.
    async fn get_pending_tx_count(&self) -> Result<usize>;

    /// Streams pending transactions in priority order.
    async fn iterate_pending_txs(&self) -> Result<BoxStream<'static, Tx>>;

    /// Removes transactions from the pool by hash.
    async fn delete_txs(&self, hashes: Vec<TxHash>) -> Result<()>;

    /// The peer network's view of the chain tip.
    async fn get_status(&self) -> Result<TxPoolStatus>;
}

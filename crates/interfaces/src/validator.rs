use std::{fmt::Debug, sync::Arc};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use quill_primitives::block::{BlockProposal, CommitteeAttestation, L2Block, ProposedBlockHeader, Tx};
use tokio::time::Instant;

use crate::Result;

/// Options for creating a block proposal.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockProposalOptions {
    /// Whether to attach full transaction bodies to the broadcast proposal.
    pub publish_txs: bool,
}

/// The callback a validator uses to re-execute a foreign proposal through the
/// local sequencer before attesting to it.
///
/// The sequencer implements this and registers itself on the validator client
/// at construction.
#[async_trait]
pub trait ProposalBlockBuilder: Send + Sync {
    /// Re-executes the proposal's transactions and assembles the resulting
    /// block, raising if the outcome diverges from the proposed header.
    async fn build_block_from_proposal(&self, proposal: BlockProposal) -> Result<L2Block>;
}

/// The validator client: gossips proposals over the peer network, aggregates
/// committee attestations, and re-executes foreign proposals through the
/// registered [`ProposalBlockBuilder`].
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait ValidatorClient: Debug + Send + Sync {
    /// The L1 address of the locally attached validator, if any.
    fn get_validator_address(&self) -> Option<Address>;

    /// Registers the callback used to re-execute foreign proposals.
    fn register_block_builder(&self, builder: Arc<dyn ProposalBlockBuilder>);

    /// Creates (and signs) a block proposal for broadcasting.
    ///
    /// Returns `None` if the validator client cannot produce a proposal,
    /// e.g. because no signing key is attached.
    async fn create_block_proposal(
        &self,
        block_number: u64,
        header: ProposedBlockHeader,
        archive_root: B256,
        txs: Vec<Tx>,
        opts: BlockProposalOptions,
    ) -> Result<Option<BlockProposal>>;

    /// Broadcasts a proposal to the committee over the peer network.
    async fn broadcast_block_proposal(&self, proposal: BlockProposal) -> Result<()>;

    /// Collects attestations for the proposal until `required` signatures
    /// have arrived or the deadline passes, whichever comes first.
    ///
    /// The returned attestations are in arrival order, NOT committee order.
    async fn collect_attestations(
        &self,
        proposal: &BlockProposal,
        required: usize,
        deadline: Instant,
    ) -> Result<Vec<CommitteeAttestation>>;

    /// Stops the validator client's background tasks.
    async fn stop(&self);
}

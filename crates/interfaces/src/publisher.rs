use std::{fmt::Debug, sync::Arc};

use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use quill_primitives::{
    Slot,
    block::{CommitteeAttestation, L2Block, ProposedBlockHeader, TxHash},
    time::Timestamp,
};

use crate::Result;

/// The protocol constants published by the L1 rollup contract.
///
/// Fetched once at startup; they cannot change without a redeployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupConstants {
    /// The L2 chain id.
    pub chain_id: u64,
    /// The rollup protocol version.
    pub version: u64,
    /// The L1 timestamp at which slot 0 started.
    pub l1_genesis_time: Timestamp,
    /// The L2 slot duration, in seconds.
    pub slot_duration: u64,
    /// The L1 slot duration, in seconds.
    pub ethereum_slot_duration: u64,
    /// The number of L2 slots per epoch.
    pub epoch_duration: u64,
    /// The first L2 block number the rollup contract accepts. Blocks below
    /// this number are pre-genesis.
    pub initial_block_number: u64,
}

/// The kind of vote a sequencer casts alongside its block proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteKind {
    /// A vote for a governance payload upgrade.
    Governance,
    /// A vote to slash a misbehaving validator set.
    Slashing,
}

/// Options for enqueueing a block proposal on the publisher.
#[derive(Debug, Clone, Copy)]
pub struct EnqueueProposeOpts {
    /// The L1 wall-clock instant after which the propose transaction must be
    /// abandoned: a block must be mined within its own slot.
    pub tx_timeout_at: Timestamp,
}

/// The outcome of flushing the publisher's request queue.
#[derive(Debug, Clone, Default)]
pub struct SendRequestsOutcome {
    /// The names of the actions that were included in a mined L1 transaction,
    /// e.g. `"propose"`, `"governance-vote"`, `"slashing-vote"`.
    pub valid_actions: Vec<String>,
}

impl SendRequestsOutcome {
    /// Returns true if a block proposal landed in this flush.
    pub fn proposed(&self) -> bool {
        self.valid_actions.iter().any(|a| a == "propose")
    }
}

/// A callback producing the slashing payload to vote for at a given slot.
pub type SlashPayloadGetter = Arc<dyn Fn(Slot) -> Option<Bytes> + Send + Sync>;

/// The L1 publisher: batches rollup transactions (block proposals and votes),
/// prices and sends them, and answers eligibility queries against the rollup
/// contract.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait SequencerPublisher: Debug + Send + Sync {
    /// Reads the protocol constants from the rollup contract.
    async fn get_rollup_constants(&self) -> Result<RollupConstants>;

    /// Asks the rollup contract whether the local operator may propose at the
    /// next L1 block, given the archive root it would build on.
    ///
    /// Returns `None` when it is not our turn or the chain has advanced past
    /// the given archive; otherwise the slot and block number we may fill.
    async fn can_propose_at_next_eth_block(&self, tip_archive: B256)
    -> Result<Option<(Slot, u64)>>;

    /// Simulates the rollup contract's acceptance checks for a block with the
    /// given header: the slot must not have been filled by another proposer
    /// and must not have expired.
    async fn validate_block_for_submission(&self, header: &ProposedBlockHeader) -> Result<()>;

    /// Enqueues a block proposal for the next flush. Returns false if the
    /// request could not be queued, which is fatal for the slot.
    async fn enqueue_propose_l2_block(
        &self,
        block: L2Block,
        attestations: Vec<CommitteeAttestation>,
        tx_hashes: Vec<TxHash>,
        opts: EnqueueProposeOpts,
    ) -> Result<bool>;

    /// Enqueues a governance or slashing vote for the given slot.
    async fn enqueue_cast_vote(
        &self,
        slot: Slot,
        timestamp: Timestamp,
        kind: VoteKind,
    ) -> Result<bool>;

    /// Flushes all enqueued requests in a single L1 transaction.
    async fn send_requests(&self) -> Result<SendRequestsOutcome>;

    /// Returns the attestation committee for the current epoch, in the order
    /// required by the rollup contract.
    async fn get_current_epoch_committee(&self) -> Result<Vec<Address>>;

    /// The L1 address the publisher sends transactions from.
    fn get_sender_address(&self) -> Address;

    /// The L1 forwarder contract address used for request batching.
    fn get_forwarder_address(&self) -> Address;

    /// Sets the governance payload to vote for in subsequent slots.
    fn set_governance_payload(&self, payload: Bytes);

    /// Registers the callback producing slash payloads per slot.
    fn register_slash_payload_getter(&self, getter: SlashPayloadGetter);

    /// Cancels any in-flight L1 transactions.
    fn interrupt(&self);

    /// Re-arms the publisher after an interrupt.
    fn restart(&self);
}

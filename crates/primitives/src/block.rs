use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

use crate::{L2Address, Slot, summary::Summary, time::Timestamp};

/// An L2 transaction hash alias.
pub type TxHash = B256;

/// A block number paired with its hash, as advertised by an upstream source.
///
/// The hash is `None` when the source has no block yet (pre-genesis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockId {
    /// The block number.
    pub number: u64,
    /// The block hash, if the source knows one.
    pub hash: Option<B256>,
}

/// The tips of the L2 chain as seen by an upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Tips {
    /// The latest (unproven) tip.
    pub latest: BlockId,
}

/// The tip of the L2 chain as agreed upon by all upstream sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    /// The latest L2 block number.
    pub block_number: u64,
    /// The archive root committing to the full header history up to and
    /// including `block_number`.
    pub archive_root: B256,
}

/// The global variables of a single L2 block. Immutable once built for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariables {
    /// The L2 chain id.
    pub chain_id: u64,
    /// The rollup protocol version.
    pub version: u64,
    /// The block number being built.
    pub block_number: u64,
    /// The slot this block is proposed in.
    pub slot_number: Slot,
    /// The timestamp of the slot start.
    pub timestamp: Timestamp,
    /// The L1 address receiving L1 rewards for this block.
    pub coinbase: Address,
    /// The L2 address receiving L2 fees for this block.
    pub fee_recipient: L2Address,
}

/// The header of a block that is being proposed but has not been assembled
/// yet. The content commitment and mana usage are placeholders until the block
/// builder fills them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedBlockHeader {
    /// The global variables of the block.
    pub global_variables: GlobalVariables,
    /// The archive root of the parent chain, i.e. the state this block builds on.
    pub last_archive_root: B256,
    /// Commitment to the block contents. Zero until the block is assembled.
    pub content_commitment: B256,
    /// Total mana consumed by the block. Zero until the block is assembled.
    pub total_mana_used: u64,
}

impl ProposedBlockHeader {
    /// Creates a placeholder header for the given globals and parent archive.
    pub const fn from_globals(global_variables: GlobalVariables, last_archive_root: B256) -> Self {
        Self {
            global_variables,
            last_archive_root,
            content_commitment: B256::ZERO,
            total_mana_used: 0,
        }
    }

    /// The block number this header proposes.
    pub const fn block_number(&self) -> u64 {
        self.global_variables.block_number
    }

    /// The slot this header proposes in.
    pub const fn slot_number(&self) -> Slot {
        self.global_variables.slot_number
    }
}

/// The finalized header of an assembled L2 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// The global variables of the block.
    pub global_variables: GlobalVariables,
    /// The archive root of the parent chain.
    pub last_archive_root: B256,
    /// Commitment to the block contents.
    pub content_commitment: B256,
    /// Total mana consumed by the block.
    pub total_mana_used: u64,
}

impl BlockHeader {
    /// Project this header into the shape expected by the L1 rollup contract
    /// when proposing.
    pub const fn to_propose(&self) -> ProposedBlockHeader {
        ProposedBlockHeader {
            global_variables: self.global_variables,
            last_archive_root: self.last_archive_root,
            content_commitment: self.content_commitment,
            total_mana_used: self.total_mana_used,
        }
    }
}

/// A fully assembled L2 block, ready to be proposed to the L1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Block {
    /// The finalized block header.
    pub header: BlockHeader,
    /// The archive root after appending this block's header to the history.
    pub archive_root: B256,
    /// The hashes of the transactions included in the block, in order.
    pub tx_hashes: Vec<TxHash>,
}

impl L2Block {
    /// The number of this block.
    pub const fn number(&self) -> u64 {
        self.header.global_variables.block_number
    }

    /// The slot this block was built in.
    pub const fn slot(&self) -> Slot {
        self.header.global_variables.slot_number
    }
}

impl Summary for L2Block {
    fn summary(&self) -> String {
        format!(
            "number={}, slot={}, txs={}, mana={}, archive={}",
            self.number(),
            self.slot(),
            self.tx_hashes.len(),
            self.header.total_mana_used,
            self.archive_root,
        )
    }
}

/// A pending L2 transaction as it sits in the peer transaction pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    /// The transaction hash.
    pub hash: TxHash,
    /// The opaque encoded transaction payload.
    pub payload: Bytes,
    /// The DA gas the transaction claims to consume.
    pub da_gas: u64,
    /// The L2 gas the transaction claims to consume.
    pub l2_gas: u64,
}

impl Tx {
    /// The size of the encoded transaction payload, in bytes.
    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

/// A transaction that went through public processing successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedTx {
    /// The original transaction.
    pub tx: Tx,
    /// The mana consumed by public execution of the transaction.
    pub mana_used: u64,
}

impl ProcessedTx {
    /// The hash of the underlying transaction.
    pub const fn hash(&self) -> TxHash {
        self.tx.hash
    }
}

/// A transaction that failed public processing, along with the reason.
#[derive(Debug, Clone)]
pub struct FailedTx {
    /// The hash of the failed transaction.
    pub hash: TxHash,
    /// Why processing rejected it.
    pub reason: String,
}

/// Aggregate resource usage reported by the public processor for one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockResourceUsage {
    /// Total mana used across all processed transactions.
    pub mana_used: u64,
    /// Total DA gas used across all processed transactions.
    pub da_gas_used: u64,
}

/// A block proposal as broadcast to the validator committee.
///
/// Full transaction bodies are attached only when the proposer is configured
/// to publish them; validators can otherwise fetch them from the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProposal {
    /// The number of the proposed block.
    pub block_number: u64,
    /// The proposed header.
    pub header: ProposedBlockHeader,
    /// The archive root after the proposed block.
    pub archive_root: B256,
    /// The hashes of the proposed transactions, in order.
    pub tx_hashes: Vec<TxHash>,
    /// The full transaction bodies, when published alongside the proposal.
    pub txs: Option<Vec<Tx>>,
}

/// A committee member's signature over a block proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeAttestation {
    /// The L1 address of the attesting committee member.
    pub attester: Address,
    /// The signature over the proposal payload.
    pub signature: Bytes,
}

/// Returns the number of attestations required for a committee of the given
/// size: a supermajority of `floor(2n/3) + 1`.
pub const fn required_attestations(committee_size: usize) -> usize {
    (committee_size * 2) / 3 + 1
}

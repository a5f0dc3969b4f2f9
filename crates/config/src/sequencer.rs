use alloy_primitives::{Address, B256, Bytes};
use clap::Parser;

/// Sequencer-related configuration options.
///
/// All of these are hot-reloadable: the sequencer takes an atomic snapshot at
/// the start of every slot, so a reload never changes budgets mid-iteration.
#[derive(Debug, Clone, Parser)]
pub struct SequencerOpts {
    /// The interval at which the main loop polls for work, in milliseconds.
    #[clap(
        long = "seq.polling-interval-ms",
        env = "QUILL_SEQ_POLLING_INTERVAL_MS",
        default_value_t = 500
    )]
    pub polling_interval_ms: u64,
    /// The minimum number of pending transactions required to build a block.
    /// A `flush` bypasses this gate for one iteration.
    #[clap(
        long = "seq.min-txs-per-block",
        env = "QUILL_SEQ_MIN_TXS_PER_BLOCK",
        default_value_t = 1
    )]
    pub min_txs_per_block: usize,
    /// The maximum number of transactions to include in a block.
    #[clap(
        long = "seq.max-txs-per-block",
        env = "QUILL_SEQ_MAX_TXS_PER_BLOCK",
        default_value_t = 32
    )]
    pub max_txs_per_block: usize,
    /// The maximum DA gas a block may consume.
    #[clap(
        long = "seq.max-da-block-gas",
        env = "QUILL_SEQ_MAX_DA_BLOCK_GAS",
        default_value_t = 10_000_000_000
    )]
    pub max_da_block_gas: u64,
    /// The maximum L2 gas a block may consume.
    #[clap(
        long = "seq.max-l2-block-gas",
        env = "QUILL_SEQ_MAX_L2_BLOCK_GAS",
        default_value_t = 10_000_000_000
    )]
    pub max_l2_block_gas: u64,
    /// The maximum size of a block's transaction payload, in bytes.
    #[clap(
        long = "seq.max-block-size-bytes",
        env = "QUILL_SEQ_MAX_BLOCK_SIZE_BYTES",
        default_value_t = 1_048_576
    )]
    pub max_block_size_bytes: usize,
    /// The L1 address receiving block rewards. Defaults to the publisher's
    /// sender address when unset.
    #[clap(long = "seq.coinbase", env = "QUILL_SEQ_COINBASE")]
    pub coinbase: Option<Address>,
    /// The L2 address receiving transaction fees. Defaults to zero when
    /// unset, burning the fees.
    #[clap(long = "seq.fee-recipient", env = "QUILL_SEQ_FEE_RECIPIENT")]
    pub fee_recipient: Option<B256>,
    /// Identifiers of the contract functions permitted in the public setup
    /// phase of a transaction, comma-separated.
    #[clap(
        long = "seq.tx-public-setup-allow-list",
        env = "QUILL_SEQ_TX_PUBLIC_SETUP_ALLOW_LIST",
        value_delimiter = ','
    )]
    pub tx_public_setup_allow_list: Vec<String>,
    /// Whether to enforce the slot timetable. When disabled, phase deadlines
    /// are advisory and never abort an iteration.
    #[clap(
        long = "seq.enforce-timetable",
        env = "QUILL_SEQ_ENFORCE_TIMETABLE",
        default_value_t = false
    )]
    pub enforce_timetable: bool,
    /// Whether to attach full transaction bodies to broadcast block
    /// proposals. When disabled, validators fetch bodies from the pool.
    #[clap(
        long = "seq.publish-txs-with-proposals",
        env = "QUILL_SEQ_PUBLISH_TXS_WITH_PROPOSALS",
        default_value_t = false
    )]
    pub publish_txs_with_proposals: bool,
    /// The governance payload to vote for, hex-encoded. Routed to the
    /// publisher verbatim.
    #[clap(
        long = "seq.governance-proposer-payload",
        env = "QUILL_SEQ_GOVERNANCE_PROPOSER_PAYLOAD"
    )]
    pub governance_proposer_payload: Option<Bytes>,
    /// The last second into the slot at which an L1 propose transaction can
    /// still be sent and make it into an L1 block. Defaults to the slot
    /// duration minus one L1 slot.
    #[clap(
        long = "seq.max-l1-tx-inclusion-time-into-slot",
        env = "QUILL_SEQ_MAX_L1_TX_INCLUSION_TIME_INTO_SLOT"
    )]
    pub max_l1_tx_inclusion_time_into_slot: Option<u64>,
}

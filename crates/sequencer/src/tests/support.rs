//! Shared fixtures for the iteration scenario tests.

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use quill_config::SequencerOpts;
use quill_interfaces::{
    block_source::{MockL1ToL2MessageSource, MockL2BlockSource},
    builder::{MockBlockBuilder, MockBlockBuilderFactory},
    processor::{MockPublicProcessor, MockPublicProcessorFactory, MockTxValidator,
        ProcessedOutput},
    publisher::{MockSequencerPublisher, RollupConstants},
    tx_pool::{MockTxPool, TxPoolStatus},
    validator::MockValidatorClient,
    world_state::{MockWorldStateFork, MockWorldStateSynchronizer, WorldStateStatus,
        WorldStateSyncSummary},
};
use quill_primitives::{
    Slot,
    block::{
        BlockHeader, BlockId, BlockResourceUsage, CommitteeAttestation, GlobalVariables, L2Block,
        L2Tips, ProcessedTx, Tx,
    },
    time::current_timestamp_seconds,
};

use crate::sequencer::{Sequencer, SequencerCollaborators};

pub(crate) const SLOT_DURATION: u64 = 36;
pub(crate) const ETH_SLOT_DURATION: u64 = 12;

/// Protocol constants arranged so that we are currently `offset` seconds into
/// the given slot.
pub(crate) fn constants_at(slot: Slot, offset: u64) -> RollupConstants {
    RollupConstants {
        chain_id: 31337,
        version: 1,
        l1_genesis_time: current_timestamp_seconds() - slot * SLOT_DURATION - offset,
        slot_duration: SLOT_DURATION,
        ethereum_slot_duration: ETH_SLOT_DURATION,
        epoch_duration: 32,
        initial_block_number: 1,
    }
}

pub(crate) fn default_opts() -> SequencerOpts {
    SequencerOpts {
        polling_interval_ms: 60_000,
        min_txs_per_block: 1,
        max_txs_per_block: 32,
        max_da_block_gas: 10_000_000_000,
        max_l2_block_gas: 10_000_000_000,
        max_block_size_bytes: 1_048_576,
        coinbase: Some(Address::repeat_byte(0xc0)),
        fee_recipient: Some(B256::repeat_byte(0xfe)),
        tx_public_setup_allow_list: vec![],
        enforce_timetable: false,
        publish_txs_with_proposals: false,
        governance_proposer_payload: None,
        max_l1_tx_inclusion_time_into_slot: None,
    }
}

pub(crate) fn tx(byte: u8) -> Tx {
    Tx { hash: B256::repeat_byte(byte), payload: Default::default(), da_gas: 1, l2_gas: 1 }
}

pub(crate) fn txs(count: u8) -> Vec<Tx> {
    (1..=count).map(tx).collect()
}

pub(crate) fn processed(list: &[Tx]) -> Vec<ProcessedTx> {
    list.iter().map(|t| ProcessedTx { tx: t.clone(), mana_used: 10 }).collect()
}

pub(crate) fn attestation_from(member: Address) -> CommitteeAttestation {
    CommitteeAttestation { attester: member, signature: vec![0xaa; 65].into() }
}

pub(crate) fn block_with_txs(number: u64, slot: Slot, included: &[Tx]) -> L2Block {
    L2Block {
        header: BlockHeader {
            global_variables: GlobalVariables {
                chain_id: 31337,
                version: 1,
                block_number: number,
                slot_number: slot,
                timestamp: 0,
                coinbase: Address::repeat_byte(0xc0),
                fee_recipient: B256::repeat_byte(0xfe),
            },
            last_archive_root: B256::repeat_byte(0xab),
            content_commitment: B256::repeat_byte(0xcc),
            total_mana_used: included.len() as u64 * 10,
        },
        archive_root: B256::repeat_byte(0xdd),
        tx_hashes: included.iter().map(|t| t.hash).collect(),
    }
}

/// The full set of collaborator mocks behind one sequencer instance.
///
/// Constructed with only the expectations every test needs (the rollup
/// constants fetch and the block-builder registration); each scenario layers
/// its own on top before calling [`Harness::build`].
pub(crate) struct Harness {
    pub opts: SequencerOpts,
    pub publisher: MockSequencerPublisher,
    pub validator_client: MockValidatorClient,
    pub tx_pool: MockTxPool,
    pub world_state: MockWorldStateSynchronizer,
    pub block_source: MockL2BlockSource,
    pub message_source: MockL1ToL2MessageSource,
    pub processor_factory: MockPublicProcessorFactory,
    pub builder_factory: MockBlockBuilderFactory,
}

impl Harness {
    pub(crate) fn new(constants: RollupConstants) -> Self {
        let mut publisher = MockSequencerPublisher::new();
        publisher.expect_get_rollup_constants().returning(move || Ok(constants));

        let mut validator_client = MockValidatorClient::new();
        validator_client.expect_register_block_builder().times(1).returning(|_| ());

        Self {
            opts: default_opts(),
            publisher,
            validator_client,
            tx_pool: MockTxPool::new(),
            world_state: MockWorldStateSynchronizer::new(),
            block_source: MockL2BlockSource::new(),
            message_source: MockL1ToL2MessageSource::new(),
            processor_factory: MockPublicProcessorFactory::new(),
            builder_factory: MockBlockBuilderFactory::new(),
        }
    }

    /// All four upstream sources agree on a tip at `number` whose block
    /// carries `archive_root`.
    pub(crate) fn sources_agree_at(&mut self, number: u64, archive_root: B256) {
        let hash = B256::repeat_byte(0x11);

        self.world_state.expect_status().returning(move || {
            Ok(WorldStateStatus {
                sync_summary: WorldStateSyncSummary {
                    latest_block_number: number,
                    latest_block_hash: Some(hash),
                },
            })
        });
        self.block_source
            .expect_get_l2_tips()
            .returning(move || Ok(L2Tips { latest: BlockId { number, hash: Some(hash) } }));
        self.tx_pool.expect_get_status().returning(move || {
            Ok(TxPoolStatus { synced_to_l2_block: BlockId { number, hash: Some(hash) } })
        });
        self.message_source
            .expect_get_l2_tips()
            .returning(move || Ok(L2Tips { latest: BlockId { number, hash: Some(hash) } }));
        self.block_source.expect_get_block().returning(move |n| {
            let mut block = block_with_txs(n, 0, &[]);
            block.archive_root = archive_root;
            Ok(Some(block))
        });
    }

    /// Forks open on demand and never fail to close.
    pub(crate) fn forks_available(&mut self) {
        self.world_state.expect_fork().returning(|n| {
            let mut fork = MockWorldStateFork::new();
            fork.expect_block_number().return_const(n);
            fork.expect_get_initial_header().returning(|| Ok(None));
            fork.expect_close().returning(|| Ok(()));
            Ok(Arc::new(fork) as Arc<dyn quill_interfaces::WorldStateFork>)
        });
    }

    /// The public processor succeeds on the given transactions.
    pub(crate) fn processor_succeeds_with(&mut self, included: Vec<Tx>) {
        self.processor_factory.expect_create_validator().returning(|_, _, _| {
            Arc::new(MockTxValidator::new()) as Arc<dyn quill_interfaces::TxValidator>
        });
        self.processor_factory.expect_create_processor().returning(move |_, _, _| {
            let included = included.clone();
            let mut processor = MockPublicProcessor::new();
            processor.expect_process().return_once(move |stream, _, _| {
                drop(stream);
                Ok(ProcessedOutput {
                    processed: processed(&included),
                    failed: vec![],
                    used: BlockResourceUsage {
                        mana_used: included.len() as u64 * 10,
                        da_gas_used: included.len() as u64,
                    },
                })
            });
            Box::new(processor) as Box<dyn quill_interfaces::PublicProcessor>
        });
    }

    /// The block builder completes a block containing the given txs.
    pub(crate) fn builder_completes(&mut self, number: u64, slot: Slot, included: Vec<Tx>) {
        self.message_source.expect_get_l1_to_l2_messages().returning(|_| Ok(vec![]));
        self.builder_factory.expect_create_builder().returning(move |_| {
            let included = included.clone();
            let mut builder = MockBlockBuilder::new();
            builder.expect_start_new_block().returning(|_, _, _| Ok(()));
            builder.expect_add_txs().returning(|_| Ok(()));
            builder
                .expect_set_block_completed()
                .return_once(move || Ok(block_with_txs(number, slot, &included)));
            Box::new(builder) as Box<dyn quill_interfaces::BlockBuilder>
        });
    }

    pub(crate) async fn build(self) -> Sequencer {
        let collaborators = SequencerCollaborators {
            publisher: Arc::new(self.publisher),
            validator_client: Arc::new(self.validator_client),
            tx_pool: Arc::new(self.tx_pool),
            world_state: Arc::new(self.world_state),
            block_source: Arc::new(self.block_source),
            message_source: Arc::new(self.message_source),
            processor_factory: Arc::new(self.processor_factory),
            builder_factory: Arc::new(self.builder_factory),
            slash_payload_getter: None,
        };

        Sequencer::new(&self.opts, collaborators).await.expect("sequencer construction")
    }
}

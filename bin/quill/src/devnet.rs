//! In-process single-node composition.
//!
//! Every collaborator of the sequencer is backed by a small in-memory
//! implementation and the L1 is simulated inside the publisher, so `quill`
//! can run a local development network with no external services. The
//! committee is empty, putting the sequencer in solo-proposer mode.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_primitives::{Address, B256, Bytes, keccak256};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use quill_interfaces::{
    BlockBuilder, BlockBuilderFactory, L1ToL2MessageSource, L2BlockSource, PublicProcessor,
    PublicProcessorFactory, Result, SequencerPublisher, TxPool, TxValidator, ValidatorClient,
    WorldStateFork, WorldStateSynchronizer,
    processor::{ProcessedOutput, ProcessorLimits},
    publisher::{EnqueueProposeOpts, RollupConstants, SendRequestsOutcome, SlashPayloadGetter,
        VoteKind},
    tx_pool::TxPoolStatus,
    validator::{BlockProposalOptions, ProposalBlockBuilder},
    world_state::{WorldStateStatus, WorldStateSyncSummary},
    CollaboratorError,
};
use quill_primitives::{
    Slot,
    block::{
        BlockHeader, BlockId, BlockProposal, BlockResourceUsage, CommitteeAttestation,
        GlobalVariables, L2Block, L2Tips, ProcessedTx, ProposedBlockHeader, Tx, TxHash,
    },
    time::{Timestamp, current_timestamp_seconds, timestamp_to_slot},
};
use quill_sequencer::SequencerCollaborators;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// The archive root of the empty devnet chain.
const GENESIS_ARCHIVE: B256 = B256::repeat_byte(0x51);

/// The simulated L2 chain, shared by all devnet collaborators.
#[derive(Debug, Clone, Default)]
pub(crate) struct DevChain {
    blocks: Arc<Mutex<Vec<L2Block>>>,
}

impl DevChain {
    fn tip(&self) -> BlockId {
        match self.blocks.lock().expect("chain lock").last() {
            Some(block) => BlockId { number: block.number(), hash: Some(block.archive_root) },
            None => BlockId { number: 0, hash: None },
        }
    }

    fn archive_root(&self) -> B256 {
        self.blocks
            .lock()
            .expect("chain lock")
            .last()
            .map_or(GENESIS_ARCHIVE, |block| block.archive_root)
    }

    fn block(&self, number: u64) -> Option<L2Block> {
        let blocks = self.blocks.lock().expect("chain lock");
        number.checked_sub(1).and_then(|i| blocks.get(i as usize)).cloned()
    }

    fn next_block_number(&self) -> u64 {
        self.blocks.lock().expect("chain lock").len() as u64 + 1
    }

    fn append(&self, block: L2Block) {
        self.blocks.lock().expect("chain lock").push(block);
    }

    fn mined_tx_hashes(&self) -> HashSet<TxHash> {
        self.blocks
            .lock()
            .expect("chain lock")
            .iter()
            .flat_map(|block| block.tx_hashes.iter().copied())
            .collect()
    }
}

/// A publisher over the simulated L1: enqueued proposals are "mined" by the
/// next `send_requests` call.
pub(crate) struct DevPublisher {
    chain: DevChain,
    constants: RollupConstants,
    sender: Address,
    pending_block: Mutex<Option<L2Block>>,
    pending_votes: Mutex<Vec<VoteKind>>,
    governance_payload: Mutex<Option<Bytes>>,
    slash_payload_getter: Mutex<Option<SlashPayloadGetter>>,
}

impl std::fmt::Debug for DevPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevPublisher")
            .field("sender", &self.sender)
            .field("constants", &self.constants)
            .finish_non_exhaustive()
    }
}

impl DevPublisher {
    fn new(chain: DevChain, constants: RollupConstants) -> Self {
        Self {
            chain,
            constants,
            sender: Address::repeat_byte(0xde),
            pending_block: Mutex::new(None),
            pending_votes: Mutex::new(Vec::new()),
            governance_payload: Mutex::new(None),
            slash_payload_getter: Mutex::new(None),
        }
    }

    fn current_slot(&self) -> Slot {
        timestamp_to_slot(
            current_timestamp_seconds(),
            self.constants.l1_genesis_time,
            self.constants.slot_duration,
        )
    }
}

#[async_trait]
impl SequencerPublisher for DevPublisher {
    async fn get_rollup_constants(&self) -> Result<RollupConstants> {
        Ok(self.constants)
    }

    async fn can_propose_at_next_eth_block(
        &self,
        tip_archive: B256,
    ) -> Result<Option<(Slot, u64)>> {
        // A solo devnet operator always has the next slot, as long as the
        // caller builds on the simulated chain tip.
        if tip_archive != self.chain.archive_root() {
            return Ok(None);
        }
        Ok(Some((self.current_slot(), self.chain.next_block_number())))
    }

    async fn validate_block_for_submission(&self, header: &ProposedBlockHeader) -> Result<()> {
        let expected = self.chain.next_block_number();
        if header.block_number() != expected {
            return Err(CollaboratorError::Publisher(format!(
                "chain advanced: expected block {expected}, got {}",
                header.block_number()
            )));
        }
        Ok(())
    }

    async fn enqueue_propose_l2_block(
        &self,
        block: L2Block,
        _attestations: Vec<CommitteeAttestation>,
        _tx_hashes: Vec<TxHash>,
        _opts: EnqueueProposeOpts,
    ) -> Result<bool> {
        *self.pending_block.lock().expect("publisher lock") = Some(block);
        Ok(true)
    }

    async fn enqueue_cast_vote(
        &self,
        _slot: Slot,
        _timestamp: Timestamp,
        kind: VoteKind,
    ) -> Result<bool> {
        self.pending_votes.lock().expect("publisher lock").push(kind);
        Ok(true)
    }

    async fn send_requests(&self) -> Result<SendRequestsOutcome> {
        let mut actions = Vec::new();

        for kind in self.pending_votes.lock().expect("publisher lock").drain(..) {
            actions.push(match kind {
                VoteKind::Governance => "governance-vote".to_owned(),
                VoteKind::Slashing => "slashing-vote".to_owned(),
            });
        }

        if let Some(block) = self.pending_block.lock().expect("publisher lock").take() {
            debug!(number = block.number(), "Devnet L1 mined a block proposal");
            self.chain.append(block);
            actions.push("propose".to_owned());
        }

        Ok(SendRequestsOutcome { valid_actions: actions })
    }

    async fn get_current_epoch_committee(&self) -> Result<Vec<Address>> {
        // Solo-proposer mode: no committee on a single-node devnet.
        Ok(vec![])
    }

    fn get_sender_address(&self) -> Address {
        self.sender
    }

    fn get_forwarder_address(&self) -> Address {
        Address::repeat_byte(0xf0)
    }

    fn set_governance_payload(&self, payload: Bytes) {
        *self.governance_payload.lock().expect("publisher lock") = Some(payload);
    }

    fn register_slash_payload_getter(&self, getter: SlashPayloadGetter) {
        *self.slash_payload_getter.lock().expect("publisher lock") = Some(getter);
    }

    fn interrupt(&self) {
        self.pending_block.lock().expect("publisher lock").take();
    }

    fn restart(&self) {}
}

/// A validator client with no peers: proposals echo back, no attestations.
pub(crate) struct DevValidatorClient {
    builder: Mutex<Option<Arc<dyn ProposalBlockBuilder>>>,
}

impl std::fmt::Debug for DevValidatorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevValidatorClient").finish_non_exhaustive()
    }
}

#[async_trait]
impl ValidatorClient for DevValidatorClient {
    fn get_validator_address(&self) -> Option<Address> {
        None
    }

    fn register_block_builder(&self, builder: Arc<dyn ProposalBlockBuilder>) {
        *self.builder.lock().expect("validator lock") = Some(builder);
    }

    async fn create_block_proposal(
        &self,
        block_number: u64,
        header: ProposedBlockHeader,
        archive_root: B256,
        txs: Vec<Tx>,
        opts: BlockProposalOptions,
    ) -> Result<Option<BlockProposal>> {
        let tx_hashes = txs.iter().map(|t| t.hash).collect();
        Ok(Some(BlockProposal {
            block_number,
            header,
            archive_root,
            tx_hashes,
            txs: opts.publish_txs.then_some(txs),
        }))
    }

    async fn broadcast_block_proposal(&self, _proposal: BlockProposal) -> Result<()> {
        Ok(())
    }

    async fn collect_attestations(
        &self,
        _proposal: &BlockProposal,
        _required: usize,
        _deadline: Instant,
    ) -> Result<Vec<CommitteeAttestation>> {
        Ok(vec![])
    }

    async fn stop(&self) {}
}

/// An in-memory pending transaction pool.
#[derive(Debug, Clone)]
pub(crate) struct DevTxPool {
    chain: DevChain,
    txs: Arc<Mutex<Vec<Tx>>>,
}

impl DevTxPool {
    fn new(chain: DevChain) -> Self {
        Self { chain, txs: Arc::new(Mutex::new(Vec::new())) }
    }

    fn submit(&self, tx: Tx) {
        self.txs.lock().expect("pool lock").push(tx);
    }

    /// Drops transactions that have already been mined on the devnet chain.
    fn prune_mined(&self) {
        let mined = self.chain.mined_tx_hashes();
        self.txs.lock().expect("pool lock").retain(|tx| !mined.contains(&tx.hash));
    }
}

#[async_trait]
impl TxPool for DevTxPool {
    async fn get_pending_tx_count(&self) -> Result<usize> {
        self.prune_mined();
        Ok(self.txs.lock().expect("pool lock").len())
    }

    async fn iterate_pending_txs(&self) -> Result<BoxStream<'static, Tx>> {
        self.prune_mined();
        let snapshot = self.txs.lock().expect("pool lock").clone();
        Ok(futures::stream::iter(snapshot).boxed())
    }

    async fn delete_txs(&self, hashes: Vec<TxHash>) -> Result<()> {
        let drop: HashSet<TxHash> = hashes.into_iter().collect();
        self.txs.lock().expect("pool lock").retain(|tx| !drop.contains(&tx.hash));
        Ok(())
    }

    async fn get_status(&self) -> Result<TxPoolStatus> {
        Ok(TxPoolStatus { synced_to_l2_block: self.chain.tip() })
    }
}

/// World state that tracks the simulated chain head directly.
#[derive(Debug, Clone)]
pub(crate) struct DevWorldState {
    chain: DevChain,
}

#[derive(Debug)]
struct DevFork {
    chain: DevChain,
    block_number: u64,
}

#[async_trait]
impl WorldStateFork for DevFork {
    fn block_number(&self) -> u64 {
        self.block_number
    }

    async fn get_initial_header(&self) -> Result<Option<BlockHeader>> {
        Ok(self.chain.block(self.block_number).map(|b| b.header))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl WorldStateSynchronizer for DevWorldState {
    async fn status(&self) -> Result<WorldStateStatus> {
        let tip = self.chain.tip();
        Ok(WorldStateStatus {
            sync_summary: WorldStateSyncSummary {
                latest_block_number: tip.number,
                latest_block_hash: tip.hash,
            },
        })
    }

    async fn sync_immediate(&self, _block: u64) -> Result<u64> {
        Ok(self.chain.tip().number)
    }

    async fn fork(&self, block: u64) -> Result<Arc<dyn WorldStateFork>> {
        Ok(Arc::new(DevFork { chain: self.chain.clone(), block_number: block }))
    }

    async fn get_committed_archive_root(&self) -> Result<B256> {
        Ok(self.chain.archive_root())
    }
}

/// Canonical block source view over the simulated chain.
#[derive(Debug, Clone)]
pub(crate) struct DevBlockSource {
    chain: DevChain,
}

#[async_trait]
impl L2BlockSource for DevBlockSource {
    async fn get_block(&self, number: u64) -> Result<Option<L2Block>> {
        Ok(self.chain.block(number))
    }

    async fn get_l2_tips(&self) -> Result<L2Tips> {
        Ok(L2Tips { latest: self.chain.tip() })
    }
}

/// A message source with no cross-chain messages.
#[derive(Debug, Clone)]
pub(crate) struct DevMessageSource {
    chain: DevChain,
}

#[async_trait]
impl L1ToL2MessageSource for DevMessageSource {
    async fn get_l1_to_l2_messages(&self, _block_number: u64) -> Result<Vec<B256>> {
        Ok(vec![])
    }

    async fn get_l2_tips(&self) -> Result<L2Tips> {
        Ok(L2Tips { latest: self.chain.tip() })
    }
}

/// A processor where every transaction succeeds with a fixed mana cost.
#[derive(Debug, Default)]
pub(crate) struct DevProcessorFactory;

#[derive(Debug)]
struct DevProcessor;

#[derive(Debug)]
struct DevTxValidator;

#[async_trait]
impl TxValidator for DevTxValidator {
    async fn validate(&self, _tx: &Tx) -> Result<bool> {
        Ok(true)
    }
}

/// The simulated public-execution cost per transaction.
const DEV_MANA_PER_TX: u64 = 10;

#[async_trait]
impl PublicProcessor for DevProcessor {
    async fn process(
        &mut self,
        mut txs: BoxStream<'static, Tx>,
        limits: ProcessorLimits,
        validator: Arc<dyn TxValidator>,
    ) -> Result<ProcessedOutput> {
        let mut output = ProcessedOutput::default();

        while let Some(tx) = txs.next().await {
            if limits.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
            if limits.max_transactions.is_some_and(|max| output.processed.len() >= max) {
                break;
            }
            if !validator.validate(&tx).await? {
                continue;
            }

            output.used.mana_used += DEV_MANA_PER_TX;
            output.used.da_gas_used += tx.da_gas;
            output.processed.push(ProcessedTx { tx, mana_used: DEV_MANA_PER_TX });
        }

        Ok(output)
    }
}

#[async_trait]
impl PublicProcessorFactory for DevProcessorFactory {
    fn create_processor(
        &self,
        _fork: Arc<dyn WorldStateFork>,
        _globals: GlobalVariables,
        _proposer: bool,
    ) -> Box<dyn PublicProcessor> {
        Box::new(DevProcessor)
    }

    fn create_validator(
        &self,
        _fork: Arc<dyn WorldStateFork>,
        _globals: GlobalVariables,
        _public_setup_allow_list: Vec<String>,
    ) -> Arc<dyn TxValidator> {
        Arc::new(DevTxValidator)
    }
}

/// A block builder chaining archive roots with keccak.
#[derive(Debug)]
pub(crate) struct DevBuilderFactory {
    chain: DevChain,
}

#[derive(Debug)]
struct DevBuilder {
    chain: DevChain,
    globals: Option<GlobalVariables>,
    txs: Vec<ProcessedTx>,
}

#[async_trait]
impl BlockBuilder for DevBuilder {
    async fn start_new_block(
        &mut self,
        globals: GlobalVariables,
        _l1_to_l2_messages: Vec<B256>,
        _previous_header: Option<BlockHeader>,
    ) -> Result<()> {
        self.globals = Some(globals);
        self.txs.clear();
        Ok(())
    }

    async fn add_txs(&mut self, txs: Vec<ProcessedTx>) -> Result<()> {
        self.txs.extend(txs);
        Ok(())
    }

    async fn set_block_completed(&mut self) -> Result<L2Block> {
        let globals = self
            .globals
            .take()
            .ok_or_else(|| CollaboratorError::Builder("no block started".into()))?;

        let tx_hashes: Vec<TxHash> = self.txs.iter().map(|t| t.hash()).collect();
        let mut preimage = Vec::with_capacity(tx_hashes.len() * 32);
        for hash in &tx_hashes {
            preimage.extend_from_slice(hash.as_slice());
        }
        let content_commitment = keccak256(&preimage);

        let last_archive_root = self.chain.archive_root();
        let archive_root =
            keccak256([last_archive_root.as_slice(), content_commitment.as_slice()].concat());

        let usage: BlockResourceUsage = BlockResourceUsage {
            mana_used: self.txs.iter().map(|t| t.mana_used).sum(),
            da_gas_used: 0,
        };

        Ok(L2Block {
            header: BlockHeader {
                global_variables: globals,
                last_archive_root,
                content_commitment,
                total_mana_used: usage.mana_used,
            },
            archive_root,
            tx_hashes,
        })
    }
}

#[async_trait]
impl BlockBuilderFactory for DevBuilderFactory {
    fn create_builder(&self, _fork: Arc<dyn WorldStateFork>) -> Box<dyn BlockBuilder> {
        Box::new(DevBuilder { chain: self.chain.clone(), globals: None, txs: Vec::new() })
    }
}

/// Builds the full devnet composition with a 36s/12s slot cadence.
pub(crate) fn compose() -> (SequencerCollaborators, DevTxPool) {
    let chain = DevChain::default();

    let constants = RollupConstants {
        chain_id: 1337,
        version: 1,
        // Start one slot in the past so the current slot is never zero.
        l1_genesis_time: current_timestamp_seconds().saturating_sub(36),
        slot_duration: 36,
        ethereum_slot_duration: 12,
        epoch_duration: 32,
        initial_block_number: 1,
    };

    let tx_pool = DevTxPool::new(chain.clone());

    let collaborators = SequencerCollaborators {
        publisher: Arc::new(DevPublisher::new(chain.clone(), constants)),
        validator_client: Arc::new(DevValidatorClient { builder: Mutex::new(None) }),
        tx_pool: Arc::new(tx_pool.clone()),
        world_state: Arc::new(DevWorldState { chain: chain.clone() }),
        block_source: Arc::new(DevBlockSource { chain: chain.clone() }),
        message_source: Arc::new(DevMessageSource { chain: chain.clone() }),
        processor_factory: Arc::new(DevProcessorFactory),
        builder_factory: Arc::new(DevBuilderFactory { chain }),
        slash_payload_getter: None,
    };

    (collaborators, tx_pool)
}

/// Feeds a synthetic transaction into the pool every few seconds so the
/// devnet has something to sequence.
pub(crate) fn spawn_tx_feeder(pool: DevTxPool) {
    tokio::spawn(async move {
        let mut nonce: u64 = 0;
        loop {
            sleep(Duration::from_secs(6)).await;
            nonce += 1;

            let payload = Bytes::from(nonce.to_be_bytes().to_vec());
            let tx = Tx { hash: keccak256(&payload), payload, da_gas: 100, l2_gas: 100 };
            debug!(hash = %tx.hash, "Devnet feeder submitted a tx");
            pool.submit(tx);
        }
    });
}

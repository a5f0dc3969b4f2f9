use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use alloy_primitives::Address;
use async_trait::async_trait;
use quill_config::SequencerOpts;
use quill_interfaces::{
    BlockBuilderFactory, CollaboratorError, L1ToL2MessageSource, L2BlockSource,
    PublicProcessorFactory, SequencerPublisher, TxPool, ValidatorClient, WorldStateSynchronizer,
    processor::ProcessorLimits,
    publisher::{EnqueueProposeOpts, RollupConstants, SlashPayloadGetter, VoteKind},
    validator::{BlockProposalOptions, ProposalBlockBuilder},
};
use quill_primitives::{
    Slot,
    block::{
        BlockProposal, CommitteeAttestation, GlobalVariables, L2Block, ProposedBlockHeader,
        required_attestations,
    },
    time::{Timestamp, current_timestamp_seconds},
};
use serde::Serialize;
use tokio::{
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    assembly::{AssembledBlock, AssemblyMode, AssemblyRequest, BlockAssembler},
    config::{RuntimeConfig, SequencerConfig, SequencerConfigUpdate},
    error::SequencerError,
    forks::DeferredForkCloser,
    metrics::SequencerMetrics,
    state::{SequencerState, StateMachine},
    timetable::Timetable,
    tip::SyncGate,
};

/// The collaborator handles injected into the sequencer at construction.
///
/// The sequencer holds non-owning handles; the owner is the top-level node
/// composition. All collaborators are assumed to be internally thread-safe.
#[derive(Clone)]
pub struct SequencerCollaborators {
    pub publisher: Arc<dyn SequencerPublisher>,
    pub validator_client: Arc<dyn ValidatorClient>,
    pub tx_pool: Arc<dyn TxPool>,
    pub world_state: Arc<dyn WorldStateSynchronizer>,
    pub block_source: Arc<dyn L2BlockSource>,
    pub message_source: Arc<dyn L1ToL2MessageSource>,
    pub processor_factory: Arc<dyn PublicProcessorFactory>,
    pub builder_factory: Arc<dyn BlockBuilderFactory>,
    /// The slasher's payload callback, forwarded to the publisher so that
    /// slashing votes carry its payload. `None` disables slash payloads.
    pub slash_payload_getter: Option<SlashPayloadGetter>,
}

impl std::fmt::Debug for SequencerCollaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencerCollaborators")
            .field("publisher", &self.publisher)
            .field("validator_client", &self.validator_client)
            .field("tx_pool", &self.tx_pool)
            .field("world_state", &self.world_state)
            .field("block_source", &self.block_source)
            .field("message_source", &self.message_source)
            .field("processor_factory", &self.processor_factory)
            .field("builder_factory", &self.builder_factory)
            .finish_non_exhaustive()
    }
}

/// A point-in-time snapshot of the sequencer, for operator introspection.
#[derive(Debug, Clone, Serialize)]
pub struct SequencerStatus {
    /// The current phase.
    pub state: SequencerState,
    /// Whether the one-shot flush flag is armed.
    pub is_flushing: bool,
    /// The current slot, derived from wall-clock time.
    pub current_slot: Slot,
}

/// The outcome of one main-loop iteration that did not raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotOutcome {
    /// The upstream sources disagree on the chain tip.
    NotReady,
    /// The L1 rollup contract did not select us for the next slot.
    NotOurTurn,
    /// Eligible, but the pool holds fewer than `min_txs_per_block` txs.
    TooFewTxs,
    /// A block was assembled, attested and enqueued for publication.
    Proposed,
}

/// The sequencer core: once per slot in which the local operator is eligible,
/// it verifies upstream synchronization, assembles a candidate block under
/// the slot timetable, collects a supermajority of committee attestations,
/// and enqueues the block together with governance votes for L1 inclusion.
///
/// The sequencer persists nothing between slots: every iteration produces
/// ephemeral global variables, two world-state forks, and one block
/// candidate, all dropped at slot end.
#[derive(Debug)]
pub struct Sequencer {
    inner: Arc<SequencerInner>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl Sequencer {
    /// Creates a new sequencer, fetching the protocol constants from the L1
    /// rollup contract and registering the validator re-execution callback.
    ///
    /// The state machine starts in [`SequencerState::Stopped`]; call
    /// [`Self::start`] to arm the main loop.
    pub async fn new(
        opts: &SequencerOpts,
        collaborators: SequencerCollaborators,
    ) -> Result<Self, SequencerError> {
        let constants = collaborators.publisher.get_rollup_constants().await?;
        let config = SequencerConfig::from_opts(opts);

        if let Some(payload) = &config.governance_proposer_payload {
            collaborators.publisher.set_governance_payload(payload.clone());
        }
        if let Some(getter) = &collaborators.slash_payload_getter {
            collaborators.publisher.register_slash_payload_getter(Arc::clone(getter));
        }

        let closer = Arc::new(DeferredForkCloser::new());

        let gate = SyncGate::new(
            Arc::clone(&collaborators.world_state),
            Arc::clone(&collaborators.block_source),
            Arc::clone(&collaborators.tx_pool),
            Arc::clone(&collaborators.message_source),
            Arc::clone(&collaborators.publisher),
            constants.initial_block_number,
        );

        let assembler = BlockAssembler::new(
            Arc::clone(&collaborators.world_state),
            Arc::clone(&collaborators.tx_pool),
            Arc::clone(&collaborators.message_source),
            Arc::clone(&collaborators.processor_factory),
            Arc::clone(&collaborators.builder_factory),
            Arc::clone(&collaborators.publisher),
            Arc::clone(&closer),
        );

        let inner = Arc::new(SequencerInner {
            publisher: collaborators.publisher,
            validator_client: collaborators.validator_client,
            tx_pool: collaborators.tx_pool,
            gate,
            assembler,
            closer,
            machine: StateMachine::new(),
            config: RwLock::new(config),
            constants,
            is_flushing: AtomicBool::new(false),
        });

        // Wire the validator client back into this component so that a
        // validator re-executing a foreign proposal lands in the same
        // assembly path as our own proposals.
        inner
            .validator_client
            .register_block_builder(Arc::clone(&inner) as Arc<dyn ProposalBlockBuilder>);

        Ok(Self { inner, runner: Mutex::new(None) })
    }

    /// Arms the main loop. Idempotent with [`Self::restart`]: an already
    /// running loop is torn down and re-armed exactly once.
    pub fn start(&self) {
        let mut runner = self.runner.lock().expect("runner lock poisoned");
        if let Some(previous) = runner.take() {
            previous.abort();
        }

        self.inner.publisher.restart();
        self.inner.machine.force(SequencerState::Idle);

        let inner = Arc::clone(&self.inner);
        *runner = Some(tokio::spawn(async move { inner.run_loop().await }));

        info!("🪶 Sequencer started");
    }

    /// Re-arms the main loop. Equivalent to [`Self::start`].
    pub fn restart(&self) {
        self.start();
    }

    /// Halts the main loop, drains the pending fork closures, interrupts the
    /// publisher, stops the validator client, and parks in `Stopped`.
    pub async fn stop(&self) {
        let previous = self.runner.lock().expect("runner lock poisoned").take();
        if let Some(previous) = previous {
            previous.abort();
        }

        self.inner.closer.drain().await;
        self.inner.publisher.interrupt();
        self.inner.validator_client.stop().await;
        self.inner.machine.force(SequencerState::Stopped);

        info!("👋 Sequencer stopped");
    }

    /// Arms the one-shot flush flag: the next iteration bypasses the
    /// minimum-transaction gate. The flag clears itself once a block is
    /// successfully enqueued.
    pub fn flush(&self) {
        self.inner.is_flushing.store(true, Ordering::SeqCst);
        info!("Flush requested; next iteration will build a block regardless of pool size");
    }

    /// A snapshot of the sequencer state for operator introspection.
    pub fn status(&self) -> SequencerStatus {
        let runtime = self.inner.runtime_config();
        SequencerStatus {
            state: self.inner.machine.current(),
            is_flushing: self.inner.is_flushing.load(Ordering::SeqCst),
            current_slot: runtime.slot_at(current_timestamp_seconds()),
        }
    }

    /// Applies a partial configuration update atomically. The timetable is
    /// derived from the configuration, so re-assignment rebuilds it for the
    /// next iteration; a governance payload update is forwarded to the
    /// publisher immediately.
    pub fn update_config(&self, update: SequencerConfigUpdate) {
        if let Some(payload) = &update.governance_proposer_payload {
            self.inner.publisher.set_governance_payload(payload.clone());
        }

        let changed =
            self.inner.config.write().expect("config lock poisoned").apply(update);
        if changed {
            info!("Sequencer configuration updated");
        }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<SequencerInner> {
        &self.inner
    }
}

/// The loop-internal state shared with the runner task.
#[derive(Debug)]
pub(crate) struct SequencerInner {
    publisher: Arc<dyn SequencerPublisher>,
    validator_client: Arc<dyn ValidatorClient>,
    tx_pool: Arc<dyn TxPool>,
    gate: SyncGate,
    assembler: BlockAssembler,
    closer: Arc<DeferredForkCloser>,
    machine: StateMachine,
    config: RwLock<SequencerConfig>,
    constants: RollupConstants,
    is_flushing: AtomicBool,
}

impl SequencerInner {
    /// The main loop: runs one work iteration per polling interval. The
    /// previous iteration always returns (normally or by raising) before the
    /// next tick fires, so slots never overlap.
    async fn run_loop(self: Arc<Self>) {
        loop {
            let interval = self.runtime_config().polling_interval_ms.max(1);
            sleep(Duration::from_millis(interval)).await;

            if self.machine.current().is_stopped() {
                break;
            }

            Arc::clone(&self).work_iteration().await;
        }
    }

    /// Runs one iteration and applies the loop-level error policy. On every
    /// exit path, panics included, the state is forced back to idle.
    pub(crate) async fn work_iteration(self: Arc<Self>) {
        let started = std::time::Instant::now();

        let this = Arc::clone(&self);
        match tokio::spawn(async move { this.do_real_work().await }).await {
            Ok(Ok(outcome)) => trace!(?outcome, "Iteration done"),
            Ok(Err(e)) => self.on_iteration_error(e),
            Err(join_error) => {
                error!(?join_error, "Iteration panicked; recovering to idle");
            }
        }

        SequencerMetrics::record_iteration_time(started.elapsed());

        if !self.machine.current().is_stopped() {
            self.machine.force(SequencerState::Idle);
        }
    }

    /// The loop-level error policy. None of these halt the loop.
    fn on_iteration_error(&self, e: SequencerError) {
        SequencerMetrics::increment_iteration_errors(e.kind());

        match &e {
            SequencerError::TooSlow { state, .. } => {
                // Expected operational condition under load; the slot is
                // abandoned and the next one picked up cleanly.
                SequencerMetrics::increment_too_slow(*state);
                warn!(%e, "Slot abandoned: too slow");
            }
            SequencerError::BlockInvalid(_) => {
                SequencerMetrics::increment_failed_block(e.to_string());
                warn!(%e, "Slot abandoned: block not built");
            }
            SequencerError::Inconsistent(_) => {
                error!(%e, "Inconsistency detected during iteration");
            }
            SequencerError::Collaborator(_) => {
                error!(%e, "Collaborator error during iteration");
            }
        }
    }

    /// One pass of the slot state machine: sync gate, eligibility, votes,
    /// assembly, attestations, publication.
    pub(crate) async fn do_real_work(self: Arc<Self>) -> Result<SlotOutcome, SequencerError> {
        let runtime = self.runtime_config();
        let timetable = runtime.timetable();

        // The slot is not known yet, so the first two phases run without a
        // time constraint (slot 0).
        self.set_state(SequencerState::Synchronizing, 0, &runtime, &timetable)?;
        let Some(tip) = self.gate.get_chain_tip().await? else {
            debug!("Upstream sources not in consensus; nothing to do");
            return Ok(SlotOutcome::NotReady);
        };
        let new_block_number = tip.block_number + 1;

        self.set_state(SequencerState::ProposerCheck, 0, &runtime, &timetable)?;
        let Some((slot, _)) =
            self.gate.slot_for_proposal(tip.archive_root, new_block_number).await?
        else {
            return Ok(SlotOutcome::NotOurTurn);
        };

        SequencerMetrics::set_current_slot(slot);
        info!(slot, block = new_block_number, "📋 Eligible to propose");

        // Votes ride along with whatever this slot produces: they are
        // enqueued up front and flushed by the single send_requests call,
        // with or without a block.
        self.enqueue_votes(slot, runtime.slot_start(slot)).await;

        let pending = self.tx_pool.get_pending_tx_count().await?;
        SequencerMetrics::set_pending_tx_count(pending);

        let flushing = self.is_flushing.load(Ordering::SeqCst);
        if pending < runtime.min_txs_per_block && !flushing {
            debug!(
                pending,
                min = runtime.min_txs_per_block,
                "Not enough pending txs to build a block"
            );
            self.publisher.send_requests().await?;
            return Ok(SlotOutcome::TooFewTxs);
        }

        self.set_state(SequencerState::InitializingProposal, slot, &runtime, &timetable)?;
        let globals = self.build_global_variables(new_block_number, slot, &runtime);
        let proposed_header = ProposedBlockHeader::from_globals(globals, tip.archive_root);

        self.publisher.validate_block_for_submission(&proposed_header).await.map_err(|e| {
            SequencerError::BlockInvalid(format!("pre-flight validation failed: {e}"))
        })?;

        self.set_state(SequencerState::CreatingBlock, slot, &runtime, &timetable)?;
        let seconds = runtime.seconds_into_slot(slot);
        let exec_deadline = timetable
            .enforced()
            .then(|| self.instant_into_slot(slot, timetable.block_proposal_exec_end(seconds), &runtime));
        let sync_deadline =
            self.instant_into_slot(slot, timetable.validator_reexec_end(seconds), &runtime);

        let assembled = self
            .assembler
            .assemble(AssemblyRequest {
                globals,
                mode: AssemblyMode::Proposer { flushing, min_txs: runtime.min_txs_per_block },
                txs: None,
                limits: ProcessorLimits {
                    deadline: exec_deadline,
                    max_transactions: Some(runtime.max_txs_per_block),
                    max_block_size: Some(runtime.max_block_size_bytes),
                    max_da_gas: Some(runtime.max_da_block_gas),
                    max_l2_gas: Some(runtime.max_l2_block_gas),
                },
                allow_list: runtime.tx_public_setup_allow_list.clone(),
                sync_deadline,
            })
            .await?;

        self.set_state(SequencerState::CollectingAttestations, slot, &runtime, &timetable)?;
        let attestations =
            self.collect_attestations(&assembled, slot, &runtime, &timetable).await?;

        self.set_state(SequencerState::PublishingBlock, slot, &runtime, &timetable)?;
        let tx_hashes = assembled.block.tx_hashes.clone();
        let enqueued = self
            .publisher
            .enqueue_propose_l2_block(
                assembled.block,
                attestations,
                tx_hashes,
                // The propose tx must be mined within its own slot or be abandoned.
                EnqueueProposeOpts { tx_timeout_at: runtime.slot_end(slot) },
            )
            .await?;

        if !enqueued {
            return Err(SequencerError::BlockInvalid(
                "publisher refused to enqueue the block proposal".into(),
            ));
        }

        if flushing {
            // One-shot: the flag only clears after a successful enqueue.
            self.is_flushing.store(false, Ordering::SeqCst);
        }

        let outcome = self.publisher.send_requests().await?;
        if outcome.proposed() {
            SequencerMetrics::increment_filled_slot();
            info!(slot, block = new_block_number, "✅ Filled slot with our block proposal");
        } else {
            debug!(actions = ?outcome.valid_actions, "Flush did not confirm the propose action");
        }

        Ok(SlotOutcome::Proposed)
    }

    /// Enqueues the governance and slashing votes for the slot concurrently.
    /// Vote failures are logged and swallowed; they never fail a block.
    async fn enqueue_votes(&self, slot: Slot, timestamp: Timestamp) {
        let (governance, slashing) = tokio::join!(
            self.publisher.enqueue_cast_vote(slot, timestamp, VoteKind::Governance),
            self.publisher.enqueue_cast_vote(slot, timestamp, VoteKind::Slashing),
        );

        for (kind, res) in [(VoteKind::Governance, governance), (VoteKind::Slashing, slashing)] {
            match res {
                Ok(true) => trace!(?kind, slot, "Vote enqueued"),
                Ok(false) => debug!(?kind, slot, "Vote not enqueued"),
                Err(e) => warn!(?kind, slot, %e, "Failed to enqueue vote"),
            }
        }
    }

    /// Collects a supermajority of committee attestations over the assembled
    /// block, returning them in committee order as the L1 contract requires.
    ///
    /// An empty committee publishes without attestations (solo-proposer
    /// mode, valid for testnets).
    async fn collect_attestations(
        &self,
        assembled: &AssembledBlock,
        slot: Slot,
        runtime: &RuntimeConfig,
        timetable: &Timetable,
    ) -> Result<Vec<CommitteeAttestation>, SequencerError> {
        let committee = self.publisher.get_current_epoch_committee().await?;
        SequencerMetrics::set_committee_size(committee.len());

        if committee.is_empty() {
            warn!("Epoch committee is empty; publishing without attestations");
            return Ok(vec![]);
        }

        let required = required_attestations(committee.len());
        let started = std::time::Instant::now();

        let txs = if runtime.publish_txs_with_proposals {
            assembled.processed.iter().map(|p| p.tx.clone()).collect()
        } else {
            vec![]
        };

        let proposal = self
            .validator_client
            .create_block_proposal(
                assembled.block.number(),
                assembled.block.header.to_propose(),
                assembled.block.archive_root,
                txs,
                BlockProposalOptions { publish_txs: runtime.publish_txs_with_proposals },
            )
            .await?
            .ok_or_else(|| {
                SequencerError::BlockInvalid(
                    "validator client could not create a block proposal".into(),
                )
            })?;

        self.validator_client.broadcast_block_proposal(proposal.clone()).await?;

        // When enforcement is off the slot duration acts as a soft cap so
        // collection still terminates.
        let deadline_secs = if timetable.enforced() {
            timetable
                .max_allowed_time(SequencerState::PublishingBlock)
                .unwrap_or_else(|| timetable.slot_duration())
        } else {
            timetable.slot_duration()
        };
        let deadline = self.instant_into_slot(slot, deadline_secs, runtime);

        let collected =
            self.validator_client.collect_attestations(&proposal, required, deadline).await?;
        SequencerMetrics::record_attestation_collection_time(started.elapsed());

        let ordered = order_by_committee(collected, &committee);
        if ordered.len() < required {
            return Err(SequencerError::BlockInvalid(format!(
                "collected {}/{required} attestations before the deadline",
                ordered.len()
            )));
        }

        info!(
            collected = ordered.len(),
            required,
            committee = committee.len(),
            "🖋️ Collected attestations"
        );

        Ok(ordered)
    }

    /// Builds the immutable global variables for the slot.
    fn build_global_variables(
        &self,
        block_number: u64,
        slot: Slot,
        runtime: &RuntimeConfig,
    ) -> GlobalVariables {
        GlobalVariables {
            chain_id: self.constants.chain_id,
            version: self.constants.version,
            block_number,
            slot_number: slot,
            timestamp: runtime.slot_start(slot),
            coinbase: runtime.coinbase.unwrap_or_else(|| self.publisher.get_sender_address()),
            fee_recipient: runtime.fee_recipient.unwrap_or_default(),
        }
    }

    /// Transitions the state machine, consulting the timetable with the
    /// current offset into the slot. Slot zero means "no constraint".
    fn set_state(
        &self,
        next: SequencerState,
        slot: Slot,
        runtime: &RuntimeConfig,
        timetable: &Timetable,
    ) -> Result<(), SequencerError> {
        let constraint = StateMachine::constraint_for(slot, runtime.seconds_into_slot(slot));
        self.machine.set_state(next, constraint, false, timetable)?;
        Ok(())
    }

    /// The wall-clock instant at which the given offset into the slot is
    /// reached. Saturates to "now" for offsets already in the past.
    fn instant_into_slot(
        &self,
        slot: Slot,
        seconds_into_slot: u64,
        runtime: &RuntimeConfig,
    ) -> Instant {
        let now = runtime.seconds_into_slot(slot);
        Instant::now() + Duration::from_secs(seconds_into_slot.saturating_sub(now))
    }

    /// Takes the per-iteration snapshot of config and constants.
    pub(crate) fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            cfg: self.config.read().expect("config lock poisoned").clone(),
            constants: self.constants,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SequencerState {
        self.machine.current()
    }

    #[cfg(test)]
    pub(crate) fn flushing(&self) -> bool {
        self.is_flushing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProposalBlockBuilder for SequencerInner {
    /// Re-executes a foreign proposal through the same assembly path as our
    /// own blocks, in validator mode: no pool eviction, no tx-count gate,
    /// and the stricter re-execution deadline.
    async fn build_block_from_proposal(
        &self,
        proposal: BlockProposal,
    ) -> quill_interfaces::Result<L2Block> {
        let runtime = self.runtime_config();
        let timetable = runtime.timetable();
        let slot = proposal.header.slot_number();
        let seconds = runtime.seconds_into_slot(slot);

        let Some(txs) = proposal.txs else {
            return Err(CollaboratorError::Builder(
                "proposal carries no transaction bodies to re-execute".into(),
            ));
        };

        info!(
            block = proposal.block_number,
            slot,
            txs = txs.len(),
            "Re-executing foreign block proposal"
        );

        let reexec_end = timetable.validator_reexec_end(seconds);
        let exec_deadline =
            timetable.enforced().then(|| self.instant_into_slot(slot, reexec_end, &runtime));
        let sync_point = if timetable.enforced() { reexec_end } else { timetable.slot_duration() };
        let sync_deadline = self.instant_into_slot(slot, sync_point, &runtime);

        let request = AssemblyRequest {
            globals: proposal.header.global_variables,
            mode: AssemblyMode::Validator,
            txs: Some(txs),
            limits: ProcessorLimits { deadline: exec_deadline, ..Default::default() },
            allow_list: runtime.tx_public_setup_allow_list.clone(),
            sync_deadline,
        };

        match self.assembler.assemble(request).await {
            Ok(assembled) => Ok(assembled.block),
            Err(e) => Err(CollaboratorError::Builder(e.to_string())),
        }
    }
}

/// Reorders attestations to match the committee index order required by the
/// L1 rollup contract. Attestations from unknown attesters are dropped, and
/// duplicates keep their first occurrence.
fn order_by_committee(
    attestations: Vec<CommitteeAttestation>,
    committee: &[Address],
) -> Vec<CommitteeAttestation> {
    let index: HashMap<Address, usize> =
        committee.iter().enumerate().map(|(i, member)| (*member, i)).collect();

    let mut indexed = Vec::with_capacity(attestations.len());
    for attestation in attestations {
        match index.get(&attestation.attester) {
            Some(position) => indexed.push((*position, attestation)),
            None => {
                warn!(attester = %attestation.attester, "Ignoring attestation from non-committee member");
            }
        }
    }

    indexed.sort_by_key(|(position, _)| *position);
    indexed.dedup_by_key(|(position, _)| *position);
    indexed.into_iter().map(|(_, attestation)| attestation).collect()
}

use std::{sync::Arc, time::Duration};

use futures::{StreamExt, stream};
use quill_interfaces::{
    BlockBuilderFactory, L1ToL2MessageSource, PublicProcessorFactory, SequencerPublisher, TxPool,
    WorldStateSynchronizer,
    processor::ProcessorLimits,
};
use quill_primitives::{
    block::{GlobalVariables, ProcessedTx, L2Block, Tx, TxHash},
    summary::Summary,
};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::{
    error::SequencerError,
    forks::{DeferredForkCloser, ForkGuard},
    metrics::SequencerMetrics,
};

/// How often the re-sync guard polls the world-state synchronizer.
const WORLD_STATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Whether a block is being assembled by the proposer of the slot or by a
/// validator re-executing someone else's proposal.
///
/// A validator must not evict transactions from the pool on its own judgement
/// and runs without the proposer's tx-count, size and gas caps.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AssemblyMode {
    /// We are the proposer for this slot.
    Proposer {
        /// Whether the one-shot flush flag bypasses the minimum-tx gate.
        flushing: bool,
        /// The minimum number of processed transactions for a proposable block.
        min_txs: usize,
    },
    /// We are re-executing a foreign proposal before attesting to it.
    Validator,
}

impl AssemblyMode {
    pub(crate) const fn is_proposer(&self) -> bool {
        matches!(self, Self::Proposer { .. })
    }
}

/// A request to assemble one block on forked world state.
#[derive(Debug)]
pub(crate) struct AssemblyRequest {
    /// The global variables of the block being built.
    pub globals: GlobalVariables,
    /// Proposer or validator mode.
    pub mode: AssemblyMode,
    /// The transactions to process. `None` means "drain the pending pool".
    pub txs: Option<Vec<Tx>>,
    /// The processor limits, deadline included, for this run.
    pub limits: ProcessorLimits,
    /// The public-setup allow list for the per-slot tx validator.
    pub allow_list: Vec<String>,
    /// The hard deadline for the world-state re-sync guard.
    pub sync_deadline: Instant,
}

/// The result of a successful assembly.
#[derive(Debug)]
pub(crate) struct AssembledBlock {
    /// The finalized block.
    pub block: L2Block,
    /// The transactions that made it into the block, in order.
    pub processed: Vec<ProcessedTx>,
}

/// Drives one block through forked execution: forks world state, runs the
/// public processor under its deadline, feeds the block builder, and
/// re-validates the result against L1.
///
/// Both forks are released through the [`DeferredForkCloser`] on every exit
/// path, success and error alike.
#[derive(Debug)]
pub(crate) struct BlockAssembler {
    world_state: Arc<dyn WorldStateSynchronizer>,
    tx_pool: Arc<dyn TxPool>,
    message_source: Arc<dyn L1ToL2MessageSource>,
    processor_factory: Arc<dyn PublicProcessorFactory>,
    builder_factory: Arc<dyn BlockBuilderFactory>,
    publisher: Arc<dyn SequencerPublisher>,
    closer: Arc<DeferredForkCloser>,
}

impl BlockAssembler {
    /// Creates a new assembler over the given collaborators.
    pub(crate) fn new(
        world_state: Arc<dyn WorldStateSynchronizer>,
        tx_pool: Arc<dyn TxPool>,
        message_source: Arc<dyn L1ToL2MessageSource>,
        processor_factory: Arc<dyn PublicProcessorFactory>,
        builder_factory: Arc<dyn BlockBuilderFactory>,
        publisher: Arc<dyn SequencerPublisher>,
        closer: Arc<DeferredForkCloser>,
    ) -> Self {
        Self {
            world_state,
            tx_pool,
            message_source,
            processor_factory,
            builder_factory,
            publisher,
            closer,
        }
    }

    /// Assembles one block per the request. Raises on any error so that the
    /// caller can rely on exception flow: no publication ever happens on a
    /// partially built block.
    pub(crate) async fn assemble(
        &self,
        req: AssemblyRequest,
    ) -> Result<AssembledBlock, SequencerError> {
        let block_number = req.globals.block_number;
        let parent_block = block_number.saturating_sub(1);
        let started_at = std::time::Instant::now();

        // Two independent forks over the same parent: one mutated by public
        // execution, one by the block builder's tree insertions. They are
        // reconciled by the consistency of their final roots, and released
        // by the guards on every exit path below.
        let processor_fork =
            ForkGuard::new(self.world_state.fork(parent_block).await?, Arc::clone(&self.closer));
        let orchestrator_fork =
            ForkGuard::new(self.world_state.fork(parent_block).await?, Arc::clone(&self.closer));

        self.wait_for_world_state(parent_block, req.sync_deadline).await?;

        // Public processing under the slot deadline.
        let validator = self.processor_factory.create_validator(
            processor_fork.fork(),
            req.globals,
            req.allow_list,
        );
        let mut processor = self.processor_factory.create_processor(
            processor_fork.fork(),
            req.globals,
            req.mode.is_proposer(),
        );

        let tx_stream = match req.txs {
            Some(txs) => stream::iter(txs).boxed(),
            None => self.tx_pool.iterate_pending_txs().await?,
        };

        let output = processor.process(tx_stream, req.limits, validator).await?;

        debug!(
            processed = output.processed.len(),
            failed = output.failed.len(),
            mana = output.used.mana_used,
            "Public processing done"
        );

        if req.mode.is_proposer() && !output.failed.is_empty() {
            let hashes: Vec<TxHash> = output.failed.iter().map(|f| f.hash).collect();
            for failed in &output.failed {
                debug!(hash = %failed.hash, reason = %failed.reason, "Dropping failed tx");
            }
            SequencerMetrics::increment_evicted_txs(hashes.len());
            self.tx_pool.delete_txs(hashes).await?;
        }

        if let AssemblyMode::Proposer { flushing, min_txs } = req.mode
            && output.processed.len() < min_txs
            && !flushing
        {
            return Err(SequencerError::BlockInvalid(format!(
                "processed only {} txs, block needs at least {min_txs}",
                output.processed.len()
            )));
        }

        // Feed the processed transactions to the block builder and pad the
        // block out to its fixed tree shape.
        let messages = self.message_source.get_l1_to_l2_messages(block_number).await?;
        let previous_header = orchestrator_fork.fork().get_initial_header().await?;

        let mut builder = self.builder_factory.create_builder(orchestrator_fork.fork());
        builder.start_new_block(req.globals, messages, previous_header).await?;
        builder.add_txs(output.processed.clone()).await?;
        let block = builder.set_block_completed().await?;

        // The L1 state may have advanced while we processed: re-validate
        // before anything downstream can publish. Fork changes are safe to
        // discard since forks are never merged into the committed state.
        if req.mode.is_proposer() {
            self.publisher
                .validate_block_for_submission(&block.header.to_propose())
                .await
                .map_err(|e| {
                    SequencerError::BlockInvalid(format!("post-assembly validation failed: {e}"))
                })?;
        }

        SequencerMetrics::set_block_tx_count(output.processed.len());
        SequencerMetrics::set_block_mana_used(block.header.total_mana_used);
        SequencerMetrics::record_block_build_time(started_at.elapsed());

        info!(elapsed = ?started_at.elapsed(), "🧱 Assembled block: {}", block.summary());

        Ok(AssembledBlock { block, processed: output.processed })
    }

    /// Waits until the world-state synchronizer has caught up to the given
    /// block, polling every [`WORLD_STATE_POLL_INTERVAL`].
    ///
    /// This matters when re-executing a foreign proposal: the proposer's own
    /// sync gate already guarantees it when proposing.
    async fn wait_for_world_state(
        &self,
        block_number: u64,
        deadline: Instant,
    ) -> Result<(), SequencerError> {
        loop {
            let status = self.world_state.status().await?;
            if status.sync_summary.latest_block_number >= block_number {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SequencerError::BlockInvalid(format!(
                    "world state not synced to block {block_number} before the re-exec deadline"
                )));
            }

            warn!(
                target = block_number,
                at = status.sync_summary.latest_block_number,
                "Waiting for world state to catch up"
            );
            sleep(WORLD_STATE_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

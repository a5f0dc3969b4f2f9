use std::sync::Arc;

use alloy_primitives::B256;
use quill_interfaces::{
    L1ToL2MessageSource, L2BlockSource, SequencerPublisher, TxPool, WorldStateSynchronizer,
};
use quill_primitives::{Slot, block::ChainTip};
use tracing::{debug, trace};

use crate::error::SequencerError;

/// The eligibility and sync gate: decides whether this node is ready to
/// sequence (all upstream sources agree on the chain tip) and whether it is
/// its turn to do so (the L1 rollup contract says so).
#[derive(Debug)]
pub(crate) struct SyncGate {
    world_state: Arc<dyn WorldStateSynchronizer>,
    block_source: Arc<dyn L2BlockSource>,
    tx_pool: Arc<dyn TxPool>,
    message_source: Arc<dyn L1ToL2MessageSource>,
    publisher: Arc<dyn SequencerPublisher>,
    initial_block_number: u64,
}

impl SyncGate {
    /// Creates a new gate over the given sources.
    pub(crate) fn new(
        world_state: Arc<dyn WorldStateSynchronizer>,
        block_source: Arc<dyn L2BlockSource>,
        tx_pool: Arc<dyn TxPool>,
        message_source: Arc<dyn L1ToL2MessageSource>,
        publisher: Arc<dyn SequencerPublisher>,
        initial_block_number: u64,
    ) -> Self {
        Self { world_state, block_source, tx_pool, message_source, publisher, initial_block_number }
    }

    /// Queries all four upstream sources for their view of the chain tip and
    /// returns it if they agree.
    ///
    /// The consensus rule is hash equality across world state, canonical
    /// block source, peer network, and message source. At genesis the
    /// canonical source has no hash yet; in that case all four block numbers
    /// must be zero. Returns `None` (not ready) on any mismatch.
    pub(crate) async fn get_chain_tip(&self) -> Result<Option<ChainTip>, SequencerError> {
        let (world_state, source, p2p, messages) = tokio::join!(
            self.world_state.status(),
            self.block_source.get_l2_tips(),
            self.tx_pool.get_status(),
            self.message_source.get_l2_tips(),
        );

        let world_state = world_state?.sync_summary;
        let source_tip = source?.latest;
        let p2p_tip = p2p?.synced_to_l2_block;
        let message_tip = messages?.latest;

        let views = [
            ("world-state", world_state.latest_block_number, world_state.latest_block_hash),
            ("p2p", p2p_tip.number, p2p_tip.hash),
            ("l1-to-l2", message_tip.number, message_tip.hash),
        ];

        let in_consensus = match source_tip.hash {
            Some(expected) => views
                .iter()
                .all(|(_, number, hash)| *number == source_tip.number && *hash == Some(expected)),
            // Genesis: the canonical source has no block yet.
            None => source_tip.number == 0 && views.iter().all(|(_, number, _)| *number == 0),
        };

        if !in_consensus {
            debug!(
                source = ?(source_tip.number, source_tip.hash),
                ?views,
                "Chain tip not in consensus across sources; not ready to sequence"
            );
            return Ok(None);
        }

        if source_tip.number >= self.initial_block_number {
            let Some(block) = self.block_source.get_block(source_tip.number).await? else {
                debug!(number = source_tip.number, "Tip block not available yet; not ready");
                return Ok(None);
            };

            trace!(number = source_tip.number, archive = %block.archive_root, "Chain tip agreed");
            return Ok(Some(ChainTip {
                block_number: source_tip.number,
                archive_root: block.archive_root,
            }));
        }

        // Pre-genesis: build on the committed world state's archive root.
        let archive_root = self.world_state.get_committed_archive_root().await?;
        trace!(number = source_tip.number, archive = %archive_root, "Chain tip at genesis");
        Ok(Some(ChainTip { block_number: source_tip.number, archive_root }))
    }

    /// Asks the publisher whether we may propose at the next L1 block on top
    /// of the given archive root.
    ///
    /// Returns `None` when it is not our turn. A publisher that answers with
    /// a block number other than the one we expect to build is a hard
    /// inconsistency and raises.
    pub(crate) async fn slot_for_proposal(
        &self,
        tip_archive: B256,
        expected_block_number: u64,
    ) -> Result<Option<(Slot, u64)>, SequencerError> {
        let Some((slot, block_number)) =
            self.publisher.can_propose_at_next_eth_block(tip_archive).await?
        else {
            trace!("Not our turn to propose");
            return Ok(None);
        };

        if block_number != expected_block_number {
            return Err(SequencerError::Inconsistent(format!(
                "publisher expects block {block_number} but the sequencer would build {expected_block_number}"
            )));
        }

        Ok(Some((slot, block_number)))
    }
}

#[cfg(test)]
mod tests {
    use quill_interfaces::{
        block_source::{MockL1ToL2MessageSource, MockL2BlockSource},
        publisher::MockSequencerPublisher,
        tx_pool::{MockTxPool, TxPoolStatus},
        world_state::{MockWorldStateSynchronizer, WorldStateStatus, WorldStateSyncSummary},
    };
    use quill_primitives::block::{
        BlockHeader, BlockId, GlobalVariables, L2Block, L2Tips,
    };

    use super::*;

    fn block_at(number: u64, archive_root: B256) -> L2Block {
        let globals = GlobalVariables {
            chain_id: 1,
            version: 1,
            block_number: number,
            slot_number: number,
            timestamp: 0,
            coinbase: Default::default(),
            fee_recipient: Default::default(),
        };
        L2Block {
            header: BlockHeader {
                global_variables: globals,
                last_archive_root: B256::ZERO,
                content_commitment: B256::ZERO,
                total_mana_used: 0,
            },
            archive_root,
            tx_hashes: vec![],
        }
    }

    struct Mocks {
        world_state: MockWorldStateSynchronizer,
        block_source: MockL2BlockSource,
        tx_pool: MockTxPool,
        message_source: MockL1ToL2MessageSource,
        publisher: MockSequencerPublisher,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                world_state: MockWorldStateSynchronizer::new(),
                block_source: MockL2BlockSource::new(),
                tx_pool: MockTxPool::new(),
                message_source: MockL1ToL2MessageSource::new(),
                publisher: MockSequencerPublisher::new(),
            }
        }

        fn agree_at(&mut self, number: u64, hash: B256) {
            self.world_state.expect_status().returning(move || {
                Ok(WorldStateStatus {
                    sync_summary: WorldStateSyncSummary {
                        latest_block_number: number,
                        latest_block_hash: Some(hash),
                    },
                })
            });
            self.block_source.expect_get_l2_tips().returning(move || {
                Ok(L2Tips { latest: BlockId { number, hash: Some(hash) } })
            });
            self.tx_pool.expect_get_status().returning(move || {
                Ok(TxPoolStatus { synced_to_l2_block: BlockId { number, hash: Some(hash) } })
            });
            self.message_source.expect_get_l2_tips().returning(move || {
                Ok(L2Tips { latest: BlockId { number, hash: Some(hash) } })
            });
        }

        fn into_gate(self, initial_block_number: u64) -> SyncGate {
            SyncGate::new(
                Arc::new(self.world_state),
                Arc::new(self.block_source),
                Arc::new(self.tx_pool),
                Arc::new(self.message_source),
                Arc::new(self.publisher),
                initial_block_number,
            )
        }
    }

    #[tokio::test]
    async fn agreeing_sources_yield_the_tip() {
        let mut mocks = Mocks::new();
        let hash = B256::repeat_byte(0x11);
        let archive = B256::repeat_byte(0xab);

        mocks.agree_at(100, hash);
        mocks
            .block_source
            .expect_get_block()
            .withf(|n| *n == 100)
            .return_once(move |_| Ok(Some(block_at(100, archive))));

        let tip = mocks.into_gate(1).get_chain_tip().await.unwrap();
        assert_eq!(tip, Some(ChainTip { block_number: 100, archive_root: archive }));
    }

    #[tokio::test]
    async fn disagreeing_hash_is_not_ready() {
        let mut mocks = Mocks::new();
        let hash = B256::repeat_byte(0x11);

        mocks.agree_at(100, hash);
        // Override the p2p view with a different hash.
        mocks.tx_pool.checkpoint();
        mocks.tx_pool.expect_get_status().returning(move || {
            Ok(TxPoolStatus {
                synced_to_l2_block: BlockId { number: 100, hash: Some(B256::repeat_byte(0x22)) },
            })
        });

        let tip = mocks.into_gate(1).get_chain_tip().await.unwrap();
        assert_eq!(tip, None);
    }

    #[tokio::test]
    async fn genesis_consensus_uses_committed_archive_root() {
        let mut mocks = Mocks::new();
        let genesis_archive = B256::repeat_byte(0x99);

        mocks.world_state.expect_status().returning(|| {
            Ok(WorldStateStatus {
                sync_summary: WorldStateSyncSummary {
                    latest_block_number: 0,
                    latest_block_hash: None,
                },
            })
        });
        mocks
            .block_source
            .expect_get_l2_tips()
            .returning(|| Ok(L2Tips { latest: BlockId { number: 0, hash: None } }));
        mocks.tx_pool.expect_get_status().returning(|| {
            Ok(TxPoolStatus { synced_to_l2_block: BlockId { number: 0, hash: None } })
        });
        mocks
            .message_source
            .expect_get_l2_tips()
            .returning(|| Ok(L2Tips { latest: BlockId { number: 0, hash: None } }));
        mocks
            .world_state
            .expect_get_committed_archive_root()
            .return_once(move || Ok(genesis_archive));

        let tip = mocks.into_gate(1).get_chain_tip().await.unwrap();
        assert_eq!(tip, Some(ChainTip { block_number: 0, archive_root: genesis_archive }));
    }

    #[tokio::test]
    async fn genesis_with_nonzero_number_is_not_ready() {
        let mut mocks = Mocks::new();

        mocks.world_state.expect_status().returning(|| {
            Ok(WorldStateStatus {
                sync_summary: WorldStateSyncSummary {
                    latest_block_number: 3,
                    latest_block_hash: Some(B256::repeat_byte(0x01)),
                },
            })
        });
        mocks
            .block_source
            .expect_get_l2_tips()
            .returning(|| Ok(L2Tips { latest: BlockId { number: 0, hash: None } }));
        mocks.tx_pool.expect_get_status().returning(|| {
            Ok(TxPoolStatus { synced_to_l2_block: BlockId { number: 0, hash: None } })
        });
        mocks
            .message_source
            .expect_get_l2_tips()
            .returning(|| Ok(L2Tips { latest: BlockId { number: 0, hash: None } }));

        let tip = mocks.into_gate(1).get_chain_tip().await.unwrap();
        assert_eq!(tip, None);
    }

    #[tokio::test]
    async fn proposal_block_number_mismatch_is_inconsistent() {
        let mut mocks = Mocks::new();
        mocks
            .publisher
            .expect_can_propose_at_next_eth_block()
            .return_once(|_| Ok(Some((512, 105))));

        let gate = mocks.into_gate(1);
        let err = gate.slot_for_proposal(B256::ZERO, 101).await.unwrap_err();
        assert!(matches!(err, SequencerError::Inconsistent(_)));
    }

    #[tokio::test]
    async fn not_our_turn_yields_none() {
        let mut mocks = Mocks::new();
        mocks.publisher.expect_can_propose_at_next_eth_block().return_once(|_| Ok(None));

        let gate = mocks.into_gate(1);
        let res = gate.slot_for_proposal(B256::ZERO, 101).await.unwrap();
        assert_eq!(res, None);
    }
}

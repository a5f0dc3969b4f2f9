//! End-to-end iteration tests over mocked collaborators.

mod support;

use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes};
use quill_interfaces::{CollaboratorError, publisher::SendRequestsOutcome};
use rstest::rstest;

use crate::{
    config::SequencerConfigUpdate,
    error::SequencerError,
    sequencer::SlotOutcome,
    state::SequencerState,
};

use support::{Harness, attestation_from, block_with_txs, constants_at, txs};

/// Happy path: tips agree at block 100, we are the proposer for slot
/// 512, ten pending txs all process, a committee of 7 returns 5 attestations,
/// and the block is enqueued once with ordered attestations and ten hashes.
#[tokio::test]
async fn happy_path_proposes_a_block() {
    let slot = 512u64;
    let archive = B256::repeat_byte(0xab);
    let pending = txs(10);
    let committee: Vec<Address> = (1u8..=7).map(Address::repeat_byte).collect();

    let mut h = Harness::new(constants_at(slot, 2));
    h.sources_agree_at(100, archive);
    h.forks_available();
    h.processor_succeeds_with(pending.clone());
    h.builder_completes(101, slot, pending.clone());

    h.publisher
        .expect_can_propose_at_next_eth_block()
        .withf(move |tip| *tip == archive)
        .return_once(move |_| Ok(Some((slot, 101))));
    h.publisher.expect_enqueue_cast_vote().times(2).returning(|_, _, _| Ok(true));
    h.tx_pool.expect_get_pending_tx_count().return_once(|| Ok(10));
    h.tx_pool
        .expect_iterate_pending_txs()
        .return_once(move || Ok(Box::pin(futures::stream::iter(txs(10)))));
    h.publisher.expect_validate_block_for_submission().times(2).returning(|_| Ok(()));

    let committee_for_collect = committee.clone();
    h.publisher
        .expect_get_current_epoch_committee()
        .return_once(move || Ok(committee_for_collect));

    h.validator_client.expect_create_block_proposal().return_once(
        |number, header, archive_root, _, _| {
            Ok(Some(quill_primitives::block::BlockProposal {
                block_number: number,
                header,
                archive_root,
                tx_hashes: vec![],
                txs: None,
            }))
        },
    );
    h.validator_client.expect_broadcast_block_proposal().times(1).returning(|_| Ok(()));

    // 5 attestations out of 7 members (⌊2·7/3⌋ + 1 = 5), out of order.
    let collected: Vec<_> =
        [5u8, 1, 4, 2, 3].iter().map(|b| attestation_from(Address::repeat_byte(*b))).collect();
    h.validator_client
        .expect_collect_attestations()
        .return_once(move |_, required, _| {
            assert_eq!(required, 5);
            Ok(collected)
        });

    let expected_hashes: Vec<B256> = pending.iter().map(|t| t.hash).collect();
    h.publisher
        .expect_enqueue_propose_l2_block()
        .withf(move |block, attestations, tx_hashes, _| {
            let ordered: Vec<Address> = attestations.iter().map(|a| a.attester).collect();
            block.number() == 101
                && ordered == (1u8..=5).map(Address::repeat_byte).collect::<Vec<_>>()
                && *tx_hashes == expected_hashes
        })
        .times(1)
        .return_once(|_, _, _, _| Ok(true));
    h.publisher.expect_send_requests().return_once(|| {
        Ok(SendRequestsOutcome { valid_actions: vec!["propose".into()] })
    });

    let sequencer = h.build().await;
    let inner = Arc::clone(sequencer.inner());

    let outcome = inner.clone().do_real_work().await.unwrap();
    assert_eq!(outcome, SlotOutcome::Proposed);

    // The loop wrapper returns the machine to idle.
    Arc::clone(&inner).work_iteration().await;
    assert_eq!(inner.state(), SequencerState::Idle);
}

/// The publisher says it is not our turn. No fork is opened,
/// no votes are enqueued, and no publisher call is made beyond the
/// eligibility check (the mocks panic on any unexpected call).
#[tokio::test]
async fn not_the_proposer_is_a_quiet_iteration() {
    let mut h = Harness::new(constants_at(512, 2));
    h.sources_agree_at(100, B256::repeat_byte(0xab));
    h.publisher.expect_can_propose_at_next_eth_block().return_once(|_| Ok(None));

    let sequencer = h.build().await;
    let outcome = Arc::clone(sequencer.inner()).do_real_work().await.unwrap();
    assert_eq!(outcome, SlotOutcome::NotOurTurn);
}

/// Enforcement is on and the slot is already past the
/// assembly deadlines. `TooSlow` is raised inside `set_state` before any
/// fork is opened.
#[tokio::test]
async fn too_slow_abandons_the_slot_without_forks() {
    let slot = 512u64;
    // 30s into a 36s slot: past every assembly deadline.
    let mut h = Harness::new(constants_at(slot, 30));
    h.opts.enforce_timetable = true;
    h.sources_agree_at(100, B256::repeat_byte(0xab));
    h.publisher
        .expect_can_propose_at_next_eth_block()
        .return_once(move |_| Ok(Some((slot, 101))));
    h.publisher.expect_enqueue_cast_vote().times(2).returning(|_, _, _| Ok(true));
    h.tx_pool.expect_get_pending_tx_count().return_once(|| Ok(10));

    let sequencer = h.build().await;
    let inner = Arc::clone(sequencer.inner());

    let err = inner.clone().do_real_work().await.unwrap_err();
    assert!(matches!(err, SequencerError::TooSlow { .. }));

    // Caught at the loop level, final state idle.
    Arc::clone(&inner).work_iteration().await;
    assert_eq!(inner.state(), SequencerState::Idle);
}

/// Three pending txs under a minimum of five. No fork is
/// opened, but the votes are still enqueued and flushed.
#[tokio::test]
async fn insufficient_txs_still_sends_votes() {
    let slot = 512u64;
    let mut h = Harness::new(constants_at(slot, 2));
    h.opts.min_txs_per_block = 5;
    h.sources_agree_at(100, B256::repeat_byte(0xab));
    h.publisher
        .expect_can_propose_at_next_eth_block()
        .return_once(move |_| Ok(Some((slot, 101))));
    h.publisher.expect_enqueue_cast_vote().times(2).returning(|_, _, _| Ok(true));
    h.tx_pool.expect_get_pending_tx_count().return_once(|| Ok(3));
    h.publisher.expect_send_requests().times(1).return_once(|| {
        Ok(SendRequestsOutcome { valid_actions: vec!["governance-vote".into()] })
    });

    let sequencer = h.build().await;
    let outcome = Arc::clone(sequencer.inner()).do_real_work().await.unwrap();
    assert_eq!(outcome, SlotOutcome::TooFewTxs);
}

/// Flush overrides the minimum-tx gate for exactly one
/// iteration and clears itself once the block is enqueued.
#[tokio::test]
async fn flush_overrides_the_minimum_once() {
    let slot = 512u64;
    let pending = txs(3);

    let mut h = Harness::new(constants_at(slot, 2));
    h.opts.min_txs_per_block = 5;
    h.sources_agree_at(100, B256::repeat_byte(0xab));
    h.forks_available();
    h.processor_succeeds_with(pending.clone());
    h.builder_completes(101, slot, pending);

    h.publisher
        .expect_can_propose_at_next_eth_block()
        .returning(move |_| Ok(Some((slot, 101))));
    h.publisher.expect_enqueue_cast_vote().times(4).returning(|_, _, _| Ok(true));
    h.tx_pool.expect_get_pending_tx_count().returning(|| Ok(3));
    h.tx_pool
        .expect_iterate_pending_txs()
        .return_once(move || Ok(Box::pin(futures::stream::iter(txs(3)))));
    h.publisher.expect_validate_block_for_submission().times(2).returning(|_| Ok(()));
    // Empty committee: solo-proposer mode, no attestations collected.
    h.publisher.expect_get_current_epoch_committee().return_once(|| Ok(vec![]));
    h.publisher
        .expect_enqueue_propose_l2_block()
        .times(1)
        .return_once(|_, _, _, _| Ok(true));
    h.publisher.expect_send_requests().times(2).returning(|| {
        Ok(SendRequestsOutcome { valid_actions: vec!["propose".into()] })
    });

    let sequencer = h.build().await;
    let inner = Arc::clone(sequencer.inner());

    sequencer.flush();
    assert!(inner.flushing());

    let outcome = inner.clone().do_real_work().await.unwrap();
    assert_eq!(outcome, SlotOutcome::Proposed);
    assert!(!inner.flushing(), "flush flag must clear after a successful enqueue");

    // The next iteration reverts to normal gating: 3 < 5, no block.
    let outcome = inner.clone().do_real_work().await.unwrap();
    assert_eq!(outcome, SlotOutcome::TooFewTxs);
}

/// Another proposer lands a block while we were processing.
/// The second `validate_block_for_submission` fails, the iteration raises,
/// and nothing is enqueued.
#[tokio::test]
async fn post_assembly_l1_race_raises_and_skips_enqueue() {
    let slot = 512u64;
    let pending = txs(4);

    let mut h = Harness::new(constants_at(slot, 2));
    h.sources_agree_at(100, B256::repeat_byte(0xab));
    h.forks_available();
    h.processor_succeeds_with(pending.clone());
    h.builder_completes(101, slot, pending);

    h.publisher
        .expect_can_propose_at_next_eth_block()
        .return_once(move |_| Ok(Some((slot, 101))));
    h.publisher.expect_enqueue_cast_vote().times(2).returning(|_, _, _| Ok(true));
    h.tx_pool.expect_get_pending_tx_count().return_once(|| Ok(4));
    h.tx_pool
        .expect_iterate_pending_txs()
        .return_once(move || Ok(Box::pin(futures::stream::iter(txs(4)))));

    // Pre-flight passes, post-assembly fails.
    h.publisher
        .expect_validate_block_for_submission()
        .times(1)
        .returning(|_| Ok(()));
    h.publisher.expect_validate_block_for_submission().times(1).returning(|_| {
        Err(CollaboratorError::Publisher("slot filled by another proposer".into()))
    });

    let sequencer = h.build().await;
    let inner = Arc::clone(sequencer.inner());

    let err = inner.clone().do_real_work().await.unwrap_err();
    assert!(matches!(err, SequencerError::BlockInvalid(_)));

    Arc::clone(&inner).work_iteration().await;
    assert_eq!(inner.state(), SequencerState::Idle);
}

/// Invariant: whatever an iteration does, the loop wrapper lands in idle.
#[rstest]
#[case::collaborator_error(true)]
#[case::not_ready(false)]
#[tokio::test]
async fn every_iteration_returns_to_idle(#[case] world_state_errors: bool) {
    let mut h = Harness::new(constants_at(512, 2));

    if world_state_errors {
        h.world_state
            .expect_status()
            .returning(|| Err(CollaboratorError::WorldState("db closed".into())));
        h.block_source.expect_get_l2_tips().returning(|| {
            Ok(quill_primitives::block::L2Tips {
                latest: quill_primitives::block::BlockId { number: 0, hash: None },
            })
        });
        h.tx_pool.expect_get_status().returning(|| {
            Ok(quill_interfaces::tx_pool::TxPoolStatus {
                synced_to_l2_block: quill_primitives::block::BlockId { number: 0, hash: None },
            })
        });
        h.message_source.expect_get_l2_tips().returning(|| {
            Ok(quill_primitives::block::L2Tips {
                latest: quill_primitives::block::BlockId { number: 0, hash: None },
            })
        });
    } else {
        // Sources disagree: quiet not-ready iteration.
        h.sources_agree_at(100, B256::repeat_byte(0xab));
        h.tx_pool.checkpoint();
        h.tx_pool.expect_get_status().returning(|| {
            Ok(quill_interfaces::tx_pool::TxPoolStatus {
                synced_to_l2_block: quill_primitives::block::BlockId {
                    number: 99,
                    hash: Some(B256::repeat_byte(0x22)),
                },
            })
        });
    }

    let sequencer = h.build().await;
    let inner = Arc::clone(sequencer.inner());

    Arc::clone(&inner).work_iteration().await;
    assert_eq!(inner.state(), SequencerState::Idle);
}

/// Round-trip: `start(); stop(); start()` leaves the sequencer idle with the
/// loop armed exactly once, and `stop` parks it in the sticky stopped state.
#[tokio::test]
async fn start_stop_start_roundtrip() {
    let mut h = Harness::new(constants_at(512, 2));
    h.publisher.expect_restart().times(2).returning(|| ());
    h.publisher.expect_interrupt().times(2).returning(|| ());
    h.validator_client.expect_stop().times(2).returning(|| ());

    let sequencer = h.build().await;
    assert_eq!(sequencer.status().state, SequencerState::Stopped);

    sequencer.start();
    assert_eq!(sequencer.status().state, SequencerState::Idle);

    sequencer.stop().await;
    assert_eq!(sequencer.status().state, SequencerState::Stopped);

    sequencer.start();
    assert_eq!(sequencer.status().state, SequencerState::Idle);

    sequencer.stop().await;
}

/// Hot reload: a governance payload update is forwarded to the publisher,
/// and reapplying the current configuration is a no-op.
#[tokio::test]
async fn update_config_forwards_governance_payload() {
    let payload = Bytes::from(vec![0xde, 0xad]);

    let mut h = Harness::new(constants_at(512, 2));
    let expected = payload.clone();
    h.publisher
        .expect_set_governance_payload()
        .withf(move |p| *p == expected)
        .times(1)
        .returning(|_| ());

    let sequencer = h.build().await;
    sequencer.update_config(SequencerConfigUpdate {
        governance_proposer_payload: Some(payload),
        ..Default::default()
    });

    // Reapplying identical values changes nothing observable.
    sequencer.update_config(SequencerConfigUpdate {
        min_txs_per_block: Some(1),
        ..Default::default()
    });
    assert_eq!(sequencer.status().state, SequencerState::Stopped);
}

/// The validator re-execution callback drives the same assembly path in
/// validator mode: no pool eviction, no minimum-tx gate.
#[tokio::test]
async fn build_block_from_proposal_reexecutes() {
    use quill_interfaces::validator::ProposalBlockBuilder;

    let slot = 512u64;
    let bodies = txs(2);

    let mut h = Harness::new(constants_at(slot, 2));
    // Validator path gates on nothing but world-state sync.
    h.opts.min_txs_per_block = 10;
    h.forks_available();
    h.processor_succeeds_with(bodies.clone());
    h.builder_completes(101, slot, bodies.clone());
    h.world_state.expect_status().returning(|| {
        Ok(quill_interfaces::world_state::WorldStateStatus {
            sync_summary: quill_interfaces::world_state::WorldStateSyncSummary {
                latest_block_number: 100,
                latest_block_hash: Some(B256::repeat_byte(0x11)),
            },
        })
    });

    let sequencer = h.build().await;
    let inner = Arc::clone(sequencer.inner());

    let block = block_with_txs(101, slot, &bodies);
    let proposal = quill_primitives::block::BlockProposal {
        block_number: 101,
        header: block.header.to_propose(),
        archive_root: block.archive_root,
        tx_hashes: bodies.iter().map(|t| t.hash).collect(),
        txs: Some(bodies.clone()),
    };

    let built = inner.build_block_from_proposal(proposal).await.unwrap();
    assert_eq!(built.number(), 101);
    assert_eq!(built.tx_hashes.len(), 2);
}

/// A proposal without transaction bodies cannot be re-executed.
#[tokio::test]
async fn build_block_from_proposal_requires_bodies() {
    use quill_interfaces::validator::ProposalBlockBuilder;

    let h = Harness::new(constants_at(512, 2));
    let sequencer = h.build().await;
    let inner = Arc::clone(sequencer.inner());

    let block = block_with_txs(101, 512, &[]);
    let proposal = quill_primitives::block::BlockProposal {
        block_number: 101,
        header: block.header.to_propose(),
        archive_root: block.archive_root,
        tx_hashes: vec![],
        txs: None,
    };

    let err = inner.build_block_from_proposal(proposal).await.unwrap_err();
    assert!(matches!(err, CollaboratorError::Builder(_)));
}

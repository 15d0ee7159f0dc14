//! End-to-end scenarios driven through the mining coordinator, covering
//! the full user → mempool → template → proof-of-work → commit cycle.

use beck_core::amount::Amount;
use beck_core::pow;
use beck_node_lib::chain::HistoryKind;
use beck_node_lib::coordinator::SubmitOutcome;
use beck_tests::helpers::{addr, beck, keypair, mine_and_submit, mine_block, temp_coordinator};

#[test]
fn genesis_bootstrap() {
    let genesis = addr(1);
    let (coordinator, _dir) = temp_coordinator(genesis);

    let status = coordinator.status();
    assert_eq!(status.height, 0);

    assert_eq!(coordinator.read(|chain| chain.balance(&genesis)).unwrap(), beck(50));

    let blocks = coordinator.read(|chain| chain.blocks()).unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].transactions.len(), 1);
    assert!(blocks[0].transactions[0].is_coinbase());
}

#[test]
fn transfer_with_fee() {
    let alice = keypair(1);
    let bob = addr(2);
    let miner = addr(3);
    let (coordinator, _dir) = temp_coordinator(alice.address());

    let tx_id = coordinator
        .submit_transaction(&alice.secret_hex(), alice.address(), bob, beck(10), beck(1))
        .unwrap();

    // Pending but not yet committed: balances unchanged.
    let pending = coordinator.pending_transactions();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, tx_id);
    assert_eq!(
        coordinator.read(|chain| chain.balance(&alice.address())).unwrap(),
        beck(50)
    );
    assert_eq!(coordinator.read(|chain| chain.balance(&bob)).unwrap(), Amount::ZERO);

    assert!(matches!(
        mine_and_submit(&coordinator, miner),
        SubmitOutcome::Accepted { .. }
    ));

    assert_eq!(
        coordinator.read(|chain| chain.balance(&alice.address())).unwrap(),
        beck(39)
    );
    assert_eq!(coordinator.read(|chain| chain.balance(&bob)).unwrap(), beck(10));
    assert_eq!(coordinator.read(|chain| chain.balance(&miner)).unwrap(), beck(51));
    assert!(coordinator.pending_transactions().is_empty());
}

#[test]
fn insufficient_funds_rejected_at_ingress() {
    let alice = keypair(1);
    let (coordinator, _dir) = temp_coordinator(alice.address());

    let err = coordinator
        .submit_transaction(&alice.secret_hex(), alice.address(), addr(2), beck(1000), Amount::ZERO)
        .unwrap_err();
    assert!(err.to_string().contains("insufficient funds"));
    assert!(coordinator.pending_transactions().is_empty());
}

#[test]
fn invalid_pow_rejected() {
    let (coordinator, _dir) = temp_coordinator(addr(1));
    let template = coordinator.block_template(addr(2)).unwrap();

    // Find a nonce whose hash misses the target and submit it anyway.
    let mut nonce = 0;
    let (bad_nonce, bad_hash) = loop {
        let hash = template.block.header_hash(nonce);
        if !pow::meets_target(&hash, template.difficulty) {
            break (nonce, hash);
        }
        nonce += 1;
    };

    let outcome = coordinator.submit_block(template.block, bad_hash, bad_nonce);
    assert_eq!(
        outcome,
        SubmitOutcome::Rejected {
            error_message: "invalid proof of work".into()
        }
    );
    assert_eq!(coordinator.status().height, 0);
}

#[test]
fn stale_submission_loses_the_race() {
    let (coordinator, _dir) = temp_coordinator(addr(1));

    // Two miners hold templates at the same height.
    let first = mine_block(&coordinator, addr(2));
    let second = mine_block(&coordinator, addr(3));

    let (hash, nonce) = (first.hash, first.nonce);
    assert!(matches!(
        coordinator.submit_block(first, hash, nonce),
        SubmitOutcome::Accepted { .. }
    ));

    let (hash, nonce) = (second.hash, second.nonce);
    match coordinator.submit_block(second, hash, nonce) {
        SubmitOutcome::Rejected { error_message } => assert!(
            error_message.contains("link") || error_message.contains("height"),
            "unexpected rejection: {error_message}"
        ),
        other => panic!("expected rejection, got {other:?}"),
    }

    // The tip advanced by exactly one.
    assert_eq!(coordinator.status().height, 1);
}

#[test]
fn history_is_ordered_by_height() {
    let alice = keypair(1);
    let (coordinator, _dir) = temp_coordinator(alice.address());

    coordinator
        .submit_transaction(&alice.secret_hex(), alice.address(), addr(2), beck(10), beck(1))
        .unwrap();
    assert!(matches!(
        mine_and_submit(&coordinator, addr(3)),
        SubmitOutcome::Accepted { .. }
    ));

    let history = coordinator
        .read(|chain| chain.history(&alice.address()))
        .unwrap();
    assert_eq!(history.len(), 2);

    // Genesis reward first, then the outgoing transfer.
    assert_eq!(history[0].block_height, 0);
    assert_eq!(history[0].kind, HistoryKind::MiningReward);
    assert_eq!(history[1].block_height, 1);
    assert_eq!(history[1].kind, HistoryKind::Sent);
    assert_eq!(history[1].amount, beck(10));
}

//! Fork choice depends only on the set of blocks delivered, never on the
//! order they arrive in

mod common;

use common::*;
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use storage_consensus::*;

/// Blocks of a small tree, in an order a single node could have accepted:
///
/// ```text
/// g - a1 - a2 - a3
///       \
///        c2 - c3
/// g - b1 - b2
/// ```
///
/// a3 and c3 carry equal work.
fn block_tree() -> (Vec<Block>, BlockId) {
    let builder = TestNode::new();
    let consensus = &builder.consensus;
    let genesis = consensus.genesis_id();
    let mut blocks = Vec::new();
    let mut add = |block: Block| {
        let _ = consensus.accept_block(block.clone());
        blocks.push(block.clone());
        block.id()
    };

    let split = spend(genesis_output(&builder), &[150_000, 150_000], 0);
    let a1 = add(mine_on(consensus, &genesis, vec![split.clone()], 1));
    let a2 = add(mine_on(consensus, &a1, vec![spend(split.output_id(0), &[149_000], 1_000)], 2));
    let a3 = add(mine_on(consensus, &a2, vec![], 3));
    let c2 = add(mine_on(consensus, &a1, vec![spend(split.output_id(1), &[140_000], 10_000)], 4));
    let c3 = add(mine_on(consensus, &c2, vec![], 5));
    let b1 = add(mine_on(consensus, &genesis, vec![], 6));
    add(mine_on(consensus, &b1, vec![], 7));

    let expected_tip = a3.min(c3);
    assert_eq!(consensus.current_block_id(), expected_tip);
    (blocks, expected_tip)
}

fn deliver(blocks: &[Block]) -> TestNode {
    let node = TestNode::new();
    for block in blocks {
        let _ = node.consensus.accept_block(block.clone());
    }
    node
}

#[test]
fn test_equal_work_ties_break_to_lowest_id() {
    let (blocks, expected_tip) = block_tree();
    let forward = deliver(&blocks);
    assert_eq!(forward.consensus.current_block_id(), expected_tip);
    assert_eq!(forward.consensus.height(), 3);
}

#[test]
fn test_reverse_delivery_connects_orphans() {
    let (blocks, expected_tip) = block_tree();
    let forward = deliver(&blocks);

    let node = TestNode::new();
    let mut reversed = blocks.clone();
    reversed.reverse();
    // The first block built arrives last; everything on the a and c
    // branches waits for it
    let (last, rest) = reversed.split_last().unwrap();
    for block in rest {
        if let Err(err) = node.consensus.accept_block(block.clone()) {
            assert!(matches!(err, ConsensusError::Orphan(_)), "{err:?}");
        }
    }
    assert_eq!(node.consensus.orphan_count(), 4);
    assert_eq!(node.consensus.height(), 2);
    node.consensus.accept_block(last.clone()).unwrap();

    assert_eq!(node.consensus.orphan_count(), 0);
    assert_eq!(node.consensus.current_block_id(), expected_tip);
    assert_eq!(node.consensus.ledger_snapshot(), forward.consensus.ledger_snapshot());
}

#[test]
fn test_any_delivery_order_reaches_same_state() {
    let (blocks, expected_tip) = block_tree();
    let reference = deliver(&blocks).consensus.ledger_snapshot();

    let mut runner = TestRunner::new(Config::with_cases(32));
    runner
        .run(&Just(blocks).prop_shuffle(), |order| {
            let node = deliver(&order);
            prop_assert_eq!(node.consensus.current_block_id(), expected_tip);
            prop_assert_eq!(node.consensus.ledger_snapshot(), reference.clone());
            prop_assert_eq!(node.consensus.orphan_count(), 0);
            Ok(())
        })
        .unwrap();
}

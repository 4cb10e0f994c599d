//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::Arc;

use storage_consensus::economic::block_subsidy;
use storage_consensus::merkle::file_merkle_root;
use storage_consensus::mining::solve_block;
use storage_consensus::*;

/// A fresh testing-network node: consensus state plus a subscribed pool
pub struct TestNode {
    pub consensus: Arc<ConsensusSet>,
    pub pool: Arc<TransactionPool>,
}

impl TestNode {
    pub fn new() -> Self {
        let consensus = create_genesis_state(ConsensusParams::testing()).unwrap();
        let pool = TransactionPool::new(consensus.clone());
        Self { consensus, pool }
    }

    pub fn genesis(&self) -> Block {
        self.consensus.block(&self.consensus.genesis_id()).unwrap()
    }

    pub fn tip(&self) -> Block {
        self.consensus.current_block().unwrap()
    }
}

pub fn anyone() -> UnlockConditions {
    UnlockConditions::anyone_can_spend()
}

pub fn anyone_output(value: Currency) -> Output {
    Output { value, unlock_hash: anyone().unlock_hash() }
}

/// Id of the anyone-can-spend output the testing genesis block pays
pub fn genesis_output(node: &TestNode) -> OutputId {
    node.genesis().miner_payout_id(0)
}

/// Spend `parent` (anyone-can-spend) into anyone-can-spend outputs
pub fn spend(parent: OutputId, outputs: &[Currency], fee: Currency) -> Transaction {
    Transaction {
        inputs: vec![Input { parent_id: parent, unlock_conditions: anyone() }],
        outputs: outputs.iter().map(|v| anyone_output(*v)).collect(),
        miner_fee: fee,
        ..Default::default()
    }
}

/// Build a block on `parent`, which `consensus` must already know, paying
/// the subsidy plus fees to a payee derived from `tag`. The block is solved
/// against the parent's child target with an on-schedule timestamp.
pub fn mine_on(consensus: &ConsensusSet, parent: &BlockId, transactions: Vec<Transaction>, tag: u8) -> Block {
    mine_on_where(consensus, parent, transactions, tag, |_| true)
}

/// As [`mine_on`], but keep searching until `accept` also holds for the id
pub fn mine_on_where(
    consensus: &ConsensusSet,
    parent: &BlockId,
    transactions: Vec<Transaction>,
    tag: u8,
    accept: impl Fn(&BlockId) -> bool,
) -> Block {
    let parent_block = consensus.block(parent).expect("parent is known");
    let height = consensus.block_height(parent).unwrap() + 1;
    let target = consensus.child_target(parent).unwrap();
    let fees: Currency = transactions.iter().map(|t| t.miner_fee).sum();
    let mut block = Block {
        parent_id: *parent,
        timestamp: parent_block.timestamp + consensus.params().block_frequency,
        nonce: 0,
        miner_payouts: vec![Output {
            value: block_subsidy(height, consensus.params()) + fees,
            unlock_hash: UnlockHash([tag; 32]),
        }],
        transactions,
    };
    loop {
        block = solve_block(block, &target, 1_000_000).expect("testing target is easy");
        if accept(&block.id()) {
            return block;
        }
        block.nonce += 1;
    }
}

/// Mine and accept a block on the current tip
pub fn extend(node: &TestNode, transactions: Vec<Transaction>, tag: u8) -> Block {
    let block = mine_on(&node.consensus, &node.consensus.current_block_id(), transactions, tag);
    node.consensus.accept_block(block.clone()).unwrap();
    block
}

/// A file contract over `data` funded entirely by `escrow`, paying the host
/// on a valid proof and the renter on a missed one
pub fn file_contract(data: &[u8], start: BlockHeight, end: BlockHeight, escrow: Currency) -> FileContract {
    let renter = UnlockHash([0xaa; 32]);
    let host = UnlockHash([0xbb; 32]);
    FileContract {
        file_size: data.len() as u64,
        file_merkle_root: file_merkle_root(data),
        proof_start_height: start,
        proof_end_height: end,
        escrowed_funds: escrow,
        valid_proof_outputs: vec![Output { value: escrow, unlock_hash: host }],
        missed_proof_outputs: vec![Output { value: escrow, unlock_hash: renter }],
        renter_id: renter,
        host_id: host,
    }
}

/// Sum of every output and every escrow in the ledger
pub fn total_supply(ledger: &Ledger) -> Currency {
    ledger.outputs.total_value().unwrap() + ledger.contracts.escrowed_total().unwrap()
}

/// Currency that must exist at `height`: the genesis outputs plus every
/// subsidy paid since
pub fn expected_supply(params: &ConsensusParams, height: BlockHeight) -> Currency {
    let genesis: Currency = params.genesis_outputs.iter().map(|o| o.value).sum();
    genesis + (1..=height).map(|h| block_subsidy(h, params)).sum::<Currency>()
}

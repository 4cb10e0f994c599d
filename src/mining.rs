//! Block assembly and a bounded proof-of-work search

use crate::economic::{block_subsidy, checked_sum, total_fees};
use crate::encoding::Encode;
use crate::error::Result;
use crate::mempool::TransactionPool;
use crate::pow::Target;
use crate::state::ConsensusSet;
use crate::types::*;

/// CreateBlockTemplate: 𝒮 × 𝒫 → ℬ
///
/// For the current tip at height h and pool transactions txs:
/// 1. Take txs in insertion order while the block stays under the size limit
/// 2. Pay subsidy(h + 1) + Σ fees to `payout`
/// 3. Timestamp = max(now, parent timestamp)
///
/// The nonce is left at zero; see [`solve_block`].
pub fn create_block_template(consensus: &ConsensusSet, pool: &TransactionPool, payout: UnlockHash) -> Result<Block> {
    consensus.with_tip(|tip| {
        let height = tip.next_height();
        let parent = &tip.node.block;
        let mut block = Block {
            parent_id: tip.node.id,
            timestamp: consensus.now().max(parent.timestamp),
            nonce: 0,
            miner_payouts: vec![Output { value: 0, unlock_hash: payout }],
            transactions: Vec::new(),
        };

        // 1. Select transactions
        let limit = tip.params.block_size_limit;
        let mut size = block.encoded_len();
        for tx in pool.transactions() {
            let tx_size = tx.encoded_len();
            if size + tx_size > limit {
                continue;
            }
            size += tx_size;
            block.transactions.push(tx);
        }

        // 2. Payout
        let fees = total_fees(&block.transactions)?;
        block.miner_payouts[0].value = checked_sum([block_subsidy(height, tip.params), fees])?;
        Ok(block)
    })?
}

/// MineBlock: search nonces from `block.nonce` for an id meeting `target`.
/// Returns `None` after `max_attempts` failures.
pub fn solve_block(mut block: Block, target: &Target, max_attempts: u64) -> Option<Block> {
    let mut header = block.header();
    for _ in 0..max_attempts {
        if target.is_met_by(&header.id()) {
            block.nonce = header.nonce;
            return Some(block);
        }
        header.nonce = header.nonce.wrapping_add(1);
    }
    None
}

/// Build a template on the current tip and solve it against the tip's
/// child target
pub fn mine_block(
    consensus: &ConsensusSet,
    pool: &TransactionPool,
    payout: UnlockHash,
    max_attempts: u64,
) -> Result<Option<Block>> {
    let template = create_block_template(consensus, pool, payout)?;
    let target = consensus.current_target()?;
    Ok(solve_block(template, &target, max_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusParams;

    #[test]
    fn test_solve_block_meets_target() {
        let params = ConsensusParams::testing();
        let block = crate::block::genesis_block(&params);
        let solved = solve_block(block, &params.root_target, 1_000).unwrap();
        assert!(params.root_target.is_met_by(&solved.id()));
        assert!(solve_block(solved, &Target([0; 32]), 10).is_none());
    }

    #[test]
    fn test_template_includes_pool_and_fees() {
        let consensus = ConsensusSet::new(ConsensusParams::testing()).unwrap();
        let pool = TransactionPool::new(consensus.clone());
        let genesis = consensus.current_block().unwrap();
        let tx = Transaction {
            inputs: vec![Input {
                parent_id: genesis.miner_payout_id(0),
                unlock_conditions: UnlockConditions::anyone_can_spend(),
            }],
            outputs: vec![Output { value: 299_500, unlock_hash: UnlockHash([1; 32]) }],
            miner_fee: 500,
            ..Default::default()
        };
        pool.accept_transaction(tx.clone()).unwrap();

        let block = mine_block(&consensus, &pool, UnlockHash([2; 32]), 10_000).unwrap().unwrap();
        assert_eq!(block.transactions, vec![tx.clone()]);
        assert_eq!(block.miner_payouts[0].value, block_subsidy(1, consensus.params()) + 500);

        consensus.accept_block(block).unwrap();
        assert_eq!(consensus.height(), 1);
        assert!(pool.is_empty());
        assert!(consensus.output(&tx.output_id(0)).is_some());
    }
}

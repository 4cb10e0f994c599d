//! Block validation, application and reversal
//!
//! Validation is pure: it reads the parent state through a [`LedgerView`] and
//! never mutates it. Application turns a validated block into a
//! [`BlockDiff`] and commits it to the ledger; reversal replays that diff
//! backward.

use std::collections::HashSet;

use crate::config::ConsensusParams;
use crate::economic::{block_subsidy, checked_sum, output_total};
use crate::encoding::Encode;
use crate::error::{ConsensusError, Result};
use crate::ledger::{
    BlockDiff, BlockOverlay, ChainView, ContractOutcome, DiffDirection, Ledger, LedgerDiff, LedgerView,
    ResolvedContract,
};
use crate::pow::{check_proof_of_work, Target};
use crate::transaction::validate_transaction;
use crate::types::*;

/// CheckBlockHeader: ℬ × 𝒫 → {valid, invalid}
///
/// For block b extending a parent with timestamp t_p and child target T:
/// 1. id(b) ≤ T
/// 2. t_b ≥ t_p - past tolerance
/// 3. t_b ≤ now + future threshold (stale, not invalid)
/// 4. |b| ≤ block size limit
pub fn check_block_header(
    block: &Block,
    parent_timestamp: Timestamp,
    target: &Target,
    params: &ConsensusParams,
    now: Timestamp,
) -> Result<()> {
    // 1. Proof of work
    check_proof_of_work(&block.id(), target)?;

    // 2. Not too far behind the parent
    let earliest = parent_timestamp.saturating_sub(params.past_timestamp_tolerance);
    if block.timestamp < earliest {
        return Err(ConsensusError::EarlyTimestamp {
            timestamp: block.timestamp,
            parent: parent_timestamp,
        });
    }

    // 3. Not too far in the future
    if block.timestamp > now.saturating_add(params.future_threshold) {
        return Err(ConsensusError::FutureTimestamp { timestamp: block.timestamp, now });
    }

    // 4. Size
    let size = block.encoded_len();
    if size > params.block_size_limit {
        return Err(ConsensusError::BlockTooLarge { size, limit: params.block_size_limit });
    }

    Ok(())
}

/// ValidateBlock: ℬ × 𝒱 × ℕ → {valid, invalid} × ℤ
///
/// For block b with transactions txs at height h on parent view v:
/// 1. No transaction appears twice
/// 2. Each tx ∈ txs validates against v plus the effects of the txs before it
/// 3. Σ payouts = GetBlockSubsidy(h) + Σ fees
/// 4. Return Σ fees
pub fn validate_block<V: LedgerView>(
    block: &Block,
    view: &V,
    height: BlockHeight,
    params: &ConsensusParams,
) -> Result<Currency> {
    let mut overlay = BlockOverlay::new(view);
    let mut seen = HashSet::new();
    let mut fees = Vec::with_capacity(block.transactions.len());

    for (index, tx) in block.transactions.iter().enumerate() {
        let wrap = |source: ConsensusError| ConsensusError::InvalidBlockTransaction {
            index,
            source: Box::new(source),
        };
        // 1. Duplicates
        let id = tx.id();
        if !seen.insert(id) {
            return Err(wrap(ConsensusError::DuplicateTransaction(id)));
        }
        // 2. Transaction rules on the staged state
        let fee = validate_transaction(tx, &overlay, height, params).map_err(wrap)?;
        overlay.stage(tx);
        fees.push(fee);
    }

    // 3. Payouts
    let fees = checked_sum(fees)?;
    let expected = checked_sum([block_subsidy(height, params), fees])?;
    let payouts = output_total(&block.miner_payouts)?;
    if payouts != expected {
        return Err(ConsensusError::PayoutMismatch { payouts, expected });
    }

    Ok(fees)
}

/// ApplyBlock: ℬ × 𝒮 × ℕ → 𝒮 × Δ
///
/// `path` holds the ids of the blocks from genesis to the parent, so
/// `path.len() == height`. The block is validated first; then, in order:
/// 1. For each tx in list order: spend inputs in input order, create outputs,
///    open contracts, resolve proven contracts with their valid outputs
/// 2. Resolve every contract expiring at `height` with its missed outputs,
///    in ascending id order
/// 3. Create the miner payouts
///
/// On success the ledger reflects the block and the returned diff undoes it.
/// On failure the ledger is unchanged.
pub fn apply_block(
    block: &Block,
    ledger: &mut Ledger,
    path: &[BlockId],
    height: BlockHeight,
    params: &ConsensusParams,
) -> Result<BlockDiff> {
    validate_block(block, &ChainView::new(ledger, path), height, params)?;

    let block_id = block.id();
    let mut diff = BlockDiff::new(block_id, height);
    if let Err(e) = record_block_effects(block, block_id, height, ledger, &mut diff) {
        ledger.commit_diff(&diff, DiffDirection::Revert)?;
        return Err(ConsensusError::Inconsistency(format!(
            "block {} validated but failed to apply: {}",
            block_id, e
        )));
    }
    Ok(diff)
}

/// Re-apply a diff produced by an earlier `apply_block` of the same block
/// on the same parent state.
pub fn reapply_block(diff: &BlockDiff, ledger: &mut Ledger) -> Result<()> {
    ledger.commit_diff(diff, DiffDirection::Apply)
}

/// RevertBlock: the exact inverse of `apply_block`
pub fn revert_block(diff: &BlockDiff, ledger: &mut Ledger) -> Result<()> {
    ledger.commit_diff(diff, DiffDirection::Revert)
}

/// The fixed first block of a network
pub fn genesis_block(params: &ConsensusParams) -> Block {
    Block {
        parent_id: BlockId::default(),
        timestamp: params.genesis_timestamp,
        nonce: 0,
        miner_payouts: params.genesis_outputs.clone(),
        transactions: Vec::new(),
    }
}

/// Apply the genesis block to an empty ledger. Genesis carries no
/// transactions and is exempt from the subsidy rule; its payouts are the
/// network's initial outputs.
pub fn apply_genesis(block: &Block, ledger: &mut Ledger) -> Result<BlockDiff> {
    let block_id = block.id();
    let mut diff = BlockDiff::new(block_id, 0);
    if !block.transactions.is_empty() {
        return Err(ConsensusError::MalformedTransaction("genesis carries transactions".to_string()));
    }
    for (i, output) in block.miner_payouts.iter().enumerate() {
        diff.entries.push(LedgerDiff::OutputCreated { id: block.miner_payout_id(i), output: output.clone() });
    }
    ledger.commit_diff(&diff, DiffDirection::Apply)?;
    Ok(diff)
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn record_block_effects(
    block: &Block,
    block_id: BlockId,
    height: BlockHeight,
    ledger: &mut Ledger,
    diff: &mut BlockDiff,
) -> Result<()> {
    // 1. Transactions
    for tx in &block.transactions {
        for input in &tx.inputs {
            let output = ledger
                .outputs
                .get(&input.parent_id)
                .cloned()
                .ok_or_else(|| ConsensusError::Inconsistency(format!("input {} missing", input.parent_id)))?;
            record(ledger, diff, LedgerDiff::OutputSpent { id: input.parent_id, output })?;
        }
        for (i, output) in tx.outputs.iter().enumerate() {
            record(ledger, diff, LedgerDiff::OutputCreated { id: tx.output_id(i), output: output.clone() })?;
        }
        for (i, contract) in tx.file_contracts.iter().enumerate() {
            record(ledger, diff, LedgerDiff::ContractOpened { id: tx.contract_id(i), contract: contract.clone() })?;
        }
        for proof in &tx.storage_proofs {
            resolve_contract(ledger, diff, proof.contract_id, ContractOutcome::ValidProof, height)?;
        }
    }

    // 2. Expired contracts
    for id in ledger.contracts.expiring_at(height) {
        resolve_contract(ledger, diff, id, ContractOutcome::MissedProof, height)?;
    }

    // 3. Miner payouts
    for (i, output) in block.miner_payouts.iter().enumerate() {
        let id = OutputId(derive_id(SPECIFIER_MINER_PAYOUT, &block_id.0, i as u64));
        record(ledger, diff, LedgerDiff::OutputCreated { id, output: output.clone() })?;
    }
    Ok(())
}

fn resolve_contract(
    ledger: &mut Ledger,
    diff: &mut BlockDiff,
    id: ContractId,
    outcome: ContractOutcome,
    height: BlockHeight,
) -> Result<()> {
    let contract = ledger
        .contracts
        .get_open(&id)
        .cloned()
        .ok_or_else(|| ConsensusError::Inconsistency(format!("contract {} is not open", id)))?;
    let resolution = ResolvedContract { contract, outcome, height };
    let valid = outcome == ContractOutcome::ValidProof;
    let payouts: Vec<Output> = resolution.payouts().to_vec();
    record(ledger, diff, LedgerDiff::ContractResolved { id, resolution })?;
    for (i, output) in payouts.into_iter().enumerate() {
        let output_id = contract_resolution_output_id(&id, valid, i);
        record(ledger, diff, LedgerDiff::OutputCreated { id: output_id, output })?;
    }
    Ok(())
}

fn record(ledger: &mut Ledger, diff: &mut BlockDiff, entry: LedgerDiff) -> Result<()> {
    ledger.apply_entry(&entry, DiffDirection::Apply)?;
    diff.entries.push(entry);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::file_merkle_root;

    fn params() -> ConsensusParams {
        ConsensusParams::testing()
    }

    fn anyone() -> UnlockHash {
        UnlockConditions::anyone_can_spend().unlock_hash()
    }

    /// Genesis ledger plus the path `[genesis]`
    fn genesis_state() -> (Block, Ledger, Vec<BlockId>) {
        let genesis = genesis_block(&params());
        let mut ledger = Ledger::new();
        apply_genesis(&genesis, &mut ledger).unwrap();
        let path = vec![genesis.id()];
        (genesis, ledger, path)
    }

    fn spend_genesis(genesis: &Block, outputs: Vec<Currency>, fee: Currency) -> Transaction {
        Transaction {
            inputs: vec![Input {
                parent_id: genesis.miner_payout_id(0),
                unlock_conditions: UnlockConditions::anyone_can_spend(),
            }],
            outputs: outputs
                .into_iter()
                .map(|value| Output { value, unlock_hash: anyone() })
                .collect(),
            miner_fee: fee,
            ..Default::default()
        }
    }

    fn child(parent: &Block, height: BlockHeight, transactions: Vec<Transaction>) -> Block {
        let fees: Currency = transactions.iter().map(|t| t.miner_fee).sum();
        Block {
            parent_id: parent.id(),
            timestamp: parent.timestamp + 10,
            nonce: 0,
            miner_payouts: vec![Output { value: block_subsidy(height, &params()) + fees, unlock_hash: anyone() }],
            transactions,
        }
    }

    #[test]
    fn test_genesis_creates_initial_outputs() {
        let (genesis, ledger, _) = genesis_state();
        assert_eq!(ledger.outputs.len(), 1);
        assert_eq!(
            ledger.outputs.get(&genesis.miner_payout_id(0)).unwrap().value,
            crate::constants::INITIAL_COINBASE
        );
    }

    #[test]
    fn test_apply_spend_and_revert() {
        let (genesis, mut ledger, path) = genesis_state();
        let before = ledger.clone();
        let tx = spend_genesis(&genesis, vec![200_000, 99_000], 1_000);
        let block = child(&genesis, 1, vec![tx.clone()]);

        let diff = apply_block(&block, &mut ledger, &path, 1, &params()).unwrap();
        assert!(!ledger.outputs.contains(&genesis.miner_payout_id(0)));
        assert_eq!(ledger.outputs.get(&tx.output_id(0)).unwrap().value, 200_000);
        assert_eq!(ledger.outputs.get(&tx.output_id(1)).unwrap().value, 99_000);
        assert_eq!(
            ledger.outputs.get(&block.miner_payout_id(0)).unwrap().value,
            block_subsidy(1, &params()) + 1_000
        );
        assert_eq!(ledger.outputs.len(), 3);

        revert_block(&diff, &mut ledger).unwrap();
        assert_eq!(ledger, before);

        reapply_block(&diff, &mut ledger).unwrap();
        assert_eq!(ledger.outputs.len(), 3);
    }

    #[test]
    fn test_payout_must_match_exactly() {
        let (genesis, mut ledger, path) = genesis_state();
        let mut block = child(&genesis, 1, vec![]);
        block.miner_payouts[0].value -= 1;
        assert!(matches!(
            apply_block(&block, &mut ledger, &path, 1, &params()),
            Err(ConsensusError::PayoutMismatch { .. })
        ));
        block.miner_payouts[0].value += 2;
        assert!(matches!(
            apply_block(&block, &mut ledger, &path, 1, &params()),
            Err(ConsensusError::PayoutMismatch { .. })
        ));
    }

    #[test]
    fn test_intra_block_double_spend_rejected() {
        let (genesis, mut ledger, path) = genesis_state();
        let before = ledger.clone();
        let a = spend_genesis(&genesis, vec![300_000], 0);
        let b = spend_genesis(&genesis, vec![299_000], 1_000);
        let block = child(&genesis, 1, vec![a, b]);
        let err = apply_block(&block, &mut ledger, &path, 1, &params()).unwrap_err();
        match err {
            ConsensusError::InvalidBlockTransaction { index, source } => {
                assert_eq!(index, 1);
                assert_eq!(*source, ConsensusError::DoubleSpend(genesis.miner_payout_id(0)));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_chained_spend_within_block() {
        let (genesis, mut ledger, path) = genesis_state();
        let first = spend_genesis(&genesis, vec![300_000], 0);
        let second = Transaction {
            inputs: vec![Input {
                parent_id: first.output_id(0),
                unlock_conditions: UnlockConditions::anyone_can_spend(),
            }],
            outputs: vec![Output { value: 299_990, unlock_hash: anyone() }],
            miner_fee: 10,
            ..Default::default()
        };
        let block = child(&genesis, 1, vec![first.clone(), second.clone()]);
        apply_block(&block, &mut ledger, &path, 1, &params()).unwrap();
        assert!(!ledger.outputs.contains(&first.output_id(0)));
        assert!(ledger.outputs.contains(&second.output_id(0)));
    }

    #[test]
    fn test_contract_expires_as_missed() {
        let (genesis, mut ledger, mut path) = genesis_state();
        let data = vec![7u8; 200];
        let renter = Output { value: 40, unlock_hash: UnlockHash([1; 32]) };
        let contract = FileContract {
            file_size: data.len() as u64,
            file_merkle_root: file_merkle_root(&data),
            proof_start_height: 2,
            proof_end_height: 3,
            escrowed_funds: 40,
            valid_proof_outputs: vec![Output { value: 40, unlock_hash: UnlockHash([2; 32]) }],
            missed_proof_outputs: vec![renter.clone()],
            renter_id: UnlockHash([1; 32]),
            host_id: UnlockHash([2; 32]),
        };
        let mut tx = spend_genesis(&genesis, vec![299_960], 0);
        tx.file_contracts.push(contract);
        let cid = tx.contract_id(0);

        let b1 = child(&genesis, 1, vec![tx]);
        apply_block(&b1, &mut ledger, &path, 1, &params()).unwrap();
        path.push(b1.id());
        let b2 = child(&b1, 2, vec![]);
        apply_block(&b2, &mut ledger, &path, 2, &params()).unwrap();
        path.push(b2.id());
        assert!(ledger.contracts.get_open(&cid).is_some());

        let before_expiry = ledger.clone();
        let b3 = child(&b2, 3, vec![]);
        let diff = apply_block(&b3, &mut ledger, &path, 3, &params()).unwrap();
        assert!(ledger.contracts.get_open(&cid).is_none());
        let resolved = ledger.contracts.get_resolved(&cid).unwrap();
        assert_eq!(resolved.outcome, ContractOutcome::MissedProof);
        assert_eq!(
            ledger.outputs.get(&contract_resolution_output_id(&cid, false, 0)),
            Some(&renter)
        );

        revert_block(&diff, &mut ledger).unwrap();
        assert_eq!(ledger, before_expiry);
    }

    #[test]
    fn test_header_checks() {
        let p = params();
        let genesis = genesis_block(&p);
        let easy = Target([0xff; 32]);
        let block = child(&genesis, 1, vec![]);

        assert!(check_block_header(&block, genesis.timestamp, &easy, &p, block.timestamp).is_ok());
        assert!(matches!(
            check_block_header(&block, genesis.timestamp, &Target([0; 32]), &p, block.timestamp),
            Err(ConsensusError::InsufficientWork(_))
        ));

        let mut early = block.clone();
        early.timestamp = genesis.timestamp - p.past_timestamp_tolerance - 1;
        assert!(matches!(
            check_block_header(&early, genesis.timestamp, &easy, &p, block.timestamp),
            Err(ConsensusError::EarlyTimestamp { .. })
        ));

        let err = check_block_header(&block, genesis.timestamp, &easy, &p, block.timestamp - p.future_threshold - 1)
            .unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Stale);
    }

    #[test]
    fn test_oversized_block_rejected() {
        let mut p = params();
        p.block_size_limit = 10;
        let genesis = genesis_block(&p);
        let block = child(&genesis, 1, vec![]);
        assert!(matches!(
            check_block_header(&block, genesis.timestamp, &Target([0xff; 32]), &p, block.timestamp),
            Err(ConsensusError::BlockTooLarge { .. })
        ));
    }
}

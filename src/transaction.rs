//! Transaction validation functions
//!
//! `check_transaction` covers everything that can be decided from the
//! transaction alone; `validate_transaction` checks it against a chain state
//! through a [`LedgerView`], which is either the tip (pool admission) or a
//! block overlay (block validation).

use std::collections::HashSet;

use crate::config::ConsensusParams;
use crate::constants::MAX_TRANSACTION_ELEMENTS;
use crate::economic::{checked_sum, output_total, transaction_spend_total};
use crate::encoding::{Encode, Encoder};
use crate::error::{ConsensusError, Result};
use crate::ledger::LedgerView;
use crate::merkle::{segment_count, segment_len, verify_segment};
use crate::types::*;
use crate::unlock::verify_signatures;

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// A transaction is well formed if and only if:
/// 1. It does something: at least one input, output, contract or proof
/// 2. No list exceeds the element limit
/// 3. Every output carries value
/// 4. No output is referenced by two inputs
/// 5. No contract is proven twice
/// 6. Every new contract escrows value and pays it out exactly on both paths
/// 7. Value totals do not overflow
/// 8. |tx| ≤ block size limit
pub fn check_transaction(tx: &Transaction, params: &ConsensusParams) -> Result<()> {
    // 1. Check the transaction is not empty
    if tx.inputs.is_empty() && tx.outputs.is_empty() && tx.file_contracts.is_empty() && tx.storage_proofs.is_empty() {
        return Err(malformed("empty transaction"));
    }

    // 2. Check element limits
    for (name, len) in [
        ("inputs", tx.inputs.len()),
        ("outputs", tx.outputs.len()),
        ("file contracts", tx.file_contracts.len()),
        ("storage proofs", tx.storage_proofs.len()),
        ("signatures", tx.signatures.len()),
    ] {
        if len > MAX_TRANSACTION_ELEMENTS {
            return Err(malformed(&format!("too many {}: {}", name, len)));
        }
    }

    // 3. Check output values
    if let Some(i) = tx.outputs.iter().position(|o| o.value == 0) {
        return Err(malformed(&format!("zero-value output at index {}", i)));
    }

    // 4. Check for duplicate inputs
    let mut spent = HashSet::new();
    for input in &tx.inputs {
        if !spent.insert(input.parent_id) {
            return Err(ConsensusError::DoubleSpend(input.parent_id));
        }
    }

    // 5. Check for duplicate storage proofs
    let mut proven = HashSet::new();
    for proof in &tx.storage_proofs {
        if !proven.insert(proof.contract_id) {
            return Err(ConsensusError::ContractAlreadyResolved(proof.contract_id));
        }
    }

    // 6. Check new contracts
    for (i, contract) in tx.file_contracts.iter().enumerate() {
        check_file_contract(contract).map_err(|reason| {
            ConsensusError::InvalidContract(format!("contract {}: {}", i, reason))
        })?;
    }

    // 7. Check value totals
    transaction_spend_total(tx)?;

    // 8. Check size
    let size = tx.encoded_len();
    if size > params.block_size_limit {
        return Err(malformed(&format!("transaction too large: {} bytes", size)));
    }

    Ok(())
}

fn check_file_contract(contract: &FileContract) -> std::result::Result<(), String> {
    if contract.escrowed_funds == 0 {
        return Err("no funds escrowed".to_string());
    }
    if contract.proof_end_height <= contract.proof_start_height {
        return Err("proof window is empty".to_string());
    }
    for (name, outputs) in [
        ("valid", &contract.valid_proof_outputs),
        ("missed", &contract.missed_proof_outputs),
    ] {
        let total = output_total(outputs).map_err(|e| e.to_string())?;
        if total != contract.escrowed_funds {
            return Err(format!(
                "{} proof outputs pay {} of {} escrowed",
                name, total, contract.escrowed_funds
            ));
        }
        if outputs.iter().any(|o| o.value == 0) {
            return Err(format!("zero-value {} proof output", name));
        }
    }
    Ok(())
}

/// ValidateTransaction: 𝒯𝒳 × 𝒱 × ℕ → {valid, invalid} × ℤ
///
/// For transaction tx against chain view v at height h:
/// 1. tx is well formed
/// 2. Every input spends an output present in v, not already spent in this block
/// 3. Every input's conditions hash to the output's unlock hash and are not timelocked
/// 4. Signatures satisfy every input
/// 5. Σ inputs = Σ outputs + Σ escrow + fee
/// 6. Every new contract's proof window opens after h
/// 7. Every storage proof is valid for an open contract whose window contains h
/// 8. Return the miner fee
pub fn validate_transaction<V: LedgerView>(
    tx: &Transaction,
    view: &V,
    height: BlockHeight,
    params: &ConsensusParams,
) -> Result<Currency> {
    // 1. Structure
    check_transaction(tx, params)?;

    // 2-3. Inputs
    let mut input_values = Vec::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if view.spent_in_block(&input.parent_id) {
            return Err(ConsensusError::DoubleSpend(input.parent_id));
        }
        let output = view
            .output(&input.parent_id)
            .ok_or(ConsensusError::MissingOutput(input.parent_id))?;
        if input.unlock_conditions.unlock_hash() != output.unlock_hash {
            return Err(ConsensusError::BadSignature(format!(
                "unlock conditions do not match output {}",
                input.parent_id
            )));
        }
        if input.unlock_conditions.timelock > height {
            return Err(ConsensusError::Timelocked {
                output: input.parent_id,
                timelock: input.unlock_conditions.timelock,
            });
        }
        input_values.push(output.value);
    }

    // 4. Signatures
    verify_signatures(tx)?;

    // 5. Value conservation
    let inputs = checked_sum(input_values)?;
    let outputs = transaction_spend_total(tx)?;
    if inputs != outputs {
        return Err(ConsensusError::ValueMismatch { inputs, outputs });
    }

    // 6. New contracts must not be provable yet
    for (i, contract) in tx.file_contracts.iter().enumerate() {
        if contract.proof_start_height <= height {
            return Err(ConsensusError::InvalidContract(format!(
                "contract {} proof window starts at {}, not after height {}",
                i, contract.proof_start_height, height
            )));
        }
    }

    // 7. Storage proofs
    for proof in &tx.storage_proofs {
        validate_storage_proof(proof, view, height)?;
    }

    Ok(tx.miner_fee)
}

/// ValidateStorageProof: the proof must name an open contract whose window
/// [start, end) contains `height`, and must prove the challenged segment
/// against the contract's Merkle root.
pub fn validate_storage_proof<V: LedgerView>(proof: &StorageProof, view: &V, height: BlockHeight) -> Result<()> {
    let id = proof.contract_id;
    let contract = match view.open_contract(&id) {
        Some(contract) => contract,
        None if view.is_resolved(&id) => return Err(ConsensusError::ContractAlreadyResolved(id)),
        None => return Err(ConsensusError::UnknownContract(id)),
    };
    if height < contract.proof_start_height {
        return Err(ConsensusError::ProofWindowNotOpen(id));
    }
    if height >= contract.proof_end_height {
        return Err(ConsensusError::ContractExpired(id));
    }

    let num_segments = segment_count(contract.file_size);
    let trigger_height = contract
        .proof_start_height
        .checked_sub(1)
        .ok_or(ConsensusError::InvalidStorageProof(id))?;
    let trigger = view
        .block_id_at(trigger_height)
        .ok_or(ConsensusError::ProofWindowNotOpen(id))?;
    if num_segments == 0 {
        return Err(ConsensusError::InvalidStorageProof(id));
    }
    let index = storage_proof_segment(&id, &trigger, num_segments);
    if proof.segment.len() != segment_len(contract.file_size, index) {
        return Err(ConsensusError::InvalidStorageProof(id));
    }
    if !verify_segment(&proof.segment, &proof.hash_set, num_segments, index, &contract.file_merkle_root) {
        return Err(ConsensusError::InvalidStorageProof(id));
    }
    Ok(())
}

/// StorageProofSegment: index of the segment a host must prove
///
/// index = H(contract_id ‖ trigger_block_id) mod segments, where the trigger
/// block is the block just before the proof window opens. The host cannot
/// know the index when the contract is formed.
pub fn storage_proof_segment(contract_id: &ContractId, trigger: &BlockId, num_segments: u64) -> u64 {
    let mut enc = Encoder::new();
    contract_id.encode_to(&mut enc);
    trigger.encode_to(&mut enc);
    let seed = enc.hash();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&seed[..8]);
    u64::from_be_bytes(prefix) % num_segments.max(1)
}

fn malformed(reason: &str) -> ConsensusError {
    ConsensusError::MalformedTransaction(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ChainView, Ledger};
    use crate::merkle::{build_storage_proof, file_merkle_root};

    fn anyone() -> UnlockConditions {
        UnlockConditions::anyone_can_spend()
    }

    fn output(value: Currency) -> Output {
        Output { value, unlock_hash: anyone().unlock_hash() }
    }

    fn funded_ledger(value: Currency) -> (Ledger, OutputId) {
        let mut ledger = Ledger::new();
        let id = OutputId([1; 32]);
        ledger.outputs.insert(id, output(value)).unwrap();
        (ledger, id)
    }

    fn spend(parent: OutputId, outputs: Vec<Currency>, fee: Currency) -> Transaction {
        Transaction {
            inputs: vec![Input { parent_id: parent, unlock_conditions: anyone() }],
            outputs: outputs.into_iter().map(output).collect(),
            miner_fee: fee,
            ..Default::default()
        }
    }

    fn contract(data: &[u8], start: BlockHeight, end: BlockHeight, escrow: Currency) -> FileContract {
        FileContract {
            file_size: data.len() as u64,
            file_merkle_root: file_merkle_root(data),
            proof_start_height: start,
            proof_end_height: end,
            escrowed_funds: escrow,
            valid_proof_outputs: vec![output(escrow)],
            missed_proof_outputs: vec![output(escrow)],
            renter_id: UnlockHash([2; 32]),
            host_id: UnlockHash([3; 32]),
        }
    }

    #[test]
    fn test_valid_spend_returns_fee() {
        let (ledger, id) = funded_ledger(100);
        let path = [BlockId([0; 32])];
        let view = ChainView::new(&ledger, &path);
        let tx = spend(id, vec![60, 30], 10);
        assert_eq!(validate_transaction(&tx, &view, 1, &ConsensusParams::testing()).unwrap(), 10);
    }

    #[test]
    fn test_value_mismatch() {
        let (ledger, id) = funded_ledger(100);
        let view = ChainView::new(&ledger, &[]);
        let tx = spend(id, vec![60, 30], 5);
        assert_eq!(
            validate_transaction(&tx, &view, 1, &ConsensusParams::testing()),
            Err(ConsensusError::ValueMismatch { inputs: 100, outputs: 95 })
        );
    }

    #[test]
    fn test_missing_output_is_stale() {
        let ledger = Ledger::new();
        let view = ChainView::new(&ledger, &[]);
        let tx = spend(OutputId([5; 32]), vec![10], 0);
        let err = validate_transaction(&tx, &view, 1, &ConsensusParams::testing()).unwrap_err();
        assert_eq!(err, ConsensusError::MissingOutput(OutputId([5; 32])));
        assert_eq!(err.class(), crate::error::ErrorClass::Stale);
    }

    #[test]
    fn test_duplicate_input_is_double_spend() {
        let (ledger, id) = funded_ledger(100);
        let view = ChainView::new(&ledger, &[]);
        let mut tx = spend(id, vec![100], 0);
        tx.inputs.push(tx.inputs[0].clone());
        assert_eq!(
            validate_transaction(&tx, &view, 1, &ConsensusParams::testing()),
            Err(ConsensusError::DoubleSpend(id))
        );
    }

    #[test]
    fn test_wrong_unlock_conditions() {
        let (ledger, id) = funded_ledger(100);
        let view = ChainView::new(&ledger, &[]);
        let mut tx = spend(id, vec![100], 0);
        tx.inputs[0].unlock_conditions.signatures_required = 1;
        assert!(matches!(
            validate_transaction(&tx, &view, 1, &ConsensusParams::testing()),
            Err(ConsensusError::BadSignature(_))
        ));
    }

    #[test]
    fn test_timelocked_output() {
        let mut ledger = Ledger::new();
        let conditions = UnlockConditions { timelock: 10, ..anyone() };
        let id = OutputId([1; 32]);
        ledger
            .outputs
            .insert(id, Output { value: 100, unlock_hash: conditions.unlock_hash() })
            .unwrap();
        let view = ChainView::new(&ledger, &[]);
        let mut tx = spend(id, vec![100], 0);
        tx.inputs[0].unlock_conditions = conditions;
        let params = ConsensusParams::testing();
        assert!(matches!(
            validate_transaction(&tx, &view, 9, &params),
            Err(ConsensusError::Timelocked { .. })
        ));
        assert!(validate_transaction(&tx, &view, 10, &params).is_ok());
    }

    #[test]
    fn test_malformed_transactions() {
        let params = ConsensusParams::testing();
        assert!(matches!(
            check_transaction(&Transaction::default(), &params),
            Err(ConsensusError::MalformedTransaction(_))
        ));
        let zero = spend(OutputId([1; 32]), vec![0], 0);
        assert!(matches!(check_transaction(&zero, &params), Err(ConsensusError::MalformedTransaction(_))));
    }

    #[test]
    fn test_contract_payouts_must_match_escrow() {
        let params = ConsensusParams::testing();
        let mut c = contract(&[1u8; 100], 5, 10, 50);
        c.missed_proof_outputs[0].value = 49;
        let tx = Transaction { file_contracts: vec![c], ..Default::default() };
        assert!(matches!(check_transaction(&tx, &params), Err(ConsensusError::InvalidContract(_))));
    }

    #[test]
    fn test_contract_must_start_in_future() {
        let (ledger, id) = funded_ledger(100);
        let view = ChainView::new(&ledger, &[]);
        let mut tx = spend(id, vec![50], 0);
        tx.file_contracts.push(contract(&[1u8; 100], 3, 10, 50));
        let params = ConsensusParams::testing();
        assert!(matches!(
            validate_transaction(&tx, &view, 3, &params),
            Err(ConsensusError::InvalidContract(_))
        ));
        assert!(validate_transaction(&tx, &view, 2, &params).is_ok());
    }

    #[test]
    fn test_storage_proof_window_and_resolution() {
        let data: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let c = contract(&data, 3, 6, 50);
        let cid = ContractId([4; 32]);
        let mut ledger = Ledger::new();
        ledger
            .apply_entry(
                &crate::ledger::LedgerDiff::ContractOpened { id: cid, contract: c.clone() },
                crate::ledger::DiffDirection::Apply,
            )
            .unwrap();
        let path: Vec<BlockId> = (0..10u8).map(|b| BlockId([b; 32])).collect();
        let view = ChainView::new(&ledger, &path);

        let segments = segment_count(c.file_size);
        let index = storage_proof_segment(&cid, &path[2], segments);
        let (segment, hash_set) = build_storage_proof(&data, index).unwrap();
        let proof = StorageProof { contract_id: cid, segment, hash_set };

        assert_eq!(validate_storage_proof(&proof, &view, 2), Err(ConsensusError::ProofWindowNotOpen(cid)));
        assert!(validate_storage_proof(&proof, &view, 3).is_ok());
        assert!(validate_storage_proof(&proof, &view, 5).is_ok());
        assert_eq!(validate_storage_proof(&proof, &view, 6), Err(ConsensusError::ContractExpired(cid)));

        let mut bad = proof.clone();
        bad.segment[0] ^= 0xff;
        assert_eq!(validate_storage_proof(&bad, &view, 4), Err(ConsensusError::InvalidStorageProof(cid)));

        let unknown = StorageProof { contract_id: ContractId([8; 32]), ..proof };
        assert_eq!(
            validate_storage_proof(&unknown, &view, 4),
            Err(ConsensusError::UnknownContract(ContractId([8; 32])))
        );
    }
}

//! Output Set, Contract Set and the diffs that move them between blocks
//!
//! Every mutation of the ledger is expressed as a [`LedgerDiff`]. Applying a
//! block records its diffs in order; reverting the block replays them in
//! reverse with the opposite direction, which restores the exact prior
//! content of both sets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::economic::checked_sum;
use crate::error::{ConsensusError, Result};
use crate::types::*;

// ============================================================================
// OUTPUT SET
// ============================================================================

/// Output Set: 𝒪 → Output, the unspent outputs of the current path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSet {
    outputs: HashMap<OutputId, Output>,
}

impl OutputSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &OutputId) -> Option<&Output> {
        self.outputs.get(id)
    }

    pub fn contains(&self, id: &OutputId) -> bool {
        self.outputs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutputId, &Output)> {
        self.outputs.iter()
    }

    pub fn total_value(&self) -> Result<Currency> {
        checked_sum(self.outputs.values().map(|o| o.value))
    }

    pub fn insert(&mut self, id: OutputId, output: Output) -> Result<()> {
        if self.outputs.contains_key(&id) {
            return Err(ConsensusError::Inconsistency(format!("output {} already exists", id)));
        }
        self.outputs.insert(id, output);
        Ok(())
    }

    pub fn remove(&mut self, id: &OutputId) -> Result<Output> {
        self.outputs
            .remove(id)
            .ok_or_else(|| ConsensusError::Inconsistency(format!("output {} does not exist", id)))
    }
}

// ============================================================================
// CONTRACT SET
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractOutcome {
    ValidProof,
    MissedProof,
}

/// A contract that has paid out, kept so it cannot be resolved again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedContract {
    pub contract: FileContract,
    pub outcome: ContractOutcome,
    pub height: BlockHeight,
}

impl ResolvedContract {
    /// Outputs paid by this resolution
    pub fn payouts(&self) -> &[Output] {
        match self.outcome {
            ContractOutcome::ValidProof => &self.contract.valid_proof_outputs,
            ContractOutcome::MissedProof => &self.contract.missed_proof_outputs,
        }
    }
}

/// Contract Set: open contracts by id, plus the record of resolved ones
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractSet {
    open: BTreeMap<ContractId, FileContract>,
    resolved: BTreeMap<ContractId, ResolvedContract>,
}

impl ContractSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_open(&self, id: &ContractId) -> Option<&FileContract> {
        self.open.get(id)
    }

    pub fn get_resolved(&self, id: &ContractId) -> Option<&ResolvedContract> {
        self.resolved.get(id)
    }

    pub fn open_len(&self) -> usize {
        self.open.len()
    }

    pub fn resolved_len(&self) -> usize {
        self.resolved.len()
    }

    pub fn open_contracts(&self) -> impl Iterator<Item = (&ContractId, &FileContract)> {
        self.open.iter()
    }

    /// Total funds held in escrow by open contracts
    pub fn escrowed_total(&self) -> Result<Currency> {
        checked_sum(self.open.values().map(|c| c.escrowed_funds))
    }

    /// Open contracts whose proof window closes at `height`, in id order
    pub fn expiring_at(&self, height: BlockHeight) -> Vec<ContractId> {
        self.open
            .iter()
            .filter(|(_, c)| c.proof_end_height == height)
            .map(|(id, _)| *id)
            .collect()
    }

    fn insert_open(&mut self, id: ContractId, contract: FileContract) -> Result<()> {
        if self.open.contains_key(&id) || self.resolved.contains_key(&id) {
            return Err(ConsensusError::Inconsistency(format!("contract {} already exists", id)));
        }
        self.open.insert(id, contract);
        Ok(())
    }

    fn remove_open(&mut self, id: &ContractId) -> Result<FileContract> {
        self.open
            .remove(id)
            .ok_or_else(|| ConsensusError::Inconsistency(format!("contract {} is not open", id)))
    }

    fn resolve(&mut self, id: ContractId, resolution: ResolvedContract) -> Result<()> {
        let contract = self.remove_open(&id)?;
        if contract != resolution.contract {
            self.open.insert(id, contract);
            return Err(ConsensusError::Inconsistency(format!("contract {} changed before resolution", id)));
        }
        self.resolved.insert(id, resolution);
        Ok(())
    }

    fn unresolve(&mut self, id: &ContractId) -> Result<()> {
        let resolution = self
            .resolved
            .remove(id)
            .ok_or_else(|| ConsensusError::Inconsistency(format!("contract {} is not resolved", id)))?;
        self.open.insert(*id, resolution.contract);
        Ok(())
    }
}

// ============================================================================
// DIFFS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffDirection {
    Apply,
    Revert,
}

/// One atomic change to the Output Set or Contract Set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerDiff {
    OutputCreated { id: OutputId, output: Output },
    OutputSpent { id: OutputId, output: Output },
    ContractOpened { id: ContractId, contract: FileContract },
    ContractResolved { id: ContractId, resolution: ResolvedContract },
}

/// The ordered changes one block made to the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDiff {
    pub block_id: BlockId,
    pub height: BlockHeight,
    pub entries: Vec<LedgerDiff>,
}

impl BlockDiff {
    pub fn new(block_id: BlockId, height: BlockHeight) -> Self {
        Self { block_id, height, entries: Vec::new() }
    }
}

// ============================================================================
// LEDGER
// ============================================================================

/// The Output Set and Contract Set of one chain state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    pub outputs: OutputSet,
    pub contracts: ContractSet,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a single diff entry in the given direction
    pub fn apply_entry(&mut self, entry: &LedgerDiff, direction: DiffDirection) -> Result<()> {
        use DiffDirection::*;
        match (entry, direction) {
            (LedgerDiff::OutputCreated { id, output }, Apply)
            | (LedgerDiff::OutputSpent { id, output }, Revert) => self.outputs.insert(*id, output.clone()),
            (LedgerDiff::OutputCreated { id, output }, Revert)
            | (LedgerDiff::OutputSpent { id, output }, Apply) => {
                let removed = self.outputs.remove(id)?;
                if removed != *output {
                    self.outputs.outputs.insert(*id, removed);
                    return Err(ConsensusError::Inconsistency(format!("output {} does not match diff", id)));
                }
                Ok(())
            }
            (LedgerDiff::ContractOpened { id, contract }, Apply) => self.contracts.insert_open(*id, contract.clone()),
            (LedgerDiff::ContractOpened { id, .. }, Revert) => self.contracts.remove_open(id).map(|_| ()),
            (LedgerDiff::ContractResolved { id, resolution }, Apply) => self.contracts.resolve(*id, resolution.clone()),
            (LedgerDiff::ContractResolved { id, .. }, Revert) => self.contracts.unresolve(id),
        }
    }

    /// Apply or revert a whole block diff. Either every entry is committed or
    /// the ledger is left unchanged.
    pub fn commit_diff(&mut self, diff: &BlockDiff, direction: DiffDirection) -> Result<()> {
        let ordered: Vec<&LedgerDiff> = match direction {
            DiffDirection::Apply => diff.entries.iter().collect(),
            DiffDirection::Revert => diff.entries.iter().rev().collect(),
        };
        for (done, entry) in ordered.iter().enumerate() {
            if let Err(e) = self.apply_entry(entry, direction) {
                let undo = opposite(direction);
                for committed in ordered[..done].iter().rev() {
                    // Undoing entries that were just applied cannot fail
                    let _ = self.apply_entry(committed, undo);
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

fn opposite(direction: DiffDirection) -> DiffDirection {
    match direction {
        DiffDirection::Apply => DiffDirection::Revert,
        DiffDirection::Revert => DiffDirection::Apply,
    }
}

// ============================================================================
// VIEWS
// ============================================================================

/// Read access to a chain state for validation
pub trait LedgerView {
    fn output(&self, id: &OutputId) -> Option<&Output>;

    /// Whether the output was spent earlier in the block being validated
    fn spent_in_block(&self, _id: &OutputId) -> bool {
        false
    }

    fn open_contract(&self, id: &ContractId) -> Option<&FileContract>;

    fn is_resolved(&self, id: &ContractId) -> bool;

    /// Id of the block at `height` on the path being validated
    fn block_id_at(&self, height: BlockHeight) -> Option<BlockId>;
}

/// A ledger together with the path that produced it
#[derive(Debug, Clone, Copy)]
pub struct ChainView<'a> {
    pub ledger: &'a Ledger,
    pub path: &'a [BlockId],
}

impl<'a> ChainView<'a> {
    pub fn new(ledger: &'a Ledger, path: &'a [BlockId]) -> Self {
        Self { ledger, path }
    }
}

impl LedgerView for ChainView<'_> {
    fn output(&self, id: &OutputId) -> Option<&Output> {
        self.ledger.outputs.get(id)
    }

    fn open_contract(&self, id: &ContractId) -> Option<&FileContract> {
        self.ledger.contracts.get_open(id)
    }

    fn is_resolved(&self, id: &ContractId) -> bool {
        self.ledger.contracts.get_resolved(id).is_some()
    }

    fn block_id_at(&self, height: BlockHeight) -> Option<BlockId> {
        usize::try_from(height).ok().and_then(|h| self.path.get(h)).copied()
    }
}

/// Staged effects of the transactions validated so far within one block,
/// layered over the parent state without mutating it.
pub struct BlockOverlay<'a, V: LedgerView> {
    base: &'a V,
    spent: HashSet<OutputId>,
    created: HashMap<OutputId, Output>,
    resolved: HashSet<ContractId>,
    opened: HashMap<ContractId, FileContract>,
}

impl<'a, V: LedgerView> BlockOverlay<'a, V> {
    pub fn new(base: &'a V) -> Self {
        Self {
            base,
            spent: HashSet::new(),
            created: HashMap::new(),
            resolved: HashSet::new(),
            opened: HashMap::new(),
        }
    }

    /// Record the effects of a validated transaction
    pub fn stage(&mut self, tx: &Transaction) {
        for input in &tx.inputs {
            self.created.remove(&input.parent_id);
            self.spent.insert(input.parent_id);
        }
        for (i, output) in tx.outputs.iter().enumerate() {
            self.created.insert(tx.output_id(i), output.clone());
        }
        for (i, contract) in tx.file_contracts.iter().enumerate() {
            self.opened.insert(tx.contract_id(i), contract.clone());
        }
        for proof in &tx.storage_proofs {
            self.resolved.insert(proof.contract_id);
        }
    }
}

impl<V: LedgerView> LedgerView for BlockOverlay<'_, V> {
    fn output(&self, id: &OutputId) -> Option<&Output> {
        if self.spent.contains(id) {
            return None;
        }
        self.created.get(id).or_else(|| self.base.output(id))
    }

    fn spent_in_block(&self, id: &OutputId) -> bool {
        self.spent.contains(id) || self.base.spent_in_block(id)
    }

    fn open_contract(&self, id: &ContractId) -> Option<&FileContract> {
        if self.resolved.contains(id) {
            return None;
        }
        self.opened.get(id).or_else(|| self.base.open_contract(id))
    }

    fn is_resolved(&self, id: &ContractId) -> bool {
        self.resolved.contains(id) || self.base.is_resolved(id)
    }

    fn block_id_at(&self, height: BlockHeight) -> Option<BlockId> {
        self.base.block_id_at(height)
    }
}

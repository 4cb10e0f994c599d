//! Transaction pool: unconfirmed transactions valid against the current tip
//!
//! Admission is first-seen: a transaction that spends an output or proves a
//! contract already claimed by a pooled transaction is rejected, never
//! replaced. Pooled transactions are pairwise non-conflicting and each
//! validates against the tip, so the pool in insertion order is always a
//! valid block body (up to the size limit).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ConsensusError, Result};
use crate::state::{ConsensusChange, ConsensusSet, ConsensusSubscriber};
use crate::transaction::validate_transaction;
use crate::types::*;

/// A pooled transaction and the tip height it was last validated at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub transaction: Transaction,
    pub id: TransactionId,
    pub fee: Currency,
    pub validated_height: BlockHeight,
}

#[derive(Debug, Default)]
struct PoolInner {
    /// Entries keyed by arrival sequence number
    entries: BTreeMap<u64, PoolEntry>,
    ids: HashMap<TransactionId, u64>,
    spent_outputs: HashMap<OutputId, TransactionId>,
    proven_contracts: HashMap<ContractId, TransactionId>,
    next_seq: u64,
}

impl PoolInner {
    /// Duplicate, conflict and capacity checks, in that order
    fn check_admission(&self, tx: &Transaction, id: &TransactionId, limit: usize) -> Result<()> {
        if self.ids.contains_key(id) {
            return Err(ConsensusError::DuplicateTransaction(*id));
        }
        for input in &tx.inputs {
            if let Some(other) = self.spent_outputs.get(&input.parent_id) {
                return Err(ConsensusError::PoolConflict(*other));
            }
        }
        for proof in &tx.storage_proofs {
            if let Some(other) = self.proven_contracts.get(&proof.contract_id) {
                return Err(ConsensusError::PoolConflict(*other));
            }
        }
        if self.entries.len() >= limit {
            return Err(ConsensusError::PoolFull);
        }
        Ok(())
    }

    fn insert(&mut self, entry: PoolEntry) {
        for input in &entry.transaction.inputs {
            self.spent_outputs.insert(input.parent_id, entry.id);
        }
        for proof in &entry.transaction.storage_proofs {
            self.proven_contracts.insert(proof.contract_id, entry.id);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ids.insert(entry.id, seq);
        self.entries.insert(seq, entry);
    }

    fn drain(&mut self) -> Vec<PoolEntry> {
        self.ids.clear();
        self.spent_outputs.clear();
        self.proven_contracts.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

pub struct TransactionPool {
    consensus: Arc<ConsensusSet>,
    inner: Mutex<PoolInner>,
}

impl TransactionPool {
    /// Create a pool over `consensus` and subscribe it to path changes
    pub fn new(consensus: Arc<ConsensusSet>) -> Arc<Self> {
        let pool = Arc::new(Self { consensus: consensus.clone(), inner: Mutex::new(PoolInner::default()) });
        consensus.subscribe(&pool);
        pool
    }

    /// AcceptToMemoryPool: 𝒯𝒳 × 𝒫 → 𝒫
    ///
    /// 1. Reject a transaction already pooled
    /// 2. Reject a transaction conflicting with a pooled one
    /// 3. Reject when the pool is full
    /// 4. Validate against the tip for inclusion in the next block
    /// 5. Append to the pool
    pub fn accept_transaction(&self, tx: Transaction) -> Result<TransactionId> {
        let id = tx.id();
        self.consensus.with_tip(|tip| {
            let mut inner = self.inner.lock();
            // 1-3. Pool rules
            inner.check_admission(&tx, &id, tip.params.pool_size_limit)?;
            // 4. Consensus rules
            let height = tip.next_height();
            let fee = validate_transaction(&tx, &tip.view, height, tip.params)?;
            // 5. Admit
            debug!(tx = %id, fee = %fee, pooled = inner.entries.len() + 1, "accepted transaction");
            inner.insert(PoolEntry { transaction: tx, id, fee, validated_height: height });
            Ok(id)
        })?
    }

    /// Pooled transactions in insertion order
    pub fn transactions(&self) -> Vec<Transaction> {
        self.inner.lock().entries.values().map(|e| e.transaction.clone()).collect()
    }

    pub fn entries(&self) -> Vec<PoolEntry> {
        self.inner.lock().entries.values().cloned().collect()
    }

    pub fn contains(&self, id: &TransactionId) -> bool {
        self.inner.lock().ids.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Re-validate every pooled transaction against the current tip and drop
    /// the ones that no longer validate
    pub fn notify_new_tip(&self) {
        self.revalidate(Vec::new(), &HashSet::new());
    }

    /// Rebuild the pool from `readmit` followed by the current entries,
    /// skipping ids in `confirmed`. Order among survivors is preserved.
    fn revalidate(&self, readmit: Vec<Transaction>, confirmed: &HashSet<TransactionId>) {
        let outcome = self.consensus.with_tip(|tip| {
            let mut inner = self.inner.lock();
            let previous = inner.drain();
            let height = tip.next_height();
            let candidates = readmit
                .into_iter()
                .chain(previous.into_iter().map(|e| e.transaction));

            let mut dropped = 0usize;
            for tx in candidates {
                let id = tx.id();
                if confirmed.contains(&id) {
                    continue;
                }
                let admitted = inner
                    .check_admission(&tx, &id, tip.params.pool_size_limit)
                    .and_then(|_| validate_transaction(&tx, &tip.view, height, tip.params));
                match admitted {
                    Ok(fee) => inner.insert(PoolEntry { transaction: tx, id, fee, validated_height: height }),
                    Err(e) => {
                        debug!(tx = %id, error = %e, "dropped transaction from pool");
                        dropped += 1;
                    }
                }
            }
            (inner.entries.len(), dropped)
        });
        if let Ok((pooled, dropped)) = outcome {
            debug!(pooled, dropped, "revalidated transaction pool");
        }
    }
}

impl ConsensusSubscriber for TransactionPool {
    /// Remove confirmed transactions, put back the transactions of reverted
    /// blocks, and drop anything that no longer validates
    fn process_consensus_change(&self, change: &ConsensusChange) {
        let confirmed: HashSet<TransactionId> = change
            .applied_blocks
            .iter()
            .flat_map(|b| b.transactions.iter().map(|t| t.id()))
            .collect();
        let readmit = change
            .reverted_blocks
            .iter()
            .rev()
            .flat_map(|b| b.transactions.iter().cloned())
            .collect();
        self.revalidate(readmit, &confirmed);
    }
}

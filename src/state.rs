//! Consensus State: the block tree, the current path and the ledger it
//! produces, behind a single writer lock.
//!
//! Mutations (`accept_block`) take the write lock for the whole
//! validate/insert/reorganize sequence, so no reader ever sees a partially
//! applied reorganization. Changes to the current path are queued while the
//! lock is still held and delivered to subscribers after it is released.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::block::{apply_genesis, check_block_header, genesis_block};
use crate::config::ConsensusParams;
use crate::error::{ConsensusError, ErrorClass, Result};
use crate::ledger::{BlockDiff, ChainView, Ledger, ResolvedContract};
use crate::pow::{check_proof_of_work, Target, U256};
use crate::reorganization::{execute_reorganization, plan_reorganization, should_reorganize};
use crate::transaction::validate_transaction;
use crate::tree::{BlockNode, BlockTree};
use crate::types::*;

// ============================================================================
// CLOCK
// ============================================================================

/// Source of local time for the future-timestamp rule
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: Timestamp) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

/// One change of the current path, in application order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusChange {
    /// Blocks removed from the current path, old tip first
    pub reverted_blocks: Vec<Block>,
    /// Blocks added to the current path, lowest height first
    pub applied_blocks: Vec<Block>,
    pub reverted_diffs: Vec<BlockDiff>,
    pub applied_diffs: Vec<BlockDiff>,
    pub new_tip: BlockId,
    pub new_height: BlockHeight,
}

/// Receiver of current-path changes. Notifications are advisory: a
/// subscriber that needs the latest state should query it.
pub trait ConsensusSubscriber: Send + Sync {
    fn process_consensus_change(&self, change: &ConsensusChange);
}

// ============================================================================
// ORPHANS
// ============================================================================

/// Blocks waiting for their parent, evicted oldest first
#[derive(Debug, Default)]
struct OrphanPool {
    by_parent: HashMap<BlockId, Vec<Block>>,
    /// Parent and arrival sequence of every held orphan
    entries: HashMap<BlockId, (BlockId, u64)>,
    arrival: BTreeMap<u64, BlockId>,
    next_seq: u64,
}

impl OrphanPool {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, id: &BlockId) -> bool {
        self.entries.contains_key(id)
    }

    fn insert(&mut self, id: BlockId, block: Block, limit: usize) {
        if limit == 0 || self.contains(&id) {
            return;
        }
        while self.len() >= limit {
            let Some((_, oldest)) = self.arrival.pop_first() else {
                break;
            };
            if self.remove(&oldest) {
                warn!(block = %oldest, "orphan pool full, dropped oldest orphan");
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(id, (block.parent_id, seq));
        self.arrival.insert(seq, id);
        self.by_parent.entry(block.parent_id).or_default().push(block);
    }

    fn remove(&mut self, id: &BlockId) -> bool {
        let Some((parent, seq)) = self.entries.remove(id) else {
            return false;
        };
        self.arrival.remove(&seq);
        if let Some(siblings) = self.by_parent.get_mut(&parent) {
            siblings.retain(|b| b.id() != *id);
            if siblings.is_empty() {
                self.by_parent.remove(&parent);
            }
        }
        true
    }

    /// Remove and return every orphan whose parent is `parent`
    fn take_children(&mut self, parent: &BlockId) -> Vec<Block> {
        let children = self.by_parent.remove(parent).unwrap_or_default();
        for child in &children {
            if let Some((_, seq)) = self.entries.remove(&child.id()) {
                self.arrival.remove(&seq);
            }
        }
        children
    }
}

/// Ids of rejected blocks, forgotten oldest first once `limit` is reached
#[derive(Debug, Default)]
struct InvalidSet {
    ids: HashSet<BlockId>,
    order: VecDeque<BlockId>,
}

impl InvalidSet {
    fn contains(&self, id: &BlockId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: BlockId, limit: usize) {
        if limit == 0 || !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > limit {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

// ============================================================================
// STATE
// ============================================================================

struct State {
    tree: BlockTree,
    /// Block ids of the current path, indexed by height
    path: Vec<BlockId>,
    ledger: Ledger,
    invalid: InvalidSet,
    orphans: OrphanPool,
}

impl State {
    fn tip(&self) -> Result<&BlockNode> {
        let id = self
            .path
            .last()
            .ok_or_else(|| ConsensusError::Inconsistency("empty current path".to_string()))?;
        self.tree.node(id)
    }

    fn view(&self) -> ChainView<'_> {
        ChainView::new(&self.ledger, &self.path)
    }

    /// Accept a block and then every orphan it makes connectable
    fn accept_block(
        &mut self,
        block: Block,
        params: &ConsensusParams,
        now: Timestamp,
        changes: &mut Vec<ConsensusChange>,
    ) -> Result<()> {
        let id = self.accept_one(block, params, now, changes)?;

        let mut connected = vec![id];
        while let Some(parent) = connected.pop() {
            for orphan in self.orphans.take_children(&parent) {
                let orphan_id = orphan.id();
                match self.accept_one(orphan, params, now, changes) {
                    Ok(accepted) => connected.push(accepted),
                    Err(e) => debug!(block = %orphan_id, error = %e, "orphan rejected after parent arrived"),
                }
            }
        }
        Ok(())
    }

    /// AcceptBlock: ℬ × 𝒮 → 𝒮
    ///
    /// 1. Reject known and known-invalid blocks
    /// 2. Hold blocks with an unknown parent as orphans
    /// 3. Check the header against the parent
    /// 4. Insert into the tree
    /// 5. If the new block outweighs the tip, reorganize onto it
    fn accept_one(
        &mut self,
        block: Block,
        params: &ConsensusParams,
        now: Timestamp,
        changes: &mut Vec<ConsensusChange>,
    ) -> Result<BlockId> {
        let id = block.id();

        // 1. Known blocks
        if self.tree.contains(&id) || self.orphans.contains(&id) {
            return Err(ConsensusError::BlockKnown(id));
        }
        if self.invalid.contains(&id) {
            return Err(ConsensusError::KnownInvalid(id));
        }

        // 2. Orphans
        let Some(parent) = self.tree.get(&block.parent_id) else {
            if self.invalid.contains(&block.parent_id) {
                self.invalid.insert(id, params.max_known_invalid);
                return Err(ConsensusError::KnownInvalid(id));
            }
            // No block can be easier than the root target
            check_proof_of_work(&id, &params.root_target)?;
            let parent_id = block.parent_id;
            debug!(block = %id, parent = %parent_id, "holding orphan block");
            self.orphans.insert(id, block, params.max_orphans);
            return Err(ConsensusError::Orphan(parent_id));
        };

        // 3. Header
        if let Err(e) = check_block_header(&block, parent.block.timestamp, &parent.child_target, params, now) {
            // Work is cheaper to recheck than to remember
            let remember = e.class() == ErrorClass::Invalid && !matches!(e, ConsensusError::InsufficientWork(_));
            if remember {
                self.invalid.insert(id, params.max_known_invalid);
            }
            warn!(block = %id, error = %e, "rejected block header");
            return Err(e);
        }

        // 4. Tree
        self.tree.insert(block, params)?;
        let node = self.tree.node(&id)?;
        if !should_reorganize(node, self.tip()?) {
            debug!(block = %id, height = node.height, "block added to side chain");
            return Ok(id);
        }

        // 5. Fork choice
        self.switch_to(id, params, changes)?;
        Ok(id)
    }

    fn switch_to(&mut self, new_tip: BlockId, params: &ConsensusParams, changes: &mut Vec<ConsensusChange>) -> Result<()> {
        let plan = plan_reorganization(&self.tree, &self.path, &new_tip)?;
        match execute_reorganization(&mut self.tree, &mut self.path, &mut self.ledger, &plan, params) {
            Ok(result) => {
                let height = self.path.len() as u64 - 1;
                if result.depth() > 0 {
                    info!(
                        tip = %new_tip,
                        height,
                        ancestor = %plan.common_ancestor,
                        reverted = result.depth(),
                        applied = result.applied.len(),
                        "reorganized current path"
                    );
                } else {
                    info!(tip = %new_tip, height, "extended current path");
                }
                changes.push(self.change_for(&result.reverted, &result.applied)?);
                Ok(())
            }
            Err(failure) => {
                let on_new_branch = plan.apply.contains(&failure.failed);
                if !on_new_branch {
                    // The old path stays as it is
                    error!(
                        block = %failure.failed,
                        error = %failure.error,
                        "current path block could not be reverted, reorganization rolled back"
                    );
                } else if failure.cached || failure.error.class() == ErrorClass::Internal {
                    error!(
                        block = %failure.failed,
                        error = %failure.error,
                        "previously applied block failed to apply, reorganization rolled back"
                    );
                } else {
                    warn!(block = %failure.failed, error = %failure.error, "block failed to apply, reorganization rolled back");
                }
                if on_new_branch {
                    for removed in self.tree.remove_subtree(&failure.failed) {
                        self.invalid.insert(removed, params.max_known_invalid);
                    }
                }

                let direct = plan.revert.is_empty() && failure.failed == new_tip;
                Err(if direct {
                    failure.error
                } else {
                    ConsensusError::ReorgAborted { failed: failure.failed, source: Box::new(failure.error) }
                })
            }
        }
    }

    fn change_for(&self, reverted: &[BlockId], applied: &[BlockId]) -> Result<ConsensusChange> {
        let mut change = ConsensusChange {
            reverted_blocks: Vec::with_capacity(reverted.len()),
            applied_blocks: Vec::with_capacity(applied.len()),
            reverted_diffs: Vec::with_capacity(reverted.len()),
            applied_diffs: Vec::with_capacity(applied.len()),
            new_tip: self.tip()?.id,
            new_height: self.tip()?.height,
        };
        for (ids, blocks, diffs) in [
            (reverted, &mut change.reverted_blocks, &mut change.reverted_diffs),
            (applied, &mut change.applied_blocks, &mut change.applied_diffs),
        ] {
            for id in ids {
                let node = self.tree.node(id)?;
                blocks.push(node.block.clone());
                if let Some(diff) = &node.diff {
                    diffs.push(diff.clone());
                }
            }
        }
        Ok(change)
    }
}

/// Read access to the tip, handed out under the shared lock
pub struct Tip<'a> {
    pub node: &'a BlockNode,
    pub view: ChainView<'a>,
    pub params: &'a ConsensusParams,
}

impl Tip<'_> {
    /// Height of a block built on this tip
    pub fn next_height(&self) -> BlockHeight {
        self.node.height + 1
    }
}

// ============================================================================
// CONSENSUS SET
// ============================================================================

pub struct ConsensusSet {
    params: ConsensusParams,
    clock: Arc<dyn Clock>,
    state: RwLock<State>,
    subscribers: Mutex<Vec<Weak<dyn ConsensusSubscriber>>>,
    pending: Mutex<VecDeque<ConsensusChange>>,
    dispatch: Mutex<()>,
}

impl ConsensusSet {
    /// CreateGenesisState: build the genesis block and the state containing
    /// only it
    pub fn new(params: ConsensusParams) -> Result<Arc<Self>> {
        Self::with_clock(params, Arc::new(SystemClock))
    }

    pub fn with_clock(params: ConsensusParams, clock: Arc<dyn Clock>) -> Result<Arc<Self>> {
        let genesis = genesis_block(&params);
        let genesis_id = genesis.id();
        let mut ledger = Ledger::new();
        let diff = apply_genesis(&genesis, &mut ledger)?;
        let tree = BlockTree::new(genesis, diff, &params);
        info!(genesis = %genesis_id, outputs = ledger.outputs.len(), "created genesis state");

        Ok(Arc::new(Self {
            params,
            clock,
            state: RwLock::new(State {
                tree,
                path: vec![genesis_id],
                ledger,
                invalid: InvalidSet::default(),
                orphans: OrphanPool::default(),
            }),
            subscribers: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            dispatch: Mutex::new(()),
        }))
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Feed a block into validation and fork choice.
    ///
    /// Returns `Orphan` if the parent is unknown (the block is held and
    /// retried when the parent arrives), `Ok` if the block joined the tree
    /// (whether or not it became the tip), and an error otherwise.
    pub fn accept_block(&self, block: Block) -> Result<()> {
        let result = {
            let mut state = self.state.write();
            let mut changes = Vec::new();
            let result = state.accept_block(block, &self.params, self.clock.now(), &mut changes);
            // Queue under the write lock so changes keep application order
            self.pending.lock().extend(changes);
            result
        };
        self.dispatch_pending();
        result
    }

    /// Register for current-path changes. Only a weak reference is kept.
    pub fn subscribe<S: ConsensusSubscriber + 'static>(&self, subscriber: &Arc<S>) {
        let weak: Weak<dyn ConsensusSubscriber> = Arc::downgrade(subscriber) as Weak<dyn ConsensusSubscriber>;
        self.subscribers.lock().push(weak);
    }

    /// Deliver queued changes. Only one thread dispatches at a time; a thread
    /// that finds the dispatcher busy leaves its changes to it.
    fn dispatch_pending(&self) {
        loop {
            let Some(guard) = self.dispatch.try_lock() else {
                return;
            };
            loop {
                let next = self.pending.lock().pop_front();
                let Some(change) = next else {
                    break;
                };
                let subscribers: Vec<Arc<dyn ConsensusSubscriber>> = {
                    let mut subscribers = self.subscribers.lock();
                    subscribers.retain(|s| s.strong_count() > 0);
                    subscribers.iter().filter_map(Weak::upgrade).collect()
                };
                for subscriber in subscribers {
                    subscriber.process_consensus_change(&change);
                }
            }
            drop(guard);
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Run `f` against the tip under the shared lock
    pub fn with_tip<R>(&self, f: impl FnOnce(&Tip<'_>) -> R) -> Result<R> {
        let state = self.state.read();
        let tip = Tip { node: state.tip()?, view: state.view(), params: &self.params };
        Ok(f(&tip))
    }

    /// Validate a transaction for inclusion in the next block; returns its fee
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<Currency> {
        self.with_tip(|tip| validate_transaction(tx, &tip.view, tip.next_height(), tip.params))?
    }

    pub fn genesis_id(&self) -> BlockId {
        self.state.read().tree.genesis()
    }

    pub fn height(&self) -> BlockHeight {
        self.state.read().path.len() as u64 - 1
    }

    pub fn current_block_id(&self) -> BlockId {
        let state = self.state.read();
        state.path.last().copied().unwrap_or_else(|| state.tree.genesis())
    }

    pub fn current_block(&self) -> Result<Block> {
        Ok(self.state.read().tip()?.block.clone())
    }

    pub fn current_weight(&self) -> Result<U256> {
        Ok(self.state.read().tip()?.weight)
    }

    /// Target the next block on the current path must meet
    pub fn current_target(&self) -> Result<Target> {
        Ok(self.state.read().tip()?.child_target)
    }

    pub fn block_id_at_height(&self, height: BlockHeight) -> Option<BlockId> {
        let state = self.state.read();
        usize::try_from(height).ok().and_then(|h| state.path.get(h)).copied()
    }

    pub fn block_at_height(&self, height: BlockHeight) -> Option<Block> {
        let state = self.state.read();
        let id = usize::try_from(height).ok().and_then(|h| state.path.get(h))?;
        state.tree.get(id).map(|n| n.block.clone())
    }

    pub fn block(&self, id: &BlockId) -> Option<Block> {
        self.state.read().tree.get(id).map(|n| n.block.clone())
    }

    pub fn block_height(&self, id: &BlockId) -> Option<BlockHeight> {
        self.state.read().tree.get(id).map(|n| n.height)
    }

    /// Target a child of block `id` must meet
    pub fn child_target(&self, id: &BlockId) -> Option<Target> {
        self.state.read().tree.get(id).map(|n| n.child_target)
    }

    pub fn contains_block(&self, id: &BlockId) -> bool {
        self.state.read().tree.contains(id)
    }

    pub fn in_current_path(&self, id: &BlockId) -> bool {
        let state = self.state.read();
        state
            .tree
            .get(id)
            .and_then(|n| usize::try_from(n.height).ok())
            .and_then(|h| state.path.get(h))
            .map_or(false, |on_path| on_path == id)
    }

    pub fn is_known_invalid(&self, id: &BlockId) -> bool {
        self.state.read().invalid.contains(id)
    }

    pub fn orphan_count(&self) -> usize {
        self.state.read().orphans.len()
    }

    pub fn output(&self, id: &OutputId) -> Option<Output> {
        self.state.read().ledger.outputs.get(id).cloned()
    }

    pub fn open_contract(&self, id: &ContractId) -> Option<FileContract> {
        self.state.read().ledger.contracts.get_open(id).cloned()
    }

    pub fn resolved_contract(&self, id: &ContractId) -> Option<ResolvedContract> {
        self.state.read().ledger.contracts.get_resolved(id).cloned()
    }

    /// Copy of the Output Set and Contract Set at the tip
    pub fn ledger_snapshot(&self) -> Ledger {
        self.state.read().ledger.clone()
    }

    /// Ids of the current path, genesis first
    pub fn current_path(&self) -> Vec<BlockId> {
        self.state.read().path.clone()
    }

    /// SendBlocks: blocks on the current path after the most recent of
    /// `known` that is on it, at most `max_catch_up_blocks`. `known` is
    /// ordered most recent first; genesis is assumed known if none match.
    pub fn blocks_after(&self, known: &[BlockId]) -> Vec<Block> {
        let state = self.state.read();
        let start = known
            .iter()
            .find_map(|id| {
                let node = state.tree.get(id)?;
                let height = usize::try_from(node.height).ok()?;
                (state.path.get(height) == Some(id)).then_some(height)
            })
            .unwrap_or(0);
        state.path[start + 1..]
            .iter()
            .take(self.params.max_catch_up_blocks)
            .filter_map(|id| state.tree.get(id).map(|n| n.block.clone()))
            .collect()
    }
}

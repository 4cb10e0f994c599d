//! Fork choice and chain reorganization
//!
//! A reorganization is planned as two explicit stacks over the block tree:
//! blocks to revert (old tip first) and blocks to apply (oldest first). It is
//! executed against the ledger as one unit; on the first failure everything
//! done so far is undone and the pre-reorg tip is restored.

use std::cmp::Ordering;

use crate::block::{apply_block, reapply_block, revert_block};
use crate::config::ConsensusParams;
use crate::error::{ConsensusError, Result};
use crate::ledger::Ledger;
use crate::tree::{BlockNode, BlockTree};
use crate::types::*;

/// ShouldReorganize: 𝒩 × 𝒩 → {true, false}
///
/// The candidate replaces the current tip if its cumulative weight is
/// greater, or equal with a lower block id.
pub fn should_reorganize(candidate: &BlockNode, current: &BlockNode) -> bool {
    match candidate.weight.cmp(&current.weight) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => candidate.id < current.id,
    }
}

/// The two stacks of a reorganization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgPlan {
    pub common_ancestor: BlockId,
    /// Current path blocks to revert, tip first
    pub revert: Vec<BlockId>,
    /// New path blocks to apply, lowest height first
    pub apply: Vec<BlockId>,
}

/// FindCommonAncestor and build the revert/apply stacks
///
/// 1. Walk from the new tip up by parent until a block on the current path
/// 2. revert = current path above that block, highest first
/// 3. apply = the walked blocks, lowest first
pub fn plan_reorganization(tree: &BlockTree, current_path: &[BlockId], new_tip: &BlockId) -> Result<ReorgPlan> {
    // 1. Walk the new branch back to the current path
    let mut apply = Vec::new();
    let mut node = tree.node(new_tip)?;
    loop {
        let on_path = usize::try_from(node.height)
            .ok()
            .and_then(|h| current_path.get(h))
            .map_or(false, |id| *id == node.id);
        if on_path {
            break;
        }
        apply.push(node.id);
        let parent = node
            .parent
            .ok_or_else(|| ConsensusError::Inconsistency(format!("block {} does not descend from genesis", new_tip)))?;
        node = tree.node(&parent)?;
    }
    let common_ancestor = node.id;
    let fork_height = node.height as usize;

    // 2. Revert stack
    let revert = current_path[fork_height + 1..].iter().rev().copied().collect();

    // 3. Apply stack
    apply.reverse();

    Ok(ReorgPlan { common_ancestor, revert, apply })
}

/// Blocks moved by a successful reorganization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorganizationResult {
    /// Reverted blocks, in the order they were reverted
    pub reverted: Vec<BlockId>,
    /// Applied blocks, in the order they were applied
    pub applied: Vec<BlockId>,
}

impl ReorganizationResult {
    pub fn depth(&self) -> usize {
        self.reverted.len()
    }
}

/// Why a reorganization was abandoned. The ledger and path are back at the
/// pre-reorg tip unless `error` is itself an inconsistency from the rollback.
#[derive(Debug, Clone)]
pub struct ReorgFailure {
    pub failed: BlockId,
    /// The failing block had been applied before, so its cached diff was used
    pub cached: bool,
    pub error: ConsensusError,
}

/// ExecuteReorganization: 𝒮 × plan → 𝒮'
///
/// 1. Revert every block of `plan.revert` using its cached diff
/// 2. Apply every block of `plan.apply`, reusing cached diffs and caching new ones
/// 3. On any failure, undo steps 1-2 in reverse and report the failing block
pub fn execute_reorganization(
    tree: &mut BlockTree,
    path: &mut Vec<BlockId>,
    ledger: &mut Ledger,
    plan: &ReorgPlan,
    params: &ConsensusParams,
) -> std::result::Result<ReorganizationResult, ReorgFailure> {
    let mut result = ReorganizationResult::default();

    // 1. Revert the old branch
    for id in &plan.revert {
        let outcome = tree
            .node(id)
            .and_then(|node| cached_diff(node))
            .and_then(|diff| revert_block(diff, ledger));
        if let Err(error) = outcome {
            return Err(rollback(tree, path, ledger, &result, ReorgFailure { failed: *id, cached: true, error }));
        }
        path.pop();
        result.reverted.push(*id);
    }

    // 2. Apply the new branch
    for id in &plan.apply {
        let (cached, outcome) = match tree.node(id) {
            Ok(node) => match &node.diff {
                Some(diff) => (true, reapply_block(diff, ledger).map(|_| None)),
                None => (false, apply_block(&node.block, ledger, path, node.height, params).map(Some)),
            },
            Err(error) => (false, Err(error)),
        };
        match outcome {
            Ok(new_diff) => {
                if let (Some(diff), Some(node)) = (new_diff, tree.get_mut(id)) {
                    node.diff = Some(diff);
                }
                path.push(*id);
                result.applied.push(*id);
            }
            // 3. Roll back
            Err(error) => {
                return Err(rollback(tree, path, ledger, &result, ReorgFailure { failed: *id, cached, error }));
            }
        }
    }

    Ok(result)
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn cached_diff(node: &BlockNode) -> Result<&crate::ledger::BlockDiff> {
    node.diff
        .as_ref()
        .ok_or_else(|| ConsensusError::Inconsistency(format!("block {} on path has no diff", node.id)))
}

/// Undo a partial reorganization. Every diff replayed here was committed a
/// moment ago, so a failure means the ledger no longer matches the tree.
fn rollback(
    tree: &BlockTree,
    path: &mut Vec<BlockId>,
    ledger: &mut Ledger,
    progress: &ReorganizationResult,
    failure: ReorgFailure,
) -> ReorgFailure {
    let mut undo = || -> Result<()> {
        for id in progress.applied.iter().rev() {
            revert_block(cached_diff(tree.node(id)?)?, ledger)?;
            path.pop();
        }
        for id in progress.reverted.iter().rev() {
            reapply_block(cached_diff(tree.node(id)?)?, ledger)?;
            path.push(*id);
        }
        Ok(())
    };
    match undo() {
        Ok(()) => failure,
        Err(error) => ReorgFailure {
            failed: failure.failed,
            cached: failure.cached,
            error: ConsensusError::Inconsistency(format!(
                "rollback after {} failed: {}",
                failure.error, error
            )),
        },
    }
}

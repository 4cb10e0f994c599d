//! Block Tree: every known valid-header block, keyed by id
//!
//! Nodes live in an arena (`HashMap<BlockId, BlockNode>`); parents and
//! children are referenced by id. Each node caches its cumulative weight, the
//! target its children must meet, and, once the block has been applied, the
//! diff that reverts it.

use std::collections::HashMap;

use crate::config::ConsensusParams;
use crate::error::{ConsensusError, Result};
use crate::ledger::BlockDiff;
use crate::pow::{child_target, Target, U256};
use crate::types::*;

#[derive(Debug, Clone)]
pub struct BlockNode {
    pub block: Block,
    pub id: BlockId,
    pub parent: Option<BlockId>,
    pub children: Vec<BlockId>,
    pub height: BlockHeight,
    /// Sum of the work of every block from genesis to this one
    pub weight: U256,
    /// Target a child of this block must meet
    pub child_target: Target,
    /// Set once the block has been applied on some path
    pub diff: Option<BlockDiff>,
}

#[derive(Debug, Clone)]
pub struct BlockTree {
    nodes: HashMap<BlockId, BlockNode>,
    genesis: BlockId,
}

impl BlockTree {
    /// A tree holding only the genesis block, already applied by `diff`
    pub fn new(genesis: Block, diff: BlockDiff, params: &ConsensusParams) -> Self {
        let id = genesis.id();
        let node = BlockNode {
            block: genesis,
            id,
            parent: None,
            children: Vec::new(),
            height: 0,
            weight: U256::ZERO,
            child_target: params.root_target,
            diff: Some(diff),
        };
        let mut nodes = HashMap::new();
        nodes.insert(id, node);
        Self { nodes, genesis: id }
    }

    pub fn genesis(&self) -> BlockId {
        self.genesis
    }

    pub fn get(&self, id: &BlockId) -> Option<&BlockNode> {
        self.nodes.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &BlockId) -> Option<&mut BlockNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node lookup that treats a missing node as a bug
    pub fn node(&self, id: &BlockId) -> Result<&BlockNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| ConsensusError::Inconsistency(format!("block {} missing from tree", id)))
    }

    /// InsertBlock: ℬ × 𝒯 → 𝒯
    ///
    /// For block b with parent node p:
    /// 1. height(b) = height(p) + 1
    /// 2. weight(b) = weight(p) + work(target(p → b))
    /// 3. child_target(b) from the window ending at b
    /// 4. Link b into p's children
    ///
    /// The caller has already checked the header against `p.child_target`.
    pub fn insert(&mut self, block: Block, params: &ConsensusParams) -> Result<BlockId> {
        let id = block.id();
        if self.nodes.contains_key(&id) {
            return Err(ConsensusError::BlockKnown(id));
        }
        let parent = self
            .nodes
            .get(&block.parent_id)
            .ok_or(ConsensusError::Orphan(block.parent_id))?;

        // 1-2. Height and cumulative weight
        let height = parent.height + 1;
        let own_target = parent.child_target;
        let weight = parent.weight.saturating_add(&own_target.work());

        // 3. Difficulty adjustment over the window ending at this block
        let window = params.target_window.min(height);
        let window_start = self.ancestor_at(&block.parent_id, height - window)?;
        let next_target = child_target(
            &own_target,
            block.timestamp,
            window_start.block.timestamp,
            height - window_start.height,
            params,
        );

        // 4. Link
        let parent_id = block.parent_id;
        self.nodes.insert(
            id,
            BlockNode {
                block,
                id,
                parent: Some(parent_id),
                children: Vec::new(),
                height,
                weight,
                child_target: next_target,
                diff: None,
            },
        );
        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            parent.children.push(id);
        }
        Ok(id)
    }

    /// Ancestor of `id` (inclusive) at `height`
    pub fn ancestor_at(&self, id: &BlockId, height: BlockHeight) -> Result<&BlockNode> {
        let mut node = self.node(id)?;
        while node.height > height {
            let parent = node
                .parent
                .ok_or_else(|| ConsensusError::Inconsistency(format!("block {} has no parent", node.id)))?;
            node = self.node(&parent)?;
        }
        if node.height != height {
            return Err(ConsensusError::Inconsistency(format!("no ancestor of {} at height {}", id, height)));
        }
        Ok(node)
    }

    /// Ids from genesis to `id`, inclusive
    pub fn path_to(&self, id: &BlockId) -> Result<Vec<BlockId>> {
        let mut path = Vec::new();
        let mut cursor = Some(*id);
        while let Some(current) = cursor {
            let node = self.node(&current)?;
            path.push(current);
            cursor = node.parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Remove `id` and all of its descendants, returning the removed ids.
    /// Genesis cannot be removed.
    pub fn remove_subtree(&mut self, id: &BlockId) -> Vec<BlockId> {
        if *id == self.genesis {
            return Vec::new();
        }
        if let Some(parent) = self.nodes.get(id).and_then(|n| n.parent) {
            if let Some(parent) = self.nodes.get_mut(&parent) {
                parent.children.retain(|child| child != id);
            }
        }
        let mut removed = Vec::new();
        let mut stack = vec![*id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
                removed.push(current);
            }
        }
        removed
    }
}

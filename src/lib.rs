//! # Storage Consensus
//!
//! Consensus state machine and transaction pool for a proof-of-work storage
//! network: a ledger that moves currency and settles file contracts between
//! renters and hosts.
//!
//! ## Architecture
//!
//! Leaves first:
//! - `types`, `encoding`, `merkle`: ledger value types, their canonical
//!   encoding and the storage-proof Merkle tree
//! - `ledger`: Output Set, Contract Set and the diffs that move them
//! - `transaction`, `block`: pure validation, plus block application and
//!   reversal
//! - `tree`, `reorganization`: the block tree, fork choice and atomic
//!   reorganization
//! - `state`: the consensus set behind a single writer lock, with change
//!   notifications
//! - `mempool`: the transaction pool, kept valid against the tip
//! - `rpc`, `node`: the RPC router and the composition root
//!
//! ## Usage
//!
//! ```rust
//! use storage_consensus::{create_genesis_state, ConsensusParams, TransactionPool};
//!
//! let consensus = create_genesis_state(ConsensusParams::testing()).unwrap();
//! let pool = TransactionPool::new(consensus.clone());
//! assert_eq!(consensus.height(), 0);
//! assert!(pool.is_empty());
//! ```

pub mod types;
pub mod constants;
pub mod encoding;
pub mod merkle;
pub mod error;
pub mod config;
pub mod economic;
pub mod pow;
pub mod unlock;
pub mod ledger;
pub mod transaction;
pub mod block;
pub mod tree;
pub mod reorganization;
pub mod state;
pub mod mempool;
pub mod mining;
pub mod rpc;
pub mod node;

use std::sync::Arc;

// Re-export commonly used types
pub use types::*;
pub use config::{ConsensusParams, NodeConfig};
pub use error::{ConsensusError, ErrorClass, Result};
pub use ledger::{BlockDiff, Ledger};
pub use mempool::TransactionPool;
pub use pow::Target;
pub use state::{ConsensusChange, ConsensusSet, ConsensusSubscriber};

/// CreateGenesisState: the genesis block applied to empty sets. Every other
/// component is built on the returned handle.
pub fn create_genesis_state(params: ConsensusParams) -> Result<Arc<ConsensusSet>> {
    ConsensusSet::new(params)
}

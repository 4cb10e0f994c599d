//! Error types for consensus validation

use thiserror::Error;

use crate::types::{BlockId, ContractId, Currency, OutputId, TransactionId};

/// How a caller should treat a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Parent unknown; ask the sender for ancestors and retry later
    Orphan,
    /// Permanently rejected; the sender may be penalized
    Invalid,
    /// Rejected now but may become valid later; never penalized
    Stale,
    /// Validation and application disagree; indicates a bug
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Orphan block: parent {0} is unknown")]
    Orphan(BlockId),

    #[error("Block {0} is already known")]
    BlockKnown(BlockId),

    #[error("Block {0} was previously rejected")]
    KnownInvalid(BlockId),

    #[error("Block {0} does not meet the target")]
    InsufficientWork(BlockId),

    #[error("Block timestamp {timestamp} is too far behind parent timestamp {parent}")]
    EarlyTimestamp { timestamp: u64, parent: u64 },

    #[error("Block timestamp {timestamp} is too far ahead of local time {now}")]
    FutureTimestamp { timestamp: u64, now: u64 },

    #[error("Block size {size} exceeds limit {limit}")]
    BlockTooLarge { size: usize, limit: usize },

    #[error("Miner payouts {payouts} do not equal subsidy plus fees {expected}")]
    PayoutMismatch { payouts: Currency, expected: Currency },

    #[error("Invalid transaction at index {index}: {source}")]
    InvalidBlockTransaction {
        index: usize,
        source: Box<ConsensusError>,
    },

    #[error("Reorganization aborted at block {failed}: {source}")]
    ReorgAborted {
        failed: BlockId,
        source: Box<ConsensusError>,
    },

    #[error("Malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("Output {0} not found")]
    MissingOutput(OutputId),

    #[error("Output {0} spent twice")]
    DoubleSpend(OutputId),

    #[error("Invalid signature: {0}")]
    BadSignature(String),

    #[error("Output {output} is timelocked until height {timelock}")]
    Timelocked { output: OutputId, timelock: u64 },

    #[error("Value mismatch: inputs {inputs}, outputs plus escrow plus fee {outputs}")]
    ValueMismatch { inputs: Currency, outputs: Currency },

    #[error("Currency overflow")]
    Overflow,

    #[error("Invalid file contract: {0}")]
    InvalidContract(String),

    #[error("File contract {0} is unknown")]
    UnknownContract(ContractId),

    #[error("Proof window of file contract {0} has not opened")]
    ProofWindowNotOpen(ContractId),

    #[error("Proof window of file contract {0} has closed")]
    ContractExpired(ContractId),

    #[error("File contract {0} is already resolved")]
    ContractAlreadyResolved(ContractId),

    #[error("Storage proof for file contract {0} is invalid")]
    InvalidStorageProof(ContractId),

    #[error("Transaction {0} is already in the pool")]
    DuplicateTransaction(TransactionId),

    #[error("Transaction conflicts with pooled transaction {0}")]
    PoolConflict(TransactionId),

    #[error("Transaction pool is full")]
    PoolFull,

    #[error("Consensus inconsistency: {0}")]
    Inconsistency(String),
}

impl ConsensusError {
    pub fn class(&self) -> ErrorClass {
        use ConsensusError::*;
        match self {
            Orphan(_) => ErrorClass::Orphan,

            BlockKnown(_)
            | FutureTimestamp { .. }
            | MissingOutput(_)
            | Timelocked { .. }
            | UnknownContract(_)
            | ProofWindowNotOpen(_)
            | DuplicateTransaction(_)
            | PoolConflict(_)
            | PoolFull => ErrorClass::Stale,

            ReorgAborted { source, .. } => source.class(),

            Inconsistency(_) => ErrorClass::Internal,

            KnownInvalid(_)
            | InsufficientWork(_)
            | EarlyTimestamp { .. }
            | BlockTooLarge { .. }
            | PayoutMismatch { .. }
            | InvalidBlockTransaction { .. }
            | MalformedTransaction(_)
            | DoubleSpend(_)
            | BadSignature(_)
            | ValueMismatch { .. }
            | Overflow
            | InvalidContract(_)
            | ContractExpired(_)
            | ContractAlreadyResolved(_)
            | InvalidStorageProof(_) => ErrorClass::Invalid,
        }
    }

    /// Whether the peer that sent the offending object may be penalized
    pub fn is_penalizable(&self) -> bool {
        self.class() == ErrorClass::Invalid
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

//! Core ledger types for consensus validation

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::encoding::{hash_all, Encode, Encoder};

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Currency amount in the smallest unit
pub type Currency = u128;

/// Block height on a chain, genesis is 0
pub type BlockHeight = u64;

/// Unix timestamp in seconds
pub type Timestamp = u64;

macro_rules! hash_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        pub struct $name(pub Hash);

        impl $name {
            pub fn as_bytes(&self) -> &Hash {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(&self.0[..8]))
            }
        }

        impl Encode for $name {
            fn encode_to(&self, enc: &mut Encoder) {
                enc.write_bytes(&self.0);
            }
        }
    };
}

hash_id!(
    /// Identifier of a block, the hash of its header
    BlockId
);
hash_id!(
    /// Identifier of a transaction, the hash of its unsigned encoding
    TransactionId
);
hash_id!(
    /// Identifier of an output in the Output Set
    OutputId
);
hash_id!(
    /// Identifier of a file contract in the Contract Set
    ContractId
);
hash_id!(
    /// Hash of a set of unlock conditions
    UnlockHash
);

/// Domain specifiers mixed into derived identifiers.
pub(crate) const SPECIFIER_OUTPUT: &[u8] = b"siacoin output";
pub(crate) const SPECIFIER_FILE_CONTRACT: &[u8] = b"file contract";
pub(crate) const SPECIFIER_MINER_PAYOUT: &[u8] = b"miner payout";
pub(crate) const SPECIFIER_STORAGE_PROOF: &[u8] = b"storage proof";

/// Spend condition of an output.
///
/// An output stores only the hash of its conditions; the spending input
/// reveals the full conditions, which must hash to the stored value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnlockConditions {
    /// Height before which the output may not be spent
    pub timelock: BlockHeight,
    /// Compressed secp256k1 public keys (33 bytes each)
    pub public_keys: Vec<Vec<u8>>,
    /// Number of distinct keys that must sign; 0 means anyone can spend
    pub signatures_required: u64,
}

impl UnlockConditions {
    /// Conditions that anyone can satisfy without a signature
    pub fn anyone_can_spend() -> Self {
        Self::default()
    }

    /// Single-key conditions
    pub fn single_key(public_key: Vec<u8>) -> Self {
        Self {
            timelock: 0,
            public_keys: vec![public_key],
            signatures_required: 1,
        }
    }

    pub fn unlock_hash(&self) -> UnlockHash {
        UnlockHash(hash_all(self))
    }
}

impl Encode for UnlockConditions {
    fn encode_to(&self, enc: &mut Encoder) {
        enc.write_u64(self.timelock);
        enc.write_u64(self.public_keys.len() as u64);
        for key in &self.public_keys {
            enc.write_prefixed(key);
        }
        enc.write_u64(self.signatures_required);
    }
}

/// Output: a spendable amount guarded by an unlock hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub value: Currency,
    pub unlock_hash: UnlockHash,
}

impl Encode for Output {
    fn encode_to(&self, enc: &mut Encoder) {
        enc.write_u128(self.value);
        self.unlock_hash.encode_to(enc);
    }
}

/// Input: reference to an unspent output plus the conditions that unlock it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub parent_id: OutputId,
    pub unlock_conditions: UnlockConditions,
}

impl Encode for Input {
    fn encode_to(&self, enc: &mut Encoder) {
        self.parent_id.encode_to(enc);
        self.unlock_conditions.encode_to(enc);
    }
}

/// File contract: storage escrow between a renter and a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContract {
    pub file_size: u64,
    pub file_merkle_root: Hash,
    /// First height at which a storage proof is accepted
    pub proof_start_height: BlockHeight,
    /// First height at which a storage proof is no longer accepted
    pub proof_end_height: BlockHeight,
    /// Funds moved into escrow when the contract is created
    pub escrowed_funds: Currency,
    pub valid_proof_outputs: Vec<Output>,
    pub missed_proof_outputs: Vec<Output>,
    pub renter_id: UnlockHash,
    pub host_id: UnlockHash,
}

impl Encode for FileContract {
    fn encode_to(&self, enc: &mut Encoder) {
        enc.write_u64(self.file_size);
        enc.write_bytes(&self.file_merkle_root);
        enc.write_u64(self.proof_start_height);
        enc.write_u64(self.proof_end_height);
        enc.write_u128(self.escrowed_funds);
        enc.write_list(&self.valid_proof_outputs);
        enc.write_list(&self.missed_proof_outputs);
        self.renter_id.encode_to(enc);
        self.host_id.encode_to(enc);
    }
}

/// Storage proof: one challenged segment plus its Merkle path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProof {
    pub contract_id: ContractId,
    pub segment: Vec<u8>,
    pub hash_set: Vec<Hash>,
}

impl Encode for StorageProof {
    fn encode_to(&self, enc: &mut Encoder) {
        self.contract_id.encode_to(enc);
        enc.write_prefixed(&self.segment);
        enc.write_u64(self.hash_set.len() as u64);
        for hash in &self.hash_set {
            enc.write_bytes(hash);
        }
    }
}

/// Signature over a transaction id by one key of one input's conditions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub input_index: u64,
    pub public_key_index: u64,
    /// Compact 64-byte ECDSA signature
    pub signature: Vec<u8>,
}

impl Encode for TransactionSignature {
    fn encode_to(&self, enc: &mut Encoder) {
        enc.write_u64(self.input_index);
        enc.write_u64(self.public_key_index);
        enc.write_prefixed(&self.signature);
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub file_contracts: Vec<FileContract>,
    pub storage_proofs: Vec<StorageProof>,
    pub miner_fee: Currency,
    pub signatures: Vec<TransactionSignature>,
}

impl Transaction {
    /// Hash of the transaction without its signatures
    pub fn id(&self) -> TransactionId {
        let mut enc = Encoder::new();
        self.encode_unsigned(&mut enc);
        TransactionId(enc.hash())
    }

    pub fn output_id(&self, index: usize) -> OutputId {
        OutputId(derive_id(SPECIFIER_OUTPUT, &self.id().0, index as u64))
    }

    pub fn contract_id(&self, index: usize) -> ContractId {
        ContractId(derive_id(SPECIFIER_FILE_CONTRACT, &self.id().0, index as u64))
    }

    fn encode_unsigned(&self, enc: &mut Encoder) {
        enc.write_list(&self.inputs);
        enc.write_list(&self.outputs);
        enc.write_list(&self.file_contracts);
        enc.write_list(&self.storage_proofs);
        enc.write_u128(self.miner_fee);
    }
}

impl Encode for Transaction {
    fn encode_to(&self, enc: &mut Encoder) {
        self.encode_unsigned(enc);
        enc.write_list(&self.signatures);
    }
}

/// Block header: the fields covered by the proof of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub parent_id: BlockId,
    pub nonce: u64,
    pub timestamp: Timestamp,
    pub merkle_root: Hash,
}

impl BlockHeader {
    pub fn id(&self) -> BlockId {
        let mut enc = Encoder::new();
        self.parent_id.encode_to(&mut enc);
        enc.write_u64(self.nonce);
        enc.write_u64(self.timestamp);
        enc.write_bytes(&self.merkle_root);
        BlockId(enc.hash())
    }
}

/// Block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub parent_id: BlockId,
    pub timestamp: Timestamp,
    pub nonce: u64,
    pub miner_payouts: Vec<Output>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            parent_id: self.parent_id,
            nonce: self.nonce,
            timestamp: self.timestamp,
            merkle_root: self.merkle_root(),
        }
    }

    pub fn id(&self) -> BlockId {
        self.header().id()
    }

    pub fn miner_payout_id(&self, index: usize) -> OutputId {
        OutputId(derive_id(SPECIFIER_MINER_PAYOUT, &self.id().0, index as u64))
    }

    /// Merkle root over miner payouts followed by transactions
    pub fn merkle_root(&self) -> Hash {
        let leaves: Vec<Vec<u8>> = self
            .miner_payouts
            .iter()
            .map(|p| p.encoded())
            .chain(self.transactions.iter().map(|t| t.encoded()))
            .collect();
        crate::merkle::merkle_root(leaves.iter().map(|l| l.as_slice()))
    }
}

impl Encode for Block {
    fn encode_to(&self, enc: &mut Encoder) {
        self.parent_id.encode_to(enc);
        enc.write_u64(self.timestamp);
        enc.write_u64(self.nonce);
        enc.write_list(&self.miner_payouts);
        enc.write_list(&self.transactions);
    }
}

/// ID of output `index` paid by a resolved contract
pub fn contract_resolution_output_id(contract_id: &ContractId, valid: bool, index: usize) -> OutputId {
    let mut enc = Encoder::new();
    enc.write_bytes(SPECIFIER_STORAGE_PROOF);
    contract_id.encode_to(&mut enc);
    enc.write_bool(valid);
    enc.write_u64(index as u64);
    OutputId(enc.hash())
}

/// H(specifier ‖ parent ‖ index)
pub(crate) fn derive_id(specifier: &[u8], parent: &Hash, index: u64) -> Hash {
    let mut enc = Encoder::new();
    enc.write_bytes(specifier);
    enc.write_bytes(parent);
    enc.write_u64(index);
    enc.hash()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            inputs: vec![Input {
                parent_id: OutputId([1; 32]),
                unlock_conditions: UnlockConditions::anyone_can_spend(),
            }],
            outputs: vec![Output { value: 10, unlock_hash: UnlockHash([2; 32]) }],
            miner_fee: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_transaction_id_ignores_signatures() {
        let tx = sample_tx();
        let mut signed = tx.clone();
        signed.signatures.push(TransactionSignature {
            input_index: 0,
            public_key_index: 0,
            signature: vec![7; 64],
        });
        assert_eq!(tx.id(), signed.id());
        assert_ne!(tx.encoded(), signed.encoded());
    }

    #[test]
    fn test_derived_ids_are_distinct() {
        let tx = sample_tx();
        assert_ne!(tx.output_id(0), tx.output_id(1));
        assert_ne!(tx.output_id(0).0, tx.contract_id(0).0);
        let cid = tx.contract_id(0);
        assert_ne!(
            contract_resolution_output_id(&cid, true, 0),
            contract_resolution_output_id(&cid, false, 0)
        );
    }

    #[test]
    fn test_block_id_covers_nonce_and_body() {
        let block = Block {
            parent_id: BlockId([0; 32]),
            timestamp: 100,
            nonce: 0,
            miner_payouts: vec![Output { value: 5, unlock_hash: UnlockHash([3; 32]) }],
            transactions: vec![],
        };
        let mut other = block.clone();
        other.nonce = 1;
        assert_ne!(block.id(), other.id());

        let mut body = block.clone();
        body.miner_payouts[0].value = 6;
        assert_ne!(block.id(), body.id());
    }

    #[test]
    fn test_unlock_hash_depends_on_timelock() {
        let a = UnlockConditions::anyone_can_spend();
        let mut b = a.clone();
        b.timelock = 10;
        assert_ne!(a.unlock_hash(), b.unlock_hash());
    }
}

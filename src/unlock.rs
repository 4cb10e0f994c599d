//! Spend conditions and transaction signatures
//!
//! An output is locked to the hash of a set of [`UnlockConditions`]. The
//! spending input reveals the conditions, and the transaction carries enough
//! secp256k1 signatures over its id to satisfy each input.

use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use std::collections::HashSet;

use crate::error::{ConsensusError, Result};
use crate::types::*;

/// Sign `tx` for the key at `public_key_index` of input `input_index`.
///
/// The signature covers the transaction id, so every other field must be
/// final before signing.
pub fn sign_input(
    tx: &mut Transaction,
    input_index: usize,
    public_key_index: usize,
    secret_key: &SecretKey,
) -> Result<()> {
    let secp = Secp256k1::signing_only();
    let message = transaction_message(tx)?;
    let signature = secp.sign_ecdsa(&message, secret_key);
    tx.signatures.push(TransactionSignature {
        input_index: input_index as u64,
        public_key_index: public_key_index as u64,
        signature: signature.serialize_compact().to_vec(),
    });
    Ok(())
}

/// Compressed public key bytes for a secret key
pub fn public_key_bytes(secret_key: &SecretKey) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    PublicKey::from_secret_key(&secp, secret_key).serialize().to_vec()
}

/// VerifySignatures: 𝒯𝒳 → {valid, invalid}
///
/// 1. Every signature names an existing input and key, at most once
/// 2. Every signature verifies against its key over the transaction id
/// 3. Every input collects at least `signatures_required` signatures
pub fn verify_signatures(tx: &Transaction) -> Result<()> {
    let secp = Secp256k1::verification_only();
    let message = transaction_message(tx)?;
    let mut seen = HashSet::new();
    let mut counts = vec![0u64; tx.inputs.len()];

    for (i, sig) in tx.signatures.iter().enumerate() {
        let input = usize::try_from(sig.input_index)
            .ok()
            .and_then(|idx| tx.inputs.get(idx).map(|input| (idx, input)));
        let (input_index, input) = input.ok_or_else(|| {
            ConsensusError::BadSignature(format!("signature {} names missing input {}", i, sig.input_index))
        })?;
        let key = usize::try_from(sig.public_key_index)
            .ok()
            .and_then(|idx| input.unlock_conditions.public_keys.get(idx))
            .ok_or_else(|| {
                ConsensusError::BadSignature(format!("signature {} names missing key {}", i, sig.public_key_index))
            })?;
        if !seen.insert((sig.input_index, sig.public_key_index)) {
            return Err(ConsensusError::BadSignature(format!("signature {} is a duplicate", i)));
        }

        let public_key = PublicKey::from_slice(key)
            .map_err(|e| ConsensusError::BadSignature(format!("input {} key: {}", input_index, e)))?;
        let signature = Signature::from_compact(&sig.signature)
            .map_err(|e| ConsensusError::BadSignature(format!("signature {}: {}", i, e)))?;
        secp.verify_ecdsa(&message, &signature, &public_key)
            .map_err(|_| ConsensusError::BadSignature(format!("signature {} does not verify", i)))?;
        counts[input_index] += 1;
    }

    for (i, input) in tx.inputs.iter().enumerate() {
        if counts[i] < input.unlock_conditions.signatures_required {
            return Err(ConsensusError::BadSignature(format!(
                "input {} has {} of {} required signatures",
                i, counts[i], input.unlock_conditions.signatures_required
            )));
        }
    }
    Ok(())
}

fn transaction_message(tx: &Transaction) -> Result<Message> {
    Message::from_digest_slice(tx.id().as_bytes())
        .map_err(|e| ConsensusError::BadSignature(format!("signing digest: {}", e)))
}

//! Deterministic binary encoding used for identifiers and size limits
//!
//! Integers are little-endian and fixed width; byte strings and lists are
//! prefixed with their length as a u64. Every node must produce the same
//! bytes for the same value, so nothing here depends on serde.

use sha2::{Digest, Sha256};

use crate::types::Hash;

/// Types with a canonical consensus encoding
pub trait Encode {
    fn encode_to(&self, enc: &mut Encoder);

    fn encoded(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_to(&mut enc);
        enc.into_bytes()
    }

    fn encoded_len(&self) -> usize {
        self.encoded().len()
    }
}

#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_prefixed(&mut self, bytes: &[u8]) {
        self.write_u64(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u128(&mut self, value: u128) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn write_list<T: Encode>(&mut self, items: &[T]) {
        self.write_u64(items.len() as u64);
        for item in items {
            item.encode_to(self);
        }
    }

    pub fn hash(&self) -> Hash {
        hash_bytes(&self.buf)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// SHA-256 of a byte string
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// SHA-256 of the canonical encoding of a value
pub fn hash_all<T: Encode + ?Sized>(value: &T) -> Hash {
    let mut enc = Encoder::new();
    value.encode_to(&mut enc);
    enc.hash()
}

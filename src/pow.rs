//! Proof of work: targets, block weight and difficulty adjustment

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::config::ConsensusParams;
use crate::error::{ConsensusError, Result};
use crate::types::*;

/// 256-bit unsigned integer for target and weight calculations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct U256([u64; 4]); // little-endian limbs

impl U256 {
    pub const ZERO: U256 = U256([0; 4]);
    pub const ONE: U256 = U256([1, 0, 0, 0]);
    pub const MAX: U256 = U256([u64::MAX; 4]);

    pub fn from_u64(value: u64) -> Self {
        U256([value, 0, 0, 0])
    }

    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let start = 32 - (i + 1) * 8;
            let mut limb = [0u8; 8];
            limb.copy_from_slice(&bytes[start..start + 8]);
            *word = u64::from_be_bytes(limb);
        }
        U256(words)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (i, word) in self.0.iter().enumerate() {
            let start = 32 - (i + 1) * 8;
            bytes[start..start + 8].copy_from_slice(&word.to_be_bytes());
        }
        bytes
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0)
    }

    pub fn checked_add(&self, other: &U256) -> Option<U256> {
        let mut result = [0u64; 4];
        let mut carry = false;
        for (i, slot) in result.iter_mut().enumerate() {
            let (sum, c1) = self.0[i].overflowing_add(other.0[i]);
            let (sum, c2) = sum.overflowing_add(carry as u64);
            *slot = sum;
            carry = c1 || c2;
        }
        if carry {
            None
        } else {
            Some(U256(result))
        }
    }

    pub fn saturating_add(&self, other: &U256) -> U256 {
        self.checked_add(other).unwrap_or(U256::MAX)
    }

    fn wrapping_sub(&self, other: &U256) -> U256 {
        let mut result = [0u64; 4];
        let mut borrow = false;
        for (i, slot) in result.iter_mut().enumerate() {
            let (diff, b1) = self.0[i].overflowing_sub(other.0[i]);
            let (diff, b2) = diff.overflowing_sub(borrow as u64);
            *slot = diff;
            borrow = b1 || b2;
        }
        U256(result)
    }

    fn not(&self) -> U256 {
        U256([!self.0[0], !self.0[1], !self.0[2], !self.0[3]])
    }

    fn bit(&self, index: usize) -> bool {
        (self.0[index / 64] >> (index % 64)) & 1 == 1
    }

    fn set_bit(&mut self, index: usize) {
        self.0[index / 64] |= 1 << (index % 64);
    }

    /// Shift left by one, returning the bit shifted out
    fn shl1(&self) -> (U256, bool) {
        let mut result = [0u64; 4];
        let mut carry = 0u64;
        for (i, slot) in result.iter_mut().enumerate() {
            *slot = (self.0[i] << 1) | carry;
            carry = self.0[i] >> 63;
        }
        (U256(result), carry == 1)
    }

    /// Multiply by a u64, `None` on overflow
    pub fn mul_u64(&self, factor: u64) -> Option<U256> {
        let mut result = [0u64; 4];
        let mut carry = 0u128;
        for (i, slot) in result.iter_mut().enumerate() {
            let product = self.0[i] as u128 * factor as u128 + carry;
            *slot = product as u64;
            carry = product >> 64;
        }
        if carry != 0 {
            None
        } else {
            Some(U256(result))
        }
    }

    /// Divide by a non-zero u64
    pub fn div_u64(&self, divisor: u64) -> U256 {
        let mut result = [0u64; 4];
        let mut rem = 0u128;
        for i in (0..4).rev() {
            let cur = (rem << 64) | self.0[i] as u128;
            result[i] = (cur / divisor as u128) as u64;
            rem = cur % divisor as u128;
        }
        U256(result)
    }

    /// Long division; `divisor` must be non-zero
    pub fn div_rem(&self, divisor: &U256) -> (U256, U256) {
        let mut quotient = U256::ZERO;
        let mut rem = U256::ZERO;
        for i in (0..256).rev() {
            let (shifted, overflow) = rem.shl1();
            rem = shifted;
            if self.bit(i) {
                rem.0[0] |= 1;
            }
            if overflow || rem >= *divisor {
                rem = rem.wrapping_sub(divisor);
                quotient.set_bit(i);
            }
        }
        (quotient, rem)
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

/// Proof-of-work target, big-endian. A block id qualifies when its numeric
/// value is less than or equal to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target(pub [u8; 32]);

impl Target {
    pub fn to_u256(&self) -> U256 {
        U256::from_be_bytes(&self.0)
    }

    pub fn from_u256(value: &U256) -> Self {
        Target(value.to_be_bytes())
    }

    pub fn is_met_by(&self, id: &BlockId) -> bool {
        id.0 <= self.0
    }

    /// Expected number of hashes to find a block at this target:
    /// (2^256 - 1 - target) / (target + 1) + 1
    pub fn work(&self) -> U256 {
        let target = self.to_u256();
        match target.checked_add(&U256::ONE) {
            None => U256::ONE,
            Some(denominator) => {
                let (quotient, _) = target.not().div_rem(&denominator);
                quotient.saturating_add(&U256::ONE)
            }
        }
    }
}

/// Rational clamp on the per-block target adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRatio {
    pub numerator: u64,
    pub denominator: u64,
}

impl AdjustmentRatio {
    /// a/b < c/d  <=>  a*d < c*b
    fn less_than(num: u64, den: u64, other: &AdjustmentRatio) -> bool {
        (num as u128) * (other.denominator as u128) < (other.numerator as u128) * (den as u128)
    }
}

/// CheckProofOfWork: the block id must not exceed the target
pub fn check_proof_of_work(id: &BlockId, target: &Target) -> Result<()> {
    if target.is_met_by(id) {
        Ok(())
    } else {
        Err(ConsensusError::InsufficientWork(*id))
    }
}

/// ChildTarget: target required of a block whose parent has `parent_target`
///
/// For a parent at height h with timestamp t_p and window ancestor at height
/// h - w with timestamp t_a (w = `blocks_in_window`):
/// 1. If w = 0: return root target
/// 2. Let ratio = (t_p - t_a) / (w × block_frequency)
/// 3. Clamp ratio to [max_adjustment_down, max_adjustment_up]
/// 4. Return min(parent_target × ratio, root target)
pub fn child_target(
    parent_target: &Target,
    parent_timestamp: Timestamp,
    window_start_timestamp: Timestamp,
    blocks_in_window: u64,
    params: &ConsensusParams,
) -> Target {
    let expected = params.block_frequency.saturating_mul(blocks_in_window);
    if blocks_in_window == 0 || expected == 0 {
        return params.root_target;
    }
    let elapsed = parent_timestamp.saturating_sub(window_start_timestamp);

    let (numerator, denominator) = if !AdjustmentRatio::less_than(elapsed, expected, &params.max_adjustment_up) {
        (params.max_adjustment_up.numerator, params.max_adjustment_up.denominator)
    } else if AdjustmentRatio::less_than(elapsed, expected, &params.max_adjustment_down) {
        (params.max_adjustment_down.numerator, params.max_adjustment_down.denominator)
    } else {
        (elapsed, expected)
    };
    if denominator == 0 {
        return params.root_target;
    }

    let target = parent_target.to_u256();
    let scaled = match target.mul_u64(numerator) {
        Some(product) => product.div_u64(denominator),
        // Divide first when the target is too large to scale up in place
        None => target.div_u64(denominator).mul_u64(numerator).unwrap_or(U256::MAX),
    };
    let scaled = if scaled.is_zero() { U256::ONE } else { scaled };
    let adjusted = Target::from_u256(&scaled);
    adjusted.min(params.root_target)
}

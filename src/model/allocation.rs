use alloy_primitives::U256;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::math::FULL_PERCENT;

/// Bits per slot when an allocation is packed for persistence.
const SLOT_BITS: usize = 16;
/// Slots that fit in one packed word.
pub const MAX_PACKED_SLOTS: usize = 256 / SLOT_BITS;

/// How a vault's allocation is managed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Recomputed by the allocation provider; eligible for reallocation.
    #[default]
    Dynamic,
    /// Pinned by the vault creator; never reallocated.
    Static,
}

/// Per-slot allocation in basis points, aligned with a vault's strategy list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Allocation(pub Vec<u16>);

impl Allocation {
    /// Build an allocation that must sum to exactly 100%.
    pub fn new(slots: Vec<u16>) -> VaultResult<Self> {
        let allocation = Self(slots);
        allocation.validate()?;
        Ok(allocation)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, slot: usize) -> u128 {
        self.0.get(slot).copied().unwrap_or(0) as u128
    }

    pub fn sum(&self) -> u128 {
        self.0.iter().map(|s| *s as u128).sum()
    }

    pub fn validate(&self) -> VaultResult<()> {
        let sum = self.sum();
        if sum != FULL_PERCENT {
            return Err(VaultError::InvalidAllocation { sum });
        }
        Ok(())
    }

    /// Pack into 16-bit slots, slot 0 in the lowest bits.
    pub fn pack(&self) -> VaultResult<U256> {
        if self.0.len() > MAX_PACKED_SLOTS {
            return Err(VaultError::TooManyStrategies {
                max: MAX_PACKED_SLOTS,
            });
        }
        Ok(self
            .0
            .iter()
            .enumerate()
            .fold(U256::ZERO, |acc, (i, pct)| {
                acc | (U256::from(*pct) << (i * SLOT_BITS))
            }))
    }

    pub fn unpack(packed: U256, len: usize) -> Self {
        let mask = U256::from(0xFFFFu32);
        let slots = (0..len.min(MAX_PACKED_SLOTS))
            .map(|i| ((packed >> (i * SLOT_BITS)) & mask).as_limbs()[0] as u16)
            .collect();
        Self(slots)
    }

    /// Zero out `slot` and spread its share over the remaining slots in
    /// proportion to their weight. Rounding leftovers land on the largest slot.
    /// Returns an all-zero allocation when nothing else is left.
    pub fn without_slot(&self, slot: usize) -> Self {
        let removed = self.get(slot);
        let mut slots: Vec<u128> = self.0.iter().map(|s| *s as u128).collect();
        if slot < slots.len() {
            slots[slot] = 0;
        }
        let remaining: u128 = slots.iter().sum();
        if remaining == 0 {
            return Self(vec![0; self.0.len()]);
        }
        let mut spread: Vec<u128> = slots
            .iter()
            .map(|s| s + removed * s / remaining)
            .collect();
        let total: u128 = spread.iter().sum();
        if let Some(largest) = largest_index(&spread) {
            spread[largest] += (remaining + removed).saturating_sub(total);
        }
        Self(spread.into_iter().map(|s| s as u16).collect())
    }
}

pub(crate) fn largest_index(values: &[u128]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.cmp(b).then(ib.cmp(ia)))
        .map(|(i, _)| i)
}

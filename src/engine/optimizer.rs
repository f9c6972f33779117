//! Allocation providers: turn per-slot APY and risk into a target split.

use anyhow::{Result, bail};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::math::FULL_PERCENT;
use crate::model::allocation::largest_index;
use crate::model::{Allocation, StrategyId};

/// What a provider knows about one slot of a vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub strategy: StrategyId,
    /// Latest APY, `YIELD_FULL_PERCENT` scaled.
    pub apy: i128,
    pub risk_score: u32,
    /// False for ghost slots, which must get zero.
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct AllocationContext<'a> {
    pub vault: &'a str,
    pub slots: Vec<SlotInfo>,
}

pub trait AllocationProvider {
    fn calculate_allocation(&self, ctx: &AllocationContext<'_>) -> Result<Allocation>;
}

/// Serializable choice of provider, stored on the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    Fixed { allocation: Vec<u16> },
    Uniform,
    ApyRisk {
        /// Cap per slot, in bps.
        #[serde(default = "default_max_allocation")]
        max_allocation_bps: u16,
    },
}

fn default_max_allocation() -> u16 {
    10_000
}

impl ProviderConfig {
    pub fn build(&self) -> Box<dyn AllocationProvider> {
        match self {
            ProviderConfig::Fixed { allocation } => Box::new(FixedAllocation(allocation.clone())),
            ProviderConfig::Uniform => Box::new(UniformAllocation),
            ProviderConfig::ApyRisk { max_allocation_bps } => Box::new(ApyRiskAllocation {
                max_allocation_bps: u128::from(*max_allocation_bps),
            }),
        }
    }
}

// ── Providers ───────────────────────────────────────────────────────

pub struct FixedAllocation(pub Vec<u16>);

impl AllocationProvider for FixedAllocation {
    fn calculate_allocation(&self, ctx: &AllocationContext<'_>) -> Result<Allocation> {
        if self.0.len() != ctx.slots.len() {
            bail!(
                "fixed allocation has {} slots, vault `{}` has {}",
                self.0.len(),
                ctx.vault,
                ctx.slots.len()
            );
        }
        Ok(Allocation::new(self.0.clone())?)
    }
}

/// Equal split over active slots.
pub struct UniformAllocation;

impl AllocationProvider for UniformAllocation {
    fn calculate_allocation(&self, ctx: &AllocationContext<'_>) -> Result<Allocation> {
        let weights: Vec<u128> = ctx.slots.iter().map(|s| u128::from(s.active)).collect();
        normalize(&weights, FULL_PERCENT)
    }
}

/// Fractional-Kelly style split: weight each slot by `apy / risk²`, cap
/// each slot at `max_allocation_bps`, normalize to exactly 100%.
/// Falls back to a uniform split when no slot has positive APY.
pub struct ApyRiskAllocation {
    pub max_allocation_bps: u128,
}

impl AllocationProvider for ApyRiskAllocation {
    fn calculate_allocation(&self, ctx: &AllocationContext<'_>) -> Result<Allocation> {
        let weights: Vec<u128> = ctx.slots.iter().map(kelly_raw).collect();
        if weights.iter().all(|w| *w == 0) {
            return UniformAllocation.calculate_allocation(ctx);
        }
        normalize(&weights, self.max_allocation_bps)
    }
}

/// Raw weight for a single slot: apy / risk^2, zero for inactive or losing slots.
fn kelly_raw(slot: &SlotInfo) -> u128 {
    if !slot.active || slot.apy <= 0 {
        return 0;
    }
    let risk = u128::from(slot.risk_score.max(1));
    slot.apy as u128 / (risk * risk)
}

/// Scale `weights` to bps summing to `FULL_PERCENT`, capping every slot at
/// `cap` and spreading the excess over uncapped slots. Rounding remainder
/// lands on the largest slot.
fn normalize(weights: &[u128], cap: u128) -> Result<Allocation> {
    let active = weights.iter().filter(|w| **w > 0).count() as u128;
    if active == 0 {
        bail!("no active slot to allocate to");
    }
    // An unreachable cap would leave bps unassigned.
    let cap = cap.max(FULL_PERCENT.div_ceil(active)).min(FULL_PERCENT);

    let mut out = vec![0u128; weights.len()];
    let mut capped = vec![false; weights.len()];
    let mut budget = FULL_PERCENT;
    loop {
        let open: u128 = weights
            .iter()
            .zip(&capped)
            .filter(|(_, c)| !**c)
            .map(|(w, _)| *w)
            .sum();
        if open == 0 {
            break;
        }
        let mut newly_capped = false;
        for (i, w) in weights.iter().enumerate() {
            if capped[i] {
                continue;
            }
            out[i] = w * budget / open;
            if out[i] > cap {
                out[i] = cap;
                capped[i] = true;
                newly_capped = true;
            }
        }
        if !newly_capped {
            break;
        }
        budget = FULL_PERCENT - out.iter().zip(&capped).filter(|(_, c)| **c).map(|(o, _)| *o).sum::<u128>();
    }

    let total: u128 = out.iter().sum();
    if let Some(i) = largest_index(&out) {
        out[i] += FULL_PERCENT.saturating_sub(total);
    }
    Ok(Allocation::new(out.into_iter().map(|v| v as u16).collect())?)
}

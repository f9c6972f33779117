use serde::{Deserialize, Serialize};

use crate::batch::NetFlow;
use crate::error::{VaultError, VaultResult};
use crate::math::{add_vec, checked_add, checked_sub, is_zero, mul_div_down};
use crate::model::{StrategyId, VaultId};
use crate::oracle::Pricing;

/// Lifecycle of one harvest round of one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Collecting flushed flows; not started.
    Idle,
    Harvesting,
    /// A non-atomic leg is waiting on the yield source.
    PendingContinuation,
    Finalized,
}

impl RoundStatus {
    pub fn name(self) -> &'static str {
        match self {
            RoundStatus::Idle => "idle",
            RoundStatus::Harvesting => "harvesting",
            RoundStatus::PendingContinuation => "pending_continuation",
            RoundStatus::Finalized => "finalized",
        }
    }

    fn can_become(self, next: RoundStatus) -> bool {
        use RoundStatus::*;
        matches!(
            (self, next),
            (Idle, Harvesting)
                | (Harvesting, Finalized)
                | (Harvesting, PendingContinuation)
                | (PendingContinuation, Finalized)
        )
    }
}

/// Flows one vault flush committed to a strategy round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub vault: VaultId,
    pub flush_index: u64,
    pub deposits: Vec<u128>,
    pub withdrawn_shares: u128,
    #[serde(default)]
    pub settled: bool,
}

/// Flows collected for the next harvest round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInput {
    pub deposits: Vec<u128>,
    /// Strategy shares parked under `@withdrawing`.
    pub withdrawn_shares: u128,
    pub contributions: Vec<Contribution>,
}

impl RoundInput {
    pub fn new(asset_count: usize) -> Self {
        Self {
            deposits: vec![0; asset_count],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    pub fn add(&mut self, contribution: Contribution) -> VaultResult<()> {
        self.deposits = add_vec(&self.deposits, &contribution.deposits)?;
        self.withdrawn_shares = checked_add(self.withdrawn_shares, contribution.withdrawn_shares)?;
        self.contributions.push(contribution);
        Ok(())
    }
}

/// Deposit leg sent to the yield source and not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeposit {
    /// Compound remainder owned by legacy holders.
    pub compound: Vec<u128>,
    /// Depositors' assets, net of the boundary fee.
    pub deposits: Vec<u128>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLegs {
    pub deposit: Option<PendingDeposit>,
    pub withdrawal: bool,
}

impl PendingLegs {
    pub fn is_empty(&self) -> bool {
        self.deposit.is_none() && !self.withdrawal
    }
}

/// Snapshot of one harvest round.
///
/// Per asset, `assets_before + compound + input.deposits` equals
/// `withdrawn_assets + boundary_fees + holdings_after` for rounds settled
/// within the harvest call, where `holdings_after` is what the source
/// reports at the end of the round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestRound {
    pub index: u64,
    pub status: RoundStatus,
    pub started_at: u64,
    pub finalized_at: Option<u64>,
    pub pricing: Pricing,
    pub input: RoundInput,

    // ── Yield ──
    /// Source holdings after base yield, before any flow of this round.
    pub assets_before: Vec<u128>,
    pub base_yield_value: i128,
    pub compound: Vec<u128>,
    pub compound_value: u128,
    /// Gross round yield over the previous holdings, `YIELD_FULL_PERCENT` scaled.
    pub yield_pct: i128,
    pub platform_fee_shares: u128,

    // ── Flows ──
    pub withdrawal_entitlement: Vec<u128>,
    pub matched_compound: Vec<u128>,
    pub netting: NetFlow,
    pub boundary_fees: Vec<u128>,
    /// Matched assets held in the master wallet until the round finalizes.
    pub reserved: Vec<u128>,
    /// Everything paid to withdrawing vaults.
    pub withdrawn_assets: Vec<u128>,
    pub pending: PendingLegs,

    // ── Deposit shares ──
    pub deposit_value: u128,
    pub deposit_shares: u128,

    // ── Post state ──
    pub holdings_after: Vec<u128>,
    pub value_after: u128,
    pub supply_after: u128,

    // ── Claims by vault sync ──
    unclaimed_deposit_shares: u128,
    unclaimed_deposit_value: u128,
    unclaimed_assets: Vec<u128>,
    unclaimed_withdrawn_shares: u128,
}

impl HarvestRound {
    pub fn begin(
        strategy: StrategyId,
        index: u64,
        now: u64,
        pricing: Pricing,
        input: RoundInput,
    ) -> VaultResult<Self> {
        let len = input.deposits.len();
        let mut round = Self {
            index,
            status: RoundStatus::Idle,
            started_at: now,
            finalized_at: None,
            pricing,
            input,
            assets_before: vec![0; len],
            base_yield_value: 0,
            compound: vec![0; len],
            compound_value: 0,
            yield_pct: 0,
            platform_fee_shares: 0,
            withdrawal_entitlement: vec![0; len],
            matched_compound: vec![0; len],
            netting: NetFlow::default(),
            boundary_fees: vec![0; len],
            reserved: vec![0; len],
            withdrawn_assets: vec![0; len],
            pending: PendingLegs::default(),
            deposit_value: 0,
            deposit_shares: 0,
            holdings_after: vec![0; len],
            value_after: 0,
            supply_after: 0,
            unclaimed_deposit_shares: 0,
            unclaimed_deposit_value: 0,
            unclaimed_assets: vec![0; len],
            unclaimed_withdrawn_shares: 0,
        };
        round.transition(strategy, RoundStatus::Harvesting)?;
        Ok(round)
    }

    pub fn transition(&mut self, strategy: StrategyId, next: RoundStatus) -> VaultResult<()> {
        if !self.status.can_become(next) {
            return Err(VaultError::InvalidTransition {
                strategy,
                from: self.status.name(),
                to: next.name(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn is_final(&self) -> bool {
        self.status == RoundStatus::Finalized
    }

    /// Seal the round and open its results to vault sync.
    pub(crate) fn finalize(&mut self, strategy: StrategyId, now: u64) -> VaultResult<()> {
        self.transition(strategy, RoundStatus::Finalized)?;
        self.finalized_at = Some(now);
        self.unclaimed_deposit_shares = self.deposit_shares;
        self.unclaimed_deposit_value = self
            .input
            .contributions
            .iter()
            .map(|c| self.pricing.value(&c.deposits))
            .sum::<VaultResult<u128>>()?;
        self.unclaimed_assets = self.withdrawn_assets.clone();
        self.unclaimed_withdrawn_shares = self.input.withdrawn_shares;
        Ok(())
    }

    /// Settle one vault's contribution: its share of the round's deposit
    /// shares and withdrawn assets. Each payout is taken pro-rata from what
    /// is still unclaimed, so the last contributor receives the remainder.
    pub(crate) fn settle_contribution(
        &mut self,
        vault: &str,
        flush_index: u64,
    ) -> VaultResult<Option<(u128, Vec<u128>)>> {
        let Some(pos) = self
            .input
            .contributions
            .iter()
            .position(|c| c.vault == vault && c.flush_index == flush_index && !c.settled)
        else {
            return Ok(None);
        };
        let contribution = self.input.contributions[pos].clone();

        let value = self.pricing.value(&contribution.deposits)?;
        let shares = if value == 0 || self.unclaimed_deposit_value == 0 {
            0
        } else {
            mul_div_down(self.unclaimed_deposit_shares, value, self.unclaimed_deposit_value)?
        };
        self.unclaimed_deposit_shares = checked_sub(self.unclaimed_deposit_shares, shares)?;
        self.unclaimed_deposit_value = self.unclaimed_deposit_value.saturating_sub(value);

        let mut assets = vec![0; self.unclaimed_assets.len()];
        if contribution.withdrawn_shares > 0 && self.unclaimed_withdrawn_shares > 0 {
            for (out, left) in assets.iter_mut().zip(self.unclaimed_assets.iter_mut()) {
                *out = mul_div_down(
                    *left,
                    contribution.withdrawn_shares,
                    self.unclaimed_withdrawn_shares,
                )?;
                *left -= *out;
            }
            self.unclaimed_withdrawn_shares =
                checked_sub(self.unclaimed_withdrawn_shares, contribution.withdrawn_shares)?;
        }

        self.input.contributions[pos].settled = true;
        Ok(Some((shares, assets)))
    }

    /// Whether anything of this round is still owed to vaults.
    pub fn has_unsettled(&self) -> bool {
        self.unclaimed_deposit_shares > 0 || !is_zero(&self.unclaimed_assets)
    }
}

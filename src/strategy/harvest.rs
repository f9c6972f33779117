//! Harvest coordinator for a single strategy: one do-hard-work round and
//! its optional continuation.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::round::{HarvestRound, PendingDeposit, RoundInput, RoundStatus};
use super::source::{Settlement, YieldSource};
use super::{ApyPoint, Strategy, StrategyStatus};
use crate::batch::net_flows;
use crate::engine::state::AssetBalances;
use crate::error::{VaultError, VaultResult};
use crate::math::{
    INITIAL_LOCKED_SHARES, SECONDS_PER_YEAR, YIELD_FULL_PERCENT, add_vec, bps_of, checked_add,
    fee_shares, is_zero, min_vec, mul_div_down, mul_div_signed, scale_vec, shares_for_value,
    sub_vec,
};
use crate::model::{AssetGroup, LOCKED, MASTER_WALLET, StrategyId, UNCLAIMED, WITHDRAWING, strategy_fee_account};
use crate::oracle::Pricing;

/// Collaborators a harvest needs besides the strategy itself.
pub struct HarvestCtx<'a> {
    pub source: &'a mut dyn YieldSource,
    pub balances: &'a mut AssetBalances,
    pub group: &'a AssetGroup,
    pub pricing: &'a Pricing,
    pub now: u64,
}

/// What one harvest or continuation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSummary {
    pub strategy: StrategyId,
    pub dhw_index: u64,
    pub status: RoundStatus,
    pub yield_pct: i128,
    pub deposited: Vec<u128>,
    pub withdrawn: Vec<u128>,
    pub matched: Vec<u128>,
    pub platform_fee_shares: u128,
    pub deposit_shares: u128,
}

impl HarvestSummary {
    fn of(strategy: StrategyId, round: &HarvestRound) -> Self {
        Self {
            strategy,
            dhw_index: round.index,
            status: round.status,
            yield_pct: round.yield_pct,
            deposited: round.netting.to_protocol.clone(),
            withdrawn: round.netting.from_protocol.clone(),
            matched: add_vec(&round.netting.matched, &round.matched_compound)
                .unwrap_or_else(|_| round.netting.matched.clone()),
            platform_fee_shares: round.platform_fee_shares,
            deposit_shares: round.deposit_shares,
        }
    }
}

struct Accrual {
    assets: Vec<u128>,
    compound: Vec<u128>,
    base_value: i128,
    compound_value: u128,
    yield_pct: i128,
}

fn signed(value: u128) -> VaultResult<i128> {
    i128::try_from(value).map_err(|_| VaultError::Overflow)
}

impl Strategy {
    /// Run round `dhw_index` over the flows collected since the last harvest.
    pub fn harvest(&mut self, ctx: &mut HarvestCtx<'_>, base_yield: i128) -> VaultResult<HarvestSummary> {
        let id = self.id;
        let len = ctx.group.len();
        let input = std::mem::replace(&mut self.input, RoundInput::new(len));
        let mut round = HarvestRound::begin(id, self.dhw_index, ctx.now, ctx.pricing.clone(), input)?;
        self.dhw_index += 1;

        // ── Yield and platform fees ──
        let accrual = self.accrue(ctx, base_yield, true)?;
        let pool = add_vec(&accrual.assets, &accrual.compound)?;
        let pool_value = ctx.pricing.value(&pool)?;
        if accrual.base_value + signed(accrual.compound_value)? > 0 {
            let gross = (accrual.base_value + signed(accrual.compound_value)?) as u128;
            round.platform_fee_shares = self.mint_platform_fees(gross, pool_value)?;
        }
        round.assets_before = accrual.assets;
        round.base_yield_value = accrual.base_value;
        round.compound_value = accrual.compound_value;
        round.yield_pct = accrual.yield_pct;

        // ── Withdrawal entitlement, then matching ──
        let withdrawn_shares = round.input.withdrawn_shares;
        if withdrawn_shares > 0 {
            round.withdrawal_entitlement =
                scale_vec(&pool, withdrawn_shares, self.shares.total_supply())?;
            self.shares.burn(WITHDRAWING, withdrawn_shares)?;
        }
        round.matched_compound = min_vec(&accrual.compound, &round.withdrawal_entitlement);
        let outstanding = sub_vec(&round.withdrawal_entitlement, &round.matched_compound)?;
        round.netting = net_flows(&round.input.deposits, &outstanding);
        let compound_rest = sub_vec(&accrual.compound, &round.matched_compound)?;
        round.compound = accrual.compound;

        // Deposits leave the master wallet; matched volume stays there for withdrawers.
        ctx.balances.debit_vec(MASTER_WALLET, ctx.group, &round.input.deposits)?;
        round.reserved = add_vec(&round.matched_compound, &round.netting.matched)?;
        ctx.balances.credit_vec(MASTER_WALLET, ctx.group, &round.reserved)?;
        round.withdrawn_assets = round.reserved.clone();

        // ── Withdrawal leg ──
        if !is_zero(&round.netting.from_protocol) {
            let settlement = ctx
                .source
                .withdraw(&round.netting.from_protocol)
                .map_err(|e| VaultError::from_source(id, e))?;
            match settlement {
                Settlement::Settled(received) => self.receive_withdrawal(ctx, &mut round, &received)?,
                Settlement::Pending if self.kind.withdrawal_may_pend() => round.pending.withdrawal = true,
                Settlement::Pending => return Err(unexpected_pending(id, "withdrawal")),
            }
        }

        // ── Deposit leg ──
        let deposit_fee = self.boundary_fee(ctx, &round.netting.to_protocol, self.fees.deposit_fee_bps)?;
        round.boundary_fees = add_vec(&round.boundary_fees, &deposit_fee)?;
        let depositors_net = sub_vec(&round.netting.to_protocol, &deposit_fee)?;
        let send = add_vec(&compound_rest, &depositors_net)?;
        if !is_zero(&send) {
            let settlement = ctx.source.deposit(&send).map_err(|e| VaultError::from_source(id, e))?;
            match settlement {
                Settlement::Settled(_) => {}
                Settlement::Pending if self.kind.deposit_may_pend() => {
                    round.pending.deposit = Some(PendingDeposit {
                        compound: compound_rest,
                        deposits: depositors_net,
                    });
                }
                Settlement::Pending => return Err(unexpected_pending(id, "deposit")),
            }
        }

        if round.pending.deposit.is_none() {
            let credited = sub_vec(&round.input.deposits, &deposit_fee)?;
            let credited_value = ctx.pricing.value(&credited)?;
            let total_after = ctx.pricing.value(&ctx.source.assets())?;
            self.mint_deposit_shares(&mut round, credited_value, total_after.saturating_sub(credited_value))?;
        }

        if round.pending.is_empty() {
            self.seal(ctx, &mut round)?;
        } else {
            self.holdings = ctx.source.assets();
            round.transition(id, RoundStatus::PendingContinuation)?;
            debug!(strategy = %id, round = round.index, "round waiting on continuation");
        }

        let summary = HarvestSummary::of(id, &round);
        self.rounds.insert(round.index, round);
        Ok(summary)
    }

    /// Complete the pending legs of the open round with the source's final
    /// amounts, then mint deposit shares at the then-current rate.
    pub fn continue_round(&mut self, ctx: &mut HarvestCtx<'_>, base_yield: i128) -> VaultResult<HarvestSummary> {
        let id = self.id;
        let index = self.pending_round().ok_or(VaultError::NoPendingContinuation(id))?;
        let mut round = self
            .rounds
            .remove(&index)
            .ok_or(VaultError::NoPendingContinuation(id))?;

        let accrual = self.accrue(ctx, base_yield, false)?;
        round.yield_pct += accrual.yield_pct;
        round.base_yield_value += accrual.base_value;

        if round.pending.withdrawal {
            let received = ctx
                .source
                .continue_withdrawal()
                .map_err(|e| VaultError::from_source(id, e))?
                .ok_or(VaultError::ContinuationNotConfirmed(id))?;
            self.receive_withdrawal(ctx, &mut round, &received)?;
            round.pending.withdrawal = false;
        }

        let pending_deposit = round.pending.deposit.take();
        let mut credited_value = 0;
        if let Some(pending) = &pending_deposit {
            let landed = ctx
                .source
                .continue_deposit()
                .map_err(|e| VaultError::from_source(id, e))?
                .ok_or(VaultError::ContinuationNotConfirmed(id))?;
            ctx.group.check_len(&landed)?;
            // Split what landed between legacy compound and depositors by what was sent.
            let mut depositors = Vec::with_capacity(landed.len());
            for ((landed, compound), deposit) in landed.iter().zip(&pending.compound).zip(&pending.deposits) {
                let sent = checked_add(*compound, *deposit)?;
                depositors.push(if sent == 0 { 0 } else { mul_div_down(*landed, *deposit, sent)? });
            }
            let credited = add_vec(&round.netting.matched, &depositors)?;
            credited_value = ctx.pricing.value(&credited)?;
        }

        let total_after = ctx.pricing.value(&ctx.source.assets())?;
        let legacy_value = total_after.saturating_sub(credited_value);
        if accrual.base_value > 0 {
            round.platform_fee_shares += self.mint_platform_fees(accrual.base_value as u128, legacy_value)?;
        }
        if pending_deposit.is_some() {
            self.mint_deposit_shares(&mut round, credited_value, legacy_value)?;
        }

        self.seal(ctx, &mut round)?;
        let summary = HarvestSummary::of(id, &round);
        self.rounds.insert(round.index, round);
        Ok(summary)
    }

    /// Pull everything out of the source and hand it to `recipient`.
    pub fn emergency_exit(&mut self, ctx: &mut HarvestCtx<'_>, recipient: &str) -> VaultResult<Vec<u128>> {
        let assets = ctx
            .source
            .emergency_withdraw()
            .map_err(|e| VaultError::from_source(self.id, e))?;
        ctx.balances.credit_vec(recipient, ctx.group, &assets)?;
        self.holdings = ctx.group.zeros();
        self.status = StrategyStatus::Removed;
        warn!(strategy = %self.id, recipient, ?assets, "strategy emergency-exited");
        Ok(assets)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn accrue(&mut self, ctx: &mut HarvestCtx<'_>, base_yield: i128, claim: bool) -> VaultResult<Accrual> {
        let id = self.id;
        ctx.source
            .report_base_yield(base_yield)
            .map_err(|e| VaultError::from_source(id, e))?;
        let compound = if claim {
            ctx.source
                .claim_compound()
                .map_err(|e| VaultError::from_source(id, e))?
        } else {
            ctx.group.zeros()
        };
        ctx.group.check_len(&compound)?;
        let assets = ctx.source.assets();
        ctx.group.check_len(&assets)?;

        let previous = ctx.pricing.value(&self.holdings)?;
        let current = ctx.pricing.value(&assets)?;
        let compound_value = ctx.pricing.value(&compound)?;
        let base_value = signed(current)? - signed(previous)?;
        let gross = base_value + signed(compound_value)?;
        let yield_pct = if previous == 0 {
            0
        } else {
            mul_div_signed(gross, YIELD_FULL_PERCENT as u128, previous)?
        };
        Ok(Accrual {
            assets,
            compound,
            base_value,
            compound_value,
            yield_pct,
        })
    }

    /// Mint ecosystem and treasury fee shares worth their cut of `yield_value`
    /// against a ledger currently backing `total_value`.
    fn mint_platform_fees(&mut self, yield_value: u128, total_value: u128) -> VaultResult<u128> {
        let supply = self.shares.total_supply();
        let ecosystem = bps_of(yield_value, self.fees.ecosystem_bps)?;
        let treasury = bps_of(yield_value, self.fees.treasury_bps)?;
        let fee_value = checked_add(ecosystem, treasury)?;
        let minted = fee_shares(fee_value, supply, total_value)?;
        if minted == 0 {
            return Ok(0);
        }
        let to_ecosystem = mul_div_down(minted, ecosystem, fee_value)?;
        self.shares.mint(&self.fees.ecosystem_recipient, to_ecosystem)?;
        self.shares.mint(&self.fees.treasury_recipient, minted - to_ecosystem)?;
        Ok(minted)
    }

    /// Mint shares worth `credited_value` next to legacy holders owning
    /// `legacy_value`. The first mint of the ledger locks a fixed slice.
    fn mint_deposit_shares(
        &mut self,
        round: &mut HarvestRound,
        credited_value: u128,
        legacy_value: u128,
    ) -> VaultResult<()> {
        round.deposit_value = credited_value;
        if credited_value == 0 {
            return Ok(());
        }
        let supply = self.shares.total_supply();
        let minted = if supply == 0 || legacy_value == 0 {
            credited_value
        } else {
            shares_for_value(credited_value, supply, legacy_value)?
        };
        let locked = if supply == 0 {
            minted.min(INITIAL_LOCKED_SHARES)
        } else {
            0
        };
        self.shares.mint(LOCKED, locked)?;
        self.shares.mint(UNCLAIMED, minted - locked)?;
        round.deposit_shares = minted - locked;
        Ok(())
    }

    fn receive_withdrawal(
        &mut self,
        ctx: &mut HarvestCtx<'_>,
        round: &mut HarvestRound,
        received: &[u128],
    ) -> VaultResult<()> {
        ctx.group.check_len(received)?;
        let fee = self.boundary_fee(ctx, received, self.fees.withdrawal_fee_bps)?;
        let net = sub_vec(received, &fee)?;
        ctx.balances.credit_vec(MASTER_WALLET, ctx.group, &net)?;
        round.boundary_fees = add_vec(&round.boundary_fees, &fee)?;
        round.withdrawn_assets = add_vec(&round.withdrawn_assets, &net)?;
        Ok(())
    }

    /// Take `bps` of `gross` into the strategy's fee account, returning the fee.
    pub(crate) fn boundary_fee(
        &self,
        ctx: &mut HarvestCtx<'_>,
        gross: &[u128],
        bps: u128,
    ) -> VaultResult<Vec<u128>> {
        let fee = gross
            .iter()
            .map(|g| bps_of(*g, bps))
            .collect::<VaultResult<Vec<_>>>()?;
        ctx.balances.credit_vec(&strategy_fee_account(self.id), ctx.group, &fee)?;
        Ok(fee)
    }

    fn seal(&mut self, ctx: &mut HarvestCtx<'_>, round: &mut HarvestRound) -> VaultResult<()> {
        self.holdings = ctx.source.assets();
        round.holdings_after = self.holdings.clone();
        round.value_after = ctx.pricing.value(&self.holdings)?;
        round.supply_after = self.shares.total_supply();
        round.finalize(self.id, ctx.now)?;

        let elapsed = ctx.now.saturating_sub(self.last_harvest_ts);
        let apy = if elapsed == 0 {
            0
        } else {
            mul_div_signed(round.yield_pct, SECONDS_PER_YEAR, elapsed as u128)?
        };
        self.apy_history.push(ApyPoint {
            dhw_index: round.index,
            timestamp: ctx.now,
            yield_pct: round.yield_pct,
            apy,
        });
        self.last_harvest_ts = ctx.now;
        debug!(strategy = %self.id, round = round.index, yield_pct = round.yield_pct, "round finalized");
        Ok(())
    }
}

fn unexpected_pending(strategy: StrategyId, leg: &str) -> VaultError {
    VaultError::YieldSource {
        strategy,
        message: format!("{leg} leg settled asynchronously for a strategy that requires it atomic"),
    }
}

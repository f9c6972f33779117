//! Synchronous paths that bypass harvest rounds: fast redemption and
//! reallocation transfers.

use super::harvest::HarvestCtx;
use super::Strategy;
use crate::error::{VaultError, VaultResult};
use crate::math::{INITIAL_LOCKED_SHARES, add_vec, checked_add, checked_sub, mul_div_down, scale_vec, shares_for_value, sub_vec};
use crate::model::LOCKED;

impl Strategy {
    /// Burn each holder's shares and withdraw their pro-rata slice of the
    /// source in one fast withdrawal. Returns the assets net of the
    /// withdrawal fee.
    pub fn withdraw_shares_fast(
        &mut self,
        ctx: &mut HarvestCtx<'_>,
        burns: &[(String, u128)],
    ) -> VaultResult<Vec<u128>> {
        if self.pending_round().is_some() {
            return Err(VaultError::ContinuationPending(self.id));
        }
        let supply = self.shares.total_supply();
        let shares = burns.iter().try_fold(0u128, |acc, (_, s)| checked_add(acc, *s))?;
        if shares == 0 || supply == 0 {
            return Ok(ctx.group.zeros());
        }
        let amounts = scale_vec(&ctx.source.assets(), shares, supply)?;
        for (holder, burned) in burns {
            self.shares.burn(holder, *burned)?;
        }
        let received = ctx
            .source
            .withdraw_fast(&amounts)
            .map_err(|e| VaultError::from_source(self.id, e))?;
        ctx.group.check_len(&received)?;
        // Keep the baseline proportional so unharvested yield stays measurable.
        self.holdings = scale_vec(&self.holdings, checked_sub(supply, shares)?, supply)?;
        let fee = self.boundary_fee(ctx, &received, self.fees.withdrawal_fee_bps)?;
        sub_vec(&received, &fee)
    }

    /// Deposit `amounts` through the fast path and mint shares for what
    /// landed, split over `recipients` by weight. Returns the shares minted
    /// to recipients.
    pub fn deposit_fast(
        &mut self,
        ctx: &mut HarvestCtx<'_>,
        amounts: &[u128],
        recipients: &[(String, u128)],
    ) -> VaultResult<u128> {
        if self.pending_round().is_some() {
            return Err(VaultError::ContinuationPending(self.id));
        }
        let fee = self.boundary_fee(ctx, amounts, self.fees.deposit_fee_bps)?;
        let send = sub_vec(amounts, &fee)?;
        let value_before = ctx.pricing.value(&ctx.source.assets())?;
        let supply = self.shares.total_supply();
        let landed = ctx
            .source
            .deposit_fast(&send)
            .map_err(|e| VaultError::from_source(self.id, e))?;
        ctx.group.check_len(&landed)?;
        self.holdings = add_vec(&self.holdings, &landed)?;

        let credited = ctx.pricing.value(&landed)?;
        let minted = if supply == 0 || value_before == 0 {
            credited
        } else {
            shares_for_value(credited, supply, value_before)?
        };
        let locked = if supply == 0 {
            minted.min(INITIAL_LOCKED_SHARES)
        } else {
            0
        };
        self.shares.mint(LOCKED, locked)?;

        let mut left = minted - locked;
        let mut weight_left: u128 = recipients.iter().map(|(_, w)| *w).sum();
        for (holder, weight) in recipients {
            if weight_left == 0 {
                break;
            }
            let part = mul_div_down(left, *weight, weight_left)?;
            self.shares.mint(holder, part)?;
            left -= part;
            weight_left -= weight;
        }
        Ok(minted - locked - left)
    }
}

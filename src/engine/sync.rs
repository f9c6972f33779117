//! Vault sync: fold finalized harvest rounds back into the vault, charge
//! vault fees and escrow deposit shares for receipt claims.

use tracing::{debug, info};

use super::Protocol;
use super::state::ProtocolState;
use crate::error::{VaultError, VaultResult};
use crate::math::{
    FULL_PERCENT, INITIAL_LOCKED_SHARES, SECONDS_PER_YEAR, WAD, add_vec, bps_of, checked_add,
    checked_sub, fee_shares, mul_div_down, share_price, value_of_shares,
};
use crate::model::{ESCROW, LOCKED, UNCLAIMED, vault_holder};
use crate::vault::SyncOutcome;

impl Protocol {
    /// Sync every flushed round of `vault` whose harvests are finalized.
    pub fn sync_vault(&mut self, vault: &str) -> VaultResult<Vec<SyncOutcome>> {
        self.transact("sync_vault", |p| p.sync_pending(vault))
    }

    /// What [`Protocol::sync_vault`] would do right now, without mutating anything.
    pub fn simulate_sync(&self, vault: &str) -> VaultResult<Vec<SyncOutcome>> {
        let mut state = self.state.clone();
        sync_state(&mut state, vault)
    }

    pub(crate) fn sync_pending(&mut self, vault: &str) -> VaultResult<Vec<SyncOutcome>> {
        sync_state(&mut self.state, vault)
    }
}

/// Sync flushes in order until one is not ready.
pub(crate) fn sync_state(state: &mut ProtocolState, vault: &str) -> VaultResult<Vec<SyncOutcome>> {
    let mut outcomes = Vec::new();
    loop {
        let v = state.vault(vault)?;
        if !v.has_unsynced_flushes() {
            break;
        }
        let index = v.next_sync;
        match sync_flush(state, vault, index)? {
            Some(outcome) => outcomes.push(outcome),
            None => {
                debug!(vault, flush = index, "flush waiting on harvest");
                break;
            }
        }
    }
    Ok(outcomes)
}

fn sync_flush(state: &mut ProtocolState, vault_id: &str, flush_index: u64) -> VaultResult<Option<SyncOutcome>> {
    let ProtocolState {
        vaults, strategies, ..
    } = state;
    let vault = vaults
        .get_mut(vault_id)
        .ok_or_else(|| VaultError::UnknownVault(vault_id.to_string()))?;
    let Some(record) = vault.flushes.get(&flush_index) else {
        return Ok(None);
    };

    // Every round the flush fed must be finalized, or its strategy gone.
    for (slot, id) in record.strategies.iter().enumerate() {
        let Some(round_index) = record.dhw_indexes.get(slot).copied().flatten() else {
            continue;
        };
        let strategy = strategies.get(id.index()).ok_or(VaultError::UnknownStrategy(*id))?;
        match strategy.rounds.get(&round_index) {
            Some(round) if round.is_final() => {}
            None if strategy.is_removed() => {}
            _ => return Ok(None),
        }
    }

    let record = record.clone();
    let holder = vault_holder(vault_id);
    let mut withdrawn = vec![0; record.deposits.len()];
    let mut total_value = 0u128;
    let mut deposit_value = 0u128;
    let mut synced_at = record.flushed_at;

    for (slot, id) in record.strategies.iter().enumerate() {
        let Some(round_index) = record.dhw_indexes.get(slot).copied().flatten() else {
            continue;
        };
        let strategy = strategies
            .get_mut(id.index())
            .ok_or(VaultError::UnknownStrategy(*id))?;
        let Some(round) = strategy.rounds.get_mut(&round_index) else {
            continue;
        };
        let (shares, assets) = round
            .settle_contribution(vault_id, flush_index)?
            .unwrap_or((0, vec![0; withdrawn.len()]));
        let (value_after, supply_after) = (round.value_after, round.supply_after);
        synced_at = synced_at.max(round.finalized_at.unwrap_or(0));

        strategy.shares.transfer(UNCLAIMED, &holder, shares)?;
        withdrawn = add_vec(&withdrawn, &assets)?;
        if let Some(last) = vault.synced_dhw.get_mut(slot) {
            *last = Some(round_index);
        }
        if strategy.is_active() {
            let position = strategy.shares.balance_of(&holder);
            total_value = checked_add(total_value, value_of_shares(position, supply_after, value_after)?)?;
            deposit_value = checked_add(deposit_value, value_of_shares(shares, supply_after, value_after)?)?;
        }
    }

    // ── Vault fees on legacy holders ──
    let legacy_value = total_value.saturating_sub(deposit_value);
    // Shares queued for redemption in the open batch still own their part
    // of the strategy positions until the next flush releases it.
    let queued = vault.batch.withdrawn_shares;
    let supply = vault.backing_supply()?;
    let mut outcome = SyncOutcome {
        synced_at,
        legacy_value,
        deposit_value,
        withdrawn_assets: withdrawn.clone(),
        ..Default::default()
    };
    if supply > 0 {
        let elapsed = synced_at.saturating_sub(vault.last_sync_ts) as u128;
        outcome.management_fee_shares = mul_div_down(
            supply,
            vault.fees.management_bps * elapsed,
            FULL_PERCENT * SECONDS_PER_YEAR,
        )?;
        let price = share_price(legacy_value, supply)?;
        if vault.high_water_price > 0 && price > vault.high_water_price && vault.fees.performance_bps > 0 {
            let gain = mul_div_down(price - vault.high_water_price, supply, WAD)?;
            let fee_value = bps_of(gain, vault.fees.performance_bps)?;
            outcome.performance_fee_shares = fee_shares(fee_value, supply, legacy_value)?;
        }
        vault.shares.mint(&vault.owner, outcome.management_fee_shares)?;
        vault.shares.mint(&vault.owner, outcome.performance_fee_shares)?;
    }

    // ── Deposit shares into escrow ──
    let fee_supply = vault.backing_supply()?;
    if deposit_value > 0 {
        let minted = if fee_supply == 0 || legacy_value == 0 {
            deposit_value
        } else {
            mul_div_down(fee_supply, deposit_value, legacy_value)?
        };
        outcome.deposit_fee_shares = bps_of(minted, vault.fees.deposit_bps)?;
        let after_fee = checked_sub(minted, outcome.deposit_fee_shares)?;
        outcome.locked_shares = if fee_supply == 0 {
            after_fee.min(INITIAL_LOCKED_SHARES)
        } else {
            0
        };
        outcome.escrowed_shares = after_fee - outcome.locked_shares;
        vault.shares.mint(&vault.owner, outcome.deposit_fee_shares)?;
        vault.shares.mint(LOCKED, outcome.locked_shares)?;
        vault.shares.mint(ESCROW, outcome.escrowed_shares)?;
    }

    let supply_after = vault.backing_supply()?;
    outcome.share_price = if supply_after == 0 {
        0
    } else {
        share_price(checked_add(legacy_value, deposit_value)?, supply_after)?
    };
    vault.high_water_price = vault.high_water_price.max(outcome.share_price);
    vault.last_sync_ts = synced_at;
    vault.next_sync = flush_index + 1;

    let record = vault
        .flushes
        .get_mut(&flush_index)
        .ok_or_else(|| VaultError::UnknownVault(vault_id.to_string()))?;
    record.unclaimed_escrow = outcome.escrowed_shares;
    record.unclaimed_assets = withdrawn;
    record.sync = Some(outcome.clone());

    info!(
        vault = vault_id,
        flush = flush_index,
        legacy_value,
        deposit_value,
        fee_shares = outcome.total_fee_shares(),
        escrowed = outcome.escrowed_shares,
        queued,
        "vault synced"
    );
    Ok(Some(outcome))
}

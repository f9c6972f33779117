//! User requests against a vault: batched deposits and redemptions, the
//! flush that commits a batch to strategies, and fast redemption.

use tracing::{debug, info};

use super::Protocol;
use super::state::ProtocolState;
use crate::batch::{Batch, net_flows, split_by_allocation};
use crate::error::{VaultError, VaultResult};
use crate::guard::{GuardRequest, RequestType, check_after, check_before};
use crate::ledger::{ReceiptId, ReceiptKind};
use crate::math::{add_vec, checked_add, is_zero, mul_div_down, scale_vec};
use crate::model::{MASTER_WALLET, WITHDRAWING, vault_holder};
use crate::strategy::Contribution;
use crate::vault::FlushRecord;

impl Protocol {
    /// Queue `assets` into the vault's open batch. Returns the deposit receipt.
    pub fn deposit(&mut self, caller: &str, vault: &str, assets: &[u128]) -> VaultResult<ReceiptId> {
        self.transact("deposit", |p| {
            let owner = Self::ensure_user(caller)?;
            p.sync_pending(vault)?;

            let v = p.state.vault(vault)?;
            let group = p.state.assets.group(v.asset_group)?.clone();
            group.check_len(assets)?;
            if is_zero(assets) {
                return Err(VaultError::ZeroAmount);
            }
            if v.live_strategies().next().is_none() || v.allocation.sum() == 0 {
                return Err(VaultError::NoActiveStrategy(vault.to_string()));
            }
            let request = GuardRequest {
                kind: RequestType::Deposit,
                vault,
                caller,
                assets,
                shares: 0,
            };
            check_before(p.guards_of(vault), &request)?;

            p.state.balances.transfer_vec(&owner, MASTER_WALLET, &group, assets)?;
            let now = p.clock.now();
            let v = p.state.vault_mut(vault)?;
            v.batch.add_deposit(assets)?;
            let flush_index = v.flush_index;
            let id = p.state.receipts.issue(
                ReceiptKind::Deposit,
                &owner,
                vault,
                flush_index,
                assets.to_vec(),
                0,
                now,
            );

            check_after(p.guards_of(vault), &request)?;
            info!(vault, account = %owner, receipt = id, flush = flush_index, ?assets, "deposit queued");
            Ok(id)
        })
    }

    /// Burn `shares` of the caller and queue them for withdrawal in the open
    /// batch. Returns the withdrawal receipt.
    pub fn redeem(&mut self, caller: &str, vault: &str, shares: u128) -> VaultResult<ReceiptId> {
        self.transact("redeem", |p| {
            let owner = Self::ensure_user(caller)?;
            p.sync_pending(vault)?;
            if shares == 0 {
                return Err(VaultError::ZeroAmount);
            }
            let request = GuardRequest {
                kind: RequestType::Withdrawal,
                vault,
                caller,
                assets: &[],
                shares,
            };
            check_before(p.guards_of(vault), &request)?;

            let now = p.clock.now();
            let v = p.state.vault_mut(vault)?;
            v.shares.burn(&owner, shares)?;
            v.batch.add_withdrawal(shares)?;
            let flush_index = v.flush_index;
            let assets = vec![0; v.batch.deposits.len()];
            let id = p.state.receipts.issue(
                ReceiptKind::Withdrawal,
                &owner,
                vault,
                flush_index,
                assets,
                shares,
                now,
            );

            check_after(p.guards_of(vault), &request)?;
            info!(vault, account = %owner, receipt = id, flush = flush_index, shares, "redemption queued");
            Ok(id)
        })
    }

    /// Fold several receipts of the caller into one.
    pub fn merge_receipts(&mut self, caller: &str, receipts: &[ReceiptId]) -> VaultResult<ReceiptId> {
        self.transact("merge_receipts", |p| {
            let now = p.clock.now();
            let id = p.state.receipts.merge(receipts, caller, now)?;
            debug!(account = caller, merged = ?receipts, into = id, "receipts merged");
            Ok(id)
        })
    }

    /// Close the open batch and commit it to the vault's strategies. An
    /// empty batch is a no-op and returns `None`.
    pub fn flush(&mut self, vault: &str) -> VaultResult<Option<u64>> {
        self.transact("flush", |p| {
            p.sync_pending(vault)?;
            p.flush_inner(vault)
        })
    }

    fn flush_inner(&mut self, vault_id: &str) -> VaultResult<Option<u64>> {
        let now = self.clock.now();
        let (group_id, batch_empty) = {
            let v = self.state.vault(vault_id)?;
            (v.asset_group, v.batch.is_empty())
        };
        if batch_empty {
            debug!(vault = vault_id, "nothing to flush");
            return Ok(None);
        }
        let pricing = self.pricing(group_id)?;

        let ProtocolState {
            vaults,
            strategies,
            receipts,
            assets,
            ..
        } = &mut self.state;
        let group = assets.group(group_id)?;
        let vault = vaults
            .get_mut(vault_id)
            .ok_or_else(|| VaultError::UnknownVault(vault_id.to_string()))?;

        let batch = std::mem::replace(&mut vault.batch, Batch::new(group.len()));
        let deposits = add_vec(&batch.deposits, &vault.dust)?;
        let live_slots = vault
            .strategies
            .iter()
            .filter(|s| strategies.get(s.index()).is_some_and(|st| !s.is_ghost() && st.is_active()))
            .count();
        if !is_zero(&batch.deposits) && (live_slots == 0 || vault.allocation.sum() == 0) {
            return Err(VaultError::NoActiveStrategy(vault_id.to_string()));
        }
        let (splits, dust) = if live_slots == 0 {
            (vec![group.zeros(); vault.strategies.len()], deposits.clone())
        } else {
            split_by_allocation(&deposits, &vault.allocation)?
        };

        let supply = vault.shares.total_supply();
        let withdrawn = batch.withdrawn_shares;
        let holder = vault_holder(vault_id);
        let flush_index = vault.flush_index;

        let mut dhw_indexes = Vec::with_capacity(vault.strategies.len());
        let mut strategy_deposits = Vec::with_capacity(vault.strategies.len());
        let mut strategy_withdrawn = Vec::with_capacity(vault.strategies.len());
        let mut netting = Vec::with_capacity(vault.strategies.len());
        for (slot, id) in vault.strategies.iter().enumerate() {
            let strategy = strategies
                .get_mut(id.index())
                .ok_or(VaultError::UnknownStrategy(*id))?;
            if id.is_ghost() || !strategy.is_active() {
                dhw_indexes.push(None);
                strategy_deposits.push(group.zeros());
                strategy_withdrawn.push(0);
                netting.push(net_flows(&group.zeros(), &group.zeros()));
                continue;
            }

            let released = if withdrawn > 0 {
                mul_div_down(strategy.shares.balance_of(&holder), withdrawn, checked_add(supply, withdrawn)?)?
            } else {
                0
            };
            strategy.shares.transfer(&holder, WITHDRAWING, released)?;
            let strategy_supply = strategy.shares.total_supply();
            let estimate = if strategy_supply == 0 {
                group.zeros()
            } else {
                scale_vec(&strategy.holdings, released, strategy_supply)?
            };
            netting.push(net_flows(&splits[slot], &estimate));

            if !is_zero(&splits[slot]) || released > 0 {
                strategy.input.add(Contribution {
                    vault: vault_id.to_string(),
                    flush_index,
                    deposits: splits[slot].clone(),
                    withdrawn_shares: released,
                    settled: false,
                })?;
            }
            dhw_indexes.push(Some(strategy.dhw_index));
            strategy_deposits.push(splits[slot].clone());
            strategy_withdrawn.push(released);
        }

        let unclaimed_deposit_value = receipts
            .iter()
            .filter(|r| {
                r.kind == ReceiptKind::Deposit
                    && !r.claimed
                    && r.vault == vault_id
                    && r.flush_index == flush_index
            })
            .map(|r| pricing.value(&r.assets))
            .sum::<VaultResult<u128>>()?;

        let record = FlushRecord {
            index: flush_index,
            flushed_at: now,
            pricing,
            strategies: vault.strategies.clone(),
            dhw_indexes,
            deposits: batch.deposits.clone(),
            withdrawn_shares: withdrawn,
            strategy_deposits,
            strategy_withdrawn_shares: strategy_withdrawn,
            netting,
            sync: None,
            unclaimed_escrow: 0,
            unclaimed_deposit_value,
            unclaimed_assets: group.zeros(),
            unclaimed_withdrawn_shares: withdrawn,
        };
        vault.flushes.insert(flush_index, record);
        vault.flush_index += 1;
        vault.dust = dust;
        info!(
            vault = vault_id,
            flush = flush_index,
            deposits = ?batch.deposits,
            withdrawn_shares = withdrawn,
            "batch flushed"
        );
        Ok(Some(flush_index))
    }

    /// Redeem `shares` immediately against the strategies' current holdings,
    /// bypassing batching. Returns the assets paid to the caller.
    pub fn redeem_fast(&mut self, caller: &str, vault: &str, shares: u128) -> VaultResult<Vec<u128>> {
        self.transact("redeem_fast", |p| {
            let owner = Self::ensure_user(caller)?;
            p.sync_pending(vault)?;
            if shares == 0 {
                return Err(VaultError::ZeroAmount);
            }
            let request = GuardRequest {
                kind: RequestType::RedeemFast,
                vault,
                caller,
                assets: &[],
                shares,
            };
            check_before(p.guards_of(vault), &request)?;

            let v = p.state.vault(vault)?;
            let supply = v.backing_supply()?;
            let available = v.shares.balance_of(&owner);
            if available < shares {
                return Err(VaultError::InsufficientShares {
                    account: owner,
                    requested: shares,
                    available,
                });
            }
            let group = p.state.assets.group(v.asset_group)?.clone();
            let live: Vec<_> = v.live_strategies().map(|(_, id)| id).collect();
            for id in &live {
                if p.state.strategy(*id)?.pending_round().is_some() {
                    return Err(VaultError::ContinuationPending(*id));
                }
            }
            let pricing = p.pricing(group.id)?;
            let holder = vault_holder(vault);

            let mut paid = group.zeros();
            for id in live {
                let strategy = p.state.strategy(id)?;
                if !strategy.is_active() {
                    continue;
                }
                let strategy_shares = mul_div_down(strategy.shares.balance_of(&holder), shares, supply)?;
                if strategy_shares == 0 {
                    continue;
                }
                let out = p.with_strategy(id, &pricing, |s, ctx| {
                    s.withdraw_shares_fast(ctx, &[(holder.clone(), strategy_shares)])
                })?;
                paid = add_vec(&paid, &out)?;
            }

            p.state.vault_mut(vault)?.shares.burn(&owner, shares)?;
            p.state.balances.credit_vec(&owner, &group, &paid)?;
            check_after(p.guards_of(vault), &request)?;
            info!(vault, account = %owner, shares, ?paid, "fast redemption");
            Ok(paid)
        })
    }
}

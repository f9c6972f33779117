//! Out-of-band rebalance of vault capital across strategies.
//!
//! Surpluses and deficits are first cancelled inside each strategy by moving
//! shares between vaults. What is left is netted across strategies with a
//! greedy flow matrix so every surplus strategy withdraws once and every
//! deficit strategy receives one deposit.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Protocol;
use super::optimizer::ProviderConfig;
use crate::access::Role;
use crate::error::{VaultError, VaultResult};
use crate::math::{FULL_PERCENT, add_vec, checked_add, mul_div_down, shares_for_value, sub_vec, value_of_shares};
use crate::model::{Allocation, AllocationMode, StrategyId, VaultId, vault_holder};
use crate::model::allocation::largest_index;

/// Parameters of one reallocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Reallocate {
    pub vaults: Vec<VaultId>,
    /// Explicit new allocation per vault; vaults not listed ask their provider.
    #[serde(default)]
    pub allocations: BTreeMap<VaultId, Vec<u16>>,
}

/// What a reallocation moved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReallocationReport {
    pub allocations: BTreeMap<VaultId, Vec<u16>>,
    /// Share transfers between vaults inside one strategy.
    pub share_transfers: usize,
    pub withdrawals: usize,
    pub deposits: usize,
    /// `(from, to, value)` edges of the cross-strategy flow matrix.
    pub flows: Vec<(StrategyId, StrategyId, u128)>,
}

/// Greedily match the largest surplus with the largest deficit until one
/// side is exhausted. Returns `(surplus index, deficit index, amount)`.
pub fn flow_matrix(surplus: &[u128], deficit: &[u128]) -> Vec<(usize, usize, u128)> {
    let mut surplus = surplus.to_vec();
    let mut deficit = deficit.to_vec();
    let mut flows = Vec::new();
    while let (Some(i), Some(j)) = (largest_index(&surplus), largest_index(&deficit)) {
        let amount = surplus[i].min(deficit[j]);
        if amount == 0 {
            break;
        }
        surplus[i] -= amount;
        deficit[j] -= amount;
        flows.push((i, j, amount));
    }
    flows
}

/// Per (vault, strategy) position during a reallocation.
struct Position {
    vault: VaultId,
    strategy: StrategyId,
    surplus: u128,
    deficit: u128,
}

impl Protocol {
    pub fn reallocate(&mut self, caller: &str, request: &Reallocate) -> VaultResult<ReallocationReport> {
        self.transact("reallocate", |p| p.reallocate_inner(caller, request))
    }

    fn reallocate_inner(&mut self, caller: &str, request: &Reallocate) -> VaultResult<ReallocationReport> {
        self.state.access.ensure(Role::Reallocator, caller)?;
        let vault_ids: Vec<VaultId> = request.vaults.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let Some(first) = vault_ids.first() else {
            return Ok(ReallocationReport::default());
        };
        let group_id = self.state.vault(first)?.asset_group;

        // ── Preconditions ──
        let mut involved = BTreeSet::new();
        for id in &vault_ids {
            self.sync_pending(id)?;
            let vault = self.state.vault(id)?;
            if vault.asset_group != group_id {
                return Err(VaultError::MixedAssetGroups);
            }
            if vault.mode == AllocationMode::Static {
                return Err(VaultError::StaticAllocation(id.clone()));
            }
            if vault.has_unsynced_flushes() {
                return Err(VaultError::VaultNotSynced(id.clone()));
            }
            involved.extend(vault.live_strategies().map(|(_, s)| s));
        }
        for id in &involved {
            let strategy = self.state.strategy(*id)?;
            if !strategy.is_active() {
                return Err(VaultError::StrategyRemoved(*id));
            }
            if strategy.pending_round().is_some() {
                return Err(VaultError::ContinuationPending(*id));
            }
            if !strategy.input.is_empty() {
                return Err(VaultError::UnprocessedFlows(*id));
            }
        }

        let pricing = self.pricing(group_id)?;
        let mut strategy_value = BTreeMap::new();
        for id in &involved {
            let source = self.source(*id)?;
            let supply = self.state.strategy(*id)?.shares.total_supply();
            strategy_value.insert(*id, (pricing.value(&source.assets())?, supply));
        }

        // ── Targets per vault and slot ──
        let mut report = ReallocationReport::default();
        let mut positions = Vec::new();
        for id in &vault_ids {
            let allocation = self.next_allocation(id, request)?;
            let vault = self.state.vault(id)?;
            let holder = vault_holder(id);
            let mut current = vec![0u128; vault.strategies.len()];
            for (slot, sid) in vault.live_strategies() {
                let (value, supply) = strategy_value[&sid];
                let shares = self.state.strategy(sid)?.shares.balance_of(&holder);
                current[slot] = value_of_shares(shares, supply, value)?;
            }
            let total: u128 = current.iter().sum();
            let mut target: Vec<u128> = (0..current.len())
                .map(|slot| mul_div_down(total, allocation.get(slot), FULL_PERCENT))
                .collect::<VaultResult<_>>()?;
            let assigned: u128 = target.iter().sum();
            if let Some(largest) = largest_index(&target) {
                target[largest] += total - assigned;
            }
            for (slot, sid) in vault.live_strategies() {
                positions.push(Position {
                    vault: id.clone(),
                    strategy: sid,
                    surplus: current[slot].saturating_sub(target[slot]),
                    deficit: target[slot].saturating_sub(current[slot]),
                });
            }
            report.allocations.insert(id.clone(), allocation.0.clone());
            self.state.vault_mut(id)?.allocation = allocation;
        }

        // ── Inside each strategy: move shares from surplus vaults to deficit vaults ──
        for sid in &involved {
            let (value, supply) = strategy_value[sid];
            let idx: Vec<usize> = (0..positions.len()).filter(|i| positions[*i].strategy == *sid).collect();
            for &from in &idx {
                for &to in &idx {
                    let amount = positions[from].surplus.min(positions[to].deficit);
                    if amount == 0 {
                        continue;
                    }
                    let shares = shares_for_value(amount, supply, value)?;
                    let strategy = self.state.strategy_mut(*sid)?;
                    let from_holder = vault_holder(&positions[from].vault);
                    let shares = shares.min(strategy.shares.balance_of(&from_holder));
                    strategy.shares.transfer(&from_holder, &vault_holder(&positions[to].vault), shares)?;
                    positions[from].surplus -= amount;
                    positions[to].deficit -= amount;
                    report.share_transfers += 1;
                }
            }
        }

        // ── Across strategies: one withdrawal per surplus, one deposit per deficit ──
        let ids: Vec<StrategyId> = involved.iter().copied().collect();
        let mut surplus = vec![0u128; ids.len()];
        let mut deficit = vec![0u128; ids.len()];
        for position in &positions {
            if let Some(i) = ids.iter().position(|s| *s == position.strategy) {
                surplus[i] += position.surplus;
                deficit[i] += position.deficit;
            }
        }
        let flows = flow_matrix(&surplus, &deficit);
        report.flows = flows.iter().map(|(i, j, v)| (ids[*i], ids[*j], *v)).collect();

        let group = self.state.assets.group(group_id)?.clone();
        let mut incoming: BTreeMap<usize, Vec<u128>> = BTreeMap::new();
        for (i, sid) in ids.iter().enumerate() {
            let outgoing: Vec<&(usize, usize, u128)> = flows.iter().filter(|f| f.0 == i).collect();
            let sent: u128 = outgoing.iter().map(|f| f.2).sum();
            if sent == 0 {
                continue;
            }
            let (value, supply) = strategy_value[sid];
            let mut burns = Vec::new();
            let mut left = sent;
            for position in positions.iter().filter(|p| p.strategy == *sid && p.surplus > 0) {
                let take = position.surplus.min(left);
                left -= take;
                let holder = vault_holder(&position.vault);
                let available = self.state.strategy(*sid)?.shares.balance_of(&holder);
                burns.push((holder, shares_for_value(take, supply, value)?.min(available)));
            }
            let received = self.with_strategy(*sid, &pricing, |s, ctx| s.withdraw_shares_fast(ctx, &burns))?;
            report.withdrawals += 1;

            // Split among receivers by flow; the last receiver takes the remainder.
            let mut rest = received;
            let mut weight_left = sent;
            for (_, j, amount) in outgoing {
                let part = rest
                    .iter()
                    .map(|r| mul_div_down(*r, *amount, weight_left))
                    .collect::<VaultResult<Vec<_>>>()?;
                rest = sub_vec(&rest, &part)?;
                weight_left -= amount;
                let entry = incoming.entry(*j).or_insert_with(|| group.zeros());
                *entry = add_vec(&*entry, &part)?;
            }
        }

        for (j, amounts) in incoming {
            let sid = ids[j];
            let recipients: Vec<(String, u128)> = positions
                .iter()
                .filter(|p| p.strategy == sid && p.deficit > 0)
                .map(|p| (vault_holder(&p.vault), p.deficit))
                .collect();
            self.with_strategy(sid, &pricing, |s, ctx| s.deposit_fast(ctx, &amounts, &recipients))?;
            report.deposits += 1;
        }

        let moved = report.flows.iter().try_fold(0u128, |acc, f| checked_add(acc, f.2))?;
        info!(
            vaults = ?vault_ids,
            share_transfers = report.share_transfers,
            withdrawals = report.withdrawals,
            deposits = report.deposits,
            moved,
            "reallocated"
        );
        Ok(report)
    }

    /// New allocation for a vault: explicit if supplied, else from its provider.
    fn next_allocation(&self, vault: &str, request: &Reallocate) -> VaultResult<Allocation> {
        let v = self.state.vault(vault)?;
        let allocation = match request.allocations.get(vault) {
            Some(slots) => {
                if slots.len() != v.strategies.len() {
                    return Err(VaultError::LengthMismatch {
                        expected: v.strategies.len(),
                        got: slots.len(),
                    });
                }
                Allocation::new(slots.clone())?
            }
            None => {
                let provider = v.provider.clone().unwrap_or(ProviderConfig::Uniform);
                self.provide_allocation(vault, &v.strategies, &provider)?
            }
        };
        for (slot, sid) in v.strategies.iter().enumerate() {
            if sid.is_ghost() && allocation.get(slot) > 0 {
                return Err(VaultError::StrategyRemoved(*sid));
            }
        }
        Ok(allocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_matrix_pairs_largest_first() {
        let flows = flow_matrix(&[30, 0, 10], &[0, 25, 0]);
        assert_eq!(flows, vec![(0, 1, 25)]);
        let flows = flow_matrix(&[30, 0, 10, 0], &[0, 25, 0, 15]);
        assert_eq!(flows, vec![(0, 1, 25), (2, 3, 10), (0, 3, 5)]);
    }

    #[test]
    fn test_flow_matrix_never_routes_through_a_third_strategy() {
        let flows = flow_matrix(&[10, 0, 0], &[0, 0, 10]);
        assert_eq!(flows, vec![(0, 2, 10)]);
    }

    #[test]
    fn test_flow_matrix_empty_when_balanced() {
        assert!(flow_matrix(&[0, 0], &[0, 0]).is_empty());
    }
}

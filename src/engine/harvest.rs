//! Keeper entry points: do-hard-work over a set of strategies and the
//! continuation of pending non-atomic rounds.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Protocol;
use crate::access::Role;
use crate::error::{VaultError, VaultResult};
use crate::model::StrategyId;
use crate::oracle::{Pricing, RateBound};
use crate::strategy::{HarvestSummary, StrategyStatus};

/// Parameters of one do-hard-work call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DoHardWork {
    pub strategies: Vec<StrategyId>,
    /// Base yield per strategy in 1e12 units; empty means zero for all.
    #[serde(default)]
    pub base_yields: Vec<i128>,
    /// Accepted exchange-rate range per asset symbol.
    #[serde(default)]
    pub rate_bounds: BTreeMap<String, RateBound>,
}

impl DoHardWork {
    pub fn new(strategies: Vec<StrategyId>) -> Self {
        Self {
            strategies,
            ..Default::default()
        }
    }

    fn base_yield(&self, i: usize) -> i128 {
        self.base_yields.get(i).copied().unwrap_or(0)
    }

    fn check_shape(&self) -> VaultResult<()> {
        if !self.base_yields.is_empty() && self.base_yields.len() != self.strategies.len() {
            return Err(VaultError::LengthMismatch {
                expected: self.strategies.len(),
                got: self.base_yields.len(),
            });
        }
        let mut seen = BTreeSet::new();
        for id in &self.strategies {
            if !seen.insert(*id) {
                return Err(VaultError::DuplicateStrategy(*id));
            }
        }
        Ok(())
    }
}

impl Protocol {
    /// Harvest every listed strategy in order. All-or-nothing.
    pub fn do_hard_work(&mut self, caller: &str, request: &DoHardWork) -> VaultResult<Vec<HarvestSummary>> {
        self.transact("do_hard_work", |p| {
            p.state.access.ensure(Role::DoHardWorker, caller)?;
            request.check_shape()?;
            let mut summaries = Vec::with_capacity(request.strategies.len());
            for (i, id) in request.strategies.iter().enumerate() {
                let strategy = p.state.strategy(*id)?;
                if id.is_ghost() || strategy.is_removed() {
                    return Err(VaultError::StrategyRemoved(*id));
                }
                if strategy.pending_round().is_some() {
                    return Err(VaultError::ContinuationPending(*id));
                }
                let pricing = p.pricing(strategy.asset_group)?;
                p.check_rate_bounds(*id, &pricing, &request.rate_bounds)?;

                let summary = p.with_strategy(*id, &pricing, |s, ctx| s.harvest(ctx, request.base_yield(i)))?;
                info!(
                    strategy = %id,
                    round = summary.dhw_index,
                    status = summary.status.name(),
                    yield_pct = summary.yield_pct,
                    deposited = ?summary.deposited,
                    withdrawn = ?summary.withdrawn,
                    "do hard work"
                );
                p.finish_draining(*id, &pricing)?;
                summaries.push(summary);
            }
            Ok(summaries)
        })
    }

    /// Complete the pending round of every listed strategy.
    pub fn continue_harvest(&mut self, caller: &str, request: &DoHardWork) -> VaultResult<Vec<HarvestSummary>> {
        self.transact("continue_harvest", |p| {
            p.state.access.ensure(Role::DoHardWorker, caller)?;
            request.check_shape()?;
            let mut summaries = Vec::with_capacity(request.strategies.len());
            for (i, id) in request.strategies.iter().enumerate() {
                let strategy = p.state.strategy(*id)?;
                if strategy.pending_round().is_none() {
                    return Err(VaultError::NoPendingContinuation(*id));
                }
                let pricing = p.pricing(strategy.asset_group)?;
                p.check_rate_bounds(*id, &pricing, &request.rate_bounds)?;

                let summary =
                    p.with_strategy(*id, &pricing, |s, ctx| s.continue_round(ctx, request.base_yield(i)))?;
                info!(strategy = %id, round = summary.dhw_index, "continuation finalized");
                p.finish_draining(*id, &pricing)?;
                summaries.push(summary);
            }
            Ok(summaries)
        })
    }

    fn check_rate_bounds(
        &self,
        id: StrategyId,
        pricing: &Pricing,
        bounds: &BTreeMap<String, RateBound>,
    ) -> VaultResult<()> {
        let group = self.state.assets.group(self.state.strategy(id)?.asset_group)?;
        for (asset, rate) in group.assets.iter().zip(&pricing.rates) {
            if let Some(bound) = bounds.get(asset)
                && (*rate < bound.min || *rate > bound.max)
            {
                return Err(VaultError::ExchangeRateOutOfBounds {
                    asset: asset.clone(),
                    rate: *rate,
                    min: bound.min,
                    max: bound.max,
                });
            }
        }
        Ok(())
    }

    /// A draining strategy exits once its last round is sealed.
    pub(crate) fn finish_draining(&mut self, id: StrategyId, pricing: &Pricing) -> VaultResult<()> {
        let strategy = self.state.strategy(id)?;
        let StrategyStatus::Draining { recipient } = &strategy.status else {
            return Ok(());
        };
        if strategy.pending_round().is_some() || !strategy.input.is_empty() {
            return Ok(());
        }
        let recipient = recipient.clone();
        self.with_strategy(id, pricing, |s, ctx| s.emergency_exit(ctx, &recipient))?;
        Ok(())
    }
}

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info};

use super::{Scenario, Step, StepSpec};
use crate::access::Role;
use crate::engine::clock::SimClock;
use crate::engine::harvest::DoHardWork;
use crate::engine::reallocation::Reallocate;
use crate::engine::{Protocol, StrategyConfig, VaultConfig};
use crate::math::{FULL_PERCENT, mul_div_down};
use crate::model::{AssetInfo, StrategyId, TokenAmount};
use crate::oracle::StaticOracle;
use crate::strategy::{RoundStatus, SimulatedSource};

/// Decimals of scenario prices, matching the oracle's WAD scale.
const PRICE_DECIMALS: u8 = 18;

/// What one replayed step did.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub action: &'static str,
    pub timestamp: u64,
    pub ok: bool,
    pub outcome: String,
}

/// A protocol set up from a scenario, with handles on the simulated
/// collaborators it was built with.
pub struct ScenarioRun {
    pub protocol: Protocol,
    pub oracle: StaticOracle,
    pub clock: SimClock,
    strategies: BTreeMap<String, StrategyId>,
    admin: String,
}

/// Set up `scenario` and replay all of its steps.
pub fn run(scenario: &Scenario) -> Result<(ScenarioRun, Vec<StepRecord>)> {
    let mut run = ScenarioRun::setup(scenario)?;
    let records = run.replay(&scenario.steps)?;
    Ok((run, records))
}

impl ScenarioRun {
    pub fn setup(scenario: &Scenario) -> Result<Self> {
        let oracle = StaticOracle::new();
        let clock = SimClock::new(scenario.start_time);
        let mut protocol = Protocol::new(&scenario.admin, Box::new(oracle.clone()), Box::new(clock.clone()));
        let admin = scenario.admin.clone();

        for asset in &scenario.assets {
            protocol.register_asset(
                &admin,
                AssetInfo {
                    symbol: asset.symbol.clone(),
                    decimals: asset.decimals,
                },
            )?;
            oracle.set_rate(&asset.symbol, asset.price.to_units(PRICE_DECIMALS)?);
        }
        for group in &scenario.groups {
            protocol.register_asset_group(&admin, group.clone())?;
        }
        for grant in &scenario.roles {
            protocol.grant_role(&admin, grant.role, &grant.account)?;
        }

        let mut strategies = BTreeMap::new();
        for spec in &scenario.strategies {
            let len = scenario
                .groups
                .get(spec.group)
                .with_context(|| format!("strategy `{}` uses unknown group {}", spec.name, spec.group))?
                .len();
            let source = SimulatedSource::new(len, spec.source.clone());
            let id = protocol.register_strategy(
                &admin,
                StrategyConfig {
                    name: spec.name.clone(),
                    asset_group: spec.group,
                    kind: spec.kind,
                    fees: spec.fees.clone(),
                    risk_score: spec.risk_score,
                },
                Box::new(source),
            )?;
            strategies.insert(spec.name.clone(), id);
        }

        let mut run = Self {
            protocol,
            oracle,
            clock,
            strategies,
            admin,
        };

        for spec in &scenario.vaults {
            let ids = spec
                .strategies
                .iter()
                .map(|name| run.strategy_id(name))
                .collect::<Result<Vec<_>>>()?;
            run.protocol
                .create_vault(
                    &spec.owner,
                    VaultConfig {
                        id: spec.id.clone(),
                        strategies: ids,
                        allocation: spec.allocation.clone(),
                        provider: spec.provider.clone(),
                        mode: spec.mode,
                        fees: spec.fees.clone(),
                    },
                )
                .with_context(|| format!("creating vault `{}`", spec.id))?;
            if !spec.guards.is_empty() {
                let guards = spec.guards.iter().map(|g| g.build()).collect();
                run.protocol.set_guards(&spec.owner, &spec.id, guards)?;
            }
        }

        for account in &scenario.accounts {
            for (asset, amount) in &account.balances {
                let units = run.units(asset, amount)?;
                run.protocol.fund_account(&account.account, asset, units)?;
            }
        }
        info!(
            scenario = %scenario.name,
            strategies = scenario.strategies.len(),
            vaults = scenario.vaults.len(),
            "scenario set up"
        );
        Ok(run)
    }

    pub fn strategy_id(&self, name: &str) -> Result<StrategyId> {
        self.strategies
            .get(name)
            .copied()
            .with_context(|| format!("unknown strategy `{name}`"))
    }

    /// Replay `steps` in order. A step that fails without `expect_error`
    /// aborts the replay.
    pub fn replay(&mut self, steps: &[StepSpec]) -> Result<Vec<StepRecord>> {
        steps
            .iter()
            .enumerate()
            .map(|(index, spec)| self.replay_step(index, spec))
            .collect()
    }

    /// Apply one step and check it against its expected error.
    pub fn replay_step(&mut self, index: usize, spec: &StepSpec) -> Result<StepRecord> {
        let action = spec.step.action();
        match (self.step(&spec.step), &spec.expect_error) {
            (Ok(outcome), None) => Ok(StepRecord {
                index,
                action,
                timestamp: self.clock_now(),
                ok: true,
                outcome,
            }),
            (Ok(outcome), Some(expected)) => {
                bail!("step {index} ({action}) succeeded with `{outcome}`, expected error `{expected}`")
            }
            (Err(err), Some(expected)) if format!("{err:#}").contains(expected.as_str()) => {
                debug!(index, action, error = %err, "step failed as expected");
                Ok(StepRecord {
                    index,
                    action,
                    timestamp: self.clock_now(),
                    ok: false,
                    outcome: format!("{err:#}"),
                })
            }
            (Err(err), _) => Err(err.context(format!("step {index} ({action})"))),
        }
    }

    fn clock_now(&self) -> u64 {
        self.protocol.now()
    }

    /// Apply one step, returning a one-line summary.
    pub fn step(&mut self, step: &Step) -> Result<String> {
        match step {
            Step::Deposit {
                account,
                vault,
                amounts,
            } => {
                let units = self.vault_units(vault, amounts)?;
                let receipt = self.protocol.deposit(account, vault, &units)?;
                Ok(format!("receipt {receipt} for {units:?}"))
            }
            Step::Redeem {
                account,
                vault,
                portion_bps,
            } => {
                let shares = self.portion(vault, account, u128::from(*portion_bps))?;
                let receipt = self.protocol.redeem(account, vault, shares)?;
                Ok(format!("receipt {receipt} for {shares} shares"))
            }
            Step::RedeemFast {
                account,
                vault,
                portion_bps,
            } => {
                let shares = self.portion(vault, account, u128::from(*portion_bps))?;
                let paid = self.protocol.redeem_fast(account, vault, shares)?;
                Ok(format!("{shares} shares paid {paid:?}"))
            }
            Step::Flush { vault } => Ok(match self.protocol.flush(vault)? {
                Some(index) => format!("flush {index}"),
                None => "nothing to flush".to_string(),
            }),
            Step::DoHardWork {
                strategies,
                base_yields,
            } => {
                let ids = if strategies.is_empty() {
                    self.active_strategies()
                } else {
                    self.strategy_ids(strategies)?
                };
                let request = DoHardWork {
                    strategies: ids,
                    base_yields: base_yields.iter().map(|y| i128::from(*y)).collect(),
                    ..Default::default()
                };
                let keeper = self.member(Role::DoHardWorker)?;
                let summaries = self.protocol.do_hard_work(&keeper, &request)?;
                let pending = summaries
                    .iter()
                    .filter(|s| s.status != RoundStatus::Finalized)
                    .count();
                Ok(format!("{} rounds, {pending} pending", summaries.len()))
            }
            Step::Continue {
                strategies,
                base_yields,
            } => {
                let request = DoHardWork {
                    strategies: self.strategy_ids(strategies)?,
                    base_yields: base_yields.iter().map(|y| i128::from(*y)).collect(),
                    ..Default::default()
                };
                let keeper = self.member(Role::DoHardWorker)?;
                let summaries = self.protocol.continue_harvest(&keeper, &request)?;
                Ok(format!("{} continuations", summaries.len()))
            }
            Step::Confirm { strategy } => {
                let id = self.strategy_id(strategy)?;
                self.protocol.simulated_source_mut(id)?.confirm();
                Ok(format!("{strategy} confirmed"))
            }
            Step::Accrue { strategy, rewards } => {
                let id = self.strategy_id(strategy)?;
                let group = self.protocol.strategy(id)?.asset_group;
                let units = self.group_units(group, rewards)?;
                self.protocol.simulated_source_mut(id)?.add_rewards(&units);
                Ok(format!("{strategy} rewards {units:?}"))
            }
            Step::Sync { vault } => {
                let outcomes = self.protocol.sync_vault(vault)?;
                Ok(format!("{} flushes synced", outcomes.len()))
            }
            Step::Claim { account, vault } => {
                let vaults: Vec<String> = match vault {
                    Some(v) => vec![v.clone()],
                    None => self.protocol.state().vaults.keys().cloned().collect(),
                };
                let mut claimed = 0;
                for vault in vaults {
                    claimed += self.protocol.claim_all(account, &vault)?.len();
                }
                Ok(format!("{claimed} receipts claimed"))
            }
            Step::Reallocate { vaults, allocations } => {
                let reallocator = self.member(Role::Reallocator)?;
                let report = self.protocol.reallocate(
                    &reallocator,
                    &Reallocate {
                        vaults: vaults.clone(),
                        allocations: allocations.clone(),
                    },
                )?;
                Ok(format!(
                    "{} share transfers, {} withdrawals, {} deposits",
                    report.share_transfers, report.withdrawals, report.deposits
                ))
            }
            Step::RemoveStrategy {
                strategy,
                recipient,
            } => {
                let id = self.strategy_id(strategy)?;
                let admin = self.admin.clone();
                let removal = self.protocol.remove_strategy(&admin, id, recipient)?;
                Ok(format!("{removal:?}"))
            }
            Step::Pause => {
                let pauser = self.member(Role::Pauser)?;
                self.protocol.pause(&pauser)?;
                Ok("paused".to_string())
            }
            Step::Unpause => {
                let pauser = self.member(Role::Pauser)?;
                self.protocol.unpause(&pauser)?;
                Ok("unpaused".to_string())
            }
            Step::AdvanceTime { seconds } => Ok(format!("now {}", self.clock.advance(*seconds))),
            Step::SetPrice { asset, price } => {
                let rate = price.to_units(PRICE_DECIMALS)?;
                self.oracle.set_rate(asset, rate);
                Ok(format!("{asset} = {rate}"))
            }
            Step::FailNext { strategy } => {
                let id = self.strategy_id(strategy)?;
                self.protocol.simulated_source_mut(id)?.fail_next();
                Ok(format!("{strategy} fails next"))
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn member(&self, role: Role) -> Result<String> {
        self.protocol
            .state()
            .access
            .first_member(role)
            .cloned()
            .with_context(|| format!("no account holds role {role:?}"))
    }

    fn strategy_ids(&self, names: &[String]) -> Result<Vec<StrategyId>> {
        names.iter().map(|n| self.strategy_id(n)).collect()
    }

    fn active_strategies(&self) -> Vec<StrategyId> {
        self.strategies
            .values()
            .copied()
            .filter(|id| self.protocol.strategy(*id).is_ok_and(|s| s.is_active()))
            .collect()
    }

    fn portion(&self, vault: &str, account: &str, portion_bps: u128) -> Result<u128> {
        let balance = self.protocol.vault_shares(vault, account)?;
        Ok(mul_div_down(balance, portion_bps.min(FULL_PERCENT), FULL_PERCENT)?)
    }

    fn units(&self, asset: &str, amount: &TokenAmount) -> Result<u128> {
        let info = self.protocol.state().assets.asset(asset)?;
        amount
            .to_units(info.decimals)
            .with_context(|| format!("amount of `{asset}`"))
    }

    fn group_units(&self, group: usize, amounts: &[TokenAmount]) -> Result<Vec<u128>> {
        let group = self.protocol.state().assets.group(group)?;
        if group.len() != amounts.len() {
            bail!("expected {} amounts, got {}", group.len(), amounts.len());
        }
        group
            .assets
            .iter()
            .zip(amounts)
            .map(|(asset, amount)| self.units(asset, amount))
            .collect()
    }

    fn vault_units(&self, vault: &str, amounts: &[TokenAmount]) -> Result<Vec<u128>> {
        let group = self.protocol.vault(vault)?.asset_group;
        self.group_units(group, amounts)
    }
}

/// Render a WAD value as a decimal USD string.
pub fn format_usd(value: u128) -> String {
    TokenAmount::from_units(value, PRICE_DECIMALS).0
}

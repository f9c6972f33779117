pub mod claim;
pub mod clock;
pub mod harvest;
pub mod optimizer;
pub mod reallocation;
pub mod removal;
pub mod requests;
pub mod state;
pub mod sync;

use std::collections::{BTreeSet, HashMap};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::access::Role;
use crate::batch::Batch;
use crate::error::{VaultError, VaultResult};
use crate::guard::Guard;
use crate::ledger::Receipt;
use crate::model::{
    AccountId, Allocation, AllocationMode, AssetGroupId, AssetInfo, ProtocolLimits, StrategyFees,
    StrategyId, VaultFees, VaultId, is_reserved, vault_holder,
};
use crate::oracle::{Pricing, PriceOracle};
use crate::strategy::{
    ApyPoint, GhostSource, HarvestCtx, SimulatedSource, Strategy, StrategyKind, YieldSource,
};
use crate::vault::Vault;

use clock::Clock;
use optimizer::{AllocationContext, ProviderConfig, SlotInfo};
use state::ProtocolState;

/// Settings for a new strategy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StrategyConfig {
    pub name: String,
    pub asset_group: AssetGroupId,
    #[serde(default)]
    pub kind: StrategyKind,
    #[serde(default)]
    pub fees: StrategyFees,
    #[serde(default = "default_risk_score")]
    pub risk_score: u32,
}

fn default_risk_score() -> u32 {
    1
}

/// Settings for a new vault. Either `allocation` or `provider` decides the
/// initial split; with neither, strategies are weighted uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub id: VaultId,
    pub strategies: Vec<StrategyId>,
    #[serde(default)]
    pub allocation: Option<Vec<u16>>,
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    #[serde(default)]
    pub mode: AllocationMode,
    #[serde(default)]
    pub fees: VaultFees,
}

/// A receipt together with whether it can be claimed right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimableReceipt {
    pub receipt: Receipt,
    pub ready: bool,
}

/// The settlement engine. Owns persisted state plus the collaborators it
/// talks to; every mutating entry point is all-or-nothing.
pub struct Protocol {
    pub(crate) state: ProtocolState,
    /// One source per arena slot, aligned with `state.strategies`.
    pub(crate) sources: Vec<Box<dyn YieldSource>>,
    pub(crate) oracle: Box<dyn PriceOracle>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) guards: HashMap<VaultId, Vec<Box<dyn Guard>>>,
}

impl Protocol {
    pub fn new(admin: &str, oracle: Box<dyn PriceOracle>, clock: Box<dyn Clock>) -> Self {
        Self::with_limits(admin, ProtocolLimits::default(), oracle, clock)
    }

    pub fn with_limits(
        admin: &str,
        limits: ProtocolLimits,
        oracle: Box<dyn PriceOracle>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            state: ProtocolState::new(admin, limits),
            sources: vec![Box::new(GhostSource)],
            oracle,
            clock,
            guards: HashMap::new(),
        }
    }

    /// Reassemble a protocol from persisted state and its sources.
    pub(crate) fn from_parts(
        state: ProtocolState,
        sources: Vec<Box<dyn YieldSource>>,
        oracle: Box<dyn PriceOracle>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            state,
            sources,
            oracle,
            clock,
            guards: HashMap::new(),
        }
    }

    // ── Transaction wrapper ─────────────────────────────────────────

    /// Run `op` under the pause switch with all-or-nothing semantics.
    pub(crate) fn transact<T>(
        &mut self,
        name: &'static str,
        op: impl FnOnce(&mut Self) -> VaultResult<T>,
    ) -> VaultResult<T> {
        if self.state.paused {
            debug!(op = name, "rejected while paused");
            return Err(VaultError::SystemPaused);
        }
        self.atomic(name, op)
    }

    /// Snapshot state and sources, run `op`, restore both if it fails.
    pub(crate) fn atomic<T>(
        &mut self,
        name: &'static str,
        op: impl FnOnce(&mut Self) -> VaultResult<T>,
    ) -> VaultResult<T> {
        let state = self.state.clone();
        let sources: Vec<Box<dyn YieldSource>> = self.sources.iter().map(|s| s.box_clone()).collect();
        match op(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.state = state;
                self.sources = sources;
                debug!(op = name, error = %err, "rolled back");
                Err(err)
            }
        }
    }

    /// Borrow a strategy together with its source and the balances it moves.
    pub(crate) fn with_strategy<T>(
        &mut self,
        id: StrategyId,
        pricing: &Pricing,
        f: impl FnOnce(&mut Strategy, &mut HarvestCtx<'_>) -> VaultResult<T>,
    ) -> VaultResult<T> {
        let now = self.clock.now();
        let ProtocolState {
            strategies,
            balances,
            assets,
            ..
        } = &mut self.state;
        let strategy = strategies
            .get_mut(id.index())
            .ok_or(VaultError::UnknownStrategy(id))?;
        let group = assets.group(strategy.asset_group)?;
        let source = self
            .sources
            .get_mut(id.index())
            .ok_or(VaultError::UnknownStrategy(id))?;
        let mut ctx = HarvestCtx {
            source: source.as_mut(),
            balances,
            group,
            pricing,
            now,
        };
        f(strategy, &mut ctx)
    }

    pub(crate) fn pricing(&self, group: AssetGroupId) -> VaultResult<Pricing> {
        let group = self.state.assets.group(group)?;
        let infos = group
            .assets
            .iter()
            .map(|a| self.state.assets.asset(a))
            .collect::<VaultResult<Vec<_>>>()?;
        Pricing::fetch(self.oracle.as_ref(), &infos)
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    // ── Pause switch ────────────────────────────────────────────────

    pub fn pause(&mut self, caller: &str) -> VaultResult<()> {
        self.state.access.ensure(Role::Pauser, caller)?;
        self.state.paused = true;
        info!(caller, "system paused");
        Ok(())
    }

    pub fn unpause(&mut self, caller: &str) -> VaultResult<()> {
        self.state.access.ensure(Role::Pauser, caller)?;
        self.state.paused = false;
        info!(caller, "system unpaused");
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    // ── Registration ────────────────────────────────────────────────

    pub fn grant_role(&mut self, caller: &str, role: Role, account: &str) -> VaultResult<()> {
        self.state.access.grant(caller, role, account)
    }

    pub fn revoke_role(&mut self, caller: &str, role: Role, account: &str) -> VaultResult<()> {
        self.state.access.revoke(caller, role, account)
    }

    pub fn register_asset(&mut self, caller: &str, info: AssetInfo) -> VaultResult<()> {
        self.state.access.ensure(Role::Admin, caller)?;
        self.state.assets.register_asset(info)
    }

    pub fn register_asset_group(&mut self, caller: &str, assets: Vec<String>) -> VaultResult<AssetGroupId> {
        self.state.access.ensure(Role::Admin, caller)?;
        self.state.assets.register_group(assets)
    }

    /// Add a strategy to the arena, wrapping `source`.
    pub fn register_strategy(
        &mut self,
        caller: &str,
        config: StrategyConfig,
        source: Box<dyn YieldSource>,
    ) -> VaultResult<StrategyId> {
        self.state.access.ensure(Role::Admin, caller)?;
        let group = self.state.assets.group(config.asset_group)?;
        group.check_len(&source.assets())?;
        config.fees.validate(&self.state.limits)?;

        let index = u32::try_from(self.state.strategies.len()).map_err(|_| VaultError::Overflow)?;
        let id = StrategyId(index);
        let strategy = Strategy::new(
            id,
            &config.name,
            config.asset_group,
            group.len(),
            config.kind,
            config.fees,
            config.risk_score,
            self.clock.now(),
        );
        self.state.strategies.push(strategy);
        self.sources.push(source);
        info!(strategy = %id, name = %config.name, kind = ?config.kind, "strategy registered");
        Ok(id)
    }

    /// Open a vault. Permissionless; the caller owns it and collects its fees.
    pub fn create_vault(&mut self, owner: &str, config: VaultConfig) -> VaultResult<VaultId> {
        self.transact("create_vault", |p| p.create_vault_inner(owner, config))
    }

    fn create_vault_inner(&mut self, owner: &str, config: VaultConfig) -> VaultResult<VaultId> {
        if is_reserved(owner) {
            return Err(VaultError::ReservedAccount(owner.to_string()));
        }
        if config.id.is_empty() || config.id.contains('/') || is_reserved(&config.id) {
            return Err(VaultError::ReservedAccount(config.id));
        }
        if self.state.vaults.contains_key(&config.id) {
            return Err(VaultError::DuplicateVault(config.id));
        }
        let limits = &self.state.limits;
        if config.strategies.is_empty() {
            return Err(VaultError::NoActiveStrategy(config.id));
        }
        if config.strategies.len() > limits.max_strategies_per_vault {
            return Err(VaultError::TooManyStrategies {
                max: limits.max_strategies_per_vault,
            });
        }
        config.fees.validate(limits)?;

        let mut seen = BTreeSet::new();
        let mut group = None;
        for id in &config.strategies {
            if !seen.insert(*id) {
                return Err(VaultError::DuplicateStrategy(*id));
            }
            let strategy = self.state.strategy(*id)?;
            if !strategy.is_active() || id.is_ghost() {
                return Err(VaultError::StrategyRemoved(*id));
            }
            match group {
                None => group = Some(strategy.asset_group),
                Some(g) if g != strategy.asset_group => {
                    return Err(VaultError::AssetGroupMismatch {
                        strategy: *id,
                        group: g,
                    });
                }
                Some(_) => {}
            }
        }
        let group = group.ok_or_else(|| VaultError::NoActiveStrategy(config.id.clone()))?;
        let asset_count = self.state.assets.group(group)?.len();

        let allocation = match (&config.allocation, &config.provider) {
            (Some(slots), _) => {
                if slots.len() != config.strategies.len() {
                    return Err(VaultError::LengthMismatch {
                        expected: config.strategies.len(),
                        got: slots.len(),
                    });
                }
                Allocation::new(slots.clone())?
            }
            (None, provider) => {
                let provider = provider.clone().unwrap_or(ProviderConfig::Uniform);
                self.provide_allocation(&config.id, &config.strategies, &provider)?
            }
        };

        let now = self.clock.now();
        let vault = Vault {
            id: config.id.clone(),
            owner: owner.to_string(),
            asset_group: group,
            strategies: config.strategies.clone(),
            allocation,
            mode: config.mode,
            provider: config.provider,
            fees: config.fees,
            shares: Default::default(),
            flush_index: 1,
            next_sync: 1,
            batch: Batch::new(asset_count),
            flushes: Default::default(),
            synced_dhw: vec![None; config.strategies.len()],
            last_sync_ts: now,
            high_water_price: 0,
            dust: vec![0; asset_count],
            created_at: now,
        };
        info!(vault = %vault.id, owner, strategies = vault.strategies.len(), allocation = ?vault.allocation.0, "vault created");
        self.state.vaults.insert(config.id.clone(), vault);
        Ok(config.id)
    }

    /// Ask `provider` for a split over `strategies`.
    pub(crate) fn provide_allocation(
        &self,
        vault: &str,
        strategies: &[StrategyId],
        provider: &ProviderConfig,
    ) -> VaultResult<Allocation> {
        let slots = strategies
            .iter()
            .map(|id| {
                let strategy = self.state.strategy(*id)?;
                Ok(SlotInfo {
                    strategy: *id,
                    apy: strategy.last_apy(),
                    risk_score: strategy.risk_score,
                    active: !id.is_ghost() && strategy.is_active(),
                })
            })
            .collect::<VaultResult<Vec<_>>>()?;
        let ctx = AllocationContext { vault, slots };
        provider
            .build()
            .calculate_allocation(&ctx)
            .map_err(|e| match e.downcast::<VaultError>() {
                Ok(err) => err,
                Err(e) => VaultError::AllocationProvider(format!("{e:#}")),
            })
    }

    /// Install guard hooks on a vault. Owner only.
    pub fn set_guards(&mut self, caller: &str, vault: &str, guards: Vec<Box<dyn Guard>>) -> VaultResult<()> {
        let owner = &self.state.vault(vault)?.owner;
        if owner != caller {
            return Err(VaultError::MissingRole {
                account: caller.to_string(),
                role: Role::Admin,
            });
        }
        self.guards.insert(vault.to_string(), guards);
        Ok(())
    }

    pub(crate) fn guards_of(&self, vault: &str) -> &[Box<dyn Guard>] {
        self.guards.get(vault).map(|g| g.as_slice()).unwrap_or(&[])
    }

    /// Credit an account from outside the protocol. Simulation and test helper.
    pub fn fund_account(&mut self, account: &str, asset: &str, amount: u128) -> VaultResult<()> {
        if is_reserved(account) {
            return Err(VaultError::ReservedAccount(account.to_string()));
        }
        self.state.assets.asset(asset)?;
        self.state.balances.credit(account, asset, amount)
    }

    // ── Views ───────────────────────────────────────────────────────

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    pub fn vault(&self, id: &str) -> VaultResult<&Vault> {
        self.state.vault(id)
    }

    pub fn strategy(&self, id: StrategyId) -> VaultResult<&Strategy> {
        self.state.strategy(id)
    }

    pub fn allocation(&self, vault: &str) -> VaultResult<&Allocation> {
        Ok(&self.state.vault(vault)?.allocation)
    }

    pub fn balance(&self, account: &str, asset: &str) -> u128 {
        self.state.balances.get(account, asset)
    }

    pub fn vault_shares(&self, vault: &str, account: &str) -> VaultResult<u128> {
        Ok(self.state.vault(vault)?.shares.balance_of(account))
    }

    pub fn apy_history(&self, strategy: StrategyId) -> VaultResult<&[ApyPoint]> {
        Ok(&self.state.strategy(strategy)?.apy_history)
    }

    /// Unclaimed receipts of `account` and whether each is claimable now.
    pub fn claimable(&self, account: &str) -> Vec<ClaimableReceipt> {
        self.state
            .receipts
            .owned_by(account)
            .map(|receipt| {
                let ready = self
                    .state
                    .vaults
                    .get(&receipt.vault)
                    .is_some_and(|v| v.next_sync > receipt.flush_index);
                ClaimableReceipt {
                    receipt: receipt.clone(),
                    ready,
                }
            })
            .collect()
    }

    /// Current USD value (WAD) of a vault's strategy positions at oracle rates.
    pub fn vault_value(&self, vault: &str) -> VaultResult<u128> {
        let vault = self.state.vault(vault)?;
        let pricing = self.pricing(vault.asset_group)?;
        let holder = vault_holder(&vault.id);
        let mut total = 0u128;
        for (_, id) in vault.live_strategies() {
            total = crate::math::checked_add(total, self.position_value(id, &holder, &pricing)?)?;
        }
        Ok(total)
    }

    /// Value of `holder`'s shares in a strategy at current source holdings.
    pub(crate) fn position_value(&self, id: StrategyId, holder: &str, pricing: &Pricing) -> VaultResult<u128> {
        let strategy = self.state.strategy(id)?;
        if !strategy.is_active() {
            return Ok(0);
        }
        let source = self.sources.get(id.index()).ok_or(VaultError::UnknownStrategy(id))?;
        let value = pricing.value(&source.assets())?;
        crate::math::value_of_shares(strategy.shares.balance_of(holder), strategy.shares.total_supply(), value)
    }

    pub fn source(&self, id: StrategyId) -> VaultResult<&dyn YieldSource> {
        self.sources
            .get(id.index())
            .map(|s| s.as_ref())
            .ok_or(VaultError::UnknownStrategy(id))
    }

    /// Direct access to a simulated source, for scenarios and tests.
    pub fn simulated_source_mut(&mut self, id: StrategyId) -> VaultResult<&mut SimulatedSource> {
        self.sources
            .get_mut(id.index())
            .and_then(|s| s.as_any_mut().downcast_mut::<SimulatedSource>())
            .ok_or(VaultError::UnknownStrategy(id))
    }

    pub(crate) fn ensure_user(account: &str) -> VaultResult<AccountId> {
        if is_reserved(account) || account.is_empty() {
            return Err(VaultError::ReservedAccount(account.to_string()));
        }
        Ok(account.to_string())
    }
}

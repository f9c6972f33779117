//! Scenario files: a protocol setup plus an ordered list of steps, replayed
//! against a simulated clock, oracle and yield sources.

pub mod runner;

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::access::Role;
use crate::engine::optimizer::ProviderConfig;
use crate::guard::{AllowlistGuard, DepositLimitGuard, Guard};
use crate::model::{AllocationMode, StrategyFees, TokenAmount, VaultFees};
use crate::strategy::{SimulatedSourceConfig, StrategyKind};

pub use runner::{ScenarioRun, StepRecord, run};

/// A complete simulation: protocol setup plus the steps to replay.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Unix timestamp the simulated clock starts at.
    #[serde(default = "default_start_time")]
    pub start_time: u64,
    /// Account holding the admin role.
    pub admin: String,
    pub assets: Vec<AssetSpec>,
    /// Asset groups by symbol, referenced by index.
    pub groups: Vec<Vec<String>>,
    pub strategies: Vec<StrategySpec>,
    pub vaults: Vec<VaultSpec>,
    #[serde(default)]
    pub accounts: Vec<AccountSpec>,
    #[serde(default)]
    pub roles: Vec<RoleGrant>,
    pub steps: Vec<StepSpec>,
}

fn default_start_time() -> u64 {
    1_700_000_000
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssetSpec {
    pub symbol: String,
    pub decimals: u8,
    /// USD price of one whole token, e.g. "1.00".
    pub price: TokenAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StrategySpec {
    /// Unique name, used by vaults and steps.
    pub name: String,
    pub group: usize,
    #[serde(default)]
    pub kind: StrategyKind,
    #[serde(default)]
    pub fees: StrategyFees,
    #[serde(default = "default_risk_score")]
    pub risk_score: u32,
    #[serde(default)]
    pub source: SimulatedSourceConfig,
}

fn default_risk_score() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VaultSpec {
    pub id: String,
    pub owner: String,
    /// Strategy names, in slot order.
    pub strategies: Vec<String>,
    #[serde(default)]
    pub allocation: Option<Vec<u16>>,
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    #[serde(default)]
    pub mode: AllocationMode,
    #[serde(default)]
    pub fees: VaultFees,
    #[serde(default)]
    pub guards: Vec<GuardSpec>,
}

/// Externally tagged: `{"deposit_limit": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GuardSpec {
    Allowlist(AllowlistGuard),
    DepositLimit(DepositLimitGuard),
}

impl GuardSpec {
    pub fn build(&self) -> Box<dyn Guard> {
        match self {
            GuardSpec::Allowlist(g) => Box::new(g.clone()),
            GuardSpec::DepositLimit(g) => Box::new(g.clone()),
        }
    }
}

/// Initial token balances of an external account.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountSpec {
    pub account: String,
    pub balances: BTreeMap<String, TokenAmount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RoleGrant {
    pub role: Role,
    pub account: String,
}

/// One step, optionally expected to fail with an error containing
/// `expect_error`. Flattened, so step fields stay within 64-bit integers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepSpec {
    #[serde(flatten)]
    pub step: Step,
    #[serde(default)]
    pub expect_error: Option<String>,
}

impl From<Step> for StepSpec {
    fn from(step: Step) -> Self {
        Self {
            step,
            expect_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Deposit {
        account: String,
        vault: String,
        /// One amount per asset of the vault's group.
        amounts: Vec<TokenAmount>,
    },
    /// Queue a withdrawal of a portion of the account's vault shares.
    Redeem {
        account: String,
        vault: String,
        #[serde(default = "full_portion")]
        portion_bps: u32,
    },
    RedeemFast {
        account: String,
        vault: String,
        #[serde(default = "full_portion")]
        portion_bps: u32,
    },
    Flush {
        vault: String,
    },
    /// Harvest the named strategies; all active ones when empty.
    DoHardWork {
        #[serde(default)]
        strategies: Vec<String>,
        #[serde(default)]
        base_yields: Vec<i64>,
    },
    Continue {
        strategies: Vec<String>,
        #[serde(default)]
        base_yields: Vec<i64>,
    },
    /// The strategy's yield source confirms its in-flight legs.
    Confirm {
        strategy: String,
    },
    /// Make compound rewards claimable at the strategy's next harvest.
    Accrue {
        strategy: String,
        rewards: Vec<TokenAmount>,
    },
    Sync {
        vault: String,
    },
    /// Claim every ready receipt of the account, optionally in one vault.
    Claim {
        account: String,
        #[serde(default)]
        vault: Option<String>,
    },
    Reallocate {
        vaults: Vec<String>,
        #[serde(default)]
        allocations: BTreeMap<String, Vec<u16>>,
    },
    RemoveStrategy {
        strategy: String,
        recipient: String,
    },
    Pause,
    Unpause,
    AdvanceTime {
        seconds: u64,
    },
    SetPrice {
        asset: String,
        price: TokenAmount,
    },
    /// The strategy's next deposit or withdrawal fails.
    FailNext {
        strategy: String,
    },
}

fn full_portion() -> u32 {
    10_000
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Step::Deposit { .. } => "deposit",
            Step::Redeem { .. } => "redeem",
            Step::RedeemFast { .. } => "redeem_fast",
            Step::Flush { .. } => "flush",
            Step::DoHardWork { .. } => "do_hard_work",
            Step::Continue { .. } => "continue",
            Step::Confirm { .. } => "confirm",
            Step::Accrue { .. } => "accrue",
            Step::Sync { .. } => "sync",
            Step::Claim { .. } => "claim",
            Step::Reallocate { .. } => "reallocate",
            Step::RemoveStrategy { .. } => "remove_strategy",
            Step::Pause => "pause",
            Step::Unpause => "unpause",
            Step::AdvanceTime { .. } => "advance_time",
            Step::SetPrice { .. } => "set_price",
            Step::FailNext { .. } => "fail_next",
        }
    }
}

//! Strategy ledger: share supply, holdings baseline, round bookkeeping and
//! APY history for one wrapped yield source.

pub mod fast;
pub mod harvest;
pub mod round;
pub mod simulator;
pub mod source;

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use harvest::{HarvestCtx, HarvestSummary};
pub use round::{Contribution, HarvestRound, PendingDeposit, PendingLegs, RoundInput, RoundStatus};
pub use simulator::{SimulatedSource, SimulatedSourceConfig, SourceCalls};
pub use source::{GhostSource, LiquidityShortfall, Settlement, YieldSource};

use crate::ledger::ShareLedger;
use crate::model::{AccountId, AssetGroupId, StrategyFees, StrategyId};

/// Which legs of the wrapped source may settle asynchronously.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Atomic,
    NonAtomicDeposit,
    NonAtomicWithdrawal,
    NonAtomic,
}

impl StrategyKind {
    pub fn deposit_may_pend(self) -> bool {
        matches!(self, StrategyKind::NonAtomicDeposit | StrategyKind::NonAtomic)
    }

    pub fn withdrawal_may_pend(self) -> bool {
        matches!(self, StrategyKind::NonAtomicWithdrawal | StrategyKind::NonAtomic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StrategyStatus {
    Active,
    /// Removed from every vault; finishes its committed round, then exits
    /// to `recipient`.
    Draining { recipient: AccountId },
    Removed,
}

/// One point of a strategy's APY history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApyPoint {
    pub dhw_index: u64,
    pub timestamp: u64,
    pub yield_pct: i128,
    pub apy: i128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: StrategyId,
    pub name: String,
    pub asset_group: AssetGroupId,
    pub kind: StrategyKind,
    pub status: StrategyStatus,
    pub fees: StrategyFees,
    /// Risk score fed to allocation providers, 1 (safest) and up.
    pub risk_score: u32,
    pub shares: ShareLedger,
    /// Index of the round currently collecting flows.
    pub dhw_index: u64,
    pub input: RoundInput,
    pub rounds: BTreeMap<u64, HarvestRound>,
    /// Source holdings at the end of the last round; base yield is measured
    /// against this.
    pub holdings: Vec<u128>,
    pub last_harvest_ts: u64,
    pub apy_history: Vec<ApyPoint>,
}

impl Strategy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: StrategyId,
        name: &str,
        asset_group: AssetGroupId,
        asset_count: usize,
        kind: StrategyKind,
        fees: StrategyFees,
        risk_score: u32,
        now: u64,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            asset_group,
            kind,
            status: StrategyStatus::Active,
            fees,
            risk_score: risk_score.max(1),
            shares: ShareLedger::default(),
            dhw_index: 1,
            input: RoundInput::new(asset_count),
            rounds: BTreeMap::new(),
            holdings: vec![0; asset_count],
            last_harvest_ts: now,
            apy_history: Vec::new(),
        }
    }

    /// Zero-value sentinel occupying arena slot 0.
    pub fn ghost() -> Self {
        let mut ghost = Self::new(
            StrategyId::GHOST,
            "ghost",
            0,
            0,
            StrategyKind::Atomic,
            StrategyFees::default(),
            1,
            0,
        );
        ghost.status = StrategyStatus::Removed;
        ghost
    }

    pub fn is_active(&self) -> bool {
        self.status == StrategyStatus::Active
    }

    pub fn is_removed(&self) -> bool {
        self.status == StrategyStatus::Removed
    }

    /// Round waiting on a continuation, if any.
    pub fn pending_round(&self) -> Option<u64> {
        self.rounds
            .iter()
            .rev()
            .find(|(_, r)| r.status == RoundStatus::PendingContinuation)
            .map(|(i, _)| *i)
    }

    pub fn round(&self, index: u64) -> Option<&HarvestRound> {
        self.rounds.get(&index)
    }

    pub fn last_apy(&self) -> i128 {
        self.apy_history.last().map(|p| p.apy).unwrap_or(0)
    }
}

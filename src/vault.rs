use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::batch::{Batch, NetFlow};
use crate::engine::optimizer::ProviderConfig;
use crate::error::VaultResult;
use crate::ledger::ShareLedger;
use crate::math::checked_add;
use crate::model::{AccountId, Allocation, AllocationMode, AssetGroupId, StrategyId, VaultFees, VaultId};
use crate::oracle::Pricing;

/// Vault shares and fees minted by one sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub synced_at: u64,
    /// Vault value after the round, excluding new deposits.
    pub legacy_value: u128,
    pub deposit_value: u128,
    pub management_fee_shares: u128,
    pub performance_fee_shares: u128,
    pub deposit_fee_shares: u128,
    /// Shares escrowed for this round's deposit receipts.
    pub escrowed_shares: u128,
    pub locked_shares: u128,
    /// Assets owed to this round's withdrawal receipts.
    pub withdrawn_assets: Vec<u128>,
    pub share_price: u128,
}

impl SyncOutcome {
    pub fn total_fee_shares(&self) -> u128 {
        self.management_fee_shares + self.performance_fee_shares + self.deposit_fee_shares
    }
}

/// A closed batch, frozen at flush time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushRecord {
    pub index: u64,
    pub flushed_at: u64,
    pub pricing: Pricing,
    /// Strategy list at flush time.
    pub strategies: Vec<StrategyId>,
    /// Harvest round each slot's flows went into.
    pub dhw_indexes: Vec<Option<u64>>,
    pub deposits: Vec<u128>,
    pub withdrawn_shares: u128,
    pub strategy_deposits: Vec<Vec<u128>>,
    pub strategy_withdrawn_shares: Vec<u128>,
    /// Netting preview per slot at the strategy's last known price.
    pub netting: Vec<NetFlow>,
    pub sync: Option<SyncOutcome>,

    // ── Receipt claims ──
    pub(crate) unclaimed_escrow: u128,
    pub(crate) unclaimed_deposit_value: u128,
    pub(crate) unclaimed_assets: Vec<u128>,
    pub(crate) unclaimed_withdrawn_shares: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    pub id: VaultId,
    /// Creator and fee recipient.
    pub owner: AccountId,
    pub asset_group: AssetGroupId,
    pub strategies: Vec<StrategyId>,
    pub allocation: Allocation,
    pub mode: AllocationMode,
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    pub fees: VaultFees,
    pub shares: ShareLedger,
    /// Index of the open batch; closed batches have smaller indexes.
    pub flush_index: u64,
    /// Next flush to sync.
    pub next_sync: u64,
    pub batch: Batch,
    pub flushes: BTreeMap<u64, FlushRecord>,
    /// Per slot, the last harvest round folded into the vault.
    pub synced_dhw: Vec<Option<u64>>,
    pub last_sync_ts: u64,
    /// Share price (WAD) above which performance fees accrue.
    pub high_water_price: u128,
    /// Deposit remainder left over by flooring, carried into the next flush.
    pub dust: Vec<u128>,
    pub created_at: u64,
}

impl Vault {
    pub fn slot_of(&self, strategy: StrategyId) -> Option<usize> {
        self.strategies.iter().position(|s| *s == strategy)
    }

    pub fn has_unsynced_flushes(&self) -> bool {
        self.next_sync < self.flush_index
    }

    /// Supply the vault's strategy positions back: minted shares plus the
    /// shares burned into the open batch, whose strategy shares are only
    /// released at the next flush.
    pub fn backing_supply(&self) -> VaultResult<u128> {
        checked_add(self.shares.total_supply(), self.batch.withdrawn_shares)
    }

    pub fn live_strategies(&self) -> impl Iterator<Item = (usize, StrategyId)> + '_ {
        self.strategies
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_ghost())
            .map(|(i, s)| (i, *s))
    }
}

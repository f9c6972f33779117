pub mod allocation;
pub mod amount;
pub mod asset;
pub mod fees;

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use allocation::{Allocation, AllocationMode};
pub use amount::TokenAmount;
pub use asset::{AssetGroup, AssetInfo, AssetRegistry};
pub use fees::{ProtocolLimits, StrategyFees, VaultFees};

pub type VaultId = String;
pub type AccountId = String;
pub type AssetGroupId = usize;

/// Position of a strategy in the protocol's strategy arena.
/// Index 0 is the ghost sentinel that replaces removed strategies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct StrategyId(pub u32);

impl StrategyId {
    pub const GHOST: StrategyId = StrategyId(0);

    pub fn is_ghost(self) -> bool {
        self == Self::GHOST
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Reserved holders ────────────────────────────────────────────────
//
// Account ids starting with `@` belong to the protocol itself and can
// never be used by callers.

/// Master wallet: deposits awaiting a harvest and assets awaiting claims.
pub const MASTER_WALLET: &str = "@master";
/// Permanently locked shares minted on a ledger's first deposit.
pub const LOCKED: &str = "@locked";
/// Vault shares minted at sync and not yet claimed by deposit receipts.
pub const ESCROW: &str = "@escrow";
/// Strategy shares released by vaults and waiting to be redeemed at the next harvest.
pub const WITHDRAWING: &str = "@withdrawing";
/// Strategy shares minted for depositors and not yet claimed by vault sync.
pub const UNCLAIMED: &str = "@unclaimed";

pub fn vault_holder(vault: &str) -> AccountId {
    format!("@vault:{vault}")
}

pub fn strategy_fee_account(strategy: StrategyId) -> AccountId {
    format!("@fees:{}", strategy.0)
}

pub fn is_reserved(account: &str) -> bool {
    account.starts_with('@')
}

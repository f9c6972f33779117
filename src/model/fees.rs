use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

use super::AccountId;

/// Fees a vault owner collects, in basis points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VaultFees {
    /// Annual fee on the vault's total supply, accrued per sync.
    #[serde(default)]
    pub management_bps: u128,
    /// Cut of newly minted deposit shares.
    #[serde(default)]
    pub deposit_bps: u128,
    /// Cut of yield above the high-water share price.
    #[serde(default)]
    pub performance_bps: u128,
}

/// Platform and protocol-boundary fees of a strategy, in basis points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StrategyFees {
    #[serde(default)]
    pub ecosystem_bps: u128,
    #[serde(default = "default_ecosystem_recipient")]
    pub ecosystem_recipient: AccountId,
    #[serde(default)]
    pub treasury_bps: u128,
    #[serde(default = "default_treasury_recipient")]
    pub treasury_recipient: AccountId,
    /// Charged on gross assets sent into the yield source.
    #[serde(default)]
    pub deposit_fee_bps: u128,
    /// Charged on gross assets received from the yield source.
    #[serde(default)]
    pub withdrawal_fee_bps: u128,
}

fn default_ecosystem_recipient() -> AccountId {
    "ecosystem".to_string()
}

fn default_treasury_recipient() -> AccountId {
    "treasury".to_string()
}

impl Default for StrategyFees {
    fn default() -> Self {
        Self {
            ecosystem_bps: 0,
            ecosystem_recipient: default_ecosystem_recipient(),
            treasury_bps: 0,
            treasury_recipient: default_treasury_recipient(),
            deposit_fee_bps: 0,
            withdrawal_fee_bps: 0,
        }
    }
}

/// Caps enforced when vaults and strategies are configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProtocolLimits {
    pub max_management_bps: u128,
    pub max_deposit_bps: u128,
    pub max_performance_bps: u128,
    pub max_platform_bps: u128,
    pub max_boundary_bps: u128,
    pub max_strategies_per_vault: usize,
}

impl Default for ProtocolLimits {
    fn default() -> Self {
        Self {
            max_management_bps: 500,
            max_deposit_bps: 2_000,
            max_performance_bps: 2_000,
            max_platform_bps: 2_000,
            max_boundary_bps: 1_000,
            max_strategies_per_vault: 16,
        }
    }
}

fn cap(name: &'static str, bps: u128, max: u128) -> VaultResult<()> {
    if bps > max {
        return Err(VaultError::FeeTooHigh { name, bps, max });
    }
    Ok(())
}

impl VaultFees {
    pub fn validate(&self, limits: &ProtocolLimits) -> VaultResult<()> {
        cap("management", self.management_bps, limits.max_management_bps)?;
        cap("deposit", self.deposit_bps, limits.max_deposit_bps)?;
        cap("performance", self.performance_bps, limits.max_performance_bps)
    }
}

impl StrategyFees {
    pub fn validate(&self, limits: &ProtocolLimits) -> VaultResult<()> {
        cap("ecosystem", self.ecosystem_bps, limits.max_platform_bps)?;
        cap("treasury", self.treasury_bps, limits.max_platform_bps)?;
        cap("deposit boundary", self.deposit_fee_bps, limits.max_boundary_bps)?;
        cap("withdrawal boundary", self.withdrawal_fee_bps, limits.max_boundary_bps)
    }

    pub fn platform_bps(&self) -> u128 {
        self.ecosystem_bps + self.treasury_bps
    }
}

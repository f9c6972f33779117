use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

use super::AssetGroupId;

/// A fungible asset known to the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AssetInfo {
    /// Ticker used as the asset's key (e.g. "USDC").
    pub symbol: String,
    /// Number of decimals of the smallest unit.
    pub decimals: u8,
}

impl AssetInfo {
    /// `10^decimals`, the number of smallest units in one whole token.
    pub fn unit(&self) -> u128 {
        10u128.pow(self.decimals as u32)
    }
}

/// Ordered, immutable set of assets a vault and its strategies operate in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetGroup {
    pub id: AssetGroupId,
    pub assets: Vec<String>,
}

impl AssetGroup {
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Fail unless `amounts` has exactly one slot per asset.
    pub fn check_len(&self, amounts: &[u128]) -> VaultResult<()> {
        if amounts.len() != self.assets.len() {
            return Err(VaultError::LengthMismatch {
                expected: self.assets.len(),
                got: amounts.len(),
            });
        }
        Ok(())
    }

    pub fn zeros(&self) -> Vec<u128> {
        vec![0; self.assets.len()]
    }
}

/// Registered assets and asset groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetRegistry {
    pub assets: BTreeMap<String, AssetInfo>,
    pub groups: Vec<AssetGroup>,
}

impl AssetRegistry {
    pub fn register_asset(&mut self, info: AssetInfo) -> VaultResult<()> {
        if self.assets.contains_key(&info.symbol) {
            return Err(VaultError::DuplicateAsset(info.symbol));
        }
        self.assets.insert(info.symbol.clone(), info);
        Ok(())
    }

    pub fn asset(&self, symbol: &str) -> VaultResult<&AssetInfo> {
        self.assets
            .get(symbol)
            .ok_or_else(|| VaultError::UnknownAsset(symbol.to_string()))
    }

    /// Register an ordered asset group. Identical groups are deduplicated.
    pub fn register_group(&mut self, assets: Vec<String>) -> VaultResult<AssetGroupId> {
        if assets.is_empty() {
            return Err(VaultError::ZeroAmount);
        }
        for symbol in &assets {
            self.asset(symbol)?;
        }
        if let Some(existing) = self.groups.iter().find(|g| g.assets == assets) {
            return Ok(existing.id);
        }
        let id = self.groups.len();
        self.groups.push(AssetGroup { id, assets });
        Ok(id)
    }

    pub fn group(&self, id: AssetGroupId) -> VaultResult<&AssetGroup> {
        self.groups.get(id).ok_or(VaultError::UnknownAssetGroup(id))
    }
}

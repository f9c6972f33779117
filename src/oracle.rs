//! USD valuation of asset baskets.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::math::{checked_add, mul_div_down};
use crate::model::AssetInfo;

/// Source of USD exchange rates: price of one whole token, WAD-scaled.
pub trait PriceOracle: Send + Sync {
    fn exchange_rate(&self, asset: &str) -> Result<u128>;
}

/// Rates for one asset group frozen at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub rates: Vec<u128>,
    pub units: Vec<u128>,
}

impl Pricing {
    pub fn new(rates: Vec<u128>, units: Vec<u128>) -> Self {
        Self { rates, units }
    }

    /// Snapshot rates for `assets` from `oracle`.
    pub fn fetch(oracle: &dyn PriceOracle, assets: &[&AssetInfo]) -> VaultResult<Self> {
        let mut rates = Vec::with_capacity(assets.len());
        let mut units = Vec::with_capacity(assets.len());
        for info in assets {
            let rate = oracle
                .exchange_rate(&info.symbol)
                .map_err(|e| VaultError::PriceUnavailable {
                    asset: info.symbol.clone(),
                    message: format!("{e:#}"),
                })?;
            rates.push(rate);
            units.push(info.unit());
        }
        Ok(Self { rates, units })
    }

    /// WAD-scaled USD value of `amounts`, each slot rounded down.
    pub fn value(&self, amounts: &[u128]) -> VaultResult<u128> {
        let mut total = 0u128;
        for ((amount, rate), unit) in amounts.iter().zip(&self.rates).zip(&self.units) {
            total = checked_add(total, mul_div_down(*amount, *rate, *unit)?)?;
        }
        Ok(total)
    }
}

/// Caller-supplied bounds on an asset's rate, checked before a harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RateBound {
    pub min: u128,
    pub max: u128,
}

// ── Static oracle ───────────────────────────────────────────────────

/// In-memory oracle with settable rates. Clones share the same table so a
/// scenario can move prices while the protocol holds its own handle.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    rates: Arc<RwLock<BTreeMap<String, u128>>>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rates(rates: BTreeMap<String, u128>) -> Self {
        Self {
            rates: Arc::new(RwLock::new(rates)),
        }
    }

    pub fn set_rate(&self, asset: &str, rate: u128) {
        if let Ok(mut rates) = self.rates.write() {
            rates.insert(asset.to_string(), rate);
        }
    }

    /// Copy of the current rate table.
    pub fn rates(&self) -> BTreeMap<String, u128> {
        self.rates.read().map(|r| r.clone()).unwrap_or_default()
    }
}

impl PriceOracle for StaticOracle {
    fn exchange_rate(&self, asset: &str) -> Result<u128> {
        let rates = self
            .rates
            .read()
            .map_err(|_| anyhow::anyhow!("rate table poisoned"))?;
        rates
            .get(asset)
            .copied()
            .with_context(|| format!("no rate set for {asset}"))
    }
}

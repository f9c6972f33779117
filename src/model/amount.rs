use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Token amount as written in scenario files: a decimal string in whole-token
/// units (e.g. "1000.50"), converted with the asset's decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TokenAmount(pub String);

impl TokenAmount {
    /// Convert to the asset's smallest unit. Extra fractional digits beyond
    /// `decimals` are rejected rather than truncated.
    pub fn to_units(&self, decimals: u8) -> anyhow::Result<u128> {
        let raw = self.0.trim();
        let (whole, frac) = match raw.split_once('.') {
            Some((w, f)) => (w, f),
            None => (raw, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            anyhow::bail!("empty amount");
        }
        if frac.len() > decimals as usize {
            anyhow::bail!("amount '{raw}' has more than {decimals} decimals");
        }
        let unit = 10u128
            .checked_pow(decimals as u32)
            .ok_or_else(|| anyhow::anyhow!("{decimals} decimals overflow"))?;
        let whole: u128 = if whole.is_empty() { 0 } else { whole.parse()? };
        let frac_units: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<width$}", width = decimals as usize);
            padded.parse()?
        };
        whole
            .checked_mul(unit)
            .and_then(|w| w.checked_add(frac_units))
            .ok_or_else(|| anyhow::anyhow!("amount '{raw}' overflows"))
    }

    /// Render smallest units back into a decimal string.
    pub fn from_units(units: u128, decimals: u8) -> Self {
        let unit = 10u128.pow(decimals as u32);
        let whole = units / unit;
        let frac = units % unit;
        if frac == 0 {
            return Self(whole.to_string());
        }
        let frac = format!("{frac:0>width$}", width = decimals as usize);
        Self(format!("{whole}.{}", frac.trim_end_matches('0')))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TokenAmount {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

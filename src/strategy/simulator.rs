use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::source::{LiquidityShortfall, Settlement, YieldSource};
use crate::math::{FULL_PERCENT, YIELD_FULL_PERCENT};

/// Behaviour knobs of a simulated yield source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SimulatedSourceConfig {
    /// Deposits wait for `confirm` before they count as holdings.
    #[serde(default)]
    pub deposit_async: bool,
    /// Withdrawals wait for `confirm` before assets are released.
    #[serde(default)]
    pub withdraw_async: bool,
    /// Loss applied to in-flight amounts on confirmation, in bps.
    #[serde(default)]
    pub haircut_bps: u128,
}

/// Calls received, for inspecting how many external operations a flow needed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCalls {
    pub deposits: u32,
    pub withdrawals: u32,
    pub fast_deposits: u32,
    pub fast_withdrawals: u32,
}

/// Yield source simulator: settled holdings, claimable rewards, and
/// in-flight buckets for asynchronous legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedSource {
    pub config: SimulatedSourceConfig,
    holdings: Vec<u128>,
    rewards: Vec<u128>,
    in_flight_deposit: Vec<u128>,
    in_flight_withdrawal: Vec<u128>,
    confirmed: bool,
    /// Injected failure. Shared between clones so a rolled-back call still
    /// consumes it.
    #[serde(skip)]
    fail_next: Arc<AtomicBool>,
    calls: SourceCalls,
}

impl SimulatedSource {
    pub fn new(asset_count: usize, config: SimulatedSourceConfig) -> Self {
        Self {
            config,
            holdings: vec![0; asset_count],
            rewards: vec![0; asset_count],
            in_flight_deposit: vec![0; asset_count],
            in_flight_withdrawal: vec![0; asset_count],
            confirmed: false,
            fail_next: Arc::default(),
            calls: SourceCalls::default(),
        }
    }

    pub fn from_snapshot(snapshot: &str) -> Result<Self> {
        Ok(serde_json::from_str(snapshot)?)
    }

    /// Make reward tokens claimable at the next compound claim.
    pub fn add_rewards(&mut self, amounts: &[u128]) {
        for (reward, amount) in self.rewards.iter_mut().zip(amounts) {
            *reward = reward.saturating_add(*amount);
        }
    }

    /// Simulate the external protocol confirming every in-flight leg.
    pub fn confirm(&mut self) {
        self.confirmed = true;
    }

    /// The next deposit or withdrawal call fails.
    pub fn fail_next(&mut self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> &SourceCalls {
        &self.calls
    }

    pub fn in_flight(&self) -> (&[u128], &[u128]) {
        (&self.in_flight_deposit, &self.in_flight_withdrawal)
    }

    fn check_failure(&mut self) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            bail!("simulated yield source failure");
        }
        Ok(())
    }

    fn check_len(&self, amounts: &[u128]) -> Result<()> {
        if amounts.len() != self.holdings.len() {
            bail!("expected {} amounts, got {}", self.holdings.len(), amounts.len());
        }
        Ok(())
    }

    fn add_holdings(&mut self, amounts: &[u128]) -> Result<()> {
        self.check_len(amounts)?;
        for (held, amount) in self.holdings.iter_mut().zip(amounts) {
            *held = held
                .checked_add(*amount)
                .ok_or_else(|| anyhow::anyhow!("holdings overflow"))?;
        }
        Ok(())
    }

    fn take_holdings(&mut self, amounts: &[u128]) -> Result<()> {
        self.check_len(amounts)?;
        if self.holdings.iter().zip(amounts).any(|(held, amount)| amount > held) {
            return Err(LiquidityShortfall {
                requested: amounts.to_vec(),
                held: self.holdings.clone(),
            }
            .into());
        }
        for (held, amount) in self.holdings.iter_mut().zip(amounts) {
            *held -= amount;
        }
        Ok(())
    }

    fn haircut(&self, amounts: &[u128]) -> Result<Vec<u128>> {
        if self.config.haircut_bps > FULL_PERCENT {
            bail!("haircut of {} bps exceeds 100%", self.config.haircut_bps);
        }
        amounts
            .iter()
            .map(|a| match a.checked_mul(self.config.haircut_bps) {
                Some(cut) => Ok(a - cut / FULL_PERCENT),
                None => bail!("haircut overflow on {a}"),
            })
            .collect()
    }

    fn accumulate(bucket: &mut [u128], amounts: &[u128]) -> Result<()> {
        for (flight, amount) in bucket.iter_mut().zip(amounts) {
            *flight = match flight.checked_add(*amount) {
                Some(total) => total,
                None => bail!("amount overflow"),
            };
        }
        Ok(())
    }
}

impl YieldSource for SimulatedSource {
    fn assets(&self) -> Vec<u128> {
        self.holdings.clone()
    }

    fn report_base_yield(&mut self, yield_pct: i128) -> Result<()> {
        if yield_pct <= -YIELD_FULL_PERCENT {
            bail!("yield of {yield_pct} would wipe out the position");
        }
        let factor = (YIELD_FULL_PERCENT + yield_pct) as u128;
        for held in self.holdings.iter_mut() {
            *held = held
                .checked_mul(factor)
                .map(|v| v / YIELD_FULL_PERCENT as u128)
                .ok_or_else(|| anyhow::anyhow!("yield overflow"))?;
        }
        Ok(())
    }

    fn claim_compound(&mut self) -> Result<Vec<u128>> {
        let len = self.rewards.len();
        Ok(std::mem::replace(&mut self.rewards, vec![0; len]))
    }

    fn deposit(&mut self, amounts: &[u128]) -> Result<Settlement> {
        self.check_failure()?;
        self.check_len(amounts)?;
        self.calls.deposits += 1;
        if self.config.deposit_async {
            Self::accumulate(&mut self.in_flight_deposit, amounts)?;
            self.confirmed = false;
            return Ok(Settlement::Pending);
        }
        self.add_holdings(amounts)?;
        Ok(Settlement::Settled(amounts.to_vec()))
    }

    fn withdraw(&mut self, amounts: &[u128]) -> Result<Settlement> {
        self.check_failure()?;
        self.take_holdings(amounts)?;
        self.calls.withdrawals += 1;
        if self.config.withdraw_async {
            Self::accumulate(&mut self.in_flight_withdrawal, amounts)?;
            self.confirmed = false;
            return Ok(Settlement::Pending);
        }
        Ok(Settlement::Settled(amounts.to_vec()))
    }

    fn continue_deposit(&mut self) -> Result<Option<Vec<u128>>> {
        if !self.confirmed {
            return Ok(None);
        }
        let len = self.in_flight_deposit.len();
        let in_flight = std::mem::replace(&mut self.in_flight_deposit, vec![0; len]);
        let landed = self.haircut(&in_flight)?;
        self.add_holdings(&landed)?;
        Ok(Some(landed))
    }

    fn continue_withdrawal(&mut self) -> Result<Option<Vec<u128>>> {
        if !self.confirmed {
            return Ok(None);
        }
        let len = self.in_flight_withdrawal.len();
        let in_flight = std::mem::replace(&mut self.in_flight_withdrawal, vec![0; len]);
        Ok(Some(self.haircut(&in_flight)?))
    }

    fn deposit_fast(&mut self, amounts: &[u128]) -> Result<Vec<u128>> {
        self.check_failure()?;
        self.add_holdings(amounts)?;
        self.calls.fast_deposits += 1;
        Ok(amounts.to_vec())
    }

    fn withdraw_fast(&mut self, amounts: &[u128]) -> Result<Vec<u128>> {
        self.check_failure()?;
        self.take_holdings(amounts)?;
        self.calls.fast_withdrawals += 1;
        Ok(amounts.to_vec())
    }

    fn emergency_withdraw(&mut self) -> Result<Vec<u128>> {
        let len = self.holdings.len();
        let mut out = std::mem::replace(&mut self.holdings, vec![0; len]);
        for bucket in [
            std::mem::replace(&mut self.in_flight_deposit, vec![0; len]),
            std::mem::replace(&mut self.rewards, vec![0; len]),
        ] {
            Self::accumulate(&mut out, &bucket)?;
        }
        Ok(out)
    }

    fn box_clone(&self) -> Box<dyn YieldSource> {
        Box::new(self.clone())
    }

    fn snapshot(&self) -> Result<Option<String>> {
        Ok(Some(serde_json::to_string(self)?))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_deposit_waits_for_confirmation() {
        let mut source = SimulatedSource::new(
            1,
            SimulatedSourceConfig {
                deposit_async: true,
                haircut_bps: 100,
                ..Default::default()
            },
        );
        assert_eq!(source.deposit(&[1_000]).unwrap(), Settlement::Pending);
        assert_eq!(source.assets(), vec![0]);
        assert_eq!(source.continue_deposit().unwrap(), None);
        source.confirm();
        assert_eq!(source.continue_deposit().unwrap(), Some(vec![990]));
        assert_eq!(source.assets(), vec![990]);
    }

    #[test]
    fn test_base_yield_scales_holdings() {
        let mut source = SimulatedSource::new(2, SimulatedSourceConfig::default());
        source.deposit(&[1_000, 2_000]).unwrap();
        // +5%
        source.report_base_yield(YIELD_FULL_PERCENT / 20).unwrap();
        assert_eq!(source.assets(), vec![1_050, 2_100]);
        source.report_base_yield(-YIELD_FULL_PERCENT / 10).unwrap();
        assert_eq!(source.assets(), vec![945, 1_890]);
    }

    #[test]
    fn test_withdraw_beyond_holdings_fails() {
        let mut source = SimulatedSource::new(1, SimulatedSourceConfig::default());
        source.deposit(&[10]).unwrap();
        let err = source.withdraw(&[11]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<LiquidityShortfall>(),
            Some(&LiquidityShortfall {
                requested: vec![11],
                held: vec![10],
            })
        );
        assert_eq!(source.assets(), vec![10]);
    }

    #[test]
    fn test_in_flight_overflow_is_an_error() {
        let mut source = SimulatedSource::new(
            1,
            SimulatedSourceConfig {
                deposit_async: true,
                ..Default::default()
            },
        );
        source.deposit(&[u128::MAX]).unwrap();
        assert!(source.deposit(&[1]).is_err());
        assert_eq!(source.in_flight().0, &[u128::MAX]);
    }
}

use std::any::Any;

use anyhow::Result;

/// Outcome of a deposit or withdrawal leg sent to a yield source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Completed within the call. Carries the amounts actually moved.
    Settled(Vec<u128>),
    /// Registered with the external protocol; completes through a later
    /// `continue_*` call.
    Pending,
}

/// A source could not release the requested amounts. Sources raise it
/// through `anyhow` so the engine can tell a shortfall from other failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("insufficient liquidity: requested {requested:?}, holding {held:?}")]
pub struct LiquidityShortfall {
    pub requested: Vec<u128>,
    pub held: Vec<u128>,
}

// ── Yield source trait ──────────────────────────────────────────────

/// External yield-generating protocol wrapped by a strategy.
///
/// Every amount vector is ordered like the strategy's asset group. The
/// engine treats sources as black boxes: it only trusts what they report
/// back and never inspects their internals.
pub trait YieldSource: Send + Sync {
    /// Settled assets currently held, excluding anything still in flight.
    fn assets(&self) -> Vec<u128>;

    /// Apply externally reported base yield since the last round, as a
    /// signed fraction of `YIELD_FULL_PERCENT`. Live adapters observe yield
    /// on their own and may ignore this.
    fn report_base_yield(&mut self, yield_pct: i128) -> Result<()>;

    /// Claim reward tokens earned since the last claim, in underlying assets.
    fn claim_compound(&mut self) -> Result<Vec<u128>>;

    fn deposit(&mut self, amounts: &[u128]) -> Result<Settlement>;

    fn withdraw(&mut self, amounts: &[u128]) -> Result<Settlement>;

    /// Final amount of a pending deposit, or `None` while unconfirmed.
    fn continue_deposit(&mut self) -> Result<Option<Vec<u128>>>;

    /// Assets released by a pending withdrawal, or `None` while unconfirmed.
    fn continue_withdrawal(&mut self) -> Result<Option<Vec<u128>>>;

    /// Atomic deposit used by reallocation.
    fn deposit_fast(&mut self, amounts: &[u128]) -> Result<Vec<u128>>;

    /// Atomic withdrawal used by reallocation and fast redemption.
    fn withdraw_fast(&mut self, amounts: &[u128]) -> Result<Vec<u128>>;

    /// Pull everything out, in flight or not.
    fn emergency_withdraw(&mut self) -> Result<Vec<u128>>;

    fn box_clone(&self) -> Box<dyn YieldSource>;

    /// Serialized internal state for the durable store, if the source has any.
    fn snapshot(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Source standing behind the ghost strategy: holds nothing, accepts nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct GhostSource;

impl YieldSource for GhostSource {
    fn assets(&self) -> Vec<u128> {
        Vec::new()
    }

    fn report_base_yield(&mut self, _yield_pct: i128) -> Result<()> {
        Ok(())
    }

    fn claim_compound(&mut self) -> Result<Vec<u128>> {
        Ok(Vec::new())
    }

    fn deposit(&mut self, _amounts: &[u128]) -> Result<Settlement> {
        anyhow::bail!("ghost strategy accepts no deposits")
    }

    fn withdraw(&mut self, _amounts: &[u128]) -> Result<Settlement> {
        anyhow::bail!("ghost strategy holds no assets")
    }

    fn continue_deposit(&mut self) -> Result<Option<Vec<u128>>> {
        Ok(None)
    }

    fn continue_withdrawal(&mut self) -> Result<Option<Vec<u128>>> {
        Ok(None)
    }

    fn deposit_fast(&mut self, _amounts: &[u128]) -> Result<Vec<u128>> {
        anyhow::bail!("ghost strategy accepts no deposits")
    }

    fn withdraw_fast(&mut self, _amounts: &[u128]) -> Result<Vec<u128>> {
        anyhow::bail!("ghost strategy holds no assets")
    }

    fn emergency_withdraw(&mut self) -> Result<Vec<u128>> {
        Ok(Vec::new())
    }

    fn box_clone(&self) -> Box<dyn YieldSource> {
        Box::new(*self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

//! Durable key-value persistence of protocol state.
//!
//! Entities are stored as JSON under stable keys; a few hot fields are also
//! written to their own keys so tooling can read them without decoding the
//! entity.

pub mod memory;
#[cfg(feature = "full")]
pub mod sqlite;

use std::collections::BTreeMap;

use alloy_primitives::U256;
use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::access::AccessControl;
use crate::engine::Protocol;
use crate::engine::clock::Clock;
use crate::engine::state::{AssetBalances, ProtocolState};
use crate::ledger::{Receipt, ReceiptLedger};
use crate::model::{Allocation, AssetRegistry, ProtocolLimits, StrategyId};
use crate::oracle::PriceOracle;
use crate::strategy::{GhostSource, SimulatedSource, Strategy, YieldSource};
use crate::vault::Vault;

pub use memory::MemoryStore;
#[cfg(feature = "full")]
pub use sqlite::SqliteStore;

pub trait StateStore {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write every entry or none.
    fn put_batch(&mut self, entries: &[(String, String)]) -> Result<()>;

    /// Entries whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Drop every entry.
    fn clear(&mut self) -> Result<()>;
}

pub mod keys {
    use crate::model::StrategyId;

    pub const META: &str = "protocol/meta";
    pub const BALANCES: &str = "balances";

    pub fn vault(id: &str) -> String {
        format!("vault/{id}")
    }

    pub fn vault_allocation(id: &str) -> String {
        format!("vault/{id}/allocation")
    }

    pub fn vault_flush_index(id: &str) -> String {
        format!("vault/{id}/flush_index")
    }

    pub fn vault_synced(id: &str, slot: usize) -> String {
        format!("vault/{id}/synced/{slot}")
    }

    pub fn strategy(id: StrategyId) -> String {
        format!("strategy/{}", id.0)
    }

    pub fn strategy_dhw_index(id: StrategyId) -> String {
        format!("strategy/{}/dhw_index", id.0)
    }

    pub fn strategy_pending(id: StrategyId) -> String {
        format!("strategy/{}/pending", id.0)
    }

    pub fn source(id: StrategyId) -> String {
        format!("source/{}", id.0)
    }

    pub fn receipt(id: u64) -> String {
        format!("receipt/{id:020}")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProtocolMeta {
    paused: bool,
    access: AccessControl,
    assets: AssetRegistry,
    limits: ProtocolLimits,
    next_receipt_id: u64,
    strategy_count: usize,
}

/// Rebuilds a strategy's yield source from its persisted snapshot.
pub type SourceFactory<'a> = &'a dyn Fn(StrategyId, Option<&str>) -> Result<Box<dyn YieldSource>>;

/// Factory for stores written by simulations: ghost at index 0, simulated
/// sources elsewhere.
pub fn simulated_source(id: StrategyId, snapshot: Option<&str>) -> Result<Box<dyn YieldSource>> {
    if id.is_ghost() {
        return Ok(Box::new(GhostSource));
    }
    let snapshot = snapshot.with_context(|| format!("strategy {id} has no source snapshot"))?;
    Ok(Box::new(SimulatedSource::from_snapshot(snapshot)?))
}

fn json(value: &impl Serialize) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).with_context(|| format!("decoding `{key}`"))
}

fn require(store: &dyn StateStore, key: &str) -> Result<String> {
    store.get(key)?.with_context(|| format!("missing key `{key}`"))
}

impl Protocol {
    /// Write the full protocol state to `store` in one batch. Returns the
    /// number of keys written.
    pub fn persist(&self, store: &mut dyn StateStore) -> Result<usize> {
        let state = &self.state;
        let mut entries = Vec::new();

        let meta = ProtocolMeta {
            paused: state.paused,
            access: state.access.clone(),
            assets: state.assets.clone(),
            limits: state.limits.clone(),
            next_receipt_id: state.receipts.next_id(),
            strategy_count: state.strategies.len(),
        };
        entries.push((keys::META.to_string(), json(&meta)?));
        entries.push((keys::BALANCES.to_string(), json(&state.balances)?));

        for (id, vault) in &state.vaults {
            entries.push((keys::vault(id), json(vault)?));
            let packed = vault.allocation.pack()?;
            entries.push((keys::vault_allocation(id), format!("{packed:#x}")));
            entries.push((keys::vault_flush_index(id), vault.flush_index.to_string()));
            for (slot, synced) in vault.synced_dhw.iter().enumerate() {
                entries.push((keys::vault_synced(id, slot), json(synced)?));
            }
        }

        for (strategy, source) in state.strategies.iter().zip(&self.sources) {
            let id = strategy.id;
            entries.push((keys::strategy(id), json(strategy)?));
            entries.push((keys::strategy_dhw_index(id), strategy.dhw_index.to_string()));
            entries.push((keys::strategy_pending(id), json(&strategy.pending_round())?));
            if let Some(snapshot) = source.snapshot()? {
                entries.push((keys::source(id), snapshot));
            }
        }

        for receipt in state.receipts.iter() {
            entries.push((keys::receipt(receipt.id), json(receipt)?));
        }

        store.put_batch(&entries).context("writing protocol state")?;
        info!(keys = entries.len(), vaults = state.vaults.len(), "state persisted");
        Ok(entries.len())
    }

    /// Rebuild a protocol from `store`. Sources come from `factory`, fed the
    /// snapshot persisted for each strategy.
    pub fn restore(
        store: &dyn StateStore,
        factory: SourceFactory<'_>,
        oracle: Box<dyn PriceOracle>,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let meta: ProtocolMeta = decode(keys::META, &require(store, keys::META)?)?;
        let balances: AssetBalances = decode(keys::BALANCES, &require(store, keys::BALANCES)?)?;

        let mut strategies = Vec::with_capacity(meta.strategy_count);
        let mut sources = Vec::with_capacity(meta.strategy_count);
        for index in 0..meta.strategy_count {
            let id = StrategyId(u32::try_from(index)?);
            let key = keys::strategy(id);
            let mut strategy: Strategy = decode(&key, &require(store, &key)?)?;
            strategy.dhw_index = require(store, &keys::strategy_dhw_index(id))?
                .parse()
                .with_context(|| format!("parsing dhw index of strategy {id}"))?;
            let pending: Option<u64> = decode(
                &keys::strategy_pending(id),
                &require(store, &keys::strategy_pending(id))?,
            )?;
            if pending != strategy.pending_round() {
                bail!("strategy {id}: pending round {pending:?} does not match its rounds");
            }
            let snapshot = store.get(&keys::source(id))?;
            sources.push(factory(id, snapshot.as_deref())?);
            strategies.push(strategy);
        }

        let mut vaults = BTreeMap::new();
        for (key, raw) in store.scan_prefix("vault/")? {
            let Some(id) = key.strip_prefix("vault/") else {
                continue;
            };
            if id.contains('/') {
                continue;
            }
            let mut vault: Vault = decode(&key, &raw)?;
            let packed: U256 = require(store, &keys::vault_allocation(id))?
                .parse()
                .map_err(|e| anyhow::anyhow!("parsing allocation of vault `{id}`: {e}"))?;
            vault.allocation = Allocation::unpack(packed, vault.strategies.len());
            vault.flush_index = require(store, &keys::vault_flush_index(id))?
                .parse()
                .with_context(|| format!("parsing flush index of vault `{id}`"))?;
            for slot in 0..vault.synced_dhw.len() {
                let key = keys::vault_synced(id, slot);
                vault.synced_dhw[slot] = decode(&key, &require(store, &key)?)?;
            }
            vaults.insert(id.to_string(), vault);
        }

        let receipts = store
            .scan_prefix("receipt/")?
            .into_iter()
            .map(|(key, raw)| decode::<Receipt>(&key, &raw))
            .collect::<Result<Vec<_>>>()?;
        debug!(receipts = receipts.len(), vaults = vaults.len(), "state decoded");

        let state = ProtocolState {
            paused: meta.paused,
            access: meta.access,
            assets: meta.assets,
            limits: meta.limits,
            strategies,
            vaults,
            receipts: ReceiptLedger::from_parts(meta.next_receipt_id, receipts),
            balances,
        };
        Ok(Protocol::from_parts(state, sources, oracle, clock))
    }
}

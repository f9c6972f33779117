use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use vault_flow::Protocol;
use vault_flow::engine::clock::SimClock;
use vault_flow::oracle::StaticOracle;
use vault_flow::store::{self, SqliteStore, StateStore};

/// Keys the CLI writes next to protocol state so a later `inspect` sees the
/// prices and time the simulation ended with.
pub const RATES_KEY: &str = "sim/rates";
pub const NOW_KEY: &str = "sim/now";

const DB_ENV: &str = "VAULT_FLOW_DB";

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vault-flow")
        .join("state.db")
}

/// `--db`, else `$VAULT_FLOW_DB`, else `~/.vault-flow/state.db`.
pub fn db_path(flag: Option<&Path>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| std::env::var_os(DB_ENV).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

/// Restore the protocol saved by `simulate`, with an oracle and clock frozen
/// at the prices and time the run ended with.
pub fn load(path: &Path) -> Result<Protocol> {
    if !path.exists() {
        anyhow::bail!(
            "no state database at {} (run `vault-flow simulate` first)",
            path.display()
        );
    }
    let store = SqliteStore::open(path)?;
    let rates: BTreeMap<String, u128> = match store.get(RATES_KEY)? {
        Some(raw) => serde_json::from_str(&raw).context("decoding stored rates")?,
        None => BTreeMap::new(),
    };
    let now: u64 = match store.get(NOW_KEY)? {
        Some(raw) => raw.parse().context("parsing stored timestamp")?,
        None => 0,
    };
    Protocol::restore(
        &store,
        &store::simulated_source,
        Box::new(StaticOracle::from_rates(rates)),
        Box::new(SimClock::new(now)),
    )
    .with_context(|| format!("restoring state from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_wins_over_default() {
        let path = db_path(Some(Path::new("/tmp/x.db")));
        assert_eq!(path, PathBuf::from("/tmp/x.db"));
    }
}

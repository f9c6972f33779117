use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use vault_flow::math::YIELD_FULL_PERCENT;

use crate::config;

/// CLI entry point for the `history` subcommand.
pub fn run(strategy: &str, db: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let path = config::db_path(db);
    let protocol = config::load(&path)?;
    let found = protocol
        .state()
        .strategies
        .iter()
        .skip(1)
        .find(|s| s.name == strategy)
        .with_context(|| format!("no strategy named `{strategy}` in {}", path.display()))?;

    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path).with_context(|| format!("writing {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(["dhw_index", "timestamp", "date", "yield_pct", "apy_pct"])?;
    for point in &found.apy_history {
        let date = chrono::DateTime::from_timestamp(point.timestamp as i64, 0)
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        writer.write_record(&[
            point.dhw_index.to_string(),
            point.timestamp.to_string(),
            date,
            percent(point.yield_pct),
            percent(point.apy),
        ])?;
    }
    writer.flush()?;

    if let Some(path) = output {
        eprintln!(
            "  {} points for `{strategy}` written to {}",
            found.apy_history.len(),
            path.display()
        );
    }
    Ok(())
}

/// Render a yield fraction (scaled by `YIELD_FULL_PERCENT`) as a percentage.
fn percent(value: i128) -> String {
    format!("{:.6}", value as f64 * 100.0 / YIELD_FULL_PERCENT as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(YIELD_FULL_PERCENT / 20), "5.000000");
        assert_eq!(percent(-YIELD_FULL_PERCENT / 100), "-1.000000");
    }
}

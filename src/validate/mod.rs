mod references;
mod values;

use std::path::Path;

use thiserror::Error;

use crate::scenario::Scenario;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Duplicate {kind} `{name}`")]
    Duplicate { kind: &'static str, name: String },

    #[error("{context} references unknown asset `{asset}`")]
    UnknownAsset { context: String, asset: String },

    #[error("{context} references unknown asset group {group}")]
    UnknownGroup { context: String, group: usize },

    #[error("{context} references unknown strategy `{strategy}`")]
    UnknownStrategy { context: String, strategy: String },

    #[error("{context} references unknown vault `{vault}`")]
    UnknownVault { context: String, vault: String },

    #[error("Asset group {group} is empty")]
    EmptyGroup { group: usize },

    #[error("Vault `{vault}` has no strategies")]
    NoStrategies { vault: String },

    #[error("Vault `{vault}` has {count} strategies, at most {max} are allowed")]
    TooManyStrategies { vault: String, count: usize, max: usize },

    #[error("Vault `{vault}` mixes asset groups: strategy `{strategy}` is in group {found}, expected {expected}")]
    MixedGroups {
        vault: String,
        strategy: String,
        expected: usize,
        found: usize,
    },

    #[error("{context} has {got} entries, expected {expected}")]
    LengthMismatch {
        context: String,
        expected: usize,
        got: usize,
    },

    #[error("{context} allocation sums to {sum} bps, expected 10000")]
    AllocationSum { context: String, sum: u128 },

    #[error("{context} sets `{field}` to {value} bps, above the cap of {max}")]
    FeeTooHigh {
        context: String,
        field: &'static str,
        value: u128,
        max: u128,
    },

    #[error("{context} has invalid amount `{amount}`: {reason}")]
    InvalidAmount {
        context: String,
        amount: String,
        reason: String,
    },

    #[error("Asset `{asset}` has {decimals} decimals, at most 18 are supported")]
    TooManyDecimals { asset: String, decimals: u8 },

    #[error("Step {index} ({action}) has portion {portion} bps, expected 1..=10000")]
    InvalidPortion {
        index: usize,
        action: &'static str,
        portion: u128,
    },
}

/// Load and fully validate a scenario from a JSON file.
pub fn load_and_validate(path: &Path) -> Result<Scenario, Vec<ValidationError>> {
    let contents = std::fs::read_to_string(path).map_err(|e| vec![ValidationError::Io(e)])?;
    let scenario: Scenario =
        serde_json::from_str(&contents).map_err(|e| vec![ValidationError::Json(e)])?;
    validate(&scenario)?;
    Ok(scenario)
}

/// Validate a scenario, collecting all errors.
pub fn validate(scenario: &Scenario) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    errors.extend(references::check_duplicates(scenario));
    errors.extend(references::check_groups(scenario));
    errors.extend(references::check_vaults(scenario));
    errors.extend(references::check_steps(scenario));
    errors.extend(values::check_assets(scenario));
    errors.extend(values::check_fees(scenario));
    errors.extend(values::check_allocations(scenario));
    errors.extend(values::check_amounts(scenario));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// CLI entry point for the `validate` subcommand.
pub fn run(path: &Path) -> anyhow::Result<()> {
    match load_and_validate(path) {
        Ok(scenario) => {
            println!(
                "Scenario '{}' is valid. {} strategies, {} vaults, {} steps.",
                scenario.name,
                scenario.strategies.len(),
                scenario.vaults.len(),
                scenario.steps.len()
            );
            Ok(())
        }
        Err(errors) => {
            eprintln!("Validation failed with {} error(s):", errors.len());
            for (i, e) in errors.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, e);
            }
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Scenario {
        serde_json::from_str(
            r#"{
                "name": "sample",
                "admin": "admin",
                "assets": [{ "symbol": "USDC", "decimals": 6, "price": "1" }],
                "groups": [["USDC"]],
                "strategies": [
                    { "name": "a", "group": 0 },
                    { "name": "b", "group": 0 }
                ],
                "vaults": [{
                    "id": "main",
                    "owner": "owner",
                    "strategies": ["a", "b"],
                    "allocation": [6000, 4000]
                }],
                "accounts": [{ "account": "alice", "balances": { "USDC": "1000" } }],
                "steps": [
                    { "action": "deposit", "account": "alice", "vault": "main", "amounts": ["100"] },
                    { "action": "flush", "vault": "main" }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_sample_is_valid() {
        validate(&sample()).unwrap();
    }

    #[test]
    fn test_collects_every_error() {
        let mut scenario = sample();
        scenario.vaults[0].allocation = Some(vec![6000, 3000]);
        scenario.vaults[0].strategies.push("missing".to_string());
        scenario.strategies.push(scenario.strategies[0].clone());
        let errors = validate(&scenario).unwrap_err();
        let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert!(rendered.iter().any(|e| e.contains("Duplicate strategy `a`")));
        assert!(rendered.iter().any(|e| e.contains("unknown strategy `missing`")));
        assert!(rendered.iter().any(|e| e.contains("has 2 entries, expected 3")));
        assert!(rendered.iter().any(|e| e.contains("sums to 9000")));
    }

    #[test]
    fn test_rejects_amount_with_too_many_decimals() {
        let mut scenario = sample();
        scenario.accounts[0]
            .balances
            .insert("USDC".to_string(), "1.0000001".into());
        let errors = validate(&scenario).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidAmount { .. }));
    }
}

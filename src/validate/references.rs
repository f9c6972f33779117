use std::collections::{HashMap, HashSet};

use crate::scenario::{Scenario, Step};

use super::ValidationError;

fn duplicates<'a>(kind: &'static str, names: impl Iterator<Item = &'a str>) -> Vec<ValidationError> {
    let mut seen = HashSet::new();
    names
        .filter(|name| !seen.insert(*name))
        .map(|name| ValidationError::Duplicate {
            kind,
            name: name.to_string(),
        })
        .collect()
}

/// Check that asset symbols, strategy names and vault IDs are unique.
pub fn check_duplicates(scenario: &Scenario) -> Vec<ValidationError> {
    let mut errors = duplicates("asset", scenario.assets.iter().map(|a| a.symbol.as_str()));
    errors.extend(duplicates(
        "strategy",
        scenario.strategies.iter().map(|s| s.name.as_str()),
    ));
    errors.extend(duplicates("vault", scenario.vaults.iter().map(|v| v.id.as_str())));
    errors
}

/// Check that groups are non-empty, reference known assets, and that every
/// strategy sits in an existing group.
pub fn check_groups(scenario: &Scenario) -> Vec<ValidationError> {
    let assets: HashSet<&str> = scenario.assets.iter().map(|a| a.symbol.as_str()).collect();
    let mut errors = Vec::new();

    for (index, group) in scenario.groups.iter().enumerate() {
        if group.is_empty() {
            errors.push(ValidationError::EmptyGroup { group: index });
        }
        for asset in group {
            if !assets.contains(asset.as_str()) {
                errors.push(ValidationError::UnknownAsset {
                    context: format!("Asset group {index}"),
                    asset: asset.clone(),
                });
            }
        }
        errors.extend(duplicates("asset in group", group.iter().map(String::as_str)));
    }

    for strategy in &scenario.strategies {
        if strategy.group >= scenario.groups.len() {
            errors.push(ValidationError::UnknownGroup {
                context: format!("Strategy `{}`", strategy.name),
                group: strategy.group,
            });
        }
    }

    errors
}

/// Check that every vault lists known strategies of a single asset group.
pub fn check_vaults(scenario: &Scenario) -> Vec<ValidationError> {
    let groups: HashMap<&str, usize> = scenario
        .strategies
        .iter()
        .map(|s| (s.name.as_str(), s.group))
        .collect();
    let max = crate::model::ProtocolLimits::default().max_strategies_per_vault;
    let mut errors = Vec::new();

    for vault in &scenario.vaults {
        if vault.strategies.is_empty() {
            errors.push(ValidationError::NoStrategies {
                vault: vault.id.clone(),
            });
        }
        if vault.strategies.len() > max {
            errors.push(ValidationError::TooManyStrategies {
                vault: vault.id.clone(),
                count: vault.strategies.len(),
                max,
            });
        }
        let mut expected = None;
        for name in &vault.strategies {
            let Some(&group) = groups.get(name.as_str()) else {
                errors.push(ValidationError::UnknownStrategy {
                    context: format!("Vault `{}`", vault.id),
                    strategy: name.clone(),
                });
                continue;
            };
            match expected {
                None => expected = Some(group),
                Some(expected) if expected != group => errors.push(ValidationError::MixedGroups {
                    vault: vault.id.clone(),
                    strategy: name.clone(),
                    expected,
                    found: group,
                }),
                Some(_) => {}
            }
        }
    }

    errors
}

/// Check that steps only name declared vaults and strategies.
pub fn check_steps(scenario: &Scenario) -> Vec<ValidationError> {
    let vaults: HashSet<&str> = scenario.vaults.iter().map(|v| v.id.as_str()).collect();
    let strategies: HashSet<&str> = scenario.strategies.iter().map(|s| s.name.as_str()).collect();
    let assets: HashSet<&str> = scenario.assets.iter().map(|a| a.symbol.as_str()).collect();
    let mut errors = Vec::new();

    for (index, spec) in scenario.steps.iter().enumerate() {
        let context = || format!("Step {index} ({})", spec.step.action());
        let mut vault_refs: Vec<&String> = Vec::new();
        let mut strategy_refs: Vec<&String> = Vec::new();
        let mut portion = None;

        match &spec.step {
            Step::Deposit { vault, .. } | Step::Flush { vault } | Step::Sync { vault } => {
                vault_refs.push(vault)
            }
            Step::Redeem {
                vault, portion_bps, ..
            }
            | Step::RedeemFast {
                vault, portion_bps, ..
            } => {
                vault_refs.push(vault);
                portion = Some(u128::from(*portion_bps));
            }
            Step::Claim { vault, .. } => vault_refs.extend(vault.iter()),
            Step::DoHardWork { strategies: names, .. } | Step::Continue { strategies: names, .. } => {
                strategy_refs.extend(names.iter())
            }
            Step::Confirm { strategy }
            | Step::Accrue { strategy, .. }
            | Step::RemoveStrategy { strategy, .. }
            | Step::FailNext { strategy } => strategy_refs.push(strategy),
            Step::Reallocate { vaults: ids, allocations } => {
                vault_refs.extend(ids.iter());
                vault_refs.extend(allocations.keys());
            }
            Step::SetPrice { asset, .. } => {
                if !assets.contains(asset.as_str()) {
                    errors.push(ValidationError::UnknownAsset {
                        context: context(),
                        asset: asset.clone(),
                    });
                }
            }
            Step::Pause | Step::Unpause | Step::AdvanceTime { .. } => {}
        }

        for vault in vault_refs {
            if !vaults.contains(vault.as_str()) {
                errors.push(ValidationError::UnknownVault {
                    context: context(),
                    vault: vault.clone(),
                });
            }
        }
        for strategy in strategy_refs {
            if !strategies.contains(strategy.as_str()) {
                errors.push(ValidationError::UnknownStrategy {
                    context: context(),
                    strategy: strategy.clone(),
                });
            }
        }
        if let Some(portion) = portion
            && (portion == 0 || portion > crate::math::FULL_PERCENT)
        {
            errors.push(ValidationError::InvalidPortion {
                index,
                action: spec.step.action(),
                portion,
            });
        }
    }

    errors
}

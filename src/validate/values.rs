use std::collections::HashMap;

use crate::error::VaultError;
use crate::math::FULL_PERCENT;
use crate::engine::optimizer::ProviderConfig;
use crate::model::{ProtocolLimits, TokenAmount};
use crate::scenario::{Scenario, Step};

use super::ValidationError;

const MAX_DECIMALS: u8 = 18;
const PRICE_DECIMALS: u8 = 18;

/// Check asset decimals and prices.
pub fn check_assets(scenario: &Scenario) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for asset in &scenario.assets {
        if asset.decimals > MAX_DECIMALS {
            errors.push(ValidationError::TooManyDecimals {
                asset: asset.symbol.clone(),
                decimals: asset.decimals,
            });
        }
        errors.extend(check_amount(
            format!("Price of `{}`", asset.symbol),
            &asset.price,
            PRICE_DECIMALS,
        ));
    }
    errors
}

fn fee_error(context: String, err: VaultError) -> ValidationError {
    match err {
        VaultError::FeeTooHigh { name, bps, max } => ValidationError::FeeTooHigh {
            context,
            field: name,
            value: bps,
            max,
        },
        other => ValidationError::InvalidAmount {
            context,
            amount: String::new(),
            reason: other.to_string(),
        },
    }
}

/// Check vault and strategy fees against the default protocol caps.
pub fn check_fees(scenario: &Scenario) -> Vec<ValidationError> {
    let limits = ProtocolLimits::default();
    let mut errors = Vec::new();
    for strategy in &scenario.strategies {
        if let Err(e) = strategy.fees.validate(&limits) {
            errors.push(fee_error(format!("Strategy `{}`", strategy.name), e));
        }
    }
    for vault in &scenario.vaults {
        if let Err(e) = vault.fees.validate(&limits) {
            errors.push(fee_error(format!("Vault `{}`", vault.id), e));
        }
    }
    errors
}

fn check_slots(context: String, slots: &[u16], expected: usize) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if slots.len() != expected {
        errors.push(ValidationError::LengthMismatch {
            context: context.clone(),
            expected,
            got: slots.len(),
        });
    }
    let sum: u128 = slots.iter().map(|s| *s as u128).sum();
    if sum != FULL_PERCENT {
        errors.push(ValidationError::AllocationSum { context, sum });
    }
    errors
}

/// Check explicit allocations, fixed providers and reallocation targets.
pub fn check_allocations(scenario: &Scenario) -> Vec<ValidationError> {
    let slots: HashMap<&str, usize> = scenario
        .vaults
        .iter()
        .map(|v| (v.id.as_str(), v.strategies.len()))
        .collect();
    let mut errors = Vec::new();

    for vault in &scenario.vaults {
        let context = format!("Vault `{}`", vault.id);
        if let Some(allocation) = &vault.allocation {
            errors.extend(check_slots(context.clone(), allocation, vault.strategies.len()));
        }
        if let Some(ProviderConfig::Fixed { allocation }) = &vault.provider {
            errors.extend(check_slots(
                format!("{context} provider"),
                allocation,
                vault.strategies.len(),
            ));
        }
    }

    for (index, spec) in scenario.steps.iter().enumerate() {
        let Step::Reallocate { allocations, .. } = &spec.step else {
            continue;
        };
        for (vault, allocation) in allocations {
            if let Some(&expected) = slots.get(vault.as_str()) {
                errors.extend(check_slots(
                    format!("Step {index} (reallocate) for vault `{vault}`"),
                    allocation,
                    expected,
                ));
            }
        }
    }

    errors
}

fn check_amount(context: String, amount: &TokenAmount, decimals: u8) -> Option<ValidationError> {
    amount
        .to_units(decimals)
        .err()
        .map(|e| ValidationError::InvalidAmount {
            context,
            amount: amount.0.clone(),
            reason: e.to_string(),
        })
}

fn check_group_amounts(
    scenario: &Scenario,
    decimals: &HashMap<&str, u8>,
    context: String,
    group: Option<usize>,
    amounts: &[TokenAmount],
) -> Vec<ValidationError> {
    let Some(group) = group.and_then(|g| scenario.groups.get(g)) else {
        return Vec::new();
    };
    if group.len() != amounts.len() {
        return vec![ValidationError::LengthMismatch {
            context,
            expected: group.len(),
            got: amounts.len(),
        }];
    }
    group
        .iter()
        .zip(amounts)
        .filter_map(|(asset, amount)| {
            let d = *decimals.get(asset.as_str())?;
            check_amount(context.clone(), amount, d)
        })
        .collect()
}

/// Check that every token amount parses with its asset's decimals and that
/// per-group amount lists have one entry per asset.
pub fn check_amounts(scenario: &Scenario) -> Vec<ValidationError> {
    let decimals: HashMap<&str, u8> = scenario
        .assets
        .iter()
        .map(|a| (a.symbol.as_str(), a.decimals))
        .collect();
    let strategy_groups: HashMap<&str, usize> = scenario
        .strategies
        .iter()
        .map(|s| (s.name.as_str(), s.group))
        .collect();
    let vault_groups: HashMap<&str, usize> = scenario
        .vaults
        .iter()
        .filter_map(|v| {
            let first = v.strategies.first()?;
            Some((v.id.as_str(), *strategy_groups.get(first.as_str())?))
        })
        .collect();
    let mut errors = Vec::new();

    for account in &scenario.accounts {
        for (asset, amount) in &account.balances {
            let context = format!("Account `{}`", account.account);
            match decimals.get(asset.as_str()) {
                Some(&d) => errors.extend(check_amount(context, amount, d)),
                None => errors.push(ValidationError::UnknownAsset {
                    context,
                    asset: asset.clone(),
                }),
            }
        }
    }

    for (index, spec) in scenario.steps.iter().enumerate() {
        let context = format!("Step {index} ({})", spec.step.action());
        match &spec.step {
            Step::Deposit { vault, amounts, .. } => {
                let group = vault_groups.get(vault.as_str()).copied();
                errors.extend(check_group_amounts(scenario, &decimals, context, group, amounts));
            }
            Step::Accrue { strategy, rewards } => {
                let group = strategy_groups.get(strategy.as_str()).copied();
                errors.extend(check_group_amounts(scenario, &decimals, context, group, rewards));
            }
            Step::SetPrice { price, .. } => {
                if let Some(e) = check_amount(context, price, PRICE_DECIMALS) {
                    errors.push(e);
                }
            }
            _ => {}
        }
    }

    errors
}

use std::collections::BTreeMap;

use vault_flow::access::Role;
use vault_flow::guard::DepositLimitGuard;
use vault_flow::model::{AllocationMode, StrategyFees, TokenAmount, VaultFees};
use vault_flow::scenario::{
    AccountSpec, AssetSpec, GuardSpec, RoleGrant, Scenario, Step, StepSpec, StrategySpec, VaultSpec,
};
use vault_flow::strategy::{SimulatedSourceConfig, StrategyKind};

const DAY: u64 = 86_400;

fn amounts(values: &[&str]) -> Vec<TokenAmount> {
    values.iter().map(|v| TokenAmount::from(*v)).collect()
}

fn strategy(name: &str, risk_score: u32) -> StrategySpec {
    StrategySpec {
        name: name.to_string(),
        group: 0,
        kind: StrategyKind::Atomic,
        fees: StrategyFees {
            ecosystem_bps: 500,
            treasury_bps: 500,
            ..StrategyFees::default()
        },
        risk_score,
        source: SimulatedSourceConfig::default(),
    }
}

/// Three-strategy stablecoin vault: two deposits settle through one round,
/// rewards accrue, capital is reallocated, then a withdrawal is claimed.
pub fn scenario() -> Scenario {
    let steps: Vec<Step> = vec![
        Step::Deposit {
            account: "alice".into(),
            vault: "stable".into(),
            amounts: amounts(&["1000"]),
        },
        Step::Deposit {
            account: "bob".into(),
            vault: "stable".into(),
            amounts: amounts(&["500"]),
        },
        Step::Flush {
            vault: "stable".into(),
        },
        Step::DoHardWork {
            strategies: vec![],
            base_yields: vec![],
        },
        Step::Sync {
            vault: "stable".into(),
        },
        Step::Claim {
            account: "alice".into(),
            vault: None,
        },
        Step::Claim {
            account: "bob".into(),
            vault: None,
        },
        Step::AdvanceTime { seconds: 30 * DAY },
        Step::Accrue {
            strategy: "aave-usdc".into(),
            rewards: amounts(&["9"]),
        },
        Step::DoHardWork {
            strategies: vec![],
            base_yields: vec![],
        },
        Step::Reallocate {
            vaults: vec!["stable".into()],
            allocations: BTreeMap::from([("stable".to_string(), vec![5000, 3000, 2000])]),
        },
        Step::Redeem {
            account: "alice".into(),
            vault: "stable".into(),
            portion_bps: 5000,
        },
        Step::Flush {
            vault: "stable".into(),
        },
        Step::DoHardWork {
            strategies: vec![],
            base_yields: vec![],
        },
        Step::Sync {
            vault: "stable".into(),
        },
        Step::Claim {
            account: "alice".into(),
            vault: Some("stable".into()),
        },
    ];

    let mut steps: Vec<StepSpec> = steps.into_iter().map(StepSpec::from).collect();
    // Over the per-deposit cap.
    steps.insert(
        2,
        StepSpec {
            step: Step::Deposit {
                account: "bob".into(),
                vault: "stable".into(),
                amounts: amounts(&["20000"]),
            },
            expect_error: Some("guard".into()),
        },
    );

    Scenario {
        name: "Stablecoin vault across three lenders".to_string(),
        description: Some(
            "USDC vault split 60/30/10 over three lending strategies. Deposits are batched \
             and settled by one harvest round; Aave rewards are compounded; the vault is \
             rebalanced to 50/30/20; half of Alice's position is withdrawn and claimed."
                .to_string(),
        ),
        start_time: 1_700_000_000,
        admin: "admin".to_string(),
        assets: vec![AssetSpec {
            symbol: "USDC".to_string(),
            decimals: 6,
            price: "1".into(),
        }],
        groups: vec![vec!["USDC".to_string()]],
        strategies: vec![
            strategy("aave-usdc", 1),
            strategy("compound-usdc", 2),
            strategy("morpho-usdc", 3),
        ],
        vaults: vec![VaultSpec {
            id: "stable".to_string(),
            owner: "curator".to_string(),
            strategies: vec!["aave-usdc".into(), "compound-usdc".into(), "morpho-usdc".into()],
            allocation: Some(vec![6000, 3000, 1000]),
            provider: None,
            mode: AllocationMode::Dynamic,
            fees: VaultFees {
                management_bps: 200,
                deposit_bps: 100,
                performance_bps: 1000,
            },
            guards: vec![GuardSpec::DepositLimit(DepositLimitGuard {
                max_per_slot: BTreeMap::from([(0, 10_000_000_000)]),
            })],
        }],
        accounts: vec![
            AccountSpec {
                account: "alice".to_string(),
                balances: BTreeMap::from([("USDC".to_string(), "5000".into())]),
            },
            AccountSpec {
                account: "bob".to_string(),
                balances: BTreeMap::from([("USDC".to_string(), "50000".into())]),
            },
        ],
        roles: vec![
            RoleGrant {
                role: Role::DoHardWorker,
                account: "keeper".to_string(),
            },
            RoleGrant {
                role: Role::Reallocator,
                account: "keeper".to_string(),
            },
            RoleGrant {
                role: Role::Pauser,
                account: "guardian".to_string(),
            },
            RoleGrant {
                role: Role::EmergencyWithdrawer,
                account: "guardian".to_string(),
            },
        ],
        steps,
    }
}

/// Print an example scenario JSON to stdout.
pub fn run() -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&scenario())?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_validates_and_replays() {
        let scenario = scenario();
        vault_flow::validate::validate(&scenario).unwrap();

        let json = serde_json::to_string(&scenario).unwrap();
        let parsed: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.steps.len(), scenario.steps.len());

        let (run, records) = vault_flow::scenario::run(&parsed).unwrap();
        assert_eq!(records.len(), scenario.steps.len());
        assert!(!records[2].ok);
        assert_eq!(run.protocol.allocation("stable").unwrap().0, vec![5000, 3000, 2000]);
        assert!(run.protocol.claimable("alice").is_empty());
        assert!(run.protocol.balance("alice", "USDC") > 4_000_000_000);
    }
}

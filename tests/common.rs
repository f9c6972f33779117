#![allow(dead_code)]

use vault_flow::Protocol;
use vault_flow::access::Role;
use vault_flow::engine::clock::SimClock;
use vault_flow::engine::harvest::DoHardWork;
use vault_flow::engine::{StrategyConfig, VaultConfig};
use vault_flow::math::WAD;
use vault_flow::model::{AllocationMode, AssetInfo, StrategyFees, StrategyId, VaultFees};
use vault_flow::oracle::StaticOracle;
use vault_flow::strategy::{SimulatedSource, SimulatedSourceConfig, StrategyKind};

// ── Accounts and units ───────────────────────────────────────────────

pub const ADMIN: &str = "admin";
pub const KEEPER: &str = "keeper";
pub const GUARDIAN: &str = "guardian";
pub const CURATOR: &str = "curator";
pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";
pub const CAROL: &str = "carol";

pub const START: u64 = 1_700_000_000;
pub const DAY: u64 = 86_400;
pub const YEAR: u64 = 365 * DAY;

/// One whole USDC in base units.
pub const USDC: u128 = 1_000_000;
pub const VAULT: &str = "stable";

// ── Fixture ──────────────────────────────────────────────────────────

pub struct Fixture {
    pub protocol: Protocol,
    pub clock: SimClock,
    pub oracle: StaticOracle,
    pub strategies: Vec<StrategyId>,
}

pub struct StrategySetup {
    pub kind: StrategyKind,
    pub fees: StrategyFees,
    pub source: SimulatedSourceConfig,
}

impl Default for StrategySetup {
    fn default() -> Self {
        Self {
            kind: StrategyKind::Atomic,
            fees: StrategyFees::default(),
            source: SimulatedSourceConfig::default(),
        }
    }
}

impl StrategySetup {
    pub fn with_kind(kind: StrategyKind, source: SimulatedSourceConfig) -> Self {
        Self {
            kind,
            source,
            ..Default::default()
        }
    }
}

/// Protocol with USDC at $1, a keeper holding the harvest and reallocation
/// roles, a guardian holding the pause and emergency roles, and one
/// strategy per entry of `setups`.
pub fn protocol_with(setups: Vec<StrategySetup>) -> Fixture {
    let clock = SimClock::new(START);
    let oracle = StaticOracle::new();
    oracle.set_rate("USDC", WAD);
    let mut protocol = Protocol::new(ADMIN, Box::new(oracle.clone()), Box::new(clock.clone()));

    protocol
        .register_asset(
            ADMIN,
            AssetInfo {
                symbol: "USDC".to_string(),
                decimals: 6,
            },
        )
        .unwrap();
    let group = protocol.register_asset_group(ADMIN, vec!["USDC".to_string()]).unwrap();
    for role in [Role::DoHardWorker, Role::Reallocator] {
        protocol.grant_role(ADMIN, role, KEEPER).unwrap();
    }
    for role in [Role::Pauser, Role::EmergencyWithdrawer] {
        protocol.grant_role(ADMIN, role, GUARDIAN).unwrap();
    }

    let strategies = setups
        .into_iter()
        .enumerate()
        .map(|(i, setup)| {
            protocol
                .register_strategy(
                    ADMIN,
                    StrategyConfig {
                        name: format!("lender-{i}"),
                        asset_group: group,
                        kind: setup.kind,
                        fees: setup.fees,
                        risk_score: 1,
                    },
                    Box::new(SimulatedSource::new(1, setup.source)),
                )
                .unwrap()
        })
        .collect();

    Fixture {
        protocol,
        clock,
        oracle,
        strategies,
    }
}

/// `count` atomic fee-free strategies.
pub fn protocol(count: usize) -> Fixture {
    protocol_with((0..count).map(|_| StrategySetup::default()).collect())
}

impl Fixture {
    /// Open `VAULT` over every strategy with a static split.
    pub fn vault(&mut self, allocation: &[u16], fees: VaultFees) {
        self.vault_named(VAULT, allocation, fees);
    }

    pub fn vault_named(&mut self, id: &str, allocation: &[u16], fees: VaultFees) {
        self.protocol
            .create_vault(
                CURATOR,
                VaultConfig {
                    id: id.to_string(),
                    strategies: self.strategies.clone(),
                    allocation: Some(allocation.to_vec()),
                    provider: None,
                    mode: AllocationMode::Dynamic,
                    fees,
                },
            )
            .unwrap();
    }

    pub fn fund(&mut self, account: &str, whole_usdc: u128) {
        self.protocol.fund_account(account, "USDC", whole_usdc * USDC).unwrap();
    }

    pub fn harvest_all(&mut self) {
        self.protocol
            .do_hard_work(KEEPER, &DoHardWork::new(self.strategies.clone()))
            .unwrap();
    }

    pub fn harvest_with_yields(&mut self, base_yields: Vec<i128>) {
        let request = DoHardWork {
            base_yields,
            ..DoHardWork::new(self.strategies.clone())
        };
        self.protocol.do_hard_work(KEEPER, &request).unwrap();
    }

    /// Deposit, flush, harvest, sync and claim in one go. Returns the vault
    /// shares the account received.
    pub fn deposit_and_settle(&mut self, account: &str, whole_usdc: u128) -> u128 {
        let before = self.protocol.vault_shares(VAULT, account).unwrap();
        self.protocol.deposit(account, VAULT, &[whole_usdc * USDC]).unwrap();
        self.protocol.flush(VAULT).unwrap();
        self.harvest_all();
        self.protocol.sync_vault(VAULT).unwrap();
        self.protocol.claim_all(account, VAULT).unwrap();
        self.protocol.vault_shares(VAULT, account).unwrap() - before
    }

    pub fn usdc(&self, account: &str) -> u128 {
        self.protocol.balance(account, "USDC")
    }

    pub fn holdings(&self, slot: usize) -> u128 {
        self.protocol.source(self.strategies[slot]).unwrap().assets()[0]
    }
}

/// Assert `a` and `b` differ by at most `tolerance`.
pub fn assert_close(a: u128, b: u128, tolerance: u128) {
    assert!(a.abs_diff(b) <= tolerance, "{a} and {b} differ by more than {tolerance}");
}

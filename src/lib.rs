//! Multi-strategy yield vault accounting and settlement.
//!
//! Users deposit into vaults; vault capital is split across strategies that
//! wrap external yield sources. Requests are batched per vault, flushed into
//! strategy harvest rounds, netted, and settled back into vault shares and
//! claimable assets.

pub mod access;
pub mod batch;
pub mod engine;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod math;
pub mod model;
pub mod oracle;
pub mod scenario;
pub mod store;
pub mod strategy;
pub mod validate;
pub mod vault;

pub use engine::Protocol;
pub use error::{VaultError, VaultResult};

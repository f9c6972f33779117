use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::model::AccountId;

/// Roles checked by privileged entry points.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Registers assets and strategies, grants roles, removes strategies.
    Admin,
    /// Triggers harvest rounds and continuations.
    DoHardWorker,
    /// Triggers reallocation.
    Reallocator,
    /// Toggles the global pause switch.
    Pauser,
    /// Receives assets force-exited from removed strategies.
    EmergencyWithdrawer,
}

/// Minimal role registry. Administration beyond grant/revoke lives elsewhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessControl {
    roles: BTreeMap<Role, BTreeSet<AccountId>>,
}

impl AccessControl {
    pub fn with_admin(admin: &str) -> Self {
        let mut access = Self::default();
        access.insert(Role::Admin, admin);
        access
    }

    pub fn has_role(&self, role: Role, account: &str) -> bool {
        self.roles
            .get(&role)
            .is_some_and(|members| members.contains(account))
    }

    pub fn ensure(&self, role: Role, account: &str) -> VaultResult<()> {
        if !self.has_role(role, account) {
            return Err(VaultError::MissingRole {
                account: account.to_string(),
                role,
            });
        }
        Ok(())
    }

    pub fn grant(&mut self, caller: &str, role: Role, account: &str) -> VaultResult<()> {
        self.ensure(Role::Admin, caller)?;
        self.insert(role, account);
        Ok(())
    }

    pub fn revoke(&mut self, caller: &str, role: Role, account: &str) -> VaultResult<()> {
        self.ensure(Role::Admin, caller)?;
        if let Some(members) = self.roles.get_mut(&role) {
            members.remove(account);
        }
        Ok(())
    }

    /// First member of `role`, used to resolve single-holder roles.
    pub fn first_member(&self, role: Role) -> Option<&AccountId> {
        self.roles.get(&role).and_then(|members| members.iter().next())
    }

    fn insert(&mut self, role: Role, account: &str) {
        self.roles
            .entry(role)
            .or_default()
            .insert(account.to_string());
    }
}

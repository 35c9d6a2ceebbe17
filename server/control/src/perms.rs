use std::collections::HashMap;

use parking_lot::RwLock;

use crate::errors::{ControlError, ControlResult};
use crate::ids::UserId;

/// A member's privilege level within a group. Ordering matters: higher
/// variants outrank lower ones in both permission checks and moderation
/// tie-breaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Role {
    #[default]
    Default = 0,
    Operator = 1,
    Administrator = 2,
}

/// Named-permission table for one group: which role a permission requires,
/// and which role each member currently holds.
///
/// Mirrors `qls::GroupPermission` from the original implementation — two
/// independently locked maps so a permission-table edit never blocks a
/// member's role lookup.
#[derive(Default)]
pub struct GroupPermission {
    permissions: RwLock<HashMap<String, Role>>,
    user_roles: RwLock<HashMap<UserId, Role>>,
}

impl GroupPermission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a permission's required role.
    pub fn define(&self, perm: &str, required: Role) {
        self.permissions.write().insert(perm.to_string(), required);
    }

    /// Remove a permission definition. Fails with `NoPermission` if unknown.
    pub fn remove(&self, perm: &str) -> ControlResult<()> {
        let mut table = self.permissions.write();
        if table.remove(perm).is_none() {
            return Err(ControlError::NoPermission(perm.to_string()));
        }
        Ok(())
    }

    /// Upsert a member's granted role.
    pub fn set_user_role(&self, user: UserId, role: Role) {
        self.user_roles.write().insert(user, role);
    }

    pub fn remove_user(&self, user: UserId) -> ControlResult<()> {
        let mut table = self.user_roles.write();
        if table.remove(&user).is_none() {
            return Err(ControlError::UserNotExisted(user.get()));
        }
        Ok(())
    }

    pub fn user_role(&self, user: UserId) -> ControlResult<Role> {
        self.user_roles
            .read()
            .get(&user)
            .copied()
            .ok_or(ControlError::UserNotExisted(user.get()))
    }

    /// `granted_role(u) >= required_role(perm)`. Both the user and the
    /// permission must be registered.
    pub fn user_has(&self, user: UserId, perm: &str) -> ControlResult<bool> {
        let granted = self.user_role(user)?;
        let required = self
            .permissions
            .read()
            .get(perm)
            .copied()
            .ok_or_else(|| ControlError::NoPermission(perm.to_string()))?;
        Ok(granted >= required)
    }

    /// Stable only while the caller effectively holds a read lock over the
    /// whole table — callers must not interleave writes with iteration of
    /// the returned vector if they need a frozen snapshot.
    pub fn list_by_role(&self, role: Role) -> Vec<UserId> {
        self.user_roles
            .read()
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(u, _)| *u)
            .collect()
    }

    pub fn default_users(&self) -> Vec<UserId> {
        self.list_by_role(Role::Default)
    }

    pub fn operators(&self) -> Vec<UserId> {
        self.list_by_role(Role::Operator)
    }

    pub fn administrators(&self) -> Vec<UserId> {
        self.list_by_role(Role::Administrator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering() {
        assert!(Role::Administrator > Role::Operator);
        assert!(Role::Operator > Role::Default);
    }

    #[test]
    fn user_has_requires_both_registered() {
        let perms = GroupPermission::new();
        let u = UserId(1);
        assert_eq!(
            perms.user_has(u, "kick"),
            Err(ControlError::UserNotExisted(1))
        );

        perms.set_user_role(u, Role::Operator);
        assert_eq!(
            perms.user_has(u, "kick"),
            Err(ControlError::NoPermission("kick".to_string()))
        );

        perms.define("kick", Role::Operator);
        assert_eq!(perms.user_has(u, "kick"), Ok(true));

        perms.define("ban", Role::Administrator);
        assert_eq!(perms.user_has(u, "ban"), Ok(false));
    }

    #[test]
    fn remove_unknown_permission_fails() {
        let perms = GroupPermission::new();
        assert_eq!(
            perms.remove("nope"),
            Err(ControlError::NoPermission("nope".to_string()))
        );
    }

    #[test]
    fn list_by_role_filters() {
        let perms = GroupPermission::new();
        perms.set_user_role(UserId(1), Role::Operator);
        perms.set_user_role(UserId(2), Role::Operator);
        perms.set_user_role(UserId(3), Role::Administrator);

        let mut ops = perms.operators();
        ops.sort();
        assert_eq!(ops, vec![UserId(1), UserId(2)]);
        assert_eq!(perms.administrators(), vec![UserId(3)]);
    }
}

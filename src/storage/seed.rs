//! Default role and permission reference data

use super::traits::{CredentialStore, StoreResult};
use crate::constants::{ROLE_ADMIN, ROLE_AUDITOR, ROLE_EDITOR, ROLE_USER};

pub const DEFAULT_ROLES: &[(&str, &str)] = &[
    (ROLE_ADMIN, "Full access to all resources and administrative functions."),
    (ROLE_EDITOR, "Can modify feature flags and configurations."),
    (ROLE_AUDITOR, "Read-only access to audit logs and system status."),
    (ROLE_USER, "Can read feature flags and config, but not modify."),
];

pub const DEFAULT_PERMISSIONS: &[(&str, &str)] = &[
    ("flags:read", "Read feature flags and configuration."),
    ("flags:write", "Create and update feature flags."),
    ("flags:delete", "Delete feature flags."),
    ("users:manage", "Provision and inspect user accounts."),
    ("audit:read", "Read audit logs and system status."),
];

pub const DEFAULT_ROLE_PERMISSIONS: &[(&str, &str)] = &[
    (ROLE_ADMIN, "flags:read"),
    (ROLE_ADMIN, "flags:write"),
    (ROLE_ADMIN, "flags:delete"),
    (ROLE_ADMIN, "users:manage"),
    (ROLE_ADMIN, "audit:read"),
    (ROLE_EDITOR, "flags:read"),
    (ROLE_EDITOR, "flags:write"),
    (ROLE_AUDITOR, "flags:read"),
    (ROLE_AUDITOR, "audit:read"),
    (ROLE_USER, "flags:read"),
];

/// Inserts the default roles, permissions and mappings. Safe to run repeatedly.
pub async fn seed_defaults(store: &dyn CredentialStore) -> StoreResult<()> {
    for (name, description) in DEFAULT_ROLES {
        store.upsert_role(name, description).await?;
    }
    for (name, description) in DEFAULT_PERMISSIONS {
        store.upsert_permission(name, description).await?;
    }
    for (role, permission) in DEFAULT_ROLE_PERMISSIONS {
        store.grant_permission(role, permission).await?;
    }
    log::info!(
        "Seeded {} roles, {} permissions",
        DEFAULT_ROLES.len(),
        DEFAULT_PERMISSIONS.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryCredentialStore;

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = MemoryCredentialStore::new();
        seed_defaults(&store).await.unwrap();
        seed_defaults(&store).await.unwrap();

        let roles = store.list_roles().await.unwrap();
        assert_eq!(roles.len(), DEFAULT_ROLES.len());
        assert_eq!(
            store.permissions_of(ROLE_EDITOR).await.unwrap(),
            vec!["flags:read", "flags:write"]
        );
        assert_eq!(store.permissions_of(ROLE_ADMIN).await.unwrap().len(), 5);
    }
}

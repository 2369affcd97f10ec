//! In-memory credential store for development and testing
//!
//! Keeps the relational layout of the SQL schema (identities, roles,
//! permissions, and two link tables) behind one lock, so every query
//! observes a consistent snapshot.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::traits::*;
use crate::error::StoreError;

#[derive(Default)]
struct Tables {
    identities: HashMap<String, Identity>,
    /// lowercase email -> identity id
    email_index: HashMap<String, String>,
    roles: HashMap<i64, Role>,
    permissions: HashMap<i64, Permission>,
    /// (identity id, role id)
    role_assignments: BTreeSet<(String, i64)>,
    /// (role id, permission id)
    role_permissions: BTreeSet<(i64, i64)>,
    next_role_id: i64,
    next_permission_id: i64,
}

impl Tables {
    fn role_id(&self, name: &str) -> Option<i64> {
        self.roles.values().find(|r| r.name == name).map(|r| r.id)
    }

    fn permission_id(&self, name: &str) -> Option<i64> {
        self.permissions.values().find(|p| p.name == name).map(|p| p.id)
    }
}

/// In-memory credential store
pub struct MemoryCredentialStore {
    tables: Arc<RwLock<Tables>>,
    latency: Option<Duration>,
    offline: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables {
                next_role_id: 1,
                next_permission_id: 1,
                ..Tables::default()
            })),
            latency: None,
            offline: AtomicBool::new(false),
        }
    }

    /// Delay every query by `latency`, simulating a slow backend
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every query fail with `Unavailable` until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    async fn before_query(&self) -> StoreResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        self.before_query().await?;
        let tables = self.tables.read().await;
        Ok(tables
            .email_index
            .get(&email.to_lowercase())
            .and_then(|id| tables.identities.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Identity>> {
        self.before_query().await?;
        Ok(self.tables.read().await.identities.get(id).cloned())
    }

    async fn roles_of(&self, identity_id: &str) -> StoreResult<Vec<String>> {
        self.before_query().await?;
        let tables = self.tables.read().await;
        let mut names: Vec<String> = tables
            .role_assignments
            .iter()
            .filter(|(user_id, _)| user_id == identity_id)
            .filter_map(|(_, role_id)| tables.roles.get(role_id))
            .map(|role| role.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn permissions_of(&self, role: &str) -> StoreResult<Vec<String>> {
        self.before_query().await?;
        let tables = self.tables.read().await;
        let Some(role_id) = tables.role_id(role) else {
            return Ok(Vec::new());
        };
        let mut names: Vec<String> = tables
            .role_permissions
            .iter()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, perm_id)| tables.permissions.get(perm_id))
            .map(|perm| perm.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn create_identity(&self, new_identity: NewIdentity) -> StoreResult<Identity> {
        self.before_query().await?;
        let mut tables = self.tables.write().await;
        let email_key = new_identity.email.to_lowercase();
        if tables.email_index.contains_key(&email_key) {
            return Err(StoreError::Conflict(format!(
                "identity with email {} already exists",
                new_identity.email
            )));
        }

        let now = Utc::now();
        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            email: new_identity.email,
            name: new_identity.name,
            password_hash: new_identity.password_hash,
            activated: false,
            created_at: now,
            updated_at: now,
        };
        tables.email_index.insert(email_key, identity.id.clone());
        tables.identities.insert(identity.id.clone(), identity.clone());
        Ok(identity)
    }

    async fn update_password_hash(
        &self,
        id: &str,
        expected_hash: &str,
        new_hash: &str,
    ) -> StoreResult<()> {
        self.before_query().await?;
        let mut tables = self.tables.write().await;
        let identity = tables
            .identities
            .get_mut(id)
            .ok_or_else(|| StoreError::Query(format!("identity {} does not exist", id)))?;
        if identity.password_hash != expected_hash {
            return Err(StoreError::Conflict("password hash changed concurrently".to_string()));
        }
        identity.password_hash = new_hash.to_string();
        identity.activated = true;
        identity.updated_at = Utc::now();
        Ok(())
    }

    async fn rename_identity(&self, id: &str, name: &str) -> StoreResult<Option<Identity>> {
        self.before_query().await?;
        let mut tables = self.tables.write().await;
        Ok(tables.identities.get_mut(id).map(|identity| {
            identity.name = name.to_string();
            identity.updated_at = Utc::now();
            identity.clone()
        }))
    }

    async fn delete_identity(&self, id: &str) -> StoreResult<bool> {
        self.before_query().await?;
        let mut tables = self.tables.write().await;
        let Some(identity) = tables.identities.remove(id) else {
            return Ok(false);
        };
        tables.email_index.remove(&identity.email.to_lowercase());
        tables.role_assignments.retain(|(user_id, _)| user_id != id);
        Ok(true)
    }

    async fn assign_role(&self, identity_id: &str, role: &str) -> StoreResult<()> {
        self.before_query().await?;
        let mut tables = self.tables.write().await;
        if !tables.identities.contains_key(identity_id) {
            return Err(StoreError::Query(format!("identity {} does not exist", identity_id)));
        }
        let role_id = tables
            .role_id(role)
            .ok_or_else(|| StoreError::Query(format!("role {} does not exist", role)))?;
        tables.role_assignments.insert((identity_id.to_string(), role_id));
        Ok(())
    }

    async fn revoke_role(&self, identity_id: &str, role: &str) -> StoreResult<()> {
        self.before_query().await?;
        let mut tables = self.tables.write().await;
        if let Some(role_id) = tables.role_id(role) {
            tables.role_assignments.remove(&(identity_id.to_string(), role_id));
        }
        Ok(())
    }

    async fn list_identities(&self) -> StoreResult<Vec<Identity>> {
        self.before_query().await?;
        let mut identities: Vec<Identity> =
            self.tables.read().await.identities.values().cloned().collect();
        identities.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(identities)
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        self.before_query().await?;
        let mut roles: Vec<Role> = self.tables.read().await.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn upsert_role(&self, name: &str, description: &str) -> StoreResult<Role> {
        self.before_query().await?;
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.roles.values().find(|r| r.name == name) {
            return Ok(existing.clone());
        }
        let role = Role {
            id: tables.next_role_id,
            public_id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
        };
        tables.next_role_id += 1;
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn upsert_permission(&self, name: &str, description: &str) -> StoreResult<Permission> {
        self.before_query().await?;
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.permissions.values().find(|p| p.name == name) {
            return Ok(existing.clone());
        }
        let permission = Permission {
            id: tables.next_permission_id,
            name: name.to_string(),
            description: description.to_string(),
        };
        tables.next_permission_id += 1;
        tables.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn grant_permission(&self, role: &str, permission: &str) -> StoreResult<()> {
        self.before_query().await?;
        let mut tables = self.tables.write().await;
        let role_id = tables
            .role_id(role)
            .ok_or_else(|| StoreError::Query(format!("role {} does not exist", role)))?;
        let permission_id = tables
            .permission_id(permission)
            .ok_or_else(|| StoreError::Query(format!("permission {} does not exist", permission)))?;
        tables.role_permissions.insert((role_id, permission_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_identity(email: &str) -> NewIdentity {
        NewIdentity {
            email: email.to_string(),
            name: "Test".to_string(),
            password_hash: "hash-0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_identity_lookup_is_case_insensitive() {
        let store = MemoryCredentialStore::new();
        let created = store.create_identity(new_identity("Alice@Example.com")).await.unwrap();
        let found = store.find_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(!found.activated);
        assert!(store.find_by_id(&created.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryCredentialStore::new();
        store.create_identity(new_identity("a@b.com")).await.unwrap();
        let err = store.create_identity(new_identity("A@B.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_role_and_permission_joins() {
        let store = MemoryCredentialStore::new();
        let user = store.create_identity(new_identity("a@b.com")).await.unwrap();
        store.upsert_role("editor", "Edits flags").await.unwrap();
        store.upsert_role("admin", "Everything").await.unwrap();
        store.upsert_permission("flags:write", "").await.unwrap();
        store.upsert_permission("flags:read", "").await.unwrap();
        store.grant_permission("editor", "flags:write").await.unwrap();
        store.grant_permission("editor", "flags:read").await.unwrap();
        store.assign_role(&user.id, "editor").await.unwrap();
        store.assign_role(&user.id, "editor").await.unwrap();

        assert_eq!(store.roles_of(&user.id).await.unwrap(), vec!["editor"]);
        assert_eq!(
            store.permissions_of("editor").await.unwrap(),
            vec!["flags:read", "flags:write"]
        );
        assert!(store.permissions_of("admin").await.unwrap().is_empty());
        assert!(store.roles_of("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_role_is_idempotent() {
        let store = MemoryCredentialStore::new();
        let first = store.upsert_role("admin", "a").await.unwrap();
        let second = store.upsert_role("admin", "b").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_roles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_password_update_is_compare_and_set() {
        let store = MemoryCredentialStore::new();
        let user = store.create_identity(new_identity("a@b.com")).await.unwrap();
        store.update_password_hash(&user.id, "hash-0", "hash-1").await.unwrap();
        let err = store
            .update_password_hash(&user.id, "hash-0", "hash-2")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let found = store.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(found.password_hash, "hash-1");
        assert!(found.activated);
    }

    #[tokio::test]
    async fn test_delete_identity_frees_email_and_assignments() {
        let store = MemoryCredentialStore::new();
        store.upsert_role("user", "").await.unwrap();
        let user = store.create_identity(new_identity("a@b.com")).await.unwrap();
        store.assign_role(&user.id, "user").await.unwrap();

        assert!(store.delete_identity(&user.id).await.unwrap());
        assert!(!store.delete_identity(&user.id).await.unwrap());
        assert!(store.roles_of(&user.id).await.unwrap().is_empty());
        store.create_identity(new_identity("a@b.com")).await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_store_reports_unavailable() {
        let store = MemoryCredentialStore::new();
        store.set_offline(true);
        let err = store.find_by_email("a@b.com").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        store.set_offline(false);
        assert!(store.find_by_email("a@b.com").await.unwrap().is_none());
    }
}

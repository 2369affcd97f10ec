//! Abstract credential store interface
//!
//! Identities, roles, permissions and the two many-to-many relations between
//! them. Role and permission lookups are join queries answered fresh on every
//! call; implementations must not cache them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Runs a store call under `limit`. The inner future is dropped, and its work
/// cancelled, when the deadline passes.
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(StoreError::Timeout))
}

/// A principal capable of authenticating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub activated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when provisioning an identity
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

/// Named capability bundle; static reference data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "id")]
    pub public_id: String,
    pub name: String,
    pub description: String,
}

/// Fine-grained capability attached to roles; static reference data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// Credential store interface
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up an identity by email (case-insensitive)
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Identity>>;

    /// Look up an identity by id
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Identity>>;

    /// Role names assigned to an identity, sorted. Unknown identities have none.
    async fn roles_of(&self, identity_id: &str) -> StoreResult<Vec<String>>;

    /// Permission names granted to a role, sorted. Unknown roles have none.
    async fn permissions_of(&self, role: &str) -> StoreResult<Vec<String>>;

    /// Insert a new, not yet activated identity. Fails with `Conflict` on duplicate email.
    async fn create_identity(&self, new_identity: NewIdentity) -> StoreResult<Identity>;

    /// Replace the password hash if it still equals `expected_hash`, marking the
    /// identity activated. Fails with `Conflict` when the hash changed underneath.
    async fn update_password_hash(
        &self,
        id: &str,
        expected_hash: &str,
        new_hash: &str,
    ) -> StoreResult<()>;

    /// Change the display name. `None` when the identity does not exist.
    async fn rename_identity(&self, id: &str, name: &str) -> StoreResult<Option<Identity>>;

    /// Remove an identity and its role assignments. Returns whether it existed.
    async fn delete_identity(&self, id: &str) -> StoreResult<bool>;

    /// Assign a role by name. Idempotent.
    async fn assign_role(&self, identity_id: &str, role: &str) -> StoreResult<()>;

    /// Remove a role assignment. Idempotent.
    async fn revoke_role(&self, identity_id: &str, role: &str) -> StoreResult<()>;

    /// All identities, ordered by email
    async fn list_identities(&self) -> StoreResult<Vec<Identity>>;

    /// All roles, ordered by name
    async fn list_roles(&self) -> StoreResult<Vec<Role>>;

    /// Insert a role if no role with that name exists
    async fn upsert_role(&self, name: &str, description: &str) -> StoreResult<Role>;

    /// Insert a permission if no permission with that name exists
    async fn upsert_permission(&self, name: &str, description: &str) -> StoreResult<Permission>;

    /// Grant a permission to a role. Idempotent.
    async fn grant_permission(&self, role: &str, permission: &str) -> StoreResult<()>;
}

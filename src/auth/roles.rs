//! Role and permission resolution
//!
//! Every lookup goes to the store; role changes are visible on the next call.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::storage::{with_deadline, CredentialStore, StoreResult};

#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn CredentialStore>,
    operation_timeout: Duration,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn CredentialStore>, operation_timeout: Duration) -> Self {
        Self {
            store,
            operation_timeout,
        }
    }

    /// Role names held by an identity. Unknown identities hold none.
    pub async fn roles_for_user(&self, identity_id: &str) -> StoreResult<Vec<String>> {
        with_deadline(self.operation_timeout, self.store.roles_of(identity_id)).await
    }

    /// Permission names granted to a role. Unknown roles grant none.
    pub async fn permissions_for_role(&self, role: &str) -> StoreResult<Vec<String>> {
        with_deadline(self.operation_timeout, self.store.permissions_of(role)).await
    }

    /// Union of the permissions of every role the identity holds, sorted
    pub async fn permissions_for_user(&self, identity_id: &str) -> StoreResult<Vec<String>> {
        let mut permissions = BTreeSet::new();
        for role in self.roles_for_user(identity_id).await? {
            permissions.extend(self.permissions_for_role(&role).await?);
        }
        Ok(permissions.into_iter().collect())
    }
}

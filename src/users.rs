//! User provisioning and lookup
//!
//! Admins create identities here. A new identity receives a generated
//! temporary password, returned exactly once, which the user exchanges for a
//! permanent one through activation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::password::{generate_temp_password, validate_email, CredentialHasher};
use crate::auth::roles::RoleResolver;
use crate::auth::token::Claims;
use crate::constants::ROLE_ADMIN;
use crate::error::{FlagGateError, Result, StoreError};
use crate::security_logger::{SecurityEvent, SecurityLogger};
use crate::storage::{with_deadline, CredentialStore, Identity, NewIdentity};

/// Identity as shown to API callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub name: String,
    pub activated: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserView {
    fn new(identity: Identity, roles: Vec<String>) -> Self {
        Self {
            id: identity.id,
            email: identity.email,
            name: identity.name,
            activated: identity.activated,
            roles,
            created_at: identity.created_at,
            updated_at: identity.updated_at,
        }
    }
}

/// Result of provisioning; the only place the temporary password appears
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedUser {
    pub user: UserView,
    pub temporary_password: String,
}

/// Roles and resolved permissions of the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolesView {
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

pub struct UserService {
    store: Arc<dyn CredentialStore>,
    hasher: CredentialHasher,
    roles: RoleResolver,
    security: Arc<SecurityLogger>,
    operation_timeout: Duration,
}

impl UserService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: CredentialHasher,
        security: Arc<SecurityLogger>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            roles: RoleResolver::new(store.clone(), operation_timeout),
            store,
            hasher,
            security,
            operation_timeout,
        }
    }

    /// Creates a not yet activated identity holding `roles`
    pub async fn create_user(
        &self,
        actor: &str,
        email: &str,
        name: &str,
        roles: &[String],
    ) -> Result<ProvisionedUser> {
        validate_email(email)?;
        self.ensure_roles_exist(roles).await?;

        let temporary_password = generate_temp_password();
        let hasher = self.hasher.clone();
        let password = temporary_password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| FlagGateError::Internal(format!("password hashing task failed: {}", e)))??;

        let name = if name.trim().is_empty() {
            email.split('@').next().unwrap_or(email).to_string()
        } else {
            name.trim().to_string()
        };
        let identity = match self
            .deadline(self.store.create_identity(NewIdentity {
                email: email.to_string(),
                name,
                password_hash,
            }))
            .await
        {
            Ok(identity) => identity,
            Err(StoreError::Conflict(_)) => {
                return Err(FlagGateError::Validation(
                    "a user with this email already exists".to_string(),
                ))
            }
            Err(err) => return Err(err.into()),
        };

        for role in roles {
            if let Err(err) = self.deadline(self.store.assign_role(&identity.id, role)).await {
                // the temporary password is never returned, so the identity is unusable
                if let Err(cleanup) = self.deadline(self.store.delete_identity(&identity.id)).await {
                    log::error!(
                        "Failed to roll back partially provisioned user {}: {}",
                        identity.id,
                        cleanup
                    );
                }
                return Err(err.into());
            }
        }

        self.security
            .log_event(SecurityEvent::IdentityProvisioned {
                user_id: identity.id.clone(),
                by: actor.to_string(),
            })
            .await;

        let roles = self.roles.roles_for_user(&identity.id).await?;
        Ok(ProvisionedUser {
            user: UserView::new(identity, roles),
            temporary_password,
        })
    }

    pub async fn get_user(&self, id: &str) -> Result<UserView> {
        let identity = self
            .deadline(self.store.find_by_id(id))
            .await?
            .ok_or_else(|| FlagGateError::NotFound(format!("user {}", id)))?;
        let roles = self.roles.roles_for_user(&identity.id).await?;
        Ok(UserView::new(identity, roles))
    }

    pub async fn list_users(&self) -> Result<Vec<UserView>> {
        let identities = self.deadline(self.store.list_identities()).await?;
        let mut users = Vec::with_capacity(identities.len());
        for identity in identities {
            let roles = self.roles.roles_for_user(&identity.id).await?;
            users.push(UserView::new(identity, roles));
        }
        Ok(users)
    }

    /// Renames an identity and, when `roles` is given, replaces its role set
    pub async fn update_user(
        &self,
        id: &str,
        name: Option<&str>,
        roles: Option<&[String]>,
    ) -> Result<UserView> {
        if self.deadline(self.store.find_by_id(id)).await?.is_none() {
            return Err(FlagGateError::NotFound(format!("user {}", id)));
        }
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            self.deadline(self.store.rename_identity(id, name)).await?;
        }
        if let Some(wanted) = roles {
            self.ensure_roles_exist(wanted).await?;
            let held = self.roles.roles_for_user(id).await?;
            for role in held.iter().filter(|r| !wanted.contains(r)) {
                self.deadline(self.store.revoke_role(id, role)).await?;
            }
            for role in wanted.iter().filter(|r| !held.contains(r)) {
                self.deadline(self.store.assign_role(id, role)).await?;
            }
        }
        self.get_user(id).await
    }

    pub async fn delete_user(&self, id: &str) -> Result<()> {
        if self.deadline(self.store.delete_identity(id)).await? {
            log::info!("Deleted user {}", id);
            Ok(())
        } else {
            Err(FlagGateError::NotFound(format!("user {}", id)))
        }
    }

    /// The identity behind a verified token
    pub async fn me(&self, claims: &Claims) -> Result<UserView> {
        self.get_user(&claims.sub).await
    }

    /// Current roles of the caller and the permissions they grant.
    ///
    /// Read from the store, so this may differ from the roles in the token.
    pub async fn me_roles(&self, claims: &Claims) -> Result<RolesView> {
        Ok(RolesView {
            roles: self.roles.roles_for_user(&claims.sub).await?,
            permissions: self.roles.permissions_for_user(&claims.sub).await?,
        })
    }

    /// Makes sure `email` exists and holds the admin role.
    ///
    /// Returns the temporary password when a new identity had to be created.
    pub async fn bootstrap_admin(&self, email: &str) -> Result<Option<String>> {
        if let Some(existing) = self.deadline(self.store.find_by_email(email)).await? {
            self.deadline(self.store.assign_role(&existing.id, ROLE_ADMIN))
                .await?;
            log::info!("Bootstrap admin {} already exists", email);
            return Ok(None);
        }
        let provisioned = self
            .create_user("bootstrap", email, "", &[ROLE_ADMIN.to_string()])
            .await?;
        Ok(Some(provisioned.temporary_password))
    }

    async fn ensure_roles_exist(&self, roles: &[String]) -> Result<()> {
        if roles.is_empty() {
            return Ok(());
        }
        let known = self.deadline(self.store.list_roles()).await?;
        if let Some(unknown) = roles.iter().find(|r| !known.iter().any(|k| &k.name == *r)) {
            return Err(FlagGateError::Validation(format!("unknown role '{}'", unknown)));
        }
        Ok(())
    }

    async fn deadline<T>(
        &self,
        fut: impl std::future::Future<Output = std::result::Result<T, StoreError>>,
    ) -> std::result::Result<T, StoreError> {
        with_deadline(self.operation_timeout, fut).await
    }
}

//! Login, refresh and activation
//!
//! There is no server-side session table. A [`TokenPair`] is the whole session:
//! the access token authorizes calls until it expires, and the refresh token
//! buys a new pair until it expires in turn. Refreshing does not revoke the
//! previous pair.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::password::{validate_email, validate_password, CredentialHasher};
use crate::auth::roles::RoleResolver;
use crate::auth::token::{token_fingerprint, TokenCodec, TokenKind};
use crate::constants::{AUTH_MIN_DURATION_MS, BASELINE_ROLE};
use crate::error::{AuthFailure, FlagGateError, Result, StoreError};
use crate::security::AuthTimer;
use crate::security_logger::{SecurityEvent, SecurityLogger};
use crate::storage::{with_deadline, CredentialStore, Identity};

/// Credentials handed to a client after login, refresh or activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Remaining lifetime of the access token, in seconds
    pub expires_in: i64,
}

pub struct TokenLifecycle {
    store: Arc<dyn CredentialStore>,
    codec: Arc<TokenCodec>,
    hasher: CredentialHasher,
    roles: RoleResolver,
    security: Arc<SecurityLogger>,
    operation_timeout: Duration,
    min_auth_duration: Duration,
    /// Verified against when the email is unknown, so both paths cost one argon2 run
    dummy_hash: String,
}

impl TokenLifecycle {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        codec: Arc<TokenCodec>,
        hasher: CredentialHasher,
        security: Arc<SecurityLogger>,
        operation_timeout: Duration,
    ) -> Result<Self> {
        let dummy_hash = hasher.hash(&uuid::Uuid::new_v4().to_string())?;
        Ok(Self {
            roles: RoleResolver::new(store.clone(), operation_timeout),
            store,
            codec,
            hasher,
            security,
            operation_timeout,
            min_auth_duration: Duration::from_millis(AUTH_MIN_DURATION_MS),
            dummy_hash,
        })
    }

    /// Overrides the floor applied to login and activation latency
    pub fn with_min_auth_duration(mut self, min_auth_duration: Duration) -> Self {
        self.min_auth_duration = min_auth_duration;
        self
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Exchanges email and password for a fresh token pair.
    ///
    /// An unknown email, a wrong password and a not yet activated account all
    /// produce the same `Authentication` error after the same minimum delay.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair> {
        if email.trim().is_empty() {
            return Err(FlagGateError::Validation("email must be provided".to_string()));
        }
        if password.is_empty() {
            return Err(FlagGateError::Validation("password must be provided".to_string()));
        }

        let timer = AuthTimer::new(self.min_auth_duration);
        let outcome = self.login_checked(email, password).await;
        timer.wait().await;

        match &outcome {
            Ok((identity, _)) => {
                self.security
                    .log_event(SecurityEvent::AuthenticationSuccess {
                        user_id: identity.id.clone(),
                    })
                    .await;
            }
            Err(FlagGateError::Store(err)) => {
                self.security
                    .log_event(SecurityEvent::StoreFailure {
                        operation: "login".to_string(),
                        error: err.to_string(),
                    })
                    .await;
            }
            Err(err) => {
                self.security
                    .log_event(SecurityEvent::AuthenticationFailed {
                        email: Some(email.to_string()),
                        reason: err.to_string(),
                    })
                    .await;
            }
        }
        outcome.map(|(_, pair)| pair)
    }

    async fn login_checked(&self, email: &str, password: &str) -> Result<(Identity, TokenPair)> {
        let Some(identity) = self.lookup(email).await? else {
            self.verify_password(password, &self.dummy_hash).await?;
            return Err(AuthFailure::UserNotFound.into());
        };
        if !self.verify_password(password, &identity.password_hash).await? {
            return Err(AuthFailure::InvalidCredential.into());
        }
        if !identity.activated {
            log::debug!("Login refused for {}: account not activated", identity.id);
            return Err(AuthFailure::InvalidCredential.into());
        }

        let roles = self.roles.roles_for_user(&identity.id).await?;
        let pair = self.issue_pair(&identity, &roles)?;
        Ok((identity, pair))
    }

    /// Exchanges a valid refresh token for an entirely new pair.
    ///
    /// Roles are re-resolved, so changes made since the last login take effect.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        if refresh_token.is_empty() {
            return Err(FlagGateError::Validation(
                "refresh token must be provided".to_string(),
            ));
        }

        let claims = match self.codec.validate_kind(refresh_token, TokenKind::Refresh) {
            Ok(claims) => claims,
            Err(err) => {
                self.security
                    .log_event(SecurityEvent::TokenValidationFailed {
                        fingerprint: Some(token_fingerprint(refresh_token)),
                        reason: err.to_string(),
                    })
                    .await;
                return Err(AuthFailure::InvalidToken(err).into());
            }
        };

        let identity = with_deadline(self.operation_timeout, self.store.find_by_id(&claims.sub))
            .await?
            .ok_or(AuthFailure::UserNotFound)?;
        let roles = self.roles.roles_for_user(&identity.id).await?;
        let pair = self.issue_pair(&identity, &roles)?;

        self.security
            .log_event(SecurityEvent::RefreshIssued {
                user_id: identity.id.clone(),
            })
            .await;
        Ok(pair)
    }

    /// Replaces a temporary password with a permanent one and logs the identity in.
    ///
    /// The hash swap is a compare-and-set against the hash that was verified,
    /// so of two racing activations with the same temporary password exactly
    /// one succeeds.
    pub async fn activate(
        &self,
        email: &str,
        temp_password: &str,
        new_password: &str,
    ) -> Result<TokenPair> {
        validate_email(email)?;
        if temp_password.is_empty() {
            return Err(FlagGateError::Validation(
                "temporary password from account creation must be provided".to_string(),
            ));
        }
        validate_password(new_password)?;

        let timer = AuthTimer::new(self.min_auth_duration);
        let outcome = self.activate_checked(email, temp_password, new_password).await;
        timer.wait().await;

        match &outcome {
            Ok((identity, _)) => {
                self.security
                    .log_event(SecurityEvent::AccountActivated {
                        user_id: identity.id.clone(),
                    })
                    .await;
            }
            Err(FlagGateError::Store(err)) => {
                self.security
                    .log_event(SecurityEvent::StoreFailure {
                        operation: "activate".to_string(),
                        error: err.to_string(),
                    })
                    .await;
            }
            Err(err) => {
                self.security
                    .log_event(SecurityEvent::ActivationFailed {
                        email: Some(email.to_string()),
                        reason: err.to_string(),
                    })
                    .await;
            }
        }
        outcome.map(|(_, pair)| pair)
    }

    async fn activate_checked(
        &self,
        email: &str,
        temp_password: &str,
        new_password: &str,
    ) -> Result<(Identity, TokenPair)> {
        let Some(identity) = self.lookup(email).await? else {
            self.verify_password(temp_password, &self.dummy_hash).await?;
            return Err(AuthFailure::UserNotFound.into());
        };
        if !self.verify_password(temp_password, &identity.password_hash).await? {
            return Err(AuthFailure::InvalidCredential.into());
        }

        let new_hash = self.hash_password(new_password).await?;
        match with_deadline(
            self.operation_timeout,
            self.store
                .update_password_hash(&identity.id, &identity.password_hash, &new_hash),
        )
        .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(AuthFailure::InvalidCredential.into()),
            Err(err) => return Err(err.into()),
        }

        let mut roles = self.roles.roles_for_user(&identity.id).await?;
        if roles.is_empty() {
            with_deadline(
                self.operation_timeout,
                self.store.assign_role(&identity.id, BASELINE_ROLE),
            )
            .await?;
            roles = vec![BASELINE_ROLE.to_string()];
        }

        let pair = self.issue_pair(&identity, &roles)?;
        Ok((identity, pair))
    }

    async fn lookup(&self, email: &str) -> Result<Option<Identity>> {
        with_deadline(self.operation_timeout, self.store.find_by_email(email))
            .await
            .map_err(FlagGateError::from)
    }

    /// Signs a fresh pair. An identity holding no roles is issued the
    /// baseline role; the store is left unchanged.
    fn issue_pair(&self, identity: &Identity, roles: &[String]) -> Result<TokenPair> {
        let baseline = [BASELINE_ROLE.to_string()];
        let roles = if roles.is_empty() { &baseline[..] } else { roles };

        let mut extra = Map::new();
        extra.insert("email".to_string(), Value::from(identity.email.clone()));

        let access = self.codec.issue(&identity.id, roles, extra)?;
        let refresh = self.codec.issue_refresh(&identity.id, roles)?;
        let expires_in = (access.expires_at() - self.codec.now()).num_seconds().max(0);

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            expires_in,
        })
    }

    // argon2 is CPU-bound; keep it off the async workers
    async fn verify_password(&self, password: &str, stored_hash: &str) -> Result<bool> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let stored_hash = stored_hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &stored_hash))
            .await
            .map_err(|e| FlagGateError::Internal(format!("password verification task failed: {}", e)))
    }

    async fn hash_password(&self, password: &str) -> Result<String> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| FlagGateError::Internal(format!("password hashing task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenSettings;
    use crate::storage::{seed_defaults, MemoryCredentialStore, NewIdentity};

    fn settings() -> TokenSettings {
        TokenSettings {
            secret: "lifecycle-unit-test-key-0123456789-xyz".to_string(),
            issuer: "feature-flag-service".to_string(),
            access_ttl: Duration::from_secs(60),
            refresh_ttl: Duration::from_secs(600),
        }
    }

    async fn lifecycle_with_user(
        email: &str,
        password: &str,
        activated: bool,
    ) -> (TokenLifecycle, Arc<MemoryCredentialStore>, Arc<SecurityLogger>) {
        let store = Arc::new(MemoryCredentialStore::new());
        seed_defaults(store.as_ref()).await.unwrap();
        let hasher = CredentialHasher::with_params(1024, 1, 1).unwrap();
        let hash = hasher.hash(password).unwrap();
        let identity = store
            .create_identity(NewIdentity {
                email: email.to_string(),
                name: "Test".to_string(),
                password_hash: hash.clone(),
            })
            .await
            .unwrap();
        if activated {
            store.update_password_hash(&identity.id, &hash, &hash).await.unwrap();
        }

        let security = Arc::new(SecurityLogger::new());
        let lifecycle = TokenLifecycle::new(
            store.clone(),
            Arc::new(TokenCodec::new(&settings())),
            hasher,
            security.clone(),
            Duration::from_secs(2),
        )
        .unwrap()
        .with_min_auth_duration(Duration::from_millis(1));
        (lifecycle, store, security)
    }

    #[tokio::test]
    async fn test_login_rejects_empty_input() {
        let (lifecycle, _, _) = lifecycle_with_user("a@b.com", "Sup3r!Pass", true).await;
        assert!(matches!(
            lifecycle.login("", "x").await,
            Err(FlagGateError::Validation(_))
        ));
        assert!(matches!(
            lifecycle.login("a@b.com", "").await,
            Err(FlagGateError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_login_failure_cause_is_logged_not_returned() {
        let (lifecycle, _, security) = lifecycle_with_user("a@b.com", "Sup3r!Pass", true).await;
        let missing = lifecycle.login("nobody@b.com", "Sup3r!Pass").await.unwrap_err();
        let wrong = lifecycle.login("a@b.com", "Wr0ng!Pass").await.unwrap_err();
        assert_eq!(missing.class(), wrong.class());
        assert_eq!(missing.public_message(), wrong.public_message());

        let events = security.get_recent_events(Duration::from_secs(60)).await;
        let reasons: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                SecurityEvent::AuthenticationFailed { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(reasons.len(), 2);
        assert_ne!(reasons[0], reasons[1]);
    }

    #[tokio::test]
    async fn test_inactive_account_cannot_log_in() {
        let (lifecycle, _, _) = lifecycle_with_user("a@b.com", "temp1", false).await;
        let err = lifecycle.login("a@b.com", "temp1").await.unwrap_err();
        assert!(matches!(err, FlagGateError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_activation_grants_baseline_role() {
        let (lifecycle, store, _) = lifecycle_with_user("a@b.com", "temp1", false).await;
        let pair = lifecycle.activate("a@b.com", "temp1", "Sup3r!Pass").await.unwrap();
        let claims = lifecycle.codec().validate(&pair.access_token).unwrap();
        assert_eq!(claims.roles, vec![BASELINE_ROLE]);
        assert_eq!(store.roles_of(&claims.sub).await.unwrap(), vec![BASELINE_ROLE]);
    }

    #[tokio::test]
    async fn test_activation_keeps_existing_roles() {
        let (lifecycle, store, _) = lifecycle_with_user("a@b.com", "temp1", false).await;
        let identity = store.find_by_email("a@b.com").await.unwrap().unwrap();
        store.assign_role(&identity.id, "editor").await.unwrap();
        let pair = lifecycle.activate("a@b.com", "temp1", "Sup3r!Pass").await.unwrap();
        let claims = lifecycle.codec().validate(&pair.access_token).unwrap();
        assert_eq!(claims.roles, vec!["editor"]);
    }

    #[tokio::test]
    async fn test_concurrent_activations_have_one_winner() {
        let (lifecycle, _, _) = lifecycle_with_user("a@b.com", "temp1", false).await;
        let (first, second) = tokio::join!(
            lifecycle.activate("a@b.com", "temp1", "Sup3r!Pass"),
            lifecycle.activate("a@b.com", "temp1", "0ther!Pass"),
        );
        assert!(first.is_ok() != second.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_reresolves_roles() {
        let (lifecycle, store, _) = lifecycle_with_user("a@b.com", "Sup3r!Pass", true).await;
        let pair = lifecycle.login("a@b.com", "Sup3r!Pass").await.unwrap();
        assert_eq!(
            lifecycle.codec().validate(&pair.access_token).unwrap().roles,
            vec![BASELINE_ROLE]
        );

        let identity = store.find_by_email("a@b.com").await.unwrap().unwrap();
        assert!(store.roles_of(&identity.id).await.unwrap().is_empty());
        store.assign_role(&identity.id, "admin").await.unwrap();
        let refreshed = lifecycle.refresh(&pair.refresh_token).await.unwrap();
        let claims = lifecycle.codec().validate(&refreshed.access_token).unwrap();
        assert_eq!(claims.roles, vec!["admin"]);
    }

    #[tokio::test]
    async fn test_offline_store_is_not_reported_as_bad_credentials() {
        let (lifecycle, store, security) = lifecycle_with_user("a@b.com", "Sup3r!Pass", true).await;
        store.set_offline(true);
        let err = lifecycle.login("a@b.com", "Sup3r!Pass").await.unwrap_err();
        assert!(err.is_retryable());

        let stats = security.get_event_stats().await;
        assert_eq!(stats.get("store_failure"), Some(&1));
        assert_eq!(stats.get("auth_failed"), None);
    }
}

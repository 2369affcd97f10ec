//! Interactive session: API calls backed by the credential cache

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::api::ApiClient;
use super::cache::{CachedCredential, CredentialCache};
use crate::auth::TokenPair;
use crate::config::ClientConfig;
use crate::error::{FlagGateError, Result};

/// How [`Session::login`] obtained its credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    AlreadyLoggedIn,
    Refreshed,
    LoggedIn,
}

/// What `featurectl auth status` reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    LoggedOut,
    Expired,
    Active {
        email: String,
        user_id: String,
        expires_at: Option<DateTime<Utc>>,
    },
}

pub struct Session {
    api: ApiClient,
    cache: CredentialCache,
}

impl Session {
    pub fn new(api: ApiClient, cache: CredentialCache) -> Self {
        Self { api, cache }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(
            ApiClient::new(&config.server_url)?,
            CredentialCache::from_config(config),
        ))
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    fn cached(&self) -> Result<Option<CachedCredential>> {
        match self.cache.load() {
            Ok(credential) => Ok(Some(credential)),
            Err(FlagGateError::NotLoggedIn) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reuses a fresh cached credential, refreshes a stale one, and falls
    /// back to a full login. The cache is written only on success.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        if let Some(cached) = self.cached()? {
            if self.cache.is_fresh(&cached) {
                info!("Already logged in");
                return Ok(LoginOutcome::AlreadyLoggedIn);
            }
            match self.api.refresh(&cached.refresh_token).await {
                Ok(pair) => {
                    self.persist(&pair)?;
                    return Ok(LoginOutcome::Refreshed);
                }
                Err(e) => debug!("Cached refresh token rejected, logging in again: {}", e),
            }
        }

        let pair = self.api.login(email, password).await?;
        self.persist(&pair)?;
        info!("Login successful");
        Ok(LoginOutcome::LoggedIn)
    }

    pub async fn activate(&self, email: &str, password: &str, new_password: &str) -> Result<()> {
        let pair = self.api.activate(email, password, new_password).await?;
        self.persist(&pair)?;
        info!("Account activated");
        Ok(())
    }

    fn persist(&self, pair: &TokenPair) -> Result<()> {
        let key = self.cache.ensure_key()?;
        self.cache
            .save(&key, &CachedCredential::from_pair(pair, Utc::now()))
    }

    /// A usable access token, refreshing it when stale.
    ///
    /// Any failure clears the cache and yields `NotLoggedIn`.
    pub async fn access_token(&self) -> Result<String> {
        let cached = self.cache.load()?;
        if self.cache.is_fresh(&cached) {
            return Ok(cached.access_token);
        }

        match self.api.refresh(&cached.refresh_token).await {
            Ok(pair) => {
                self.persist(&pair)?;
                Ok(pair.access_token)
            }
            Err(e) => {
                warn!("Login expired, please log in again");
                debug!("Refresh failed: {}", e);
                self.cache.clear()?;
                Err(FlagGateError::NotLoggedIn)
            }
        }
    }

    /// Reports the cached login, asking the server who the token belongs to
    pub async fn status(&self) -> Result<SessionStatus> {
        let Some(cached) = self.cached()? else {
            return Ok(SessionStatus::LoggedOut);
        };
        if !self.cache.is_fresh(&cached) {
            self.cache.clear()?;
            return Ok(SessionStatus::Expired);
        }

        match self.api.me(&cached.access_token).await {
            Ok(user) => Ok(SessionStatus::Active {
                email: user.email,
                user_id: user.id,
                expires_at: cached.expires_at(),
            }),
            Err(e @ FlagGateError::Authentication(_)) => {
                warn!("Invalid access token, please log in again");
                debug!("Status check rejected: {}", e);
                self.cache.clear()?;
                Ok(SessionStatus::LoggedOut)
            }
            Err(e) => Err(e),
        }
    }

    pub fn logout(&self) -> Result<()> {
        self.cache.clear()
    }
}

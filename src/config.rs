//! Server and client configuration
//! Values come from the environment (optionally seeded from a `.env` file by the binaries)

use crate::constants::{
    CACHE_DIR_NAME, DEFAULT_ACCESS_TTL_SECS, DEFAULT_CLOCK_SKEW_SECS, DEFAULT_HOST,
    DEFAULT_JWT_ISSUER, DEFAULT_OPERATION_TIMEOUT_SECS, DEFAULT_PORT, DEFAULT_REFRESH_TTL_SECS,
    DEFAULT_SERVER_URL,
};
use crate::error::{FlagGateError, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Signing inputs for the token codec. Owned by configuration, handed to the codec explicitly.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub secret: String,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JWT secret for token signing/validation
    pub jwt_secret: String,
    /// Expected `iss` claim
    pub jwt_issuer: String,
    /// Access token lifetime
    pub access_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_ttl: Duration,
    /// Upper bound for any single store-backed operation
    pub operation_timeout: Duration,
    /// Postgres connection string; the in-memory store is used when absent
    pub postgres_url: Option<String>,
    /// Email of an admin identity provisioned at startup
    pub bootstrap_admin_email: Option<String>,
    /// Development mode (verbose startup output only)
    pub development_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        panic!("ServerConfig::default() is not allowed for security reasons. Use ServerConfig::from_env() instead.");
    }
}

fn env_first(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| env::var(name).ok())
}

fn env_parse<T: std::str::FromStr>(names: &[&str], default: T) -> T {
    env_first(names)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(false)
}

impl ServerConfig {
    /// Configuration with a fixed signing secret, for tests and embedding
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            jwt_secret: secret.into(),
            jwt_issuer: DEFAULT_JWT_ISSUER.to_string(),
            access_ttl: Duration::from_secs(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_SECS),
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
            postgres_url: None,
            bootstrap_admin_email: None,
            development_mode: true,
        }
    }

    /// Validate that a secret meets security requirements
    pub fn validate_secret(secret: &str) -> Result<()> {
        if secret.len() < 32 {
            return Err(FlagGateError::Config(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        // Check for insecure default or example values
        let insecure_patterns = [
            "supersecret",
            "your-secret-key",
            "change-this",
            "changeme",
            "password",
            "12345",
        ];

        for pattern in &insecure_patterns {
            if secret.to_lowercase().contains(pattern) {
                return Err(FlagGateError::Config(format!(
                    "JWT secret contains insecure pattern '{}'. Generate one with: openssl rand -base64 32",
                    pattern
                )));
            }
        }

        if secret.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(FlagGateError::Config(
                "JWT secret should contain mixed characters (letters, numbers, symbols)".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let host = env_first(&["FLAGGATE_HOST"]).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = env_parse(&["FLAGGATE_PORT", "HTTP_PORT"], DEFAULT_PORT);

        let jwt_secret = env_first(&["FLAGGATE_JWT_SECRET", "JWT_SECRET"]).ok_or_else(|| {
            FlagGateError::Config(
                "JWT_SECRET environment variable is required. \
                 Generate one with: openssl rand -base64 32"
                    .to_string(),
            )
        })?;
        Self::validate_secret(&jwt_secret)?;

        let jwt_issuer = env_first(&["FLAGGATE_JWT_ISSUER", "JWT_ISSUER"])
            .unwrap_or_else(|| DEFAULT_JWT_ISSUER.to_string());
        if jwt_issuer.trim().is_empty() {
            return Err(FlagGateError::Config("JWT issuer must not be empty".to_string()));
        }

        let access_secs = env_parse(&["FLAGGATE_JWT_EXPIRY", "JWT_EXPIRY"], DEFAULT_ACCESS_TTL_SECS);
        let refresh_secs = env_parse(&["FLAGGATE_REFRESH_EXPIRY"], DEFAULT_REFRESH_TTL_SECS);
        if access_secs == 0 {
            return Err(FlagGateError::Config(
                "JWT expiry must be a positive number of seconds".to_string(),
            ));
        }
        if refresh_secs < access_secs {
            return Err(FlagGateError::Config(
                "Refresh token expiry must not be shorter than the access token expiry".to_string(),
            ));
        }

        let timeout_secs = env_parse(
            &["FLAGGATE_OPERATION_TIMEOUT"],
            DEFAULT_OPERATION_TIMEOUT_SECS,
        );

        Ok(Self {
            host,
            port,
            jwt_secret,
            jwt_issuer,
            access_ttl: Duration::from_secs(access_secs),
            refresh_ttl: Duration::from_secs(refresh_secs),
            operation_timeout: Duration::from_secs(timeout_secs.max(1)),
            postgres_url: env_first(&["FLAGGATE_POSTGRES_URL", "POSTGRES_URL"]),
            bootstrap_admin_email: env_first(&["FLAGGATE_BOOTSTRAP_ADMIN_EMAIL"]),
            development_mode: env_flag("FLAGGATE_DEVELOPMENT_MODE"),
        })
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            secret: self.jwt_secret.clone(),
            issuer: self.jwt_issuer.clone(),
            access_ttl: self.access_ttl,
            refresh_ttl: self.refresh_ttl,
        }
    }
}

/// `featurectl` configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the flaggate server
    pub server_url: String,
    /// Directory holding the key and the encrypted credential file
    pub cache_dir: PathBuf,
    /// Safety margin subtracted from the cached expiry before it is trusted
    pub clock_skew: chrono::Duration,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        let server_url = env_first(&["FEATURECTL_SERVER_URL"])
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        url::Url::parse(&server_url)
            .map_err(|e| FlagGateError::Config(format!("invalid server url {}: {}", server_url, e)))?;

        let cache_dir = match env_first(&["FEATURECTL_CACHE_DIR"]) {
            Some(dir) => PathBuf::from(dir),
            None => default_cache_dir()?,
        };

        let skew = env_parse(&["FEATURECTL_CLOCK_SKEW"], DEFAULT_CLOCK_SKEW_SECS);

        Ok(Self {
            server_url,
            cache_dir,
            clock_skew: chrono::Duration::seconds(skew.max(0)),
        })
    }
}

/// Per-user cache directory: `{cache_dir}/featurectl`.
pub fn default_cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".cache");
                h
            })
        })
        .ok_or_else(|| {
            FlagGateError::Config(
                "failed to resolve the user cache directory; set XDG_CACHE_HOME or FEATURECTL_CACHE_DIR"
                    .to_string(),
            )
        })?;
    Ok(base.join(CACHE_DIR_NAME))
}

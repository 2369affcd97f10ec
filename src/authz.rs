//! Authorization enforcement shared by the HTTP and RPC transports
//!
//! Each protected route or RPC method maps to the set of roles allowed to call
//! it. A caller passes when it holds any one of them. Keys match exactly;
//! anything absent from the table is public.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::auth::token::{extract_bearer_token, token_fingerprint, Claims, TokenCodec, TokenKind};
use crate::constants::{MAX_TOKEN_LENGTH, ROLE_ADMIN, ROLE_AUDITOR, ROLE_EDITOR, ROLE_USER};
use crate::error::{AuthFailure, FlagGateError, Result, TokenError};
use crate::rpc::methods;
use crate::security_logger::{SecurityEvent, SecurityLogger};

/// HTTP access keys, `METHOD route-template`
pub mod routes {
    pub const AUTH_LOGIN: &str = "POST /api/v1/auth/login";
    pub const AUTH_REFRESH: &str = "POST /api/v1/auth/refresh";
    pub const AUTH_ACTIVATE: &str = "POST /api/v1/auth/activate";
    pub const ME: &str = "GET /api/v1/me";
    pub const ME_ROLES: &str = "GET /api/v1/me/roles";
    pub const LIST_USERS: &str = "GET /api/v1/users";
    pub const CREATE_USER: &str = "POST /api/v1/users";
    pub const GET_USER: &str = "GET /api/v1/users/{id}";
    pub const UPDATE_USER: &str = "PUT /api/v1/users/{id}";
    pub const DELETE_USER: &str = "DELETE /api/v1/users/{id}";
    pub const LIST_FLAGS: &str = "GET /api/v1/flags";
    pub const CREATE_FLAG: &str = "POST /api/v1/flags";
    pub const GET_FLAG: &str = "GET /api/v1/flags/{key}";
    pub const UPDATE_FLAG: &str = "PUT /api/v1/flags/{key}";
    pub const DELETE_FLAG: &str = "DELETE /api/v1/flags/{key}";
}

/// API surface a call arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Http,
    Rpc,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Http => write!(f, "http"),
            Transport::Rpc => write!(f, "rpc"),
        }
    }
}

/// Static mapping of `{transport, key}` to the roles allowed to call it
#[derive(Debug, Clone, Default)]
pub struct AccessTable {
    entries: HashMap<(Transport, String), Vec<String>>,
}

impl AccessTable {
    /// An empty table; every key is public
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entry
    pub fn allow(mut self, transport: Transport, key: &str, roles: &[&str]) -> Self {
        self.entries.insert(
            (transport, key.to_string()),
            roles.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    /// Roles of the feature-flag service
    pub fn default_table() -> Self {
        let readers = [ROLE_USER, ROLE_EDITOR, ROLE_ADMIN];
        let writers = [ROLE_EDITOR, ROLE_ADMIN];
        let admins = [ROLE_ADMIN];
        let everyone = [ROLE_USER, ROLE_EDITOR, ROLE_AUDITOR, ROLE_ADMIN];

        let mut table = Self::new()
            .allow(Transport::Rpc, methods::CREATE_FLAG, &writers)
            .allow(Transport::Rpc, methods::UPDATE_FLAG, &writers)
            .allow(Transport::Rpc, methods::DELETE_FLAG, &admins)
            .allow(Transport::Rpc, methods::GET_FLAG, &readers)
            .allow(Transport::Rpc, methods::LIST_FLAGS, &readers)
            .allow(Transport::Http, routes::CREATE_FLAG, &writers)
            .allow(Transport::Http, routes::UPDATE_FLAG, &writers)
            .allow(Transport::Http, routes::DELETE_FLAG, &admins)
            .allow(Transport::Http, routes::LIST_FLAGS, &readers)
            .allow(Transport::Http, routes::GET_FLAG, &readers)
            .allow(Transport::Http, routes::LIST_USERS, &admins)
            .allow(Transport::Http, routes::CREATE_USER, &admins)
            .allow(Transport::Http, routes::GET_USER, &admins)
            .allow(Transport::Http, routes::UPDATE_USER, &admins)
            .allow(Transport::Http, routes::DELETE_USER, &admins)
            .allow(Transport::Http, routes::ME, &everyone)
            .allow(Transport::Http, routes::ME_ROLES, &everyone);
        for method in methods::RBAC_USER_METHODS {
            table = table.allow(Transport::Rpc, method, &admins);
        }
        table
    }

    /// Required roles, or `None` for a public key
    pub fn required_roles(&self, transport: Transport, key: &str) -> Option<&[String]> {
        self.entries
            .get(&(transport, key.to_string()))
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Gate run before every handler on both transports
pub struct Enforcer {
    codec: Arc<TokenCodec>,
    table: Arc<AccessTable>,
    security: Arc<SecurityLogger>,
}

impl Enforcer {
    pub fn new(codec: Arc<TokenCodec>, table: Arc<AccessTable>, security: Arc<SecurityLogger>) -> Self {
        Self {
            codec,
            table,
            security,
        }
    }

    pub fn table(&self) -> &AccessTable {
        &self.table
    }

    /// Decides whether a call may proceed.
    ///
    /// `carrier` is the raw `Authorization` header value (HTTP) or the
    /// `authorization` metadata entry (RPC). Returns `None` for public keys and
    /// the verified claims otherwise. Invalid or missing tokens yield
    /// `Authentication`; valid tokens without a required role yield `Authorization`.
    pub async fn authorize(
        &self,
        transport: Transport,
        key: &str,
        carrier: Option<&str>,
    ) -> Result<Option<Claims>> {
        let Some(required) = self.table.required_roles(transport, key) else {
            return Ok(None);
        };

        let Some(token) = carrier.and_then(extract_bearer_token) else {
            self.reject_unauthenticated(transport, key, AuthFailure::MissingToken)
                .await;
            return Err(AuthFailure::MissingToken.into());
        };

        let validated = if token.len() > MAX_TOKEN_LENGTH {
            Err(TokenError::Malformed)
        } else {
            self.codec.validate_kind(&token, TokenKind::Access)
        };
        let claims = match validated {
            Ok(claims) => claims,
            Err(err) => {
                self.security
                    .log_event(SecurityEvent::TokenValidationFailed {
                        fingerprint: Some(token_fingerprint(&token)),
                        reason: err.to_string(),
                    })
                    .await;
                let failure = AuthFailure::InvalidToken(err);
                self.reject_unauthenticated(transport, key, failure.clone())
                    .await;
                return Err(failure.into());
            }
        };

        if !claims.has_any_role(required) {
            self.security
                .log_event(SecurityEvent::PermissionDenied {
                    user_id: claims.sub.clone(),
                    transport,
                    resource: key.to_string(),
                })
                .await;
            return Err(FlagGateError::Authorization(
                "insufficient permissions".to_string(),
            ));
        }

        log::debug!("{} {} authorized for {}", transport, key, claims.sub);
        Ok(Some(claims))
    }

    async fn reject_unauthenticated(&self, transport: Transport, key: &str, failure: AuthFailure) {
        self.security
            .log_event(SecurityEvent::UnauthenticatedAccess {
                transport,
                resource: key.to_string(),
                reason: failure.to_string(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenSettings;
    use serde_json::Map;
    use std::time::Duration;

    fn enforcer() -> (Enforcer, Arc<TokenCodec>) {
        let codec = Arc::new(TokenCodec::new(&TokenSettings {
            secret: "authz-unit-test-signing-key-0123456789".to_string(),
            issuer: "feature-flag-service".to_string(),
            access_ttl: Duration::from_secs(60),
            refresh_ttl: Duration::from_secs(600),
        }));
        let enforcer = Enforcer::new(
            codec.clone(),
            Arc::new(AccessTable::default_table()),
            Arc::new(SecurityLogger::new()),
        );
        (enforcer, codec)
    }

    fn bearer(codec: &TokenCodec, roles: &[&str]) -> String {
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        format!("Bearer {}", codec.issue("u1", &roles, Map::new()).unwrap().token)
    }

    #[test]
    fn test_default_table_entries() {
        let table = AccessTable::default_table();
        assert_eq!(
            table.required_roles(Transport::Rpc, "/FlagService/DeleteFlag"),
            Some(&["admin".to_string()][..])
        );
        assert_eq!(
            table
                .required_roles(Transport::Http, "GET /api/v1/flags")
                .map(|r| r.len()),
            Some(3)
        );
        assert!(table.required_roles(Transport::Http, "/FlagService/DeleteFlag").is_none());
        assert!(table.required_roles(Transport::Rpc, "/FlagService/").is_none());
    }

    #[tokio::test]
    async fn test_public_key_needs_no_token() {
        let (enforcer, _) = enforcer();
        let outcome = enforcer
            .authorize(Transport::Http, "GET /health", None)
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_zero_role_token_is_forbidden() {
        let (enforcer, codec) = enforcer();
        let header = bearer(&codec, &[]);
        let err = enforcer
            .authorize(Transport::Http, routes::ME, Some(&header))
            .await
            .unwrap_err();
        assert!(matches!(err, FlagGateError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_an_access_token() {
        let (enforcer, codec) = enforcer();
        let refresh = codec.issue_refresh("u1", &["admin".to_string()]).unwrap();
        let header = format!("Bearer {}", refresh.token);
        let err = enforcer
            .authorize(Transport::Rpc, methods::LIST_FLAGS, Some(&header))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlagGateError::Authentication(AuthFailure::InvalidToken(TokenError::WrongKind))
        ));
    }

    #[tokio::test]
    async fn test_oversized_token_is_rejected() {
        let (enforcer, _) = enforcer();
        let header = format!("Bearer {}", "a".repeat(MAX_TOKEN_LENGTH + 1));
        let err = enforcer
            .authorize(Transport::Rpc, methods::LIST_FLAGS, Some(&header))
            .await
            .unwrap_err();
        assert!(matches!(err, FlagGateError::Authentication(_)));
    }
}

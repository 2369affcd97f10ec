use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::config::TokenSettings;
use crate::constants::BEARER_PREFIX;
use crate::error::{FlagGateError, Result, TokenError};

/// Claim names owned by the codec; extra claims may not shadow them.
const RESERVED_CLAIMS: [&str; 8] = ["sub", "iss", "roles", "iat", "nbf", "exp", "jti", "kind"];

/// Source of the current time for issuance and validation
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used to exercise validity windows.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        // Whole seconds, since token timestamps are second-granular
        let start = Utc
            .timestamp_opt(start.timestamp(), 0)
            .single()
            .unwrap_or(start);
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// What a token may be used for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    #[default]
    Access,
    Refresh,
}

/// JWT Claims structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity ID)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Role names held at issuance
    #[serde(default)]
    pub roles: Vec<String>,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Not before (unix seconds)
    pub nbf: i64,
    /// Expiration time (unix seconds)
    pub exp: i64,
    /// Unique token id
    pub jti: String,
    #[serde(default)]
    pub kind: TokenKind,
    /// Caller-supplied claims such as `email`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp_to_datetime(self.exp)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        timestamp_to_datetime(self.iat)
    }

    pub fn email(&self) -> Option<&str> {
        self.extra.get("email").and_then(Value::as_str)
    }

    /// OR semantics: true if any held role is in `required`
    pub fn has_any_role<S: AsRef<str>>(&self, required: &[S]) -> bool {
        self.roles
            .iter()
            .any(|held| required.iter().any(|r| r.as_ref() == held))
    }
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A freshly signed token together with the claims it carries
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

impl IssuedToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.expires_at()
    }
}

/// Encodes and verifies signed bearer tokens.
///
/// The codec holds no mutable state; one instance can be shared freely across
/// tasks, and independent instances with different secrets can coexist.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    unverified: Validation,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    /// Creates a codec using the wall clock
    pub fn new(settings: &TokenSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: &TokenSettings, clock: Arc<dyn Clock>) -> Self {
        // Time and issuer rules are checked by hand against the injected clock
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims =
            ["exp", "iss", "sub"].iter().map(|c| c.to_string()).collect();

        let mut unverified = Validation::new(Algorithm::HS256);
        unverified.insecure_disable_signature_validation();
        unverified.validate_exp = false;
        unverified.validate_nbf = false;
        unverified.validate_aud = false;
        unverified.required_spec_claims = HashSet::new();

        Self {
            encoding_key: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            validation,
            unverified,
            issuer: settings.issuer.clone(),
            access_ttl: Duration::seconds(settings.access_ttl.as_secs() as i64),
            refresh_ttl: Duration::seconds(settings.refresh_ttl.as_secs() as i64),
            clock,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Issues a signed access token for `subject`
    pub fn issue(
        &self,
        subject: &str,
        roles: &[String],
        extra_claims: Map<String, Value>,
    ) -> Result<IssuedToken> {
        self.issue_kind(subject, roles, extra_claims, TokenKind::Access, self.access_ttl)
    }

    /// Issues a signed refresh token for `subject`
    pub fn issue_refresh(&self, subject: &str, roles: &[String]) -> Result<IssuedToken> {
        self.issue_kind(subject, roles, Map::new(), TokenKind::Refresh, self.refresh_ttl)
    }

    fn issue_kind(
        &self,
        subject: &str,
        roles: &[String],
        mut extra_claims: Map<String, Value>,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken> {
        if subject.is_empty() {
            return Err(FlagGateError::Validation("token subject must not be empty".to_string()));
        }
        for reserved in RESERVED_CLAIMS {
            extra_claims.remove(reserved);
        }

        let now = self.clock.now().timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            roles: roles.to_vec(),
            iat: now,
            nbf: now,
            exp: now + ttl.num_seconds(),
            jti: uuid::Uuid::new_v4().to_string(),
            kind,
            extra: extra_claims,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| FlagGateError::Internal(format!("Failed to generate token: {}", e)))?;
        Ok(IssuedToken { token, claims })
    }

    /// Verifies the signature, validity window and issuer of `token`.
    ///
    /// The signature is checked first, so a tampered token always reports
    /// [`TokenError::Signature`] and an intact but stale one [`TokenError::Expired`].
    pub fn validate(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| map_jwt_error(&e))?
            .claims;

        let now = self.clock.now().timestamp();
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        if now < claims.nbf || claims.iat > now {
            return Err(TokenError::NotYetValid);
        }
        if claims.iss != self.issuer {
            return Err(TokenError::IssuerMismatch);
        }
        Ok(claims)
    }

    /// [`validate`](Self::validate) plus a check that the token is of `kind`
    pub fn validate_kind(
        &self,
        token: &str,
        kind: TokenKind,
    ) -> std::result::Result<Claims, TokenError> {
        let claims = self.validate(token)?;
        if claims.kind != kind {
            return Err(TokenError::WrongKind);
        }
        Ok(claims)
    }

    /// Reads the `exp` claim without checking signature or time rules
    pub fn expiration(&self, token: &str) -> std::result::Result<DateTime<Utc>, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.unverified)
            .map_err(|e| map_jwt_error(&e))?
            .claims;
        Ok(claims.expires_at())
    }
}

fn map_jwt_error(err: &jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::InvalidSignature => TokenError::Signature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::ImmatureSignature => TokenError::NotYetValid,
        ErrorKind::InvalidIssuer => TokenError::IssuerMismatch,
        _ => TokenError::Malformed,
    }
}

/// Extracts bearer token from an Authorization header value.
/// The `Bearer ` prefix is matched case-sensitively.
pub fn extract_bearer_token(auth_header: &str) -> Option<String> {
    auth_header
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Short, non-reversible identifier for a token, safe to put in logs
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

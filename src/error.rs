//! Error taxonomy shared by the server, the transports and the CLI client.
//!
//! Callers outside the process only ever see an [`ErrorClass`]; the detailed
//! variants stay in logs so that authentication failures never reveal which
//! check rejected the request.

use thiserror::Error;

/// Reasons a bearer token was rejected by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token signature verification failed")]
    Signature,
    #[error("token has expired")]
    Expired,
    #[error("token is not yet valid")]
    NotYetValid,
    #[error("token issuer does not match")]
    IssuerMismatch,
    #[error("token has the wrong kind for this operation")]
    WrongKind,
    #[error("token is malformed")]
    Malformed,
}

/// Specific authentication failure causes. Logged, never shown to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("no user associated with email address")]
    UserNotFound,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),
    #[error("missing bearer token")]
    MissingToken,
}

/// Failures of the backing credential store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store operation timed out")]
    Timeout,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store conflict: {0}")]
    Conflict(String),
    #[error("store query failed: {0}")]
    Query(String),
}

#[derive(Debug, Error)]
pub enum FlagGateError {
    // Input errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Auth errors
    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthFailure),
    #[error("Forbidden: {0}")]
    Authorization(String),

    // Lookup errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    // Client-side cache errors
    #[error("Credential cache is corrupted: {0}")]
    CacheCorruption(String),
    #[error("not logged in - please run 'featurectl auth login'")]
    NotLoggedIn,

    // System errors
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Externally observable outcome of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Unauthenticated,
    Forbidden,
    NotFound,
    Timeout,
    Unavailable,
    Internal,
}

impl ErrorClass {
    /// Message safe to return over the network.
    pub fn public_message(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "invalid request",
            ErrorClass::Unauthenticated => "unauthorized",
            ErrorClass::Forbidden => "forbidden",
            ErrorClass::NotFound => "not found",
            ErrorClass::Timeout => "request timed out",
            ErrorClass::Unavailable => "service unavailable",
            ErrorClass::Internal => "internal error",
        }
    }
}

impl FlagGateError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Validation,
            Self::Authentication(_) | Self::NotLoggedIn => ErrorClass::Unauthenticated,
            Self::Authorization(_) => ErrorClass::Forbidden,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Store(StoreError::Timeout) => ErrorClass::Timeout,
            Self::Store(StoreError::Unavailable(_)) => ErrorClass::Unavailable,
            Self::Store(StoreError::Conflict(_)) => ErrorClass::Validation,
            Self::Store(StoreError::Query(_)) => ErrorClass::Internal,
            Self::CacheCorruption(_) => ErrorClass::Unauthenticated,
            Self::Config(_) | Self::Transport(_) | Self::Io(_) | Self::Internal(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// Whether a caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Timeout) | Self::Store(StoreError::Unavailable(_))
        )
    }

    /// Text returned to network callers. Validation messages are echoed since
    /// they describe the caller's own input; everything else is generic.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            other => other.class().public_message().to_string(),
        }
    }
}

impl From<reqwest::Error> for FlagGateError {
    fn from(err: reqwest::Error) -> Self {
        FlagGateError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlagGateError>;

//! flaggate - identity and access control for a feature-flag service
//!
//! This library issues and validates signed bearer tokens, resolves roles
//! and permissions from a credential store, enforces per-route and per-method
//! access on the HTTP and RPC transports, and provides the `featurectl`
//! client with an encrypted local credential cache.

pub mod auth;
pub mod authz;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod flags;
pub mod handlers;
pub mod rpc;
pub mod security;
pub mod security_logger;
pub mod services;
pub mod storage;
pub mod users;

// Re-export main components
pub use config::*;
pub use constants::*;
pub use error::{ErrorClass, FlagGateError, Result};
pub use services::AppServices;

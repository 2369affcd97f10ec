//! `featurectl` client side: API access and the local credential cache

pub mod api;
pub mod cache;
pub mod session;

pub use api::ApiClient;
pub use cache::{CacheKey, CachedCredential, CredentialCache};
pub use session::{LoginOutcome, Session, SessionStatus};

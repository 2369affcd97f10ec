//! Storage mechanisms for identities, roles and permissions

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod seed;
pub mod traits;

// Re-export the store interface and the default backend
pub use memory::MemoryCredentialStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCredentialStore;
pub use seed::seed_defaults;
pub use traits::{with_deadline, CredentialStore, Identity, NewIdentity, Permission, Role, StoreResult};

//! Authentication: credentials, tokens and role resolution

pub mod lifecycle;
pub mod password;
pub mod roles;
pub mod token;

// Re-export main components
pub use lifecycle::{TokenLifecycle, TokenPair};
pub use password::{generate_temp_password, validate_email, validate_password, CredentialHasher};
pub use roles::RoleResolver;
pub use token::{
    extract_bearer_token, Claims, Clock, IssuedToken, ManualClock, SystemClock, TokenCodec,
    TokenKind,
};

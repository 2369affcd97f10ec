// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const API_PREFIX: &str = "api";
pub const API_VERSION: &str = "v1";
pub const RPC_PATH: &str = "rpc";

// Token configuration
pub const DEFAULT_JWT_ISSUER: &str = "feature-flag-service";
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 3600;
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 3600;
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;
pub const BEARER_PREFIX: &str = "Bearer ";
pub const AUTHORIZATION_METADATA_KEY: &str = "authorization";
pub const MAX_TOKEN_LENGTH: usize = 4096;

// Roles seeded at startup
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_EDITOR: &str = "editor";
pub const ROLE_AUDITOR: &str = "auditor";
pub const ROLE_USER: &str = "user";
/// Role granted at activation when an identity has none.
pub const BASELINE_ROLE: &str = ROLE_USER;

// Client credential cache
pub const CACHE_DIR_NAME: &str = "featurectl";
pub const KEY_FILE_NAME: &str = "key.bin";
pub const AUTH_CACHE_FILE_NAME: &str = "auth.json";
pub const CACHE_KEY_LEN: usize = 32;
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 60;
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";

// Authentication timing
/// Floor for the duration of a credential check, hiding which step rejected it.
pub const AUTH_MIN_DURATION_MS: u64 = 100;
/// Recent security events kept in memory
pub const MAX_SECURITY_EVENTS: usize = 10_000;

//! Application service graph, assembled once at startup

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{Clock, CredentialHasher, SystemClock, TokenCodec, TokenLifecycle};
use crate::authz::{AccessTable, Enforcer};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::flags::FlagService;
use crate::security_logger::SecurityLogger;
use crate::storage::CredentialStore;
use crate::users::UserService;

/// Every component a transport needs, wired together explicitly
pub struct AppServices {
    pub store: Arc<dyn CredentialStore>,
    pub codec: Arc<TokenCodec>,
    pub lifecycle: TokenLifecycle,
    pub enforcer: Enforcer,
    pub users: UserService,
    pub flags: FlagService,
    pub security: Arc<SecurityLogger>,
    pub operation_timeout: Duration,
}

impl AppServices {
    /// Production wiring: wall clock and default argon2 cost
    pub fn new(config: &ServerConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        Self::assemble(config, store, CredentialHasher::new(), Arc::new(SystemClock))
    }

    /// Wiring with an explicit hasher and clock
    pub fn assemble(
        config: &ServerConfig,
        store: Arc<dyn CredentialStore>,
        hasher: CredentialHasher,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let security = Arc::new(SecurityLogger::new());
        let codec = Arc::new(TokenCodec::with_clock(&config.token_settings(), clock));
        let lifecycle = TokenLifecycle::new(
            store.clone(),
            codec.clone(),
            hasher.clone(),
            security.clone(),
            config.operation_timeout,
        )?;
        let enforcer = Enforcer::new(
            codec.clone(),
            Arc::new(AccessTable::default_table()),
            security.clone(),
        );
        let users = UserService::new(
            store.clone(),
            hasher,
            security.clone(),
            config.operation_timeout,
        );

        Ok(Self {
            store,
            codec,
            lifecycle,
            enforcer,
            users,
            flags: FlagService::new(),
            security,
            operation_timeout: config.operation_timeout,
        })
    }
}

use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use flaggate::config::ServerConfig;
use flaggate::handlers;
use flaggate::services::AppServices;
use flaggate::storage::{seed_defaults, CredentialStore, MemoryCredentialStore};

#[tokio::main]
async fn main() {
    // Initialize env
    match dotenvy::dotenv() {
        Ok(_) => info!("Environment variables loaded from .env file"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    // Initialize logging
    env_logger::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration: host={}, port={}", config.host, config.port);
    if config.development_mode {
        info!(
            "Development mode: issuer={}, access_ttl={:?}, refresh_ttl={:?}, operation_timeout={:?}",
            config.jwt_issuer, config.access_ttl, config.refresh_ttl, config.operation_timeout
        );
    }

    let store = match open_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open credential store: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = seed_defaults(store.as_ref()).await {
        error!("Failed to seed default roles: {}", e);
        std::process::exit(1);
    }

    let services = match AppServices::new(&config, store) {
        Ok(services) => Arc::new(services),
        Err(e) => {
            error!("Failed to assemble services: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(email) = &config.bootstrap_admin_email {
        match services.users.bootstrap_admin(email).await {
            Ok(Some(temporary_password)) => warn!(
                "Provisioned admin {} with temporary password {} - activate it before use",
                email, temporary_password
            ),
            Ok(None) => {}
            Err(e) => {
                error!("Failed to provision bootstrap admin: {}", e);
                std::process::exit(1);
            }
        }
    }

    services.security.clone().start_cleanup_task();

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    let routes = handlers::app(services);
    let (bound, server) = match warp::serve(routes).try_bind_with_graceful_shutdown(addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    }) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Starting flaggate server on {}", bound);
    server.await;
    info!("Server stopped");
}

#[cfg(feature = "postgres")]
async fn open_store(config: &ServerConfig) -> flaggate::Result<Arc<dyn CredentialStore>> {
    use flaggate::storage::PostgresCredentialStore;

    let Some(url) = &config.postgres_url else {
        info!("No Postgres URL configured, using in-memory credential store");
        return Ok(Arc::new(MemoryCredentialStore::new()));
    };

    let store = PostgresCredentialStore::connect(url, 10).await?;
    store.ensure_schema().await?;
    info!("Connected to Postgres credential store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_store(config: &ServerConfig) -> flaggate::Result<Arc<dyn CredentialStore>> {
    if config.postgres_url.is_some() {
        warn!("Postgres URL set but the postgres feature is disabled; using in-memory store");
    }
    Ok(Arc::new(MemoryCredentialStore::new()))
}

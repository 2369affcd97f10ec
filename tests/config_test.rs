use flaggate::config::{ClientConfig, ServerConfig};
use std::env;
use std::time::Duration;

// Environment is process-wide, so every variable is exercised in one test
#[test]
fn test_config_from_env() {
    env::remove_var("JWT_SECRET");
    env::remove_var("FLAGGATE_JWT_SECRET");
    env::remove_var("FLAGGATE_POSTGRES_URL");
    env::remove_var("POSTGRES_URL");
    env::remove_var("FLAGGATE_JWT_ISSUER");
    env::remove_var("JWT_ISSUER");
    assert!(ServerConfig::from_env().is_err());

    env::set_var("FLAGGATE_JWT_SECRET", "k9f2-Hq71-zzP0-aaW3-88dd-Lm42-Q7x1");
    env::set_var("FLAGGATE_PORT", "9191");
    env::set_var("FLAGGATE_JWT_EXPIRY", "120");
    env::set_var("FLAGGATE_REFRESH_EXPIRY", "240");
    env::set_var("FLAGGATE_BOOTSTRAP_ADMIN_EMAIL", "root@example.com");
    let config = ServerConfig::from_env().unwrap();
    assert_eq!(config.port, 9191);
    assert_eq!(config.access_ttl, Duration::from_secs(120));
    assert_eq!(config.refresh_ttl, Duration::from_secs(240));
    assert_eq!(config.jwt_issuer, "feature-flag-service");
    assert_eq!(config.bootstrap_admin_email.as_deref(), Some("root@example.com"));
    assert!(config.postgres_url.is_none());

    env::set_var("FLAGGATE_REFRESH_EXPIRY", "60");
    assert!(ServerConfig::from_env().is_err());
    env::remove_var("FLAGGATE_REFRESH_EXPIRY");

    env::set_var("FLAGGATE_JWT_SECRET", "changeme-changeme-changeme-changeme-1");
    assert!(ServerConfig::from_env().is_err());

    env::set_var("FEATURECTL_SERVER_URL", "http://flags.internal:8080");
    env::set_var("FEATURECTL_CACHE_DIR", "/tmp/featurectl-config-test");
    env::set_var("FEATURECTL_CLOCK_SKEW", "15");
    let client = ClientConfig::from_env().unwrap();
    assert_eq!(client.server_url, "http://flags.internal:8080");
    assert_eq!(client.cache_dir.to_str(), Some("/tmp/featurectl-config-test"));
    assert_eq!(client.clock_skew.num_seconds(), 15);

    env::set_var("FEATURECTL_SERVER_URL", "not a url");
    assert!(ClientConfig::from_env().is_err());
}

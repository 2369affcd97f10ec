use flaggate::auth::{ManualClock, TokenCodec};
use flaggate::authz::{routes, AccessTable, Enforcer, Transport};
use flaggate::config::TokenSettings;
use flaggate::error::{ErrorClass, FlagGateError};
use flaggate::rpc::methods;
use flaggate::security_logger::SecurityLogger;
use chrono::{Duration, Utc};
use serde_json::Map;
use std::sync::Arc;

fn codec(clock: Arc<ManualClock>) -> Arc<TokenCodec> {
    Arc::new(TokenCodec::with_clock(
        &TokenSettings {
            secret: "authz-integration-key-5f4e3d2c1b0a9z8y".to_string(),
            issuer: "feature-flag-service".to_string(),
            access_ttl: std::time::Duration::from_secs(300),
            refresh_ttl: std::time::Duration::from_secs(3000),
        },
        clock,
    ))
}

fn enforcer_with(table: AccessTable) -> (Enforcer, Arc<TokenCodec>, Arc<ManualClock>, Arc<SecurityLogger>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let codec = codec(clock.clone());
    let security = Arc::new(SecurityLogger::new());
    let enforcer = Enforcer::new(codec.clone(), Arc::new(table), security.clone());
    (enforcer, codec, clock, security)
}

fn bearer(codec: &TokenCodec, roles: &[&str]) -> String {
    let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
    format!("Bearer {}", codec.issue("u1", &roles, Map::new()).unwrap().token)
}

#[tokio::test]
async fn test_editor_on_admin_route_is_authorization_error() {
    let table = AccessTable::new().allow(Transport::Http, "DELETE /things/{id}", &["admin"]);
    let (enforcer, codec, _, security) = enforcer_with(table);
    let header = bearer(&codec, &["editor"]);

    let err = enforcer
        .authorize(Transport::Http, "DELETE /things/{id}", Some(&header))
        .await
        .unwrap_err();
    assert!(matches!(err, FlagGateError::Authorization(_)));
    assert_eq!(err.class(), ErrorClass::Forbidden);

    let stats = security.get_event_stats().await;
    assert_eq!(stats.get("permission_denied"), Some(&1));
}

#[tokio::test]
async fn test_any_one_required_role_is_enough() {
    let table = AccessTable::new().allow(Transport::Rpc, "/Things/Read", &["user", "editor", "admin"]);
    let (enforcer, codec, _, _) = enforcer_with(table);

    for role in ["user", "editor", "admin"] {
        let header = bearer(&codec, &["unrelated", role]);
        let claims = enforcer
            .authorize(Transport::Rpc, "/Things/Read", Some(&header))
            .await
            .unwrap()
            .expect("protected key yields claims");
        assert_eq!(claims.sub, "u1");
    }

    let header = bearer(&codec, &["auditor"]);
    assert!(enforcer
        .authorize(Transport::Rpc, "/Things/Read", Some(&header))
        .await
        .is_err());
}

#[tokio::test]
async fn test_unlisted_keys_are_public_even_with_bad_tokens() {
    let (enforcer, _, _, _) = enforcer_with(AccessTable::default_table());
    let outcome = enforcer
        .authorize(Transport::Http, "GET /health", Some("Bearer garbage"))
        .await
        .unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn test_expired_token_is_authentication_error() {
    let (enforcer, codec, clock, _) = enforcer_with(AccessTable::default_table());
    let header = bearer(&codec, &["admin"]);
    clock.advance(Duration::minutes(10));

    let err = enforcer
        .authorize(Transport::Http, routes::LIST_FLAGS, Some(&header))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Unauthenticated);
}

#[tokio::test]
async fn test_transports_agree_on_outcome_class() {
    let (enforcer, codec, _, _) = enforcer_with(AccessTable::default_table());
    let pairs = [
        (routes::CREATE_FLAG, methods::CREATE_FLAG),
        (routes::UPDATE_FLAG, methods::UPDATE_FLAG),
        (routes::DELETE_FLAG, methods::DELETE_FLAG),
        (routes::GET_FLAG, methods::GET_FLAG),
        (routes::LIST_FLAGS, methods::LIST_FLAGS),
        (routes::LIST_USERS, methods::LIST_USERS),
        (routes::CREATE_USER, methods::CREATE_USER),
        (routes::GET_USER, methods::GET_USER),
        (routes::UPDATE_USER, methods::UPDATE_USER),
        (routes::DELETE_USER, methods::DELETE_USER),
    ];
    let carriers = [
        None,
        Some("Bearer not-a-token".to_string()),
        Some(bearer(&codec, &[])),
        Some(bearer(&codec, &["user"])),
        Some(bearer(&codec, &["editor"])),
        Some(bearer(&codec, &["auditor"])),
        Some(bearer(&codec, &["admin"])),
    ];

    for (route, method) in pairs {
        for carrier in &carriers {
            let http = enforcer
                .authorize(Transport::Http, route, carrier.as_deref())
                .await
                .map(|c| c.is_some())
                .map_err(|e| e.class());
            let rpc = enforcer
                .authorize(Transport::Rpc, method, carrier.as_deref())
                .await
                .map(|c| c.is_some())
                .map_err(|e| e.class());
            assert_eq!(http, rpc, "{} vs {} with {:?}", route, method, carrier);
        }
    }
}

use chrono::{Duration, Utc};
use flaggate::auth::{ManualClock, TokenCodec, TokenKind};
use flaggate::config::TokenSettings;
use flaggate::error::TokenError;
use serde_json::Map;
use std::sync::Arc;

fn settings(secret: &str, issuer: &str) -> TokenSettings {
    TokenSettings {
        secret: secret.to_string(),
        issuer: issuer.to_string(),
        access_ttl: std::time::Duration::from_secs(3600),
        refresh_ttl: std::time::Duration::from_secs(7 * 24 * 3600),
    }
}

fn codec_with_clock() -> (TokenCodec, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let codec = TokenCodec::with_clock(
        &settings("integration-signing-key-9f8e7d6c5b4a", "feature-flag-service"),
        clock.clone(),
    );
    (codec, clock)
}

fn roles(names: &[&str]) -> Vec<String> {
    names.iter().map(|r| r.to_string()).collect()
}

#[test]
fn test_issue_then_validate_returns_same_subject_and_roles() {
    let (codec, _) = codec_with_clock();
    let cases = [
        ("u1", roles(&[])),
        ("u2", roles(&["editor"])),
        ("4a7b-uuid", roles(&["user", "editor", "admin"])),
    ];

    for (subject, held) in cases {
        let issued = codec.issue(subject, &held, Map::new()).unwrap();
        let claims = codec.validate(&issued.token).unwrap();
        assert_eq!(claims.sub, subject);
        assert_eq!(claims.roles, held);
        assert_eq!(claims.iss, "feature-flag-service");
        assert_eq!(claims.kind, TokenKind::Access);
        assert!(claims.iat < claims.exp);
    }
}

#[test]
fn test_validity_window_is_half_open() {
    let (codec, clock) = codec_with_clock();
    let issued = codec.issue("u1", &roles(&["user"]), Map::new()).unwrap();

    // valid at issuance
    assert!(codec.validate(&issued.token).is_ok());

    // not yet valid before issuance
    clock.advance(Duration::seconds(-5));
    assert_eq!(codec.validate(&issued.token), Err(TokenError::NotYetValid));

    // valid one second before expiry, invalid at expiry
    clock.set(issued.expires_at() - Duration::seconds(1));
    assert!(codec.validate(&issued.token).is_ok());
    clock.set(issued.expires_at());
    assert_eq!(codec.validate(&issued.token), Err(TokenError::Expired));
}

#[test]
fn test_expired_token_reports_expiry_not_signature() {
    let (codec, clock) = codec_with_clock();
    let issued = codec.issue("u1", &roles(&["admin"]), Map::new()).unwrap();

    for hours in [2, 24, 24 * 365] {
        clock.set(issued.expires_at() + Duration::hours(hours));
        assert_eq!(codec.validate(&issued.token), Err(TokenError::Expired));
    }
}

#[test]
fn test_signature_mutation_is_rejected() {
    let (codec, _) = codec_with_clock();
    let issued = codec.issue("u1", &roles(&["user"]), Map::new()).unwrap();
    let sig_start = issued.token.rfind('.').unwrap() + 1;
    let sig_len = issued.token.len() - sig_start;

    // The final base64url character carries padding bits, so skip it
    for offset in 0..sig_len - 1 {
        let mut bytes = issued.token.clone().into_bytes();
        let pos = sig_start + offset;
        bytes[pos] = if bytes[pos] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert_eq!(
            codec.validate(&tampered),
            Err(TokenError::Signature),
            "mutation at signature offset {}",
            offset
        );
    }
}

#[test]
fn test_issuer_mismatch_is_rejected() {
    let secret = "shared-signing-key-0a1b2c3d4e5f6a7b8c";
    let ours = TokenCodec::new(&settings(secret, "feature-flag-service"));
    let theirs = TokenCodec::new(&settings(secret, "someone-else"));
    let issued = theirs.issue("u1", &[], Map::new()).unwrap();
    assert_eq!(ours.validate(&issued.token), Err(TokenError::IssuerMismatch));
}

#[test]
fn test_codecs_with_different_secrets_are_independent() {
    let a = TokenCodec::new(&settings("first-secret-key-0123456789-abcdef", "feature-flag-service"));
    let b = TokenCodec::new(&settings("second-secret-key-0123456789-abcdef", "feature-flag-service"));
    let issued = a.issue("u1", &[], Map::new()).unwrap();
    assert!(a.validate(&issued.token).is_ok());
    assert_eq!(b.validate(&issued.token), Err(TokenError::Signature));
}

#[test]
fn test_garbage_is_malformed() {
    let (codec, _) = codec_with_clock();
    assert_eq!(codec.validate(""), Err(TokenError::Malformed));
    assert_eq!(codec.validate("invalid.token.here"), Err(TokenError::Malformed));
}

#[test]
fn test_refresh_tokens_are_distinct_and_typed() {
    let (codec, _) = codec_with_clock();
    let access = codec.issue("u1", &roles(&["user"]), Map::new()).unwrap();
    let refresh = codec.issue_refresh("u1", &roles(&["user"])).unwrap();

    assert_ne!(access.token, refresh.token);
    assert_ne!(access.claims.jti, refresh.claims.jti);
    assert!(refresh.expires_at() > access.expires_at());
    assert_eq!(
        codec.validate_kind(&access.token, TokenKind::Refresh),
        Err(TokenError::WrongKind)
    );
    assert!(codec.validate_kind(&refresh.token, TokenKind::Refresh).is_ok());
}

#[test]
fn test_every_issued_token_has_unique_id() {
    let (codec, _) = codec_with_clock();
    let first = codec.issue("u1", &[], Map::new()).unwrap();
    let second = codec.issue("u1", &[], Map::new()).unwrap();
    assert_ne!(first.claims.jti, second.claims.jti);
    assert_ne!(first.token, second.token);
}

//! Password hashing, verification and policy checks

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{FlagGateError, Result};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;
const MAX_EMAIL_LEN: usize = 254;
const TEMP_PASSWORD_LEN: usize = 12;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*-_=+?";

/// Argon2id hasher. Verification is constant-time with respect to the hash contents.
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
}

impl CredentialHasher {
    /// Hasher with the argon2 crate's recommended parameters
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }

    /// Hasher with explicit cost parameters (memory in KiB)
    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| FlagGateError::Config(format!("invalid argon2 parameters: {}", e)))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| FlagGateError::Internal(format!("failed to hash password: {}", e)))
    }

    /// An unparsable stored hash never verifies
    pub fn verify(&self, password: &str, stored_hash: &str) -> bool {
        match PasswordHash::new(stored_hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks a new password against the complexity policy
pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(FlagGateError::Validation("password cannot be empty".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(FlagGateError::Validation(format!(
            "password must be at least {} characters long",
            MIN_PASSWORD_LEN
        )));
    }
    if password.chars().count() > MAX_PASSWORD_LEN {
        return Err(FlagGateError::Validation(format!(
            "password must be at most {} characters long",
            MAX_PASSWORD_LEN
        )));
    }

    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace());

    if !(has_lower && has_upper && has_digit && has_symbol) {
        return Err(FlagGateError::Validation(
            "password must contain an uppercase letter, a lowercase letter, a digit and a symbol"
                .to_string(),
        ));
    }
    Ok(())
}

/// Minimal structural email check
pub fn validate_email(email: &str) -> Result<()> {
    let invalid = || FlagGateError::Validation("invalid email address".to_string());

    if email.is_empty() || email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }
    Ok(())
}

/// Generates a one-time password handed out at provisioning.
/// Always contains at least one character of each class.
pub fn generate_temp_password() -> String {
    let mut rng = rand::rngs::OsRng;
    let all: Vec<u8> = [LOWER, UPPER, DIGITS, SYMBOLS].concat();

    let mut chars: Vec<u8> = [LOWER, UPPER, DIGITS, SYMBOLS]
        .iter()
        .map(|set| set[rng.gen_range(0..set.len())])
        .collect();
    while chars.len() < TEMP_PASSWORD_LEN {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);

    chars.into_iter().map(char::from).collect()
}

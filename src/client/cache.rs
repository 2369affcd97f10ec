//! Encrypted on-disk credential cache for `featurectl`
//!
//! Two files live in the cache directory: `key.bin` holds a random 256-bit
//! key and `auth.json` holds the AES-256-GCM sealed credential as
//! `{"credentials": "<base64 nonce || ciphertext || tag>"}`. Both are written
//! with mode 0600. Anything that cannot be read back is treated as logged out.
//! Concurrent CLI processes are not serialized; the last writer wins.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::auth::TokenPair;
use crate::config::ClientConfig;
use crate::constants::{AUTH_CACHE_FILE_NAME, CACHE_KEY_LEN, DEFAULT_CLOCK_SKEW_SECS, KEY_FILE_NAME};
use crate::error::{FlagGateError, Result};

/// Tokens persisted between CLI invocations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedCredential {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds at which the access token expires
    pub expires_at: i64,
}

impl CachedCredential {
    pub fn from_pair(pair: &TokenPair, now: DateTime<Utc>) -> Self {
        Self {
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            expires_at: now.timestamp() + pair.expires_in,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }
}

/// Raw AES-256 key material
#[derive(Clone, PartialEq, Eq)]
pub struct CacheKey([u8; CACHE_KEY_LEN]);

impl CacheKey {
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; CACHE_KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| FlagGateError::Internal("failed to generate cache key".to_string()))?;
        Ok(Self(bytes))
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; CACHE_KEY_LEN]>::try_from(bytes).ok().map(Self)
    }

    fn aead_key(&self) -> Result<LessSafeKey> {
        UnboundKey::new(&AES_256_GCM, &self.0)
            .map(LessSafeKey::new)
            .map_err(|_| FlagGateError::Internal("invalid cache key".to_string()))
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CacheKey(..)")
    }
}

/// On-disk shape of `auth.json`
#[derive(Debug, Serialize, Deserialize)]
struct SealedCredentials {
    credentials: String,
}

fn seal(key: &CacheKey, plaintext: &[u8]) -> Result<String> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| FlagGateError::Internal("failed to generate nonce".to_string()))?;

    let mut in_out = plaintext.to_vec();
    key.aead_key()?
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| FlagGateError::Internal("failed to encrypt credentials".to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&in_out);
    Ok(general_purpose::STANDARD.encode(sealed))
}

fn open(key: &CacheKey, encoded: &str) -> Result<Vec<u8>> {
    let sealed = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| FlagGateError::CacheCorruption(format!("invalid base64: {}", e)))?;
    if sealed.len() < NONCE_LEN {
        return Err(FlagGateError::CacheCorruption("sealed data too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| FlagGateError::CacheCorruption("invalid nonce".to_string()))?;
    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .aead_key()?
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| FlagGateError::CacheCorruption("decryption failed".to_string()))?;
    Ok(plaintext.to_vec())
}

fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()?;

    // A pre-existing file keeps its old mode through open()
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_optional(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Credential cache rooted at one directory
#[derive(Debug, Clone)]
pub struct CredentialCache {
    dir: PathBuf,
    clock_skew: Duration,
}

impl CredentialCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            clock_skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECS),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.cache_dir.clone()).with_clock_skew(config.clock_skew)
    }

    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE_NAME)
    }

    fn auth_path(&self) -> PathBuf {
        self.dir.join(AUTH_CACHE_FILE_NAME)
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    /// Returns the stored key, generating and persisting one if needed.
    ///
    /// A key file of the wrong size is replaced; any credential sealed with
    /// it is unreadable and removed as well.
    pub fn ensure_key(&self) -> Result<CacheKey> {
        if let Some(bytes) = read_optional(&self.key_path())? {
            if let Some(key) = CacheKey::from_slice(&bytes) {
                return Ok(key);
            }
            warn!("Malformed login cache, please log in again");
            remove_optional(&self.auth_path())?;
        }

        self.ensure_dir()?;
        let key = CacheKey::generate()?;
        write_private(&self.key_path(), &key.0)?;
        debug!("Generated new credential cache key in {}", self.dir.display());
        Ok(key)
    }

    /// Reads and decrypts the cached credential.
    ///
    /// Missing files give `NotLoggedIn`. Unreadable files or contents clear
    /// what they can and also give `NotLoggedIn`.
    pub fn load(&self) -> Result<CachedCredential> {
        let read = read_optional(&self.key_path())
            .and_then(|key| Ok((key, read_optional(&self.auth_path())?)));
        let (key_bytes, auth_bytes) = match read {
            Ok((Some(key), Some(auth))) => (key, auth),
            Ok(_) => return Err(FlagGateError::NotLoggedIn),
            Err(e) => return Err(self.discard(e)),
        };

        Self::decode(&key_bytes, &auth_bytes).map_err(|e| self.discard(e))
    }

    /// Best-effort removal of an unusable cache; always yields `NotLoggedIn`
    fn discard(&self, cause: FlagGateError) -> FlagGateError {
        warn!("Malformed login cache, please log in again");
        debug!("Credential cache rejected: {}", cause);
        if let Err(e) = self.clear() {
            debug!("Could not clear credential cache: {}", e);
        }
        FlagGateError::NotLoggedIn
    }

    fn decode(key_bytes: &[u8], auth_bytes: &[u8]) -> Result<CachedCredential> {
        let key = CacheKey::from_slice(key_bytes)
            .ok_or_else(|| FlagGateError::CacheCorruption("invalid key length".to_string()))?;
        let sealed: SealedCredentials = serde_json::from_slice(auth_bytes)
            .map_err(|e| FlagGateError::CacheCorruption(format!("invalid auth file: {}", e)))?;
        let plaintext = open(&key, &sealed.credentials)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| FlagGateError::CacheCorruption(format!("invalid credentials: {}", e)))
    }

    /// Encrypts `credential` under `key` with a fresh nonce and overwrites `auth.json`
    pub fn save(&self, key: &CacheKey, credential: &CachedCredential) -> Result<()> {
        let plaintext = serde_json::to_vec(credential)
            .map_err(|e| FlagGateError::Internal(format!("failed to encode credentials: {}", e)))?;
        let sealed = SealedCredentials {
            credentials: seal(key, &plaintext)?,
        };
        let data = serde_json::to_vec(&sealed)
            .map_err(|e| FlagGateError::Internal(format!("failed to encode auth file: {}", e)))?;

        self.ensure_dir()?;
        write_private(&self.auth_path(), &data)
    }

    pub fn is_fresh(&self, credential: &CachedCredential) -> bool {
        self.is_fresh_at(credential, Utc::now())
    }

    /// `now < expires_at - skew`
    pub fn is_fresh_at(&self, credential: &CachedCredential, now: DateTime<Utc>) -> bool {
        credential.expires_at > 0
            && now.timestamp() < credential.expires_at - self.clock_skew.num_seconds()
    }

    /// Removes both cache files; missing files are fine
    pub fn clear(&self) -> Result<()> {
        let auth = remove_optional(&self.auth_path());
        let key = remove_optional(&self.key_path());
        auth.and(key)
    }
}

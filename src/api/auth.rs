//! Credential storage for the request pipeline.
//!
//! The pipeline reads the access token on every request, writes a new pair
//! after a successful refresh, and clears everything when a refresh fails.
//! [`KeychainStore`] keeps the refresh token in the system keychain (never on
//! disk) and the access token in memory; [`MemoryStore`] keeps both in memory.

use std::sync::{PoisonError, RwLock};

use base64::Engine;
use keyring::Entry;
use thiserror::Error;
use zeroize::Zeroize;

use super::types::TokenPair;

/// Keychain service name matching the app identifier.
pub const SERVICE_NAME: &str = "com.cipherbox.desktop";

/// Special username for storing the last logged-in user ID.
const LAST_USER_ID_KEY: &str = "last_user_id";

#[derive(Debug, Clone, Error)]
pub enum KeychainError {
    #[error("Keychain operation failed: {0}")]
    OperationFailed(String),
    #[error("Invalid access token: {0}")]
    InvalidToken(String),
}

impl From<keyring::Error> for KeychainError {
    fn from(err: keyring::Error) -> Self {
        KeychainError::OperationFailed(err.to_string())
    }
}

/// Persistent key-value store for the access/refresh credential pair.
pub trait CredentialStore: Send + Sync {
    /// Current access token, read at request time.
    fn access_token(&self) -> Option<String>;

    /// Stored refresh token, if any.
    fn refresh_token(&self) -> Result<Option<String>, KeychainError>;

    /// Persist a freshly issued pair.
    fn store(&self, tokens: &TokenPair) -> Result<(), KeychainError>;

    /// Forget all credentials. Idempotent.
    fn clear(&self) -> Result<(), KeychainError>;
}

// ── Keychain ──────────────────────────────────────────────────────────────────

/// Keychain-backed store. The refresh token is filed under the user ID taken
/// from the access token's `sub` claim so it can be found on next launch.
pub struct KeychainStore {
    service: String,
    access_token: RwLock<Option<String>>,
    user_id: RwLock<Option<String>>,
}

impl KeychainStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            access_token: RwLock::new(None),
            user_id: RwLock::new(None),
        }
    }

    fn entry(&self, user: &str) -> Result<Entry, KeychainError> {
        Ok(Entry::new(&self.service, user)?)
    }

    /// User whose refresh token is current: the one seen this session, or
    /// the last one that logged in.
    fn current_user(&self) -> Result<Option<String>, KeychainError> {
        if let Some(id) = self
            .user_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Ok(Some(id));
        }
        match self.entry(LAST_USER_ID_KEY)?.get_password() {
            Ok(id) => Ok(Some(id)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(KeychainError::from(e)),
        }
    }
}

impl Default for KeychainStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl CredentialStore for KeychainStore {
    fn access_token(&self) -> Option<String> {
        self.access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn refresh_token(&self) -> Result<Option<String>, KeychainError> {
        let Some(user_id) = self.current_user()? else {
            return Ok(None);
        };
        match self.entry(&user_id)?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(KeychainError::from(e)),
        }
    }

    fn store(&self, tokens: &TokenPair) -> Result<(), KeychainError> {
        let user_id = extract_user_id_from_jwt(&tokens.access_token)?;
        self.entry(&user_id)?.set_password(&tokens.refresh_token)?;
        self.entry(LAST_USER_ID_KEY)?.set_password(&user_id)?;

        *self.user_id.write().unwrap_or_else(PoisonError::into_inner) = Some(user_id);
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(tokens.access_token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), KeychainError> {
        {
            let mut token = self
                .access_token
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(ref mut t) = *token {
                t.zeroize();
            }
            *token = None;
        }

        let Some(user_id) = self.current_user()? else {
            return Ok(());
        };
        *self.user_id.write().unwrap_or_else(PoisonError::into_inner) = None;
        match self.entry(&user_id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeychainError::from(e)),
        }
    }
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// In-memory store, used headless and in tests.
#[derive(Default)]
pub struct MemoryStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    fn refresh_token(&self) -> Result<Option<String>, KeychainError> {
        Ok(self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| t.refresh_token.clone()))
    }

    fn store(&self, tokens: &TokenPair) -> Result<(), KeychainError> {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), KeychainError> {
        // TokenPair zeroizes on drop.
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

/// Extract the user ID (`sub` claim) from a JWT access token.
///
/// The payload is decoded without verification: the server already verified
/// the token, only the `sub` field is needed for the keychain lookup.
pub fn extract_user_id_from_jwt(token: &str) -> Result<String, KeychainError> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_sig), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(KeychainError::InvalidToken("Invalid JWT format".into()));
    };

    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| KeychainError::InvalidToken(format!("Failed to decode JWT payload: {}", e)))?;

    let json: serde_json::Value = serde_json::from_slice(&decoded)
        .map_err(|e| KeychainError::InvalidToken(format!("Failed to parse JWT payload: {}", e)))?;

    json["sub"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| KeychainError::InvalidToken("JWT payload missing 'sub' claim".into()))
}

//! Encrypted, expiring relay state.
//!
//! The application's return-state travels through the IdP as an opaque
//! token. Layout:
//!
//! ```text
//! base64url( version(1) || nonce(12) || AES-256-GCM( expiry(8, BE unix ms) || deflate(json) ) )
//! ```
//!
//! The key is derived with HKDF-SHA256 from the configured secret and the
//! protector's purpose string; the purpose is also bound as associated data,
//! so tokens minted for one purpose never open under another.

use std::{collections::BTreeMap, time::Duration};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;

use super::{SamlError, binding};

/// Minimum secret length in bytes.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Default time a protected relay state stays valid.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(15 * 60);

/// Purpose string for the SAML login round-trip.
pub const LOGIN_PURPOSE: &str = "samlsp.relay-state.login.v1";

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const EXPIRY_LENGTH: usize = 8;
const TOKEN_VERSION: u8 = 1;

/// Application return-state carried through the login round-trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationProperties {
    /// Where to send the user after a successful login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// Opaque application data.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub items: BTreeMap<String, String>,
}

impl AuthenticationProperties {
    pub fn with_redirect_uri(redirect_uri: impl Into<String>) -> Self {
        Self {
            redirect_uri: Some(redirect_uri.into()),
            items: BTreeMap::new(),
        }
    }
}

/// Seals and opens relay-state tokens.
#[derive(Clone)]
pub struct RelayStateProtector {
    cipher: Aes256Gcm,
    purpose: String,
    lifetime: Duration,
}

impl std::fmt::Debug for RelayStateProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStateProtector")
            .field("purpose", &self.purpose)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl RelayStateProtector {
    /// Create a protector from a secret of at least [`MIN_SECRET_LENGTH`] bytes.
    pub fn new(secret: &[u8], purpose: impl Into<String>) -> Result<Self, SamlError> {
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(SamlError::RelayState(format!(
                "secret must be at least {} bytes, got {}",
                MIN_SECRET_LENGTH,
                secret.len()
            )));
        }
        let purpose = purpose.into();

        let hkdf = Hkdf::<Sha256>::new(None, secret);
        let mut key = [0u8; KEY_LENGTH];
        hkdf.expand(purpose.as_bytes(), &mut key)
            .map_err(|e| SamlError::RelayState(format!("key derivation failed: {e}")))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SamlError::RelayState(format!("failed to create cipher: {e}")))?;

        Ok(Self {
            cipher,
            purpose,
            lifetime: DEFAULT_LIFETIME,
        })
    }

    /// Create a protector from a base64-encoded secret.
    pub fn from_base64(secret: &str, purpose: impl Into<String>) -> Result<Self, SamlError> {
        let bytes = STANDARD
            .decode(secret.trim())
            .map_err(|e| SamlError::RelayState(format!("invalid base64 secret: {e}")))?;
        Self::new(&bytes, purpose)
    }

    /// Create a protector with a random secret.
    ///
    /// Tokens do not survive a restart and are not shared between instances.
    pub fn ephemeral(purpose: impl Into<String>) -> Result<Self, SamlError> {
        let mut secret = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut secret);
        Self::new(&secret, purpose)
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Seal `state` with an expiry of now + lifetime.
    pub fn protect<T: Serialize>(&self, state: &T) -> Result<String, SamlError> {
        self.protect_at(state, Utc::now())
    }

    /// Seal `state` as if the current time were `now`.
    pub fn protect_at<T: Serialize>(
        &self,
        state: &T,
        now: DateTime<Utc>,
    ) -> Result<String, SamlError> {
        let json = serde_json::to_vec(state)
            .map_err(|e| SamlError::RelayState(format!("serialization failed: {e}")))?;
        let compressed = binding::deflate(&json)
            .map_err(|e| SamlError::RelayState(format!("compression failed: {e}")))?;

        let lifetime = chrono::Duration::from_std(self.lifetime)
            .map_err(|e| SamlError::RelayState(format!("invalid lifetime: {e}")))?;
        let expires_at = now
            .checked_add_signed(lifetime)
            .ok_or_else(|| SamlError::RelayState("lifetime overflows the expiry time".to_string()))?
            .timestamp_millis();

        let mut plaintext = Vec::with_capacity(EXPIRY_LENGTH + compressed.len());
        plaintext.extend_from_slice(&expires_at.to_be_bytes());
        plaintext.extend_from_slice(&compressed);

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: &plaintext,
                    aad: self.purpose.as_bytes(),
                },
            )
            .map_err(|e| SamlError::RelayState(format!("encryption failed: {e}")))?;

        let mut token = Vec::with_capacity(1 + NONCE_LENGTH + ciphertext.len());
        token.push(TOKEN_VERSION);
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Open a token and deserialize its state.
    pub fn unprotect<T: DeserializeOwned>(&self, token: &str) -> Result<T, SamlError> {
        self.unprotect_at(token, Utc::now())
    }

    /// Open a token as if the current time were `now`.
    pub fn unprotect_at<T: DeserializeOwned>(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<T, SamlError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| SamlError::RelayState(format!("invalid encoding: {e}")))?;

        if raw.len() < 1 + NONCE_LENGTH + TAG_LENGTH {
            return Err(SamlError::RelayState("token too short".to_string()));
        }
        if raw[0] != TOKEN_VERSION {
            return Err(SamlError::RelayState(format!(
                "unsupported token version {}",
                raw[0]
            )));
        }

        let (nonce_bytes, ciphertext) = raw[1..].split_at(NONCE_LENGTH);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: self.purpose.as_bytes(),
                },
            )
            .map_err(|_| SamlError::RelayState("authentication failed".to_string()))?;

        if plaintext.len() < EXPIRY_LENGTH {
            return Err(SamlError::RelayState("token payload too short".to_string()));
        }
        let (expiry_bytes, compressed) = plaintext.split_at(EXPIRY_LENGTH);
        let mut expiry = [0u8; EXPIRY_LENGTH];
        expiry.copy_from_slice(expiry_bytes);
        let expires_at = i64::from_be_bytes(expiry);
        if now.timestamp_millis() >= expires_at {
            return Err(SamlError::RelayState("token expired".to_string()));
        }

        let json = binding::inflate(compressed)
            .map_err(|e| SamlError::RelayState(format!("decompression failed: {e}")))?;
        serde_json::from_slice(&json)
            .map_err(|e| SamlError::RelayState(format!("deserialization failed: {e}")))
    }
}

/// Generate a random base64 secret suitable for `relay_state_secret`.
pub fn generate_secret() -> String {
    let mut secret = [0u8; KEY_LENGTH];
    OsRng.fill_bytes(&mut secret);
    STANDARD.encode(secret)
}

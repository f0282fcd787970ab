//! Session identity and session key derivation
//!
//! A session key is the hex-encoded HMAC-SHA256 of the username, keyed with
//! the server secret. It is a pure function of (username, secret), so the
//! broadcast stage can re-derive and check it on every chat frame without
//! keeping a key table.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, Result};
use crate::types::random_alphanumeric;

type HmacSha256 = Hmac<Sha256>;

/// Length of generated secrets and client temporary keys
pub const GENERATED_KEY_LEN: usize = 32;

/// Identity attached to one connection
///
/// Empty until the handshake completes; the authentication stage replaces
/// it wholesale rather than mutating fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    username: Option<String>,
    session_key: Option<String>,
}

impl Session {
    /// Create an empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Session with a username but no key yet (client side, pre-handshake)
    pub fn for_user(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            session_key: None,
        }
    }

    /// Session after a completed handshake
    pub fn authenticated(username: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            session_key: Some(session_key.into()),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn session_key(&self) -> Option<&str> {
        self.session_key.as_deref()
    }

    /// Both username and key are present
    pub fn is_authenticated(&self) -> bool {
        self.username.is_some() && self.session_key.is_some()
    }

    /// Get the display name for this session
    ///
    /// Returns the username if set, otherwise "Unknown".
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or("Unknown")
    }
}

/// Process-wide secret used to sign session keys
///
/// Holds a keyed MAC so the secret is validated once at startup.
#[derive(Clone)]
pub struct ServerSecret {
    mac: HmacSha256,
}

impl ServerSecret {
    /// Build from raw secret bytes
    ///
    /// Fails with a configuration error for an empty secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(AppError::Config("server secret must not be empty".to_string()));
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|e| AppError::Config(format!("unusable server secret: {}", e)))?;
        Ok(Self { mac })
    }

    /// Build from a freshly generated random secret
    pub fn generate() -> Result<Self> {
        Self::new(random_alphanumeric(GENERATED_KEY_LEN))
    }

    /// Derive the session key for `username`
    pub fn derive_key(&self, username: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(username.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a presented key against the one derived for `username`
    ///
    /// Only the exact lowercase hex string `derive_key` produces matches, so
    /// this is string equality. The MAC comparison itself is constant-time.
    pub fn verify(&self, username: &str, presented: &str) -> bool {
        if presented.bytes().any(|b| b.is_ascii_uppercase()) {
            return false;
        }
        let Ok(raw) = hex::decode(presented) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(username.as_bytes());
        mac.verify_slice(&raw).is_ok()
    }
}

impl std::fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ServerSecret(..)")
    }
}

/// Derive a session key from a username and a salt
pub fn derive_session_key(username: &str, salt: impl AsRef<[u8]>) -> Result<String> {
    Ok(ServerSecret::new(salt)?.derive_key(username))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_session() {
        let session = Session::new();
        assert!(session.username().is_none());
        assert!(session.session_key().is_none());
        assert!(!session.is_authenticated());
        assert_eq!(session.display_name(), "Unknown");
    }

    #[test]
    fn test_authenticated_session() {
        let session = Session::authenticated("alice", "k");
        assert!(session.is_authenticated());
        assert_eq!(session.display_name(), "alice");
        assert_eq!(session.session_key(), Some("k"));
    }

    #[test]
    fn test_for_user_is_not_authenticated() {
        assert!(!Session::for_user("bob").is_authenticated());
    }

    #[test]
    fn test_derive_key_deterministic() {
        let k1 = derive_session_key("alice", "S1").unwrap();
        let k2 = derive_session_key("alice", "S1").unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64);
    }

    #[test]
    fn test_derive_key_input_sensitive() {
        let base = derive_session_key("alice", "S1").unwrap();
        assert_ne!(base, derive_session_key("bob", "S1").unwrap());
        assert_ne!(base, derive_session_key("alice", "S2").unwrap());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(ServerSecret::new(""), Err(AppError::Config(_))));
    }

    #[test]
    fn test_verify() {
        let secret = ServerSecret::new("S1").unwrap();
        let key = secret.derive_key("alice");
        assert!(secret.verify("alice", &key));
        assert!(!secret.verify("bob", &key));
        assert!(!secret.verify("alice", "not-hex"));
        assert!(!secret.verify("alice", ""));
    }

    #[test]
    fn test_verify_rejects_uppercase_copy() {
        let secret = ServerSecret::new("S1").unwrap();
        let key = secret.derive_key("alice");
        assert!(key.bytes().any(|b| b.is_ascii_alphabetic()));
        assert!(!secret.verify("alice", &key.to_ascii_uppercase()));
        assert!(secret.verify("alice", &key));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let secret = ServerSecret::new("hunter2").unwrap();
        assert!(!format!("{:?}", secret).contains("hunter2"));
    }
}

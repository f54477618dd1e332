//! Password hashing and bearer-token sessions.
//!
//! Passwords are hashed with Argon2; tokens are 32 bytes of entropy,
//! handed to the client base64-encoded and held server-side only as a
//! SHA-256 digest with an expiry.

use std::collections::HashMap;
use std::sync::Mutex;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

use longshot_engine::UserId;

pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| format!("password hashing failed: {e}"))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub user_id: UserId,
    pub is_admin: bool,
    pub expires_at_ms: u64,
}

/// In-memory bearer-token registry. Sessions die with the process; clients
/// re-authenticate after a restart.
pub struct SessionManager {
    ttl_ms: u64,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(ttl_ms: u64) -> Self {
        Self { ttl_ms, sessions: Mutex::new(HashMap::new()) }
    }

    /// Create a session and hand back the raw bearer token.
    pub fn issue(&self, user_id: UserId, is_admin: bool, now_ms: u64) -> String {
        let token = generate_token();
        let session = Session { user_id, is_admin, expires_at_ms: now_ms + self.ttl_ms };
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(token_digest(&token), session);
        }
        token
    }

    /// Look a token up, dropping it if expired.
    pub fn resolve(&self, token: &str, now_ms: u64) -> Option<Session> {
        let digest = token_digest(token);
        let mut sessions = self.sessions.lock().ok()?;
        match sessions.get(&digest).copied() {
            Some(session) if session.expires_at_ms > now_ms => Some(session),
            Some(_) => {
                sessions.remove(&digest);
                None
            }
            None => None,
        }
    }

    pub fn revoke(&self, token: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&token_digest(token));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-hash"));
    }

    #[test]
    fn tokens_resolve_until_expiry() {
        let sessions = SessionManager::new(1_000);
        let token = sessions.issue(7, true, 0);

        let session = sessions.resolve(&token, 500).unwrap();
        assert_eq!(session.user_id, 7);
        assert!(session.is_admin);

        assert!(sessions.resolve(&token, 1_001).is_none());
        // Expired tokens are pruned, not resurrected.
        assert!(sessions.resolve(&token, 500).is_none());
    }

    #[test]
    fn revoked_tokens_stop_resolving() {
        let sessions = SessionManager::new(1_000);
        let token = sessions.issue(7, false, 0);
        sessions.revoke(&token);
        assert!(sessions.resolve(&token, 1).is_none());
    }

    #[test]
    fn tokens_are_unique() {
        let sessions = SessionManager::new(1_000);
        assert_ne!(sessions.issue(1, false, 0), sessions.issue(1, false, 0));
    }
}

//! services/api/src/sync/gate.rs
//!
//! The access gate: decides whether a secret opens a note's live session.
//!
//! Hashes are Argon2id PHC strings. Verification runs on the blocking pool and
//! relies on Argon2's constant-time comparison. A secret presented for a note
//! that does not exist is checked against a throwaway hash, so a caller cannot
//! tell "no such note" from "wrong password" by the answer or by its timing.

use std::sync::{Arc, OnceLock};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use quickpad_core::ports::{NoteRepository, PortError, PortResult};
use tracing::{error, warn};

/// Outcome of presenting a secret for a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Denied,
}

impl AccessDecision {
    /// A denial as the error every caller reports: `PortError::Unauthorized`.
    pub fn require(self) -> PortResult<()> {
        match self {
            AccessDecision::Granted => Ok(()),
            AccessDecision::Denied => Err(PortError::Unauthorized),
        }
    }
}

pub struct AccessGate {
    repo: Arc<dyn NoteRepository>,
    /// Computed up front so the first missing-note check costs no extra hash.
    dummy_hash: Option<&'static str>,
}

impl AccessGate {
    pub fn new(repo: Arc<dyn NoteRepository>) -> Self {
        Self {
            repo,
            dummy_hash: dummy_hash(),
        }
    }

    /// Checks `secret` against the note's stored hash.
    ///
    /// Unprotected notes are always granted. `NotFound` is only returned when no
    /// secret was supplied; with a secret, a missing note is an ordinary denial.
    pub async fn authorize(&self, note_id: &str, secret: Option<&str>) -> PortResult<AccessDecision> {
        let note = match self.repo.load(note_id).await {
            Ok(note) => Some(note),
            Err(PortError::NotFound(_)) if secret.is_some() => None,
            Err(e) => return Err(e),
        };

        let hash = match &note {
            Some(note) => match &note.password_hash {
                None => return Ok(AccessDecision::Granted),
                Some(hash) => hash.clone(),
            },
            None => match self.dummy_hash {
                Some(hash) => hash.to_string(),
                None => return Ok(AccessDecision::Denied),
            },
        };

        let Some(secret) = secret else {
            return Ok(AccessDecision::Denied);
        };

        let secret = secret.to_string();
        let verified = tokio::task::spawn_blocking(move || verify_password(&secret, &hash))
            .await
            .unwrap_or_else(|e| {
                error!("Password verification task failed: {:?}", e);
                Ok(false)
            });

        match verified {
            Ok(true) if note.is_some() => Ok(AccessDecision::Granted),
            Ok(_) => Ok(AccessDecision::Denied),
            Err(e) => {
                warn!(note_id = %note_id, "Stored password hash is unusable: {}", e);
                Ok(AccessDecision::Denied)
            }
        }
    }
}

/// Hash a plaintext secret using Argon2id with a random salt.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a plaintext secret against a stored PHC-formatted hash.
///
/// Returns `Ok(false)` on a mismatch and `Err` only if the stored hash is malformed.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed_hash = PasswordHash::new(hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e),
    }
}

static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

fn dummy_hash() -> Option<&'static str> {
    DUMMY_HASH
        .get_or_init(|| hash_password("quickpad-missing-note").ok())
        .as_deref()
}

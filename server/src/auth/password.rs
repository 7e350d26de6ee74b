use anyhow::anyhow;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString};
use argon2::Argon2;

use super::PasswordHasher;
use crate::error::ClinicalError;

/// Argon2id with the crate's default cost parameters, stored as PHC strings.
#[derive(Clone, Default)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, ClinicalError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ClinicalError::Internal(anyhow!("failed to hash password: {e}")))
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => self.argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "stored password hash is unreadable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_verifies_only_the_same_password() {
        let hasher = Argon2Hasher::new();
        let stored = hasher.hash("correct horse battery").unwrap();

        assert!(stored.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse battery", &stored));
        assert!(!hasher.verify("correct horse battery!", &stored));
    }

    #[test]
    fn test_salts_differ_between_hashes() {
        let hasher = Argon2Hasher::new();
        let first = hasher.hash("same password").unwrap();
        let second = hasher.hash("same password").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!Argon2Hasher::new().verify("anything", "not-a-phc-string"));
    }
}

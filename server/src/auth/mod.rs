//! Identity and access: bearer-token authentication, password hashing and
//! the clinical-write role guard.

mod extract;
mod password;
mod token;

pub use extract::{Authenticated, ClinicalWriter};
pub use password::Argon2Hasher;
pub use token::{Claims, HmacTokenAuthority};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClinicalError;
use crate::models::UserRole;

/// The acting user, as derived from a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub role: UserRole,
    pub display_name: String,
}

/// Issues and verifies bearer tokens.
pub trait TokenAuthority: Send + Sync {
    /// How long an issued token stays valid.
    fn ttl(&self) -> Duration;

    fn issue(&self, principal: &Principal) -> Result<String, ClinicalError>;

    /// Fails with [`ClinicalError::InvalidToken`] for anything malformed,
    /// expired, wrongly signed or meant for another audience.
    fn verify(&self, token: &str) -> Result<Principal, ClinicalError>;
}

/// One-way password hashing for stored credentials.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, ClinicalError>;

    /// False for a wrong password and for a stored hash that cannot be read.
    fn verify(&self, password: &str, stored: &str) -> bool;
}

/// Resolves an `Authorization` header value to a principal.
pub fn authenticate(
    authority: &dyn TokenAuthority,
    header: Option<&str>,
) -> Result<Principal, ClinicalError> {
    let token = header.and_then(bearer_token).ok_or(ClinicalError::Unauthenticated)?;
    authority.verify(token)
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Only physicians and nurses may create or change clinical records.
pub fn authorize_clinical_write(principal: &Principal) -> Result<(), ClinicalError> {
    if principal.role.is_clinical() {
        Ok(())
    } else {
        tracing::warn!(
            user_id = principal.user_id,
            role = %principal.role,
            "clinical write refused"
        );
        Err(ClinicalError::Forbidden {
            role: principal.role,
        })
    }
}

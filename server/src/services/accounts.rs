use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::{PasswordHasher, Principal, TokenAuthority};
use crate::db::users::EMAIL_CONSTRAINT;
use crate::db::UserRepository;
use crate::error::ClinicalError;
use crate::models::{NewUser, User, UserRole, UserStatus};
use crate::validation::{looks_like_email, Validator, MAX_NAME_LENGTH};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;
const MAX_EMAIL_LENGTH: usize = 254;

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    #[serde(alias = "email_address")]
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub license_number: Option<String>,
    pub role: Option<UserRole>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    #[serde(alias = "email_address")]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

/// A signed-in user and the bearer token for their next requests.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    pub token_type: &'static str,
    /// Token lifetime in seconds.
    pub expires_in: u64,
}

/// Account lifecycle: registration, password login and password rotation.
#[derive(Clone)]
pub struct AccountService {
    users: UserRepository,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenAuthority>,
}

impl AccountService {
    pub fn new(users: UserRepository, hasher: Arc<dyn PasswordHasher>, tokens: Arc<dyn TokenAuthority>) -> Self {
        Self { users, hasher, tokens }
    }

    /// Creates an account, physician by default, and signs it in.
    pub async fn register(&self, input: Registration) -> Result<Session, ClinicalError> {
        validate_registration(&input)?;

        let password_hash = self.hash(input.password).await?;
        let new_user = NewUser {
            email: input.email.trim().to_string(),
            password_hash,
            full_name: input.full_name.trim().to_string(),
            license_number: input
                .license_number
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            role: input.role.unwrap_or(UserRole::Physician),
        };

        let user = match self.users.insert(&new_user).await {
            Ok(user) => user,
            Err(err) if err.unique_violation() == Some(EMAIL_CONSTRAINT) => {
                return Err(ClinicalError::DuplicateIdentifier {
                    field: "email",
                    value: new_user.email,
                })
            }
            Err(err) => return Err(err.into()),
        };

        self.session(user)
    }

    /// Unknown email, wrong password and disabled account all fail the same way.
    pub async fn login(&self, input: Credentials) -> Result<Session, ClinicalError> {
        let mut v = Validator::new();
        v.required_text("email", Some(input.email.as_str()), MAX_EMAIL_LENGTH);
        v.required_text("password", Some(input.password.as_str()), MAX_PASSWORD_LENGTH);
        v.finish()?;

        let user = match self.users.find_by_email(&input.email).await? {
            Some(user) if user.status == UserStatus::Active => user,
            _ => {
                tracing::warn!("login refused for unknown or inactive account");
                return Err(ClinicalError::InvalidCredentials);
            }
        };

        if !self.verify(input.password, user.password_hash.clone()).await? {
            tracing::warn!(user_id = user.id, "login refused, wrong password");
            return Err(ClinicalError::InvalidCredentials);
        }

        self.users.record_login(user.id).await?;
        tracing::info!("✓ User signed in: {} ({})", user.id, user.role);

        let user = self.users.find_by_id(user.id).await?.unwrap_or(user);
        self.session(user)
    }

    pub async fn change_password(&self, actor: &Principal, input: PasswordChange) -> Result<(), ClinicalError> {
        let mut v = Validator::new();
        v.required_text("current_password", Some(input.current_password.as_str()), MAX_PASSWORD_LENGTH);
        check_new_password(&mut v, "new_password", &input.new_password);
        v.finish()?;

        let user = self
            .users
            .find_by_id(actor.user_id)
            .await?
            .filter(|user| user.status == UserStatus::Active)
            .ok_or(ClinicalError::InvalidCredentials)?;

        if !self.verify(input.current_password, user.password_hash).await? {
            return Err(ClinicalError::validation("current_password", "is incorrect"));
        }

        let password_hash = self.hash(input.new_password).await?;
        if !self.users.update_password(user.id, &password_hash).await? {
            return Err(ClinicalError::InvalidCredentials);
        }

        tracing::info!("✓ Password changed for user {}", user.id);
        Ok(())
    }

    fn session(&self, user: User) -> Result<Session, ClinicalError> {
        let access_token = self.tokens.issue(&Principal {
            user_id: user.id,
            role: user.role,
            display_name: user.full_name.clone(),
        })?;

        Ok(Session {
            user,
            access_token,
            token_type: "Bearer",
            expires_in: self.tokens.ttl().as_secs(),
        })
    }

    // Argon2 is CPU-bound; it runs on the blocking pool.
    async fn hash(&self, password: String) -> Result<String, ClinicalError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| ClinicalError::Internal(e.into()))?
    }

    async fn verify(&self, password: String, stored: String) -> Result<bool, ClinicalError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &stored))
            .await
            .map_err(|e| ClinicalError::Internal(e.into()))
    }
}

fn check_new_password(v: &mut Validator, field: &str, password: &str) {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        v.reject(field, format!("must be at least {} characters", MIN_PASSWORD_LENGTH));
    } else if length > MAX_PASSWORD_LENGTH {
        v.reject(field, format!("must be at most {} characters", MAX_PASSWORD_LENGTH));
    }
}

fn validate_registration(input: &Registration) -> Result<(), ClinicalError> {
    let mut v = Validator::new();
    v.required_text("email", Some(input.email.as_str()), MAX_EMAIL_LENGTH);
    if !input.email.trim().is_empty() && !looks_like_email(input.email.trim()) {
        v.reject("email", "must be a valid email address");
    }
    check_new_password(&mut v, "password", &input.password);
    v.required_text("full_name", Some(input.full_name.as_str()), MAX_NAME_LENGTH);
    v.optional_text("license_number", input.license_number.as_deref(), 50);
    v.finish()
}

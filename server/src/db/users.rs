use std::sync::Arc;

use super::gateway::{Gateway, GatewayError};
use crate::models::{NewUser, User};

pub const EMAIL_CONSTRAINT: &str = "users_email_lower_key";

/// Clinician and administrator accounts. Rows are never deleted.
#[derive(Clone)]
pub struct UserRepository {
    gateway: Arc<Gateway>,
}

impl UserRepository {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Stores a new account. A second account with the same email, in any
    /// letter case, fails with a unique violation on [`EMAIL_CONSTRAINT`].
    pub async fn insert(&self, user: &NewUser) -> Result<User, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let created = sqlx::query_as::<_, User>(
            "INSERT INTO users (email, password_hash, full_name, license_number, role)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(user.email.trim())
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(&user.license_number)
        .bind(user.role)
        .fetch_one(&mut *conn)
        .await?;

        tracing::info!("✓ User created: {} ({})", created.id, created.role);
        Ok(created)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(user)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email.trim())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(user)
    }

    /// `false` when no account has `id`.
    pub async fn update_password(&self, id: i64, password_hash: &str) -> Result<bool, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn record_login(&self, id: i64) -> Result<(), GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

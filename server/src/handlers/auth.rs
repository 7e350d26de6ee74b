use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use super::error::ApiError;
use super::detached;
use crate::app::SharedState;
use crate::auth::Authenticated;
use crate::services::accounts::{Credentials, PasswordChange, Registration, Session};

/// POST /auth/register
/// Open registration; the new account is signed in straight away
pub async fn register(
    State(state): State<SharedState>,
    body: Result<Json<Registration>, JsonRejection>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let Json(input) = body?;

    let accounts = state.accounts.clone();
    let session = detached(async move { accounts.register(input).await }).await?;

    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /auth/login
pub async fn login(
    State(state): State<SharedState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<Session>, ApiError> {
    let Json(input) = body?;
    Ok(Json(state.accounts.login(input).await?))
}

/// PUT /auth/password
pub async fn change_password(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    body: Result<Json<PasswordChange>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(input) = body?;

    let accounts = state.accounts.clone();
    detached(async move { accounts.change_password(&principal, input).await }).await?;

    Ok(Json(json!({ "message": "Password updated" })))
}

/// GET /auth/verify
/// Echoes the verified principal and, when registered, the user profile
pub async fn verify_token(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
) -> Result<Json<Value>, ApiError> {
    let user = match state.users.find_by_id(principal.user_id).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(user_id = principal.user_id, error = %e, "user profile lookup failed");
            None
        }
    };

    Ok(Json(json!({
        "authenticated": true,
        "principal": principal,
        "user": user,
    })))
}

pub mod auth;
pub mod encounters;
pub mod error;
pub mod health;
pub mod patients;

use std::future::Future;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::ClinicalError;
use self::error::ApiError;

/// Runs a write on its own task so it reaches commit or rollback even when
/// the client disconnects mid-request.
pub(crate) async fn detached<F, T>(work: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ClinicalError>> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::spawn(work).await??)
}

/// `201 Created` with a `Location` header pointing at the new resource.
pub(crate) fn created<T: Serialize>(location: String, body: T) -> Response {
    (StatusCode::CREATED, [(header::LOCATION, location)], Json(body)).into_response()
}

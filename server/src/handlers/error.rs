use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ClinicalError, FieldError};

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
    /// Correlates an unexpected failure with the server log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub timestamp: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: message.into(),
                error_code,
                details: None,
                reference: None,
                timestamp: Utc::now().to_rfc3339(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

fn status_for(err: &ClinicalError) -> StatusCode {
    match err {
        ClinicalError::Unauthenticated | ClinicalError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        ClinicalError::InvalidToken(_) | ClinicalError::Forbidden { .. } => StatusCode::FORBIDDEN,
        ClinicalError::PatientNotFound(_) | ClinicalError::EncounterNotFound(_) => StatusCode::NOT_FOUND,
        ClinicalError::DuplicateIdentifier { .. } | ClinicalError::HasDependentEncounters { .. } => {
            StatusCode::CONFLICT
        }
        ClinicalError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
        ClinicalError::ServiceUnavailable | ClinicalError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
        ClinicalError::EncounterCreateFailed(_)
        | ClinicalError::TransactionFailed { .. }
        | ClinicalError::Query(_)
        | ClinicalError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ClinicalError> for ApiError {
    fn from(err: ClinicalError) -> Self {
        let status = status_for(&err);

        if err.is_unexpected() {
            let reference = format!("ERR-{}", Uuid::new_v4());
            tracing::error!(reference = %reference, error = ?err, "request failed");
            let mut api = ApiError::new(status, err.code(), "An unexpected error occurred");
            api.body.reference = Some(reference);
            return api;
        }

        if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::warn!(error = %err, "database unavailable");
            return ApiError::new(status, err.code(), "Service temporarily unavailable, try again later");
        }

        let mut api = ApiError::new(status, err.code(), err.to_string());
        if let ClinicalError::ValidationFailed(fields) = err {
            api.body.details = Some(fields);
        }
        api
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(format!("invalid query string: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::bad_request(format!("invalid path parameter: {}", rejection.body_text()))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ClinicalError::Internal(anyhow::anyhow!("request task failed: {err}")).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

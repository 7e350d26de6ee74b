//! Domain error taxonomy.
//!
//! Every fallible operation below the HTTP layer returns [`ClinicalError`].
//! Callers branch on the variant; message text is for humans and logs only.

use serde::Serialize;
use thiserror::Error;

use crate::db::GatewayError;
use crate::models::UserRole;

/// One rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClinicalError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("role '{role}' may not modify clinical records")]
    Forbidden { role: UserRole },

    #[error("patient {0} not found")]
    PatientNotFound(i64),

    #[error("encounter {0} not found")]
    EncounterNotFound(i64),

    #[error("{field} '{value}' is already in use")]
    DuplicateIdentifier { field: &'static str, value: String },

    #[error("patient {patient_id} has {count} recorded encounter(s)")]
    HasDependentEncounters { patient_id: i64, count: i64 },

    #[error("validation failed")]
    ValidationFailed(Vec<FieldError>),

    #[error("database is not ready")]
    ServiceUnavailable,

    #[error("database connection unavailable")]
    Connection(#[source] GatewayError),

    #[error("encounter could not be recorded")]
    EncounterCreateFailed(#[source] GatewayError),

    #[error("{operation} failed and was rolled back")]
    TransactionFailed {
        operation: &'static str,
        #[source]
        source: GatewayError,
    },

    #[error("query failed")]
    Query(#[source] GatewayError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ClinicalError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ClinicalError::ValidationFailed(vec![FieldError::new(field, message)])
    }

    /// Stable machine-readable code for the variant.
    pub fn code(&self) -> &'static str {
        match self {
            ClinicalError::Unauthenticated => "UNAUTHENTICATED",
            ClinicalError::InvalidToken(_) => "INVALID_TOKEN",
            ClinicalError::InvalidCredentials => "INVALID_CREDENTIALS",
            ClinicalError::Forbidden { .. } => "FORBIDDEN",
            ClinicalError::PatientNotFound(_) => "PATIENT_NOT_FOUND",
            ClinicalError::EncounterNotFound(_) => "ENCOUNTER_NOT_FOUND",
            ClinicalError::DuplicateIdentifier { .. } => "DUPLICATE_IDENTIFIER",
            ClinicalError::HasDependentEncounters { .. } => "HAS_DEPENDENT_ENCOUNTERS",
            ClinicalError::ValidationFailed(_) => "VALIDATION_FAILED",
            ClinicalError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ClinicalError::Connection(_) => "CONNECTION_ERROR",
            ClinicalError::EncounterCreateFailed(_) => "ENCOUNTER_CREATE_FAILED",
            ClinicalError::TransactionFailed { .. } => "TRANSACTION_FAILED",
            ClinicalError::Query(_) => "QUERY_ERROR",
            ClinicalError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Failures whose details must stay in the server log.
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            ClinicalError::EncounterCreateFailed(_)
                | ClinicalError::TransactionFailed { .. }
                | ClinicalError::Query(_)
                | ClinicalError::Internal(_)
        )
    }

    /// Maps a failed write inside a unit of work. Connectivity problems keep
    /// their transient classification so callers can surface a 503.
    pub fn transaction(operation: &'static str, err: GatewayError) -> Self {
        match err {
            GatewayError::ServiceUnavailable { .. } => ClinicalError::ServiceUnavailable,
            err if err.is_transient() => ClinicalError::Connection(err),
            err => ClinicalError::TransactionFailed {
                operation,
                source: err,
            },
        }
    }
}

impl From<GatewayError> for ClinicalError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::ServiceUnavailable { .. } => ClinicalError::ServiceUnavailable,
            err if err.is_transient() => ClinicalError::Connection(err),
            err => ClinicalError::Query(err),
        }
    }
}

impl From<sqlx::Error> for ClinicalError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::from(err).into()
    }
}

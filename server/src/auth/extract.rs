use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::{authenticate, authorize_clinical_write, Principal};
use crate::app::SharedState;
use crate::error::ClinicalError;
use crate::handlers::error::ApiError;

/// Any caller holding a valid bearer token.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

/// A caller allowed to change clinical records.
#[derive(Debug, Clone)]
pub struct ClinicalWriter(pub Principal);

fn principal_from(parts: &Parts, state: &SharedState) -> Result<Principal, ClinicalError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| ClinicalError::InvalidToken("authorization header is not valid text".to_string()))
        })
        .transpose()?;
    authenticate(state.tokens.as_ref(), header)
}

#[axum::async_trait]
impl FromRequestParts<SharedState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        Ok(Authenticated(principal_from(parts, state)?))
    }
}

#[axum::async_trait]
impl FromRequestParts<SharedState> for ClinicalWriter {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let principal = principal_from(parts, state)?;
        authorize_clinical_write(&principal)?;
        Ok(ClinicalWriter(principal))
    }
}

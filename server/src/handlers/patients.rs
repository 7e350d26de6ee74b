use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::error::ApiError;
use super::{created, detached};
use crate::app::SharedState;
use crate::auth::{Authenticated, ClinicalWriter};
use crate::models::pagination::DEFAULT_PATIENT_PAGE_SIZE;
use crate::models::{NewPatient, Page, PageRequest, PatientFilter, PatientRecord, PatientStatus};
use crate::services::patients::PatientOverview;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    /// Primary provider id
    #[serde(alias = "provider_id")]
    pub provider: Option<i64>,
    pub status: Option<PatientStatus>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// POST /patients
/// Register a patient; the medical record number is generated
pub async fn create_patient(
    State(state): State<SharedState>,
    ClinicalWriter(principal): ClinicalWriter,
    body: Result<Json<NewPatient>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(data) = body?;

    let directory = state.patients.clone();
    let patient = detached(async move { directory.create(&principal, data).await }).await?;

    Ok(created(format!("/patients/{}", patient.patient.id), patient))
}

/// GET /patients
/// Paginated listing with optional search, provider and status filters
pub async fn list_patients(
    State(state): State<SharedState>,
    Authenticated(_): Authenticated,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Page<PatientRecord>>, ApiError> {
    let Query(query) = query?;
    let request = PageRequest::new(query.page, query.limit, DEFAULT_PATIENT_PAGE_SIZE)?;
    let filter = PatientFilter {
        search: query.search,
        provider_id: query.provider,
        status: query.status,
    };

    Ok(Json(state.patients.list(request, &filter).await?))
}

/// GET /patients/search?q=
pub async fn search_patients(
    State(state): State<SharedState>,
    Authenticated(_): Authenticated,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let matches = state
        .patients
        .search(query.q.as_deref().unwrap_or_default())
        .await?;

    Ok(Json(json!({
        "count": matches.len(),
        "data": matches,
    })))
}

/// GET /patients/:id
/// The patient with recent encounters and active prescriptions
pub async fn get_patient(
    State(state): State<SharedState>,
    Authenticated(_): Authenticated,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<PatientOverview>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.patients.overview(id).await?))
}

/// PUT /patients/:id
pub async fn update_patient(
    State(state): State<SharedState>,
    ClinicalWriter(principal): ClinicalWriter,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<PatientRecord>, ApiError> {
    let Path(id) = id?;
    let Json(partial) = body?;

    let directory = state.patients.clone();
    let patient = detached(async move { directory.update(&principal, id, &partial).await }).await?;
    Ok(Json(patient))
}

/// DELETE /patients/:id
/// Refused with 409 while encounters reference the patient
pub async fn delete_patient(
    State(state): State<SharedState>,
    ClinicalWriter(principal): ClinicalWriter,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;

    let directory = state.patients.clone();
    detached(async move { directory.delete(&principal, id).await }).await?;

    Ok(Json(json!({
        "message": "Patient deleted",
        "id": id,
    })))
}

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    response::Response,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::error::ApiError;
use super::{created, detached};
use crate::app::SharedState;
use crate::auth::{Authenticated, ClinicalWriter};
use crate::models::pagination::DEFAULT_ENCOUNTER_PAGE_SIZE;
use crate::models::{
    DateRange, DiagnosisEntry, EncounterAggregate, EncounterSummary, MedicationEntry,
    NewEncounter, Page, PageRequest,
};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<i64>,
}

/// POST /encounters
/// Record an encounter with its diagnoses and prescriptions in one transaction
pub async fn create_encounter(
    State(state): State<SharedState>,
    ClinicalWriter(principal): ClinicalWriter,
    body: Result<Json<NewEncounter>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(input) = body?;

    let manager = state.encounters.clone();
    let aggregate = detached(async move { manager.create(&principal, input).await }).await?;

    Ok(created(format!("/encounters/{}", aggregate.encounter.id), aggregate))
}

/// GET /encounters/:id
pub async fn get_encounter(
    State(state): State<SharedState>,
    Authenticated(_): Authenticated,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<EncounterAggregate>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.encounters.get_by_id(id).await?))
}

/// GET /encounters/patient/:patient_id
/// A patient's encounters, newest first, optionally bounded by visit date
pub async fn get_patient_encounters(
    State(state): State<SharedState>,
    Authenticated(_): Authenticated,
    patient_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Page<EncounterSummary>>, ApiError> {
    let Path(patient_id) = patient_id?;
    let Query(query) = query?;

    let request = PageRequest::new(query.page, query.limit, DEFAULT_ENCOUNTER_PAGE_SIZE)?;
    let range = DateRange {
        start: query.start_date,
        end: query.end_date,
    };

    Ok(Json(state.encounters.get_by_patient(patient_id, range, request).await?))
}

/// GET /encounters/recent?limit=
pub async fn recent_encounters(
    State(state): State<SharedState>,
    Authenticated(_): Authenticated,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let encounters = state.encounters.recent(query.limit).await?;

    Ok(Json(json!({
        "count": encounters.len(),
        "data": encounters,
    })))
}

/// PUT /encounters/:id
pub async fn update_encounter(
    State(state): State<SharedState>,
    ClinicalWriter(principal): ClinicalWriter,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<EncounterAggregate>, ApiError> {
    let Path(id) = id?;
    let Json(partial) = body?;

    let manager = state.encounters.clone();
    let aggregate = detached(async move { manager.update(&principal, id, &partial).await }).await?;
    Ok(Json(aggregate))
}

/// DELETE /encounters/:id
/// Removes the encounter together with its diagnoses and prescriptions
pub async fn delete_encounter(
    State(state): State<SharedState>,
    ClinicalWriter(principal): ClinicalWriter,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;

    let manager = state.encounters.clone();
    detached(async move { manager.delete(&principal, id).await }).await?;

    Ok(Json(json!({
        "message": "Encounter deleted",
        "id": id,
    })))
}

/// POST /encounters/:id/diagnoses
pub async fn add_diagnosis(
    State(state): State<SharedState>,
    ClinicalWriter(principal): ClinicalWriter,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<DiagnosisEntry>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let Json(entry) = body?;

    let manager = state.encounters.clone();
    let aggregate = detached(async move { manager.add_diagnosis(&principal, id, entry.into()).await }).await?;

    Ok(created(format!("/encounters/{}", id), aggregate))
}

/// POST /encounters/:id/prescriptions
pub async fn add_prescription(
    State(state): State<SharedState>,
    ClinicalWriter(principal): ClinicalWriter,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<MedicationEntry>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let Json(entry) = body?;

    let manager = state.encounters.clone();
    let aggregate = detached(async move { manager.add_prescription(&principal, id, entry).await }).await?;

    Ok(created(format!("/encounters/{}", id), aggregate))
}

use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::{Postgres, QueryBuilder};

use super::columns::{Assignment, Column, ColumnKind, ColumnSet};
use super::gateway::{Gateway, GatewayError};
use crate::models::{
    BloodType, Gender, NewPatient, Page, PageRequest, Patient, PatientFilter, PatientRecord,
    PatientStatus, PatientSummary,
};

pub const MRN_CONSTRAINT: &str = "patients_mrn_key";
pub const NATIONAL_ID_CONSTRAINT: &str = "patients_national_id_key";

/// Fields a patient update may touch. The medical record number never
/// changes once assigned.
pub static PATIENT_COLUMNS: ColumnSet = ColumnSet {
    table: "patients",
    columns: &[
        Column::required("first_name", ColumnKind::Text { max: 100 }),
        Column::required("last_name", ColumnKind::Text { max: 100 }),
        Column::required("date_of_birth", ColumnKind::PastDate),
        Column::required("gender", ColumnKind::Choice(Gender::VALUES)),
        Column::optional("national_id", ColumnKind::Text { max: 50 }),
        Column::optional("primary_provider_id", ColumnKind::BigInt),
        Column::optional("contact_phone", ColumnKind::Text { max: 30 }),
        Column::optional("email", ColumnKind::Text { max: 254 }),
        Column::optional("residential_address", ColumnKind::Text { max: 500 }),
        Column::optional("emergency_contact_name", ColumnKind::Text { max: 100 }),
        Column::optional("emergency_contact_phone", ColumnKind::Text { max: 30 }),
        Column::optional("insurance_provider", ColumnKind::Text { max: 100 }),
        Column::optional("insurance_policy_number", ColumnKind::Text { max: 50 }),
        Column::optional("known_allergies", ColumnKind::Text { max: 2000 }),
        Column::optional("significant_medical_history", ColumnKind::Text { max: 5000 }),
        Column::optional("blood_type", ColumnKind::Choice(BloodType::VALUES)),
        Column::required("status", ColumnKind::Choice(PatientStatus::VALUES)),
    ],
};

const RECORD_SELECT: &str = "SELECT p.*, provider.full_name AS primary_provider_name, creator.full_name AS created_by_name
     FROM patients p
     LEFT JOIN users provider ON provider.id = p.primary_provider_id
     LEFT JOIN users creator ON creator.id = p.created_by";

const SUMMARY_COLUMNS: &str = "id, medical_record_number, first_name, last_name, date_of_birth, gender, contact_phone, status, last_visit_date";

/// Outcome of a guarded patient delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientDeletion {
    Deleted,
    NotFound,
    HasEncounters(i64),
}

#[derive(Clone)]
pub struct PatientRepository {
    gateway: Arc<Gateway>,
}

impl PatientRepository {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn insert(
        &self,
        mrn: &str,
        data: &NewPatient,
        created_by: i64,
    ) -> Result<Patient, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let patient = sqlx::query_as::<_, Patient>(
            "INSERT INTO patients (
                medical_record_number, national_id, primary_provider_id, first_name, last_name,
                date_of_birth, gender, contact_phone, email, residential_address,
                emergency_contact_name, emergency_contact_phone, insurance_provider,
                insurance_policy_number, known_allergies, significant_medical_history,
                blood_type, created_by
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
             RETURNING *",
        )
        .bind(mrn)
        .bind(&data.national_id)
        .bind(data.primary_provider_id)
        .bind(&data.first_name)
        .bind(&data.last_name)
        .bind(data.date_of_birth)
        .bind(data.gender)
        .bind(&data.contact_phone)
        .bind(&data.email)
        .bind(&data.residential_address)
        .bind(&data.emergency_contact_name)
        .bind(&data.emergency_contact_phone)
        .bind(&data.insurance_provider)
        .bind(&data.insurance_policy_number)
        .bind(&data.known_allergies)
        .bind(&data.significant_medical_history)
        .bind(data.blood_type)
        .bind(created_by)
        .fetch_one(&mut *conn)
        .await?;

        Ok(patient)
    }

    pub async fn find_record(&self, id: i64) -> Result<Option<PatientRecord>, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let record = sqlx::query_as::<_, PatientRecord>(&format!("{} WHERE p.id = $1", RECORD_SELECT))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(record)
    }

    pub async fn exists(&self, id: i64) -> Result<bool, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let found: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM patients WHERE id = $1)")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(found)
    }

    /// Id of another patient already holding `national_id`.
    pub async fn national_id_holder(
        &self,
        national_id: &str,
        excluding: Option<i64>,
    ) -> Result<Option<i64>, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let holder = sqlx::query_scalar(
            "SELECT id FROM patients WHERE national_id = $1 AND ($2::BIGINT IS NULL OR id <> $2) LIMIT 1",
        )
        .bind(national_id)
        .bind(excluding)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(holder)
    }

    /// Applies checked assignments. Returns `false` when no row has `id`.
    pub async fn update(&self, id: i64, assignments: Vec<Assignment>) -> Result<bool, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let updated: Option<i64> = PATIENT_COLUMNS
            .update_statement(id, assignments)
            .build_query_scalar()
            .fetch_optional(&mut *conn)
            .await?;
        Ok(updated.is_some())
    }

    /// Deletes the patient unless an encounter still references it. The row
    /// lock keeps a concurrent encounter insert from slipping in between the
    /// count and the delete.
    pub async fn delete_unreferenced(&self, id: i64) -> Result<PatientDeletion, GatewayError> {
        let mut uow = self.gateway.begin("patient.delete").await?;

        let result = async {
            let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM patients WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(uow.conn())
                .await?;
            if locked.is_none() {
                return Ok(PatientDeletion::NotFound);
            }

            let encounters: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM encounters WHERE patient_id = $1")
                .bind(id)
                .fetch_one(uow.conn())
                .await?;
            if encounters > 0 {
                return Ok(PatientDeletion::HasEncounters(encounters));
            }

            sqlx::query("DELETE FROM patients WHERE id = $1")
                .bind(id)
                .execute(uow.conn())
                .await?;
            Ok::<_, sqlx::Error>(PatientDeletion::Deleted)
        }
        .await;

        match result {
            Ok(PatientDeletion::Deleted) => {
                uow.commit().await?;
                Ok(PatientDeletion::Deleted)
            }
            Ok(outcome) => {
                uow.rollback().await;
                Ok(outcome)
            }
            Err(e) => {
                uow.rollback().await;
                Err(e.into())
            }
        }
    }

    /// Case-insensitive substring search, at most `limit` rows.
    pub async fn search(&self, term: &str, limit: i64) -> Result<Vec<PatientSummary>, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let rows = sqlx::query_as::<_, PatientSummary>(&format!(
            "SELECT {} FROM patients
             WHERE first_name ILIKE $1 OR last_name ILIKE $1
                OR (first_name || ' ' || last_name) ILIKE $1
                OR medical_record_number ILIKE $1 OR national_id ILIKE $1
                OR contact_phone ILIKE $1 OR email ILIKE $1
             ORDER BY last_name, first_name, id
             LIMIT $2",
            SUMMARY_COLUMNS
        ))
        .bind(like_pattern(term))
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn list(
        &self,
        request: PageRequest,
        filter: &PatientFilter,
    ) -> Result<Page<PatientRecord>, GatewayError> {
        let mut conn = self.gateway.acquire().await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM patients p");
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&mut *conn).await?;

        let mut select = QueryBuilder::<Postgres>::new(RECORD_SELECT);
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY p.last_name, p.first_name, p.id LIMIT ")
            .push_bind(request.page_size)
            .push(" OFFSET ")
            .push_bind(request.offset());
        let items = select
            .build_query_as::<PatientRecord>()
            .fetch_all(&mut *conn)
            .await?;

        Ok(Page::new(items, request, total))
    }

    /// Moves `last_visit_date` forward; an older date leaves it unchanged.
    pub async fn touch_last_visit(&self, id: i64, date: NaiveDate) -> Result<(), GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        sqlx::query(
            "UPDATE patients SET last_visit_date = GREATEST(last_visit_date, $2), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(date)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &PatientFilter) {
    qb.push(" WHERE TRUE");
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = like_pattern(term);
        qb.push(" AND (p.first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.medical_record_number ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(provider_id) = filter.provider_id {
        qb.push(" AND p.primary_provider_id = ").push_bind(provider_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND p.status = ").push_bind(status);
    }
}

/// `%term%` with LIKE wildcards in the term escaped.
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

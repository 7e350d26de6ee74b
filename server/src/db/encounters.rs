use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, Postgres, QueryBuilder};

use super::columns::{Assignment, Column, ColumnKind, ColumnSet};
use super::gateway::{Gateway, GatewayError, UnitOfWork};
use crate::models::{
    ActivePrescription, DateRange, Diagnosis, DiagnosisLine, Encounter, EncounterAggregate,
    EncounterPlan, EncounterStatus, EncounterSummary, Page, PageRequest, Prescription,
    PrescriptionLine, VisitType,
};

/// Clinical-narrative fields an encounter update may touch. Patient and
/// clinician linkage stay fixed.
pub static ENCOUNTER_COLUMNS: ColumnSet = ColumnSet {
    table: "encounters",
    columns: &[
        Column::required("visit_type", ColumnKind::Choice(VisitType::VALUES)),
        Column::optional("chief_complaint", ColumnKind::Text { max: 500 }),
        Column::optional("subjective_assessment", ColumnKind::Text { max: 5000 }),
        Column::optional("objective_findings", ColumnKind::Text { max: 5000 }),
        Column::optional("clinical_assessment", ColumnKind::Text { max: 2000 }),
        Column::optional("treatment_plan", ColumnKind::Text { max: 5000 }),
        Column::optional("vital_signs", ColumnKind::Json),
        Column::optional("followup_instructions", ColumnKind::Text { max: 5000 }),
        Column::optional("next_visit_date", ColumnKind::Date),
        Column::required("status", ColumnKind::Choice(EncounterStatus::VALUES)),
        Column::optional("duration", ColumnKind::Int { min: 0, max: 1440 }).stored_as("duration_minutes"),
    ],
};

const ENCOUNTER_SELECT: &str = "SELECT e.*, u.full_name AS clinician_name,
            p.first_name AS patient_first_name, p.last_name AS patient_last_name,
            p.medical_record_number
     FROM encounters e
     JOIN patients p ON p.id = e.patient_id
     LEFT JOIN users u ON u.id = e.treating_clinician_id";

const SUMMARY_SELECT: &str = "SELECT e.id, e.patient_id, p.first_name AS patient_first_name,
            p.last_name AS patient_last_name, p.medical_record_number,
            e.treating_clinician_id, u.full_name AS clinician_name, e.visit_type,
            e.encounter_date, e.chief_complaint, e.clinical_assessment, e.status,
            (SELECT COUNT(*) FROM diagnoses d WHERE d.encounter_id = e.id) AS diagnosis_count,
            (SELECT COUNT(*) FROM prescriptions rx WHERE rx.encounter_id = e.id) AS prescription_count
     FROM encounters e
     JOIN patients p ON p.id = e.patient_id
     LEFT JOIN users u ON u.id = e.treating_clinician_id";

/// The fixed facts of an encounter that child rows inherit.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct EncounterAnchor {
    pub patient_id: i64,
    pub encounter_date: DateTime<Utc>,
    pub treating_clinician_id: i64,
}

/// Outcome of [`EncounterRepository::add_prescription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrescriptionInsert {
    Added(i64),
    /// The encounter already holds this many prescriptions.
    CapReached(i64),
    EncounterMissing,
}

#[derive(Clone)]
pub struct EncounterRepository {
    gateway: Arc<Gateway>,
}

impl EncounterRepository {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Writes the encounter and all of its child rows in one transaction and
    /// returns the new encounter id. On any failure nothing is kept.
    pub async fn insert_plan(&self, plan: &EncounterPlan) -> Result<i64, GatewayError> {
        let mut uow = self.gateway.begin("encounter.create").await?;
        match write_plan(&mut uow, plan).await {
            Ok(id) => {
                uow.commit().await?;
                Ok(id)
            }
            Err(e) => {
                uow.rollback().await;
                Err(e.into())
            }
        }
    }

    /// Root row plus both child sets, read on one connection.
    pub async fn find(&self, id: i64) -> Result<Option<EncounterAggregate>, GatewayError> {
        let mut conn = self.gateway.acquire().await?;

        let encounter = sqlx::query_as::<_, Encounter>(&format!("{} WHERE e.id = $1", ENCOUNTER_SELECT))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        let Some(encounter) = encounter else {
            return Ok(None);
        };

        let diagnoses = sqlx::query_as::<_, Diagnosis>(
            "SELECT * FROM diagnoses WHERE encounter_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        let prescriptions = sqlx::query_as::<_, Prescription>(
            "SELECT * FROM prescriptions WHERE encounter_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Some(EncounterAggregate {
            encounter,
            diagnoses,
            prescriptions,
        }))
    }

    pub async fn locate(&self, id: i64) -> Result<Option<EncounterAnchor>, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let row = sqlx::query_as::<_, EncounterAnchor>(
            "SELECT patient_id, encounter_date, treating_clinician_id FROM encounters WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn history(
        &self,
        patient_id: i64,
        range: DateRange,
        request: PageRequest,
    ) -> Result<Page<EncounterSummary>, GatewayError> {
        let mut conn = self.gateway.acquire().await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM encounters e");
        push_history_filter(&mut count, patient_id, range);
        let total: i64 = count.build_query_scalar().fetch_one(&mut *conn).await?;

        let mut select = QueryBuilder::<Postgres>::new(SUMMARY_SELECT);
        push_history_filter(&mut select, patient_id, range);
        select
            .push(" ORDER BY e.encounter_date DESC, e.id DESC LIMIT ")
            .push_bind(request.page_size)
            .push(" OFFSET ")
            .push_bind(request.offset());
        let items = select
            .build_query_as::<EncounterSummary>()
            .fetch_all(&mut *conn)
            .await?;

        Ok(Page::new(items, request, total))
    }

    /// Newest encounters across all patients.
    pub async fn recent(&self, limit: i64) -> Result<Vec<EncounterSummary>, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let rows = sqlx::query_as::<_, EncounterSummary>(&format!(
            "{} ORDER BY e.encounter_date DESC, e.id DESC LIMIT $1",
            SUMMARY_SELECT
        ))
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn active_prescriptions(&self, patient_id: i64) -> Result<Vec<ActivePrescription>, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let rows = sqlx::query_as::<_, ActivePrescription>(
            "SELECT rx.*, e.encounter_date, u.full_name AS prescriber_name
             FROM prescriptions rx
             JOIN encounters e ON e.id = rx.encounter_id
             LEFT JOIN users u ON u.id = rx.prescribed_by
             WHERE e.patient_id = $1 AND rx.status = 'active'
             ORDER BY rx.start_date DESC, rx.id DESC",
        )
        .bind(patient_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    /// Returns `false` when no encounter has `id`.
    pub async fn update(&self, id: i64, assignments: Vec<Assignment>) -> Result<bool, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        let updated: Option<i64> = ENCOUNTER_COLUMNS
            .update_statement(id, assignments)
            .build_query_scalar()
            .fetch_optional(&mut *conn)
            .await?;
        Ok(updated.is_some())
    }

    /// Prescriptions, then diagnoses, then the encounter itself. Returns
    /// `false` when the encounter row was already gone.
    pub async fn delete(&self, id: i64) -> Result<bool, GatewayError> {
        let mut uow = self.gateway.begin("encounter.delete").await?;
        let result = async {
            sqlx::query("DELETE FROM prescriptions WHERE encounter_id = $1")
                .bind(id)
                .execute(uow.conn())
                .await?;
            sqlx::query("DELETE FROM diagnoses WHERE encounter_id = $1")
                .bind(id)
                .execute(uow.conn())
                .await?;
            let removed = sqlx::query("DELETE FROM encounters WHERE id = $1")
                .bind(id)
                .execute(uow.conn())
                .await?
                .rows_affected();
            Ok::<_, sqlx::Error>(removed > 0)
        }
        .await;

        match result {
            Ok(removed) => {
                uow.commit().await?;
                Ok(removed)
            }
            Err(e) => {
                uow.rollback().await;
                Err(e.into())
            }
        }
    }

    pub async fn add_diagnosis(
        &self,
        encounter_id: i64,
        patient_id: i64,
        line: &DiagnosisLine,
    ) -> Result<i64, GatewayError> {
        let mut conn = self.gateway.acquire().await?;
        Ok(insert_diagnosis(&mut *conn, encounter_id, patient_id, line).await?)
    }

    /// Adds one prescription unless the encounter already holds `cap`. The
    /// encounter row stays locked from the count to the commit, so concurrent
    /// adds queue behind each other.
    pub async fn add_prescription(
        &self,
        encounter_id: i64,
        line: &PrescriptionLine,
        cap: usize,
    ) -> Result<PrescriptionInsert, GatewayError> {
        let mut uow = self.gateway.begin("prescription.add").await?;
        let result = async {
            let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM encounters WHERE id = $1 FOR UPDATE")
                .bind(encounter_id)
                .fetch_optional(uow.conn())
                .await?;
            if locked.is_none() {
                return Ok(PrescriptionInsert::EncounterMissing);
            }

            let held: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prescriptions WHERE encounter_id = $1")
                .bind(encounter_id)
                .fetch_one(uow.conn())
                .await?;
            if held >= cap as i64 {
                return Ok(PrescriptionInsert::CapReached(held));
            }

            let id = insert_prescription(uow.conn(), encounter_id, line).await?;
            Ok::<_, sqlx::Error>(PrescriptionInsert::Added(id))
        }
        .await;

        match result {
            Ok(outcome) => {
                uow.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                uow.rollback().await;
                Err(e.into())
            }
        }
    }
}

async fn write_plan(uow: &mut UnitOfWork, plan: &EncounterPlan) -> Result<i64, sqlx::Error> {
    let draft = &plan.encounter;
    let encounter_id: i64 = sqlx::query_scalar(
        "INSERT INTO encounters (
            patient_id, treating_clinician_id, visit_type, encounter_date, chief_complaint,
            subjective_assessment, objective_findings, clinical_assessment, treatment_plan,
            vital_signs, followup_instructions, next_visit_date, status, duration_minutes
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
         RETURNING id",
    )
    .bind(draft.patient_id)
    .bind(draft.treating_clinician_id)
    .bind(draft.visit_type)
    .bind(draft.encounter_date)
    .bind(&draft.chief_complaint)
    .bind(&draft.subjective_assessment)
    .bind(&draft.objective_findings)
    .bind(&draft.clinical_assessment)
    .bind(&draft.treatment_plan)
    .bind(&draft.vital_signs)
    .bind(&draft.followup_instructions)
    .bind(draft.next_visit_date)
    .bind(draft.status)
    .bind(draft.duration_minutes)
    .fetch_one(uow.conn())
    .await?;

    for line in &plan.diagnoses {
        insert_diagnosis(uow.conn(), encounter_id, draft.patient_id, line).await?;
    }
    for line in &plan.prescriptions {
        insert_prescription(uow.conn(), encounter_id, line).await?;
    }

    tracing::debug!(
        encounter_id,
        diagnoses = plan.diagnoses.len(),
        prescriptions = plan.prescriptions.len(),
        "encounter rows written"
    );
    Ok(encounter_id)
}

async fn insert_diagnosis(
    conn: &mut PgConnection,
    encounter_id: i64,
    patient_id: i64,
    line: &DiagnosisLine,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "INSERT INTO diagnoses (
            patient_id, encounter_id, name, code, diagnosis_type, diagnosed_date,
            resolved_date, status, notes
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING id",
    )
    .bind(patient_id)
    .bind(encounter_id)
    .bind(&line.name)
    .bind(&line.code)
    .bind(line.diagnosis_type)
    .bind(line.diagnosed_date)
    .bind(line.resolved_date)
    .bind(line.status)
    .bind(&line.notes)
    .fetch_one(conn)
    .await
}

async fn insert_prescription(
    conn: &mut PgConnection,
    encounter_id: i64,
    line: &PrescriptionLine,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "INSERT INTO prescriptions (
            encounter_id, medication_name, dosage_instructions, dosage_value, frequency,
            duration, special_instructions, route, quantity, refills, start_date, end_date,
            status, prescribed_by
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
         RETURNING id",
    )
    .bind(encounter_id)
    .bind(&line.medication_name)
    .bind(&line.dosage_instructions)
    .bind(&line.dosage_value)
    .bind(&line.frequency)
    .bind(&line.duration)
    .bind(&line.special_instructions)
    .bind(line.route)
    .bind(line.quantity)
    .bind(line.refills)
    .bind(line.start_date)
    .bind(line.end_date)
    .bind(line.status)
    .bind(line.prescribed_by)
    .fetch_one(conn)
    .await
}

fn push_history_filter(qb: &mut QueryBuilder<'_, Postgres>, patient_id: i64, range: DateRange) {
    qb.push(" WHERE e.patient_id = ").push_bind(patient_id);
    if let Some(start) = range.start {
        qb.push(" AND e.encounter_date::date >= ").push_bind(start);
    }
    if let Some(end) = range.end {
        qb.push(" AND e.encounter_date::date <= ").push_bind(end);
    }
}

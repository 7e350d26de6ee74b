use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value};

use crate::auth::{authorize_clinical_write, Principal};
use crate::db::columns::{Assignment, SqlValue};
use crate::db::encounters::ENCOUNTER_COLUMNS;
use crate::db::{EncounterRepository, GatewayError, PatientRepository, PrescriptionInsert};
use crate::error::ClinicalError;
use crate::models::plan::{single_diagnosis, single_prescription};
use crate::models::{
    DateRange, DiagnosisInput, EncounterAggregate, EncounterPlan, EncounterSummary,
    MedicationEntry, NewEncounter, Page, PageRequest,
};
use crate::validation::{Validator, MAX_PRESCRIPTIONS_PER_ENCOUNTER};

pub const DEFAULT_RECENT_LIMIT: i64 = 10;
pub const MAX_RECENT_LIMIT: i64 = 25;

/// Owns the encounter aggregate: the encounter row with its diagnoses and
/// prescriptions, always written and removed together.
#[derive(Clone)]
pub struct EncounterManager {
    encounters: EncounterRepository,
    patients: PatientRepository,
}

impl EncounterManager {
    pub fn new(encounters: EncounterRepository, patients: PatientRepository) -> Self {
        Self {
            encounters,
            patients,
        }
    }

    /// Records an encounter with all of its diagnoses and prescriptions, or
    /// nothing at all.
    pub async fn create(&self, actor: &Principal, input: NewEncounter) -> Result<EncounterAggregate, ClinicalError> {
        authorize_clinical_write(actor)?;
        let plan = EncounterPlan::build(input, actor.user_id, Utc::now())?;

        let patient_id = plan.encounter.patient_id;
        if !self.patients.exists(patient_id).await? {
            return Err(ClinicalError::PatientNotFound(patient_id));
        }

        let encounter_id = self
            .encounters
            .insert_plan(&plan)
            .await
            .map_err(|e| create_failure(e, patient_id))?;
        tracing::info!(
            "✓ Encounter created: {} (patient {}, {} diagnoses, {} prescriptions)",
            encounter_id,
            patient_id,
            plan.diagnoses.len(),
            plan.prescriptions.len()
        );

        let visit_day = plan.encounter.encounter_date.date_naive();
        if let Err(e) = self.patients.touch_last_visit(patient_id, visit_day).await {
            tracing::warn!(patient_id, error = %e, "failed to update last visit date");
        }

        self.get_by_id(encounter_id).await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<EncounterAggregate, ClinicalError> {
        self.encounters
            .find(id)
            .await?
            .ok_or(ClinicalError::EncounterNotFound(id))
    }

    /// A patient's encounters, newest first.
    pub async fn get_by_patient(
        &self,
        patient_id: i64,
        range: DateRange,
        request: PageRequest,
    ) -> Result<Page<EncounterSummary>, ClinicalError> {
        if let (Some(start), Some(end)) = (range.start, range.end) {
            if end < start {
                return Err(ClinicalError::validation("end_date", "must not be before start_date"));
            }
        }
        if !self.patients.exists(patient_id).await? {
            return Err(ClinicalError::PatientNotFound(patient_id));
        }

        Ok(self.encounters.history(patient_id, range, request).await?)
    }

    pub async fn recent(&self, limit: Option<i64>) -> Result<Vec<EncounterSummary>, ClinicalError> {
        let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT);
        if !(1..=MAX_RECENT_LIMIT).contains(&limit) {
            return Err(ClinicalError::validation(
                "limit",
                format!("must be between 1 and {}", MAX_RECENT_LIMIT),
            ));
        }
        Ok(self.encounters.recent(limit).await?)
    }

    /// Changes narrative fields. An empty change set returns the encounter
    /// as it is.
    pub async fn update(
        &self,
        actor: &Principal,
        id: i64,
        partial: &Map<String, Value>,
    ) -> Result<EncounterAggregate, ClinicalError> {
        authorize_clinical_write(actor)?;

        let assignments = ENCOUNTER_COLUMNS.resolve(partial)?;
        if assignments.is_empty() {
            return self.get_by_id(id).await;
        }

        if let Some(next_visit) = next_visit_date(&assignments) {
            let anchor = self
                .encounters
                .locate(id)
                .await?
                .ok_or(ClinicalError::EncounterNotFound(id))?;
            let mut v = Validator::new();
            v.date_order("next_visit_date", Some(anchor.encounter_date.date_naive()), Some(next_visit));
            v.finish()?;
        }

        if !self.encounters.update(id, assignments).await? {
            return Err(ClinicalError::EncounterNotFound(id));
        }
        tracing::info!("✓ Encounter updated: {}", id);
        self.get_by_id(id).await
    }

    /// Removes the encounter and its children in one transaction.
    pub async fn delete(&self, actor: &Principal, id: i64) -> Result<(), ClinicalError> {
        authorize_clinical_write(actor)?;

        if self.encounters.locate(id).await?.is_none() {
            return Err(ClinicalError::EncounterNotFound(id));
        }
        let removed = self
            .encounters
            .delete(id)
            .await
            .map_err(|e| ClinicalError::transaction("encounter.delete", e))?;
        if !removed {
            return Err(ClinicalError::EncounterNotFound(id));
        }

        tracing::info!("✓ Encounter deleted: {}", id);
        Ok(())
    }

    pub async fn add_diagnosis(
        &self,
        actor: &Principal,
        encounter_id: i64,
        input: DiagnosisInput,
    ) -> Result<EncounterAggregate, ClinicalError> {
        authorize_clinical_write(actor)?;

        let anchor = self
            .encounters
            .locate(encounter_id)
            .await?
            .ok_or(ClinicalError::EncounterNotFound(encounter_id))?;
        let line = single_diagnosis(input, anchor.encounter_date.date_naive())?;

        let diagnosis_id = self
            .encounters
            .add_diagnosis(encounter_id, anchor.patient_id, &line)
            .await?;
        tracing::info!("✓ Diagnosis {} added to encounter {}", diagnosis_id, encounter_id);

        self.get_by_id(encounter_id).await
    }

    pub async fn add_prescription(
        &self,
        actor: &Principal,
        encounter_id: i64,
        entry: MedicationEntry,
    ) -> Result<EncounterAggregate, ClinicalError> {
        authorize_clinical_write(actor)?;

        let anchor = self
            .encounters
            .locate(encounter_id)
            .await?
            .ok_or(ClinicalError::EncounterNotFound(encounter_id))?;
        let line = single_prescription(
            entry,
            anchor.encounter_date.date_naive(),
            anchor.treating_clinician_id,
        )?;

        let outcome = self
            .encounters
            .add_prescription(encounter_id, &line, MAX_PRESCRIPTIONS_PER_ENCOUNTER)
            .await;
        let prescription_id = match outcome {
            Ok(PrescriptionInsert::Added(id)) => id,
            Ok(PrescriptionInsert::CapReached(_)) => {
                return Err(ClinicalError::validation(
                    "prescribedMedications",
                    format!("at most {} medications per encounter", MAX_PRESCRIPTIONS_PER_ENCOUNTER),
                ))
            }
            Ok(PrescriptionInsert::EncounterMissing) => {
                return Err(ClinicalError::EncounterNotFound(encounter_id))
            }
            Err(e) if e.foreign_key_violation().is_some() => {
                return Err(ClinicalError::validation(
                    "prescribed_by",
                    "does not reference a known user",
                ))
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!("✓ Prescription {} added to encounter {}", prescription_id, encounter_id);

        self.get_by_id(encounter_id).await
    }
}

/// The new `next_visit_date`, when an update sets one.
fn next_visit_date(assignments: &[Assignment]) -> Option<NaiveDate> {
    assignments.iter().find_map(|a| match (a.field, &a.value) {
        ("next_visit_date", SqlValue::Date(date)) => *date,
        _ => None,
    })
}

/// Connectivity problems stay retryable and dangling references are caller
/// errors; anything else during the create transaction is a failed create.
fn create_failure(err: GatewayError, patient_id: i64) -> ClinicalError {
    let unknown_user = |field: &'static str| ClinicalError::validation(field, "does not reference a known user");
    match err {
        GatewayError::ServiceUnavailable { .. } => ClinicalError::ServiceUnavailable,
        err if err.is_transient() => ClinicalError::Connection(err),
        err => match err.foreign_key_violation() {
            Some(constraint) if constraint.contains("treating_clinician") => unknown_user("treating_clinician_id"),
            Some(constraint) if constraint.contains("prescribed_by") => unknown_user("prescribed_by"),
            Some(constraint) if constraint.starts_with("encounters_patient") => {
                ClinicalError::PatientNotFound(patient_id)
            }
            _ => ClinicalError::EncounterCreateFailed(err),
        },
    }
}

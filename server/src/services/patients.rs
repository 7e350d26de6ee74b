use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::auth::{authorize_clinical_write, Principal};
use crate::db::columns::SqlValue;
use crate::db::patients::{MRN_CONSTRAINT, NATIONAL_ID_CONSTRAINT, PATIENT_COLUMNS};
use crate::db::{EncounterRepository, GatewayError, PatientDeletion, PatientRepository};
use crate::error::ClinicalError;
use crate::models::{
    ActivePrescription, DateRange, EncounterSummary, NewPatient, Page, PageRequest, PatientFilter,
    PatientRecord, PatientSummary,
};
use crate::validation::{looks_like_email, Validator, MAX_NAME_LENGTH};

pub const SEARCH_LIMIT: i64 = 50;
pub const SUMMARY_ENCOUNTERS: i64 = 10;
const MRN_ATTEMPTS: u32 = 3;

/// `MRN-<last six digits of the millisecond clock>-<four random digits>`.
pub fn format_mrn(now_millis: i64, random: u32) -> String {
    format!(
        "MRN-{:06}-{:04}",
        now_millis.rem_euclid(1_000_000),
        random % 10_000
    )
}

fn next_mrn() -> String {
    let random = (Uuid::new_v4().as_u128() % 10_000) as u32;
    format_mrn(Utc::now().timestamp_millis(), random)
}

/// A patient with the recent clinical context shown on their chart.
#[derive(Debug, Clone, Serialize)]
pub struct PatientOverview {
    pub patient: PatientRecord,
    pub clinical_summary: ClinicalSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClinicalSummary {
    pub recent_encounters: Vec<EncounterSummary>,
    pub active_prescriptions: Vec<ActivePrescription>,
}

/// Patient identity records: registration, lookup, uniqueness and search.
#[derive(Clone)]
pub struct PatientDirectory {
    patients: PatientRepository,
    encounters: EncounterRepository,
}

impl PatientDirectory {
    pub fn new(patients: PatientRepository, encounters: EncounterRepository) -> Self {
        Self {
            patients,
            encounters,
        }
    }

    pub async fn create(&self, actor: &Principal, data: NewPatient) -> Result<PatientRecord, ClinicalError> {
        authorize_clinical_write(actor)?;
        let data = data.normalized();
        validate_new_patient(&data, Utc::now().date_naive())?;

        if let Some(national_id) = &data.national_id {
            if self.patients.national_id_holder(national_id, None).await?.is_some() {
                return Err(duplicate_national_id(national_id));
            }
        }

        let mut attempt = 0;
        let patient = loop {
            attempt += 1;
            let mrn = next_mrn();
            let err = match self.patients.insert(&mrn, &data, actor.user_id).await {
                Ok(patient) => break patient,
                Err(err) => err,
            };

            let violated = err.unique_violation().map(str::to_owned);
            match violated.as_deref() {
                Some(MRN_CONSTRAINT) if attempt < MRN_ATTEMPTS => {
                    tracing::warn!(attempt, "medical record number collision, regenerating");
                }
                Some(MRN_CONSTRAINT) => {
                    return Err(ClinicalError::DuplicateIdentifier {
                        field: "medical_record_number",
                        value: mrn,
                    })
                }
                Some(NATIONAL_ID_CONSTRAINT) => {
                    return Err(duplicate_national_id(data.national_id.as_deref().unwrap_or_default()))
                }
                _ => return Err(unknown_user_reference(err)),
            }
        };

        tracing::info!(
            "✓ Patient created: {} ({})",
            patient.id,
            patient.medical_record_number
        );
        self.get_by_id(patient.id).await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<PatientRecord, ClinicalError> {
        self.patients
            .find_record(id)
            .await?
            .ok_or(ClinicalError::PatientNotFound(id))
    }

    /// The patient plus their latest encounters and active medications.
    pub async fn overview(&self, id: i64) -> Result<PatientOverview, ClinicalError> {
        let patient = self.get_by_id(id).await?;
        let recent = self
            .encounters
            .history(
                id,
                DateRange::default(),
                PageRequest {
                    page: 1,
                    page_size: SUMMARY_ENCOUNTERS,
                },
            )
            .await?;
        let active_prescriptions = self.encounters.active_prescriptions(id).await?;

        Ok(PatientOverview {
            patient,
            clinical_summary: ClinicalSummary {
                recent_encounters: recent.items,
                active_prescriptions,
            },
        })
    }

    /// Applies whitelisted fields from `partial`. The medical record number
    /// cannot be changed.
    pub async fn update(
        &self,
        actor: &Principal,
        id: i64,
        partial: &Map<String, Value>,
    ) -> Result<PatientRecord, ClinicalError> {
        authorize_clinical_write(actor)?;

        let assignments = PATIENT_COLUMNS.resolve(partial)?;
        if assignments.is_empty() {
            return Err(ClinicalError::validation("body", "no updatable fields supplied"));
        }

        for assignment in &assignments {
            match (assignment.field, &assignment.value) {
                ("national_id", SqlValue::Text(Some(national_id))) => {
                    if self.patients.national_id_holder(national_id, Some(id)).await?.is_some() {
                        return Err(duplicate_national_id(national_id));
                    }
                }
                ("email", SqlValue::Text(Some(email))) if !looks_like_email(email) => {
                    return Err(ClinicalError::validation("email", "must be a valid email address"));
                }
                _ => {}
            }
        }

        let national_id = assignments.iter().find_map(|a| match (a.field, &a.value) {
            ("national_id", SqlValue::Text(Some(value))) => Some(value.clone()),
            _ => None,
        });

        let found = match self.patients.update(id, assignments).await {
            Ok(found) => found,
            Err(err) if err.unique_violation() == Some(NATIONAL_ID_CONSTRAINT) => {
                return Err(duplicate_national_id(national_id.as_deref().unwrap_or_default()));
            }
            Err(err) => return Err(unknown_user_reference(err)),
        };
        if !found {
            return Err(ClinicalError::PatientNotFound(id));
        }

        tracing::info!("✓ Patient updated: {}", id);
        self.get_by_id(id).await
    }

    /// Hard delete, refused while any encounter references the patient.
    pub async fn delete(&self, actor: &Principal, id: i64) -> Result<(), ClinicalError> {
        authorize_clinical_write(actor)?;

        let outcome = self
            .patients
            .delete_unreferenced(id)
            .await
            .map_err(|e| ClinicalError::transaction("patient.delete", e))?;

        match outcome {
            PatientDeletion::Deleted => {
                tracing::info!("✓ Patient deleted: {}", id);
                Ok(())
            }
            PatientDeletion::NotFound => Err(ClinicalError::PatientNotFound(id)),
            PatientDeletion::HasEncounters(count) => Err(ClinicalError::HasDependentEncounters {
                patient_id: id,
                count,
            }),
        }
    }

    pub async fn search(&self, term: &str) -> Result<Vec<PatientSummary>, ClinicalError> {
        let mut v = Validator::new();
        v.required_text("q", Some(term), MAX_NAME_LENGTH);
        v.finish()?;

        Ok(self.patients.search(term.trim(), SEARCH_LIMIT).await?)
    }

    pub async fn list(&self, request: PageRequest, filter: &PatientFilter) -> Result<Page<PatientRecord>, ClinicalError> {
        Ok(self.patients.list(request, filter).await?)
    }
}

fn duplicate_national_id(value: &str) -> ClinicalError {
    ClinicalError::DuplicateIdentifier {
        field: "national_id",
        value: value.to_string(),
    }
}

/// A dangling user id in a patient write is a caller error, not a fault.
fn unknown_user_reference(err: GatewayError) -> ClinicalError {
    match err.foreign_key_violation() {
        Some(constraint) if constraint.contains("primary_provider") => {
            ClinicalError::validation("primary_provider_id", "does not reference a known user")
        }
        Some(_) => ClinicalError::validation("created_by", "acting user is not registered"),
        None => err.into(),
    }
}

fn validate_new_patient(data: &NewPatient, today: NaiveDate) -> Result<(), ClinicalError> {
    let mut v = Validator::new();
    v.required_text("first_name", Some(data.first_name.as_str()), MAX_NAME_LENGTH);
    v.required_text("last_name", Some(data.last_name.as_str()), MAX_NAME_LENGTH);
    if data.date_of_birth >= today {
        v.reject("date_of_birth", "must be in the past");
    }
    v.optional_text("national_id", data.national_id.as_deref(), 50);
    v.optional_text("contact_phone", data.contact_phone.as_deref(), 30);
    v.optional_text("residential_address", data.residential_address.as_deref(), 500);
    v.optional_text("known_allergies", data.known_allergies.as_deref(), 2000);
    v.optional_text("significant_medical_history", data.significant_medical_history.as_deref(), 5000);
    if let Some(email) = &data.email {
        if !looks_like_email(email) {
            v.reject("email", "must be a valid email address");
        }
    }
    v.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Gender;

    fn patient() -> NewPatient {
        NewPatient {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            gender: Gender::Female,
            national_id: None,
            primary_provider_id: None,
            contact_phone: None,
            email: None,
            residential_address: None,
            emergency_contact_name: None,
            emergency_contact_phone: None,
            insurance_provider: None,
            insurance_policy_number: None,
            known_allergies: None,
            significant_medical_history: None,
            blood_type: None,
        }
    }

    #[test]
    fn test_mrn_format() {
        assert_eq!(format_mrn(1_710_000_123_456, 42), "MRN-123456-0042");
        assert_eq!(format_mrn(7, 98_765), "MRN-000007-8765");

        let generated = next_mrn();
        assert_eq!(generated.len(), "MRN-000000-0000".len());
        assert!(generated.starts_with("MRN-"));
        assert!(generated[4..10].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(&generated[10..11], "-");
        assert!(generated[11..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_birth_date_must_be_in_the_past() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert!(validate_new_patient(&patient(), today).is_ok());

        let mut newborn = patient();
        newborn.date_of_birth = today;
        assert!(matches!(
            validate_new_patient(&newborn, today),
            Err(ClinicalError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_invalid_email_is_rejected() {
        let mut data = patient();
        data.email = Some("ada-at-example".to_string());
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        match validate_new_patient(&data, today) {
            Err(ClinicalError::ValidationFailed(fields)) => assert_eq!(fields[0].field, "email"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

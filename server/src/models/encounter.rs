use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use super::sql_types::{
    DiagnosisStatus, DiagnosisType, EncounterStatus, PrescriptionStatus, Route, StoredJson,
    VisitType,
};

/// Encounter root row joined to the names shown alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Encounter {
    pub id: i64,
    pub patient_id: i64,
    pub treating_clinician_id: i64,
    pub visit_type: VisitType,
    pub encounter_date: DateTime<Utc>,
    pub chief_complaint: Option<String>,
    pub subjective_assessment: Option<String>,
    pub objective_findings: Option<String>,
    pub clinical_assessment: Option<String>,
    pub treatment_plan: Option<String>,
    pub vital_signs: Option<StoredJson>,
    pub followup_instructions: Option<String>,
    pub next_visit_date: Option<NaiveDate>,
    pub status: EncounterStatus,
    pub duration_minutes: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub clinician_name: Option<String>,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub medical_record_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Diagnosis {
    pub id: i64,
    pub patient_id: i64,
    pub encounter_id: i64,
    pub name: String,
    pub code: Option<String>,
    #[serde(rename = "type")]
    pub diagnosis_type: DiagnosisType,
    pub diagnosed_date: NaiveDate,
    pub resolved_date: Option<NaiveDate>,
    pub status: DiagnosisStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Prescription {
    pub id: i64,
    pub encounter_id: i64,
    pub medication_name: String,
    pub dosage_instructions: String,
    pub dosage_value: Option<String>,
    pub frequency: Option<String>,
    pub duration: Option<String>,
    pub special_instructions: Option<String>,
    pub route: Route,
    pub quantity: Option<i32>,
    pub refills: i32,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub status: PrescriptionStatus,
    pub prescribed_by: i64,
}

/// An encounter with its owned diagnoses and prescriptions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncounterAggregate {
    pub encounter: Encounter,
    pub diagnoses: Vec<Diagnosis>,
    pub prescriptions: Vec<Prescription>,
}

/// Row of the cross-patient "recent encounters" listing and the patient
/// history page.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct EncounterSummary {
    pub id: i64,
    pub patient_id: i64,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub medical_record_number: String,
    pub treating_clinician_id: i64,
    pub clinician_name: Option<String>,
    pub visit_type: VisitType,
    pub encounter_date: DateTime<Utc>,
    pub chief_complaint: Option<String>,
    pub clinical_assessment: Option<String>,
    pub status: EncounterStatus,
    pub diagnosis_count: i64,
    pub prescription_count: i64,
}

/// Active medication listed in a patient's clinical summary.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct ActivePrescription {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub prescription: Prescription,
    pub encounter_date: DateTime<Utc>,
    pub prescriber_name: Option<String>,
}

/// Request body for `POST /encounters`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEncounter {
    pub patient_record_id: Option<i64>,
    pub treating_clinician_id: Option<i64>,
    pub visit_type: Option<VisitType>,
    pub encounter_date: Option<DateTime<Utc>>,
    pub chief_complaint: Option<String>,
    pub subjective_assessment: Option<String>,
    pub objective_findings: Option<String>,
    pub clinical_assessment: Option<String>,
    pub treatment_plan: Option<String>,
    pub vital_signs: Option<Value>,
    pub followup_instructions: Option<String>,
    pub next_visit_date: Option<NaiveDate>,
    pub status: Option<EncounterStatus>,
    #[serde(alias = "duration_minutes")]
    pub duration: Option<i32>,
    #[serde(default)]
    pub diagnosis: Vec<DiagnosisEntry>,
    #[serde(default, rename = "prescribedMedications", alias = "prescribed_medications")]
    pub prescribed_medications: Vec<MedicationEntry>,
}

/// A diagnosis as submitted: a bare name or a detailed object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DiagnosisEntry {
    Name(String),
    Detailed(DiagnosisInput),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct DiagnosisInput {
    pub name: String,
    pub code: Option<String>,
    #[serde(rename = "type")]
    pub diagnosis_type: Option<DiagnosisType>,
    pub diagnosed_date: Option<NaiveDate>,
    pub resolved_date: Option<NaiveDate>,
    pub status: Option<DiagnosisStatus>,
    pub notes: Option<String>,
}

impl From<DiagnosisEntry> for DiagnosisInput {
    fn from(entry: DiagnosisEntry) -> Self {
        match entry {
            DiagnosisEntry::Name(name) => DiagnosisInput {
                name,
                ..Default::default()
            },
            DiagnosisEntry::Detailed(input) => input,
        }
    }
}

/// A prescribed medication as submitted.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct MedicationEntry {
    #[serde(alias = "medication_name")]
    pub name: String,
    #[serde(alias = "dosage_value")]
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub duration: Option<String>,
    pub dosage_instructions: Option<String>,
    pub special_instructions: Option<String>,
    pub route: Option<Route>,
    pub quantity: Option<i32>,
    pub refills: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<PrescriptionStatus>,
    pub prescribed_by: Option<i64>,
}

/// History query for one patient. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

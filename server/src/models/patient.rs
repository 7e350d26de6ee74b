use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::sql_types::{BloodType, Gender, PatientStatus};

/// A patient row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Patient {
    pub id: i64,
    pub medical_record_number: String,
    pub national_id: Option<String>,
    pub primary_provider_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub contact_phone: Option<String>,
    pub email: Option<String>,
    pub residential_address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub insurance_provider: Option<String>,
    pub insurance_policy_number: Option<String>,
    pub known_allergies: Option<String>,
    pub significant_medical_history: Option<String>,
    pub blood_type: Option<BloodType>,
    pub status: PatientStatus,
    pub last_visit_date: Option<NaiveDate>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A patient together with the names of the users it references.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PatientRecord {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub patient: Patient,
    pub primary_provider_name: Option<String>,
    pub created_by_name: Option<String>,
}

/// Request body for registering a patient.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub primary_provider_id: Option<i64>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub residential_address: Option<String>,
    #[serde(default)]
    pub emergency_contact_name: Option<String>,
    #[serde(default)]
    pub emergency_contact_phone: Option<String>,
    #[serde(default)]
    pub insurance_provider: Option<String>,
    #[serde(default)]
    pub insurance_policy_number: Option<String>,
    #[serde(default)]
    pub known_allergies: Option<String>,
    #[serde(default)]
    pub significant_medical_history: Option<String>,
    #[serde(default)]
    pub blood_type: Option<BloodType>,
}

impl NewPatient {
    /// Blank optional identifiers are treated as absent so they never take
    /// part in uniqueness checks.
    pub fn normalized(mut self) -> Self {
        self.national_id = non_blank(self.national_id);
        self.email = non_blank(self.email);
        self.first_name = self.first_name.trim().to_string();
        self.last_name = self.last_name.trim().to_string();
        self
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Filters accepted by the paginated patient list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientFilter {
    pub search: Option<String>,
    pub provider_id: Option<i64>,
    pub status: Option<PatientStatus>,
}

/// Compact patient row used by search results.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PatientSummary {
    pub id: i64,
    pub medical_record_number: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub contact_phone: Option<String>,
    pub status: PatientStatus,
    pub last_visit_date: Option<NaiveDate>,
}

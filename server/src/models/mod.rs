pub mod encounter;
pub mod pagination;
pub mod plan;
pub mod patient;
pub mod sql_types;
pub mod user;

pub use encounter::{
    ActivePrescription, DateRange, Diagnosis, DiagnosisEntry, DiagnosisInput, Encounter,
    EncounterAggregate, EncounterSummary, MedicationEntry, NewEncounter, Prescription,
};
pub use pagination::{Page, PageRequest, Pagination};
pub use plan::{DiagnosisLine, EncounterDraft, EncounterPlan, PrescriptionLine};
pub use patient::{NewPatient, Patient, PatientFilter, PatientRecord, PatientSummary};
pub use sql_types::*;
pub use user::{NewUser, User};

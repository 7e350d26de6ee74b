//! Domain services over the repositories. Each enforces the role guard for
//! its own writes so callers outside HTTP get the same rules.

pub mod accounts;
pub mod encounters;
pub mod patients;

pub use accounts::AccountService;
pub use encounters::EncounterManager;
pub use patients::{ClinicalSummary, PatientDirectory, PatientOverview};

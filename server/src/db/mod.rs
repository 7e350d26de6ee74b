pub mod columns;
pub mod encounters;
pub mod gateway;
pub mod patients;
pub mod schema;
pub mod users;

pub use encounters::{EncounterAnchor, EncounterRepository, PrescriptionInsert};
pub use gateway::{Gateway, GatewayError, ReadinessPolicy, UnitOfWork};
pub use patients::{PatientDeletion, PatientRepository};
pub use users::UserRepository;

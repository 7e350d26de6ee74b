//! Database-backed tests. They run against the Postgres named by
//! `DATABASE_URL` and are skipped when it is not set.

use std::sync::Arc;
use std::time::Duration;

use clinical_records::auth::{Argon2Hasher, HmacTokenAuthority, Principal, TokenAuthority};
use clinical_records::config::{DbConfig, DEFAULT_AUDIENCE, DEFAULT_ISSUER};
use clinical_records::db::{
    schema, EncounterRepository, Gateway, PatientRepository, UserRepository,
};
use clinical_records::error::ClinicalError;
use clinical_records::models::{
    DateRange, MedicationEntry, NewEncounter, NewPatient, NewUser, PageRequest, PatientFilter,
    StoredJson, UserRole,
};
use clinical_records::services::accounts::{Credentials, PasswordChange, Registration};
use clinical_records::services::{AccountService, EncounterManager, PatientDirectory};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

struct TestContext {
    gateway: Arc<Gateway>,
    patients: PatientDirectory,
    encounters: EncounterManager,
    users: UserRepository,
    accounts: AccountService,
    tokens: Arc<HmacTokenAuthority>,
}

async fn setup_test_db() -> Option<TestContext> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    };

    let config = DbConfig::default().with_url(url).with_max_connections(5);
    let gateway = Arc::new(Gateway::connect_lazy(&config).expect("Failed to build pool"));
    gateway.await_ready().await.expect("Database not reachable");
    schema::apply(&gateway).await.expect("Failed to apply schema");

    let patient_rows = PatientRepository::new(gateway.clone());
    let encounter_rows = EncounterRepository::new(gateway.clone());
    let users = UserRepository::new(gateway.clone());
    let tokens = Arc::new(HmacTokenAuthority::new(
        "integration-secret",
        DEFAULT_ISSUER,
        DEFAULT_AUDIENCE,
        Duration::from_secs(3600),
    ));
    Some(TestContext {
        patients: PatientDirectory::new(patient_rows.clone(), encounter_rows.clone()),
        encounters: EncounterManager::new(encounter_rows, patient_rows),
        accounts: AccountService::new(users.clone(), Arc::new(Argon2Hasher::new()), tokens.clone()),
        users,
        tokens,
        gateway,
    })
}

impl TestContext {
    async fn user(&self, role: UserRole) -> Principal {
        let user = self
            .users
            .insert(&NewUser {
                email: format!("{}@clinic.test", Uuid::new_v4()),
                password_hash: "$argon2id$test".to_string(),
                full_name: format!("Test {}", role),
                license_number: None,
                role,
            })
            .await
            .expect("Failed to create user");

        Principal {
            user_id: user.id,
            role: user.role,
            display_name: user.full_name,
        }
    }

    async fn patient(&self, actor: &Principal, extra: Value) -> i64 {
        let mut body = json!({
            "first_name": "Grace",
            "last_name": "Hopper",
            "date_of_birth": "1986-12-09",
            "gender": "female"
        });
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            body.extend(extra.clone());
        }
        let data: NewPatient = serde_json::from_value(body).expect("Invalid patient body");
        assert_ok!(self.patients.create(actor, data).await).patient.id
    }

    async fn rows_for_patient(&self, table: &str, patient_id: i64) -> i64 {
        let sql = match table {
            "encounters" => "SELECT COUNT(*) FROM encounters WHERE patient_id = $1",
            "diagnoses" => "SELECT COUNT(*) FROM diagnoses WHERE patient_id = $1",
            _ => {
                "SELECT COUNT(*) FROM prescriptions rx JOIN encounters e ON e.id = rx.encounter_id
                 WHERE e.patient_id = $1"
            }
        };
        sqlx::query_scalar(sql)
            .bind(patient_id)
            .fetch_one(self.gateway.pool())
            .await
            .expect("Failed to count rows")
    }
}

fn medication(name: &str) -> MedicationEntry {
    serde_json::from_value(json!({"name": name, "dosage": "10mg"})).expect("Invalid medication")
}

fn unique_email() -> String {
    format!("{}@clinic.test", Uuid::new_v4())
}

fn encounter(patient_id: i64, body: Value) -> NewEncounter {
    let mut input: NewEncounter = serde_json::from_value(body).expect("Invalid encounter body");
    input.patient_record_id = Some(patient_id);
    input
}

#[tokio::test]
async fn test_encounter_round_trip() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let patient_id = ctx.patient(&physician, json!({})).await;

    let input = encounter(
        patient_id,
        json!({
            "chief_complaint": "Headache",
            "clinical_assessment": "Tension headache",
            "diagnosis": ["Migraine", "Migraine"],
            "prescribedMedications": [
                {"name": "Ibuprofen", "dosage": "400mg", "frequency": "Every 6h", "duration": "5 days"}
            ]
        }),
    );
    let created = assert_ok!(ctx.encounters.create(&physician, input).await);

    assert_eq!(created.encounter.patient_id, patient_id);
    assert_eq!(created.encounter.treating_clinician_id, physician.user_id);
    assert_eq!(created.diagnoses.len(), 2);
    assert!(created.diagnoses.iter().all(|d| d.name == "Migraine"));
    assert_eq!(created.prescriptions.len(), 1);
    assert_eq!(
        created.prescriptions[0].dosage_instructions,
        "400mg Every 6h for 5 days"
    );
    assert_eq!(created.prescriptions[0].prescribed_by, physician.user_id);

    let first = assert_ok!(ctx.encounters.get_by_id(created.encounter.id).await);
    let second = assert_ok!(ctx.encounters.get_by_id(created.encounter.id).await);
    assert_eq!(first, second);
    assert_eq!(first, created);

    let record = assert_ok!(ctx.patients.get_by_id(patient_id).await);
    assert_eq!(
        record.patient.last_visit_date,
        Some(created.encounter.encounter_date.date_naive())
    );
}

#[tokio::test]
async fn test_failed_prescription_leaves_no_rows() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let patient_id = ctx.patient(&physician, json!({})).await;

    let input = encounter(
        patient_id,
        json!({
            "chief_complaint": "Cough",
            "clinical_assessment": "Bronchitis",
            "diagnosis": ["Acute bronchitis"],
            "prescribedMedications": [
                {"name": "Amoxicillin", "dosage": "500mg"},
                {"name": "Guaifenesin", "dosage": "200mg", "prescribed_by": 999_999_999}
            ]
        }),
    );
    let err = assert_err!(ctx.encounters.create(&physician, input).await);
    match err {
        ClinicalError::ValidationFailed(fields) => assert_eq!(fields[0].field, "prescribed_by"),
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(ctx.rows_for_patient("encounters", patient_id).await, 0);
    assert_eq!(ctx.rows_for_patient("diagnoses", patient_id).await, 0);
    assert_eq!(ctx.rows_for_patient("prescriptions", patient_id).await, 0);
}

#[tokio::test]
async fn test_unknown_patient_is_not_found() {
    let Some(ctx) = setup_test_db().await else { return };
    let nurse = ctx.user(UserRole::Nurse).await;

    let input = encounter(
        999_999_999,
        json!({"chief_complaint": "Fever", "clinical_assessment": "Viral"}),
    );
    let err = assert_err!(ctx.encounters.create(&nurse, input).await);
    assert!(matches!(err, ClinicalError::PatientNotFound(999_999_999)));
    assert_eq!(ctx.rows_for_patient("encounters", 999_999_999).await, 0);
}

#[tokio::test]
async fn test_medical_assistant_cannot_write() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let assistant = ctx.user(UserRole::MedicalAssistant).await;
    let patient_id = ctx.patient(&physician, json!({})).await;

    let input = encounter(
        patient_id,
        json!({"chief_complaint": "Rash", "clinical_assessment": "Contact dermatitis"}),
    );
    let err = assert_err!(ctx.encounters.create(&assistant, input.clone()).await);
    assert!(matches!(err, ClinicalError::Forbidden { .. }));
    assert_eq!(ctx.rows_for_patient("encounters", patient_id).await, 0);

    assert_ok!(ctx.encounters.create(&physician, input).await);
}

#[tokio::test]
async fn test_duplicate_national_id_is_rejected() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let national_id = format!("NID-{}", Uuid::new_v4().simple());

    let first_id = ctx.patient(&physician, json!({"national_id": &national_id})).await;

    let data: NewPatient = serde_json::from_value(json!({
        "first_name": "Alan",
        "last_name": "Turing",
        "date_of_birth": "1980-06-23",
        "gender": "male",
        "national_id": &national_id
    }))
    .expect("Invalid patient body");
    let err = assert_err!(ctx.patients.create(&physician, data).await);
    assert!(matches!(
        err,
        ClinicalError::DuplicateIdentifier { field: "national_id", .. }
    ));

    let first = assert_ok!(ctx.patients.get_by_id(first_id).await);
    assert_eq!(first.patient.national_id.as_deref(), Some(national_id.as_str()));
    assert_eq!(first.patient.first_name, "Grace");
}

#[tokio::test]
async fn test_medical_record_number_is_immutable() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let patient_id = ctx.patient(&physician, json!({})).await;
    let before = assert_ok!(ctx.patients.get_by_id(patient_id).await);

    let partial = json!({"medical_record_number": "MRN-000000-0000", "contact_phone": "555-0100"});
    let after = assert_ok!(
        ctx.patients
            .update(&physician, patient_id, partial.as_object().expect("object"))
            .await
    );

    assert_eq!(after.patient.medical_record_number, before.patient.medical_record_number);
    assert_eq!(after.patient.contact_phone.as_deref(), Some("555-0100"));
}

#[tokio::test]
async fn test_patient_delete_blocked_by_encounters() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let patient_id = ctx.patient(&physician, json!({})).await;

    let input = encounter(
        patient_id,
        json!({
            "chief_complaint": "Back pain",
            "clinical_assessment": "Lumbar strain",
            "diagnosis": [{"name": "Lumbar strain", "code": "S39.012A"}],
            "prescribedMedications": [{"name": "Naproxen", "dosage": "250mg", "frequency": "Twice daily"}]
        }),
    );
    let created = assert_ok!(ctx.encounters.create(&physician, input).await);

    let err = assert_err!(ctx.patients.delete(&physician, patient_id).await);
    assert!(matches!(
        err,
        ClinicalError::HasDependentEncounters { count: 1, .. }
    ));

    assert_ok!(ctx.encounters.delete(&physician, created.encounter.id).await);
    assert_eq!(ctx.rows_for_patient("diagnoses", patient_id).await, 0);
    assert_eq!(ctx.rows_for_patient("prescriptions", patient_id).await, 0);

    assert_ok!(ctx.patients.delete(&physician, patient_id).await);
    let err = assert_err!(ctx.patients.get_by_id(patient_id).await);
    assert!(matches!(err, ClinicalError::PatientNotFound(_)));
}

#[tokio::test]
async fn test_patient_list_pagination() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let provider = ctx.user(UserRole::Physician).await;

    for i in 0..25 {
        ctx.patient(
            &physician,
            json!({
                "last_name": format!("Paged{:02}", i),
                "primary_provider_id": provider.user_id
            }),
        )
        .await;
    }

    let filter = PatientFilter {
        provider_id: Some(provider.user_id),
        ..PatientFilter::default()
    };

    let page2 = assert_ok!(
        ctx.patients
            .list(PageRequest::new(Some(2), Some(10), 25).expect("valid page"), &filter)
            .await
    );
    assert_eq!(page2.items.len(), 10);
    assert_eq!(page2.pagination.total_count, 25);
    assert_eq!(page2.pagination.total_pages, 3);

    let page3 = assert_ok!(
        ctx.patients
            .list(PageRequest::new(Some(3), Some(10), 25).expect("valid page"), &filter)
            .await
    );
    assert_eq!(page3.items.len(), 5);
}

#[tokio::test]
async fn test_history_and_added_lines() {
    let Some(ctx) = setup_test_db().await else { return };
    let nurse = ctx.user(UserRole::Nurse).await;
    let patient_id = ctx.patient(&nurse, json!({})).await;

    for (day, complaint) in [("2024-03-01", "Sore throat"), ("2024-05-10", "Follow-up")] {
        let input = encounter(
            patient_id,
            json!({
                "encounter_date": format!("{}T10:00:00Z", day),
                "chief_complaint": complaint,
                "clinical_assessment": "Pharyngitis"
            }),
        );
        assert_ok!(ctx.encounters.create(&nurse, input).await);
    }

    let everything = assert_ok!(
        ctx.encounters
            .get_by_patient(patient_id, DateRange::default(), PageRequest::new(None, None, 20).expect("valid page"))
            .await
    );
    assert_eq!(everything.pagination.total_count, 2);
    assert_eq!(everything.items[0].chief_complaint.as_deref(), Some("Follow-up"));

    let march = DateRange {
        start: "2024-03-01".parse().ok(),
        end: "2024-03-31".parse().ok(),
    };
    let bounded = assert_ok!(
        ctx.encounters
            .get_by_patient(patient_id, march, PageRequest::new(None, None, 20).expect("valid page"))
            .await
    );
    assert_eq!(bounded.pagination.total_count, 1);

    let latest = everything.items[0].id;
    let with_diagnosis = assert_ok!(
        ctx.encounters
            .add_diagnosis(&nurse, latest, serde_json::from_value(json!({"name": "Strep throat"})).expect("diagnosis"))
            .await
    );
    assert_eq!(with_diagnosis.diagnoses.len(), 1);
    assert_eq!(
        with_diagnosis.diagnoses[0].diagnosed_date.to_string(),
        "2024-05-10"
    );

    let with_prescription = assert_ok!(
        ctx.encounters
            .add_prescription(
                &nurse,
                latest,
                serde_json::from_value(json!({"name": "Penicillin V", "dosage": "500mg", "duration": "10 days"}))
                    .expect("prescription")
            )
            .await
    );
    assert_eq!(with_prescription.prescriptions[0].dosage_instructions, "500mg for 10 days");

    let overview = assert_ok!(ctx.patients.overview(patient_id).await);
    assert_eq!(overview.clinical_summary.recent_encounters.len(), 2);
    assert_eq!(overview.clinical_summary.active_prescriptions.len(), 1);
}

#[tokio::test]
async fn test_unknown_treating_clinician_is_a_validation_error() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let patient_id = ctx.patient(&physician, json!({})).await;

    let input = encounter(
        patient_id,
        json!({
            "treating_clinician_id": 999_999_999,
            "chief_complaint": "Dizziness",
            "clinical_assessment": "Orthostatic hypotension"
        }),
    );
    let err = assert_err!(ctx.encounters.create(&physician, input).await);
    match err {
        ClinicalError::ValidationFailed(fields) => assert_eq!(fields[0].field, "treating_clinician_id"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(ctx.rows_for_patient("encounters", patient_id).await, 0);
}

#[tokio::test]
async fn test_encounter_update_keeps_linkage_and_round_trips_vitals() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let other = ctx.user(UserRole::Physician).await;
    let patient_id = ctx.patient(&physician, json!({})).await;
    let other_patient = ctx.patient(&physician, json!({})).await;

    let input = encounter(
        patient_id,
        json!({"chief_complaint": "Palpitations", "clinical_assessment": "Sinus tachycardia"}),
    );
    let created = assert_ok!(ctx.encounters.create(&physician, input).await);
    let id = created.encounter.id;

    let vitals = json!({"blood_pressure": "120/80", "pulse": 72, "spo2": [97, 98]});
    let partial = json!({
        "patient_id": other_patient,
        "treating_clinician_id": other.user_id,
        "encounter_date": "2020-01-01T00:00:00Z",
        "vital_signs": vitals.clone(),
        "treatment_plan": "Reduce caffeine"
    });
    let updated = assert_ok!(
        ctx.encounters
            .update(&physician, id, partial.as_object().expect("object"))
            .await
    );

    assert_eq!(updated.encounter.patient_id, patient_id);
    assert_eq!(updated.encounter.treating_clinician_id, physician.user_id);
    assert_eq!(updated.encounter.encounter_date, created.encounter.encounter_date);
    assert_eq!(updated.encounter.vital_signs, Some(StoredJson(vitals)));
    assert_eq!(updated.encounter.treatment_plan.as_deref(), Some("Reduce caffeine"));
    assert_eq!(ctx.rows_for_patient("encounters", other_patient).await, 0);

    let missing = json!({"treatment_plan": "Rest"});
    let err = assert_err!(
        ctx.encounters
            .update(&physician, 999_999_999, missing.as_object().expect("object"))
            .await
    );
    assert!(matches!(err, ClinicalError::EncounterNotFound(999_999_999)));
}

#[tokio::test]
async fn test_encounter_update_rejects_next_visit_before_encounter() {
    let Some(ctx) = setup_test_db().await else { return };
    let nurse = ctx.user(UserRole::Nurse).await;
    let patient_id = ctx.patient(&nurse, json!({})).await;

    let input = encounter(
        patient_id,
        json!({
            "encounter_date": "2024-05-10T10:00:00Z",
            "chief_complaint": "Ankle sprain",
            "clinical_assessment": "Grade I sprain"
        }),
    );
    let id = assert_ok!(ctx.encounters.create(&nurse, input).await).encounter.id;

    let too_early = json!({"next_visit_date": "2024-05-01"});
    let err = assert_err!(
        ctx.encounters
            .update(&nurse, id, too_early.as_object().expect("object"))
            .await
    );
    match err {
        ClinicalError::ValidationFailed(fields) => assert_eq!(fields[0].field, "next_visit_date"),
        other => panic!("unexpected error: {other:?}"),
    }
    let unchanged = assert_ok!(ctx.encounters.get_by_id(id).await);
    assert_eq!(unchanged.encounter.next_visit_date, None);

    let follow_up = json!({"next_visit_date": "2024-05-24"});
    let updated = assert_ok!(
        ctx.encounters
            .update(&nurse, id, follow_up.as_object().expect("object"))
            .await
    );
    assert_eq!(updated.encounter.next_visit_date, "2024-05-24".parse().ok());
}

#[tokio::test]
async fn test_patient_update_to_taken_national_id_is_rejected() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let taken = format!("NID-{}", Uuid::new_v4().simple());
    let own = format!("NID-{}", Uuid::new_v4().simple());

    ctx.patient(&physician, json!({"national_id": &taken})).await;
    let patient_id = ctx.patient(&physician, json!({"national_id": &own})).await;

    let partial = json!({"national_id": &taken, "contact_phone": "555-0199"});
    let err = assert_err!(
        ctx.patients
            .update(&physician, patient_id, partial.as_object().expect("object"))
            .await
    );
    assert!(matches!(
        err,
        ClinicalError::DuplicateIdentifier { field: "national_id", .. }
    ));

    let record = assert_ok!(ctx.patients.get_by_id(patient_id).await);
    assert_eq!(record.patient.national_id.as_deref(), Some(own.as_str()));
    assert_eq!(record.patient.contact_phone, None);

    let keep_own = json!({"national_id": &own});
    assert_ok!(
        ctx.patients
            .update(&physician, patient_id, keep_own.as_object().expect("object"))
            .await
    );
}

#[tokio::test]
async fn test_search_is_case_insensitive_and_ordered() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let tag = format!("Srch{}", &Uuid::new_v4().simple().to_string()[..10]);

    for (first, last) in [("Bob", "Beta"), ("Zed", "Alpha"), ("Amy", "Alpha")] {
        ctx.patient(
            &physician,
            json!({"first_name": first, "last_name": format!("{}{}", tag, last)}),
        )
        .await;
    }

    let found = assert_ok!(ctx.patients.search(&tag.to_uppercase()).await);
    let names: Vec<(String, String)> = found
        .into_iter()
        .map(|p| (p.first_name, p.last_name.trim_start_matches(tag.as_str()).to_string()))
        .collect();
    assert_eq!(
        names,
        vec![
            ("Amy".to_string(), "Alpha".to_string()),
            ("Zed".to_string(), "Alpha".to_string()),
            ("Bob".to_string(), "Beta".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_search_is_capped_at_fifty() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let tag = format!("Cap{}", &Uuid::new_v4().simple().to_string()[..10]);

    for i in 0..52 {
        ctx.patient(&physician, json!({"last_name": format!("{}{:02}", tag, i)}))
            .await;
    }

    let found = assert_ok!(ctx.patients.search(&tag).await);
    assert_eq!(found.len(), 50);
    assert!(found[0].last_name.ends_with("00"));
}

#[tokio::test]
async fn test_prescription_cap_holds_under_concurrent_adds() {
    let Some(ctx) = setup_test_db().await else { return };
    let physician = ctx.user(UserRole::Physician).await;
    let patient_id = ctx.patient(&physician, json!({})).await;

    let medications: Vec<Value> = (0..9)
        .map(|i| json!({"name": format!("Medication {}", i), "dosage": "5mg"}))
        .collect();
    let input = encounter(
        patient_id,
        json!({
            "chief_complaint": "Polypharmacy review",
            "clinical_assessment": "Stable",
            "prescribedMedications": medications
        }),
    );
    let id = assert_ok!(ctx.encounters.create(&physician, input).await).encounter.id;

    let (first, second) = tokio::join!(
        ctx.encounters.add_prescription(&physician, id, medication("Metformin")),
        ctx.encounters.add_prescription(&physician, id, medication("Lisinopril")),
    );
    assert_eq!(
        [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
        1,
        "exactly one add may fit under the cap"
    );
    let refused = first.err().or(second.err()).expect("one add is refused");
    assert!(matches!(refused, ClinicalError::ValidationFailed(_)), "{refused:?}");
    assert_eq!(ctx.rows_for_patient("prescriptions", patient_id).await, 10);

    let err = assert_err!(
        ctx.encounters
            .add_prescription(&physician, id, medication("Atorvastatin"))
            .await
    );
    assert!(matches!(err, ClinicalError::ValidationFailed(_)));

    let err = assert_err!(
        ctx.encounters
            .add_prescription(&physician, 999_999_999, medication("Atorvastatin"))
            .await
    );
    assert!(matches!(err, ClinicalError::EncounterNotFound(999_999_999)));
}

#[tokio::test]
async fn test_register_login_and_password_change() {
    let Some(ctx) = setup_test_db().await else { return };
    let email = unique_email();

    let registered = assert_ok!(
        ctx.accounts
            .register(Registration {
                email: email.to_uppercase(),
                password: "first password".to_string(),
                full_name: "Lisa Cuddy".to_string(),
                license_number: Some("MD-4411".to_string()),
                role: None,
            })
            .await
    );
    assert_eq!(registered.user.role, UserRole::Physician);
    assert_eq!(registered.token_type, "Bearer");
    assert_eq!(registered.expires_in, 3600);
    let principal = assert_ok!(ctx.tokens.verify(&registered.access_token));
    assert_eq!(principal.user_id, registered.user.id);

    let stored = assert_ok!(ctx.users.find_by_id(registered.user.id).await).expect("user row");
    assert!(stored.password_hash.starts_with("$argon2id$"));
    assert!(stored.last_login_at.is_none());

    let session = assert_ok!(
        ctx.accounts
            .login(Credentials {
                email: email.clone(),
                password: "first password".to_string(),
            })
            .await
    );
    assert_eq!(session.user.id, registered.user.id);
    assert!(session.user.last_login_at.is_some());

    let err = assert_err!(
        ctx.accounts
            .change_password(
                &principal,
                PasswordChange {
                    current_password: "not my password".to_string(),
                    new_password: "second password".to_string(),
                },
            )
            .await
    );
    assert!(matches!(err, ClinicalError::ValidationFailed(_)));

    assert_ok!(
        ctx.accounts
            .change_password(
                &principal,
                PasswordChange {
                    current_password: "first password".to_string(),
                    new_password: "second password".to_string(),
                },
            )
            .await
    );

    let err = assert_err!(
        ctx.accounts
            .login(Credentials {
                email: email.clone(),
                password: "first password".to_string(),
            })
            .await
    );
    assert!(matches!(err, ClinicalError::InvalidCredentials));
    assert_ok!(
        ctx.accounts
            .login(Credentials {
                email,
                password: "second password".to_string(),
            })
            .await
    );
}

#[tokio::test]
async fn test_duplicate_email_and_unknown_login() {
    let Some(ctx) = setup_test_db().await else { return };
    let email = unique_email();
    let registration = Registration {
        email: email.clone(),
        password: "a good password".to_string(),
        full_name: "James Wilson".to_string(),
        license_number: None,
        role: Some(UserRole::Nurse),
    };

    assert_ok!(ctx.accounts.register(registration.clone()).await);
    let err = assert_err!(
        ctx.accounts
            .register(Registration {
                email: email.to_uppercase(),
                ..registration
            })
            .await
    );
    assert!(matches!(err, ClinicalError::DuplicateIdentifier { field: "email", .. }));

    let err = assert_err!(
        ctx.accounts
            .login(Credentials {
                email: unique_email(),
                password: "a good password".to_string(),
            })
            .await
    );
    assert!(matches!(err, ClinicalError::InvalidCredentials));
}

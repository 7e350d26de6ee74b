use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{Argon2Hasher, PasswordHasher, TokenAuthority};
use crate::db::{EncounterRepository, Gateway, PatientRepository, UserRepository};
use crate::handlers;
use crate::services::{AccountService, EncounterManager, PatientDirectory};

/// Everything a request handler may touch. Built once in `main`.
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub patients: PatientDirectory,
    pub encounters: EncounterManager,
    pub users: UserRepository,
    pub accounts: AccountService,
    pub tokens: Arc<dyn TokenAuthority>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(gateway: Arc<Gateway>, tokens: Arc<dyn TokenAuthority>) -> Self {
        let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher::new());
        let patient_rows = PatientRepository::new(gateway.clone());
        let encounter_rows = EncounterRepository::new(gateway.clone());
        let users = UserRepository::new(gateway.clone());

        Self {
            patients: PatientDirectory::new(patient_rows.clone(), encounter_rows.clone()),
            encounters: EncounterManager::new(encounter_rows, patient_rows),
            accounts: AccountService::new(users.clone(), hasher, tokens.clone()),
            users,
            gateway,
            tokens,
        }
    }
}

/// CORS for the clinician portal. Any origin when none is configured.
pub fn cors_layer(client_origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    match client_origin.and_then(|origin| HeaderValue::from_str(origin).ok()) {
        Some(origin) => cors.allow_origin(origin).allow_credentials(true),
        None => cors.allow_origin(Any),
    }
}

pub fn router(state: SharedState, cors: CorsLayer) -> Router {
    Router::new()
        .route(
            "/patients",
            get(handlers::patients::list_patients).post(handlers::patients::create_patient),
        )
        .route("/patients/search", get(handlers::patients::search_patients))
        .route(
            "/patients/:id",
            get(handlers::patients::get_patient)
                .put(handlers::patients::update_patient)
                .delete(handlers::patients::delete_patient),
        )
        .route("/encounters", post(handlers::encounters::create_encounter))
        .route("/encounters/recent", get(handlers::encounters::recent_encounters))
        .route(
            "/encounters/patient/:patient_id",
            get(handlers::encounters::get_patient_encounters),
        )
        .route(
            "/encounters/:id",
            get(handlers::encounters::get_encounter)
                .put(handlers::encounters::update_encounter)
                .delete(handlers::encounters::delete_encounter),
        )
        .route("/encounters/:id/diagnoses", post(handlers::encounters::add_diagnosis))
        .route(
            "/encounters/:id/prescriptions",
            post(handlers::encounters::add_prescription),
        )
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/password", put(handlers::auth::change_password))
        .route("/auth/verify", get(handlers::auth::verify_token))
        .route("/system/health", get(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}


pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod services;
pub mod utils;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Participant-addressed invitations
        .route(
            "/api/v1/study/invites/",
            get(handlers::invitations::list_participant_invites),
        )
        .route(
            "/api/v1/study/invites/:id/approve/",
            post(handlers::invitations::approve_participant_invite),
        )
        .route(
            "/api/v1/study/invites/:id/decline/",
            post(handlers::invitations::decline_participant_invite),
        )
        // Doctor-addressed, patient-targeted invitations
        .route(
            "/api/v1/study/invites_doctor/",
            get(handlers::invitations::list_doctor_invites)
                .post(handlers::invitations::create_doctor_invite),
        )
        .route(
            "/api/v1/study/invites_doctor/:id/approve/",
            post(handlers::invitations::approve_doctor_invite),
        )
        .route(
            "/api/v1/study/invites_doctor/:id/decline/",
            post(handlers::invitations::decline_doctor_invite),
        )
        // Studies
        .route(
            "/api/v1/study/",
            get(handlers::studies::list_studies).post(handlers::studies::create_study),
        )
        .route(
            "/api/v1/study/:id/",
            get(handlers::studies::get_study)
                .put(handlers::studies::update_study)
                .delete(handlers::studies::delete_study),
        )
        .route(
            "/api/v1/study/:id/add_doctor/",
            post(handlers::studies::add_doctor),
        )
        .route(
            "/api/v1/study/:id/add_consent/",
            post(handlers::studies::add_consent),
        )
        .route(
            "/api/v1/study/:id/invites/",
            get(handlers::studies::study_invites),
        )
        // Health
        .route("/health", get(handlers::health::health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

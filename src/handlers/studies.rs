use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::middleware::auth::{require_doctor, AuthDoctor};
use crate::models::Study;
use crate::repository::Repository;
use crate::services::AppState;

use super::invitations::{invitation_response, InvitationResponse};

#[derive(Deserialize)]
pub struct StudyPayload {
    pub title: String,
    #[serde(default)]
    pub consent_docs: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct AddDoctorRequest {
    pub doctor_pk: Uuid,
    pub emails: Vec<String>,
}

#[derive(Serialize)]
pub struct AddDoctorResponse {
    pub all_success: bool,
    pub fail_emails: Vec<String>,
}

#[derive(Deserialize)]
pub struct AddConsentRequest {
    pub patient_pk: Uuid,
    pub signature: String,
}

#[derive(Serialize)]
pub struct ConsentSummary {
    pub pk: Uuid,
    pub date_created: DateTime<Utc>,
    pub date_expired: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct StudyResponse {
    pub pk: Uuid,
    pub title: String,
    pub author: Uuid,
    pub doctors: Vec<Uuid>,
    pub consent_docs: Vec<Uuid>,
    /// Patient id → latest consent snapshot (null when the enrollment
    /// carries no consent).
    pub patients_consents: HashMap<Uuid, Option<ConsentSummary>>,
}

pub(crate) async fn study_response(state: &AppState, study: &Study) -> Result<StudyResponse> {
    let doctors = state.repo.study_doctor_ids(study.id).await?;
    let consent_docs = state.repo.study_consent_doc_ids(study.id).await?;
    let patients_consents = state
        .membership
        .membership_view(study.id)
        .await?
        .into_iter()
        .map(|view| {
            let summary = view.consent.map(|consent| ConsentSummary {
                pk: consent.id,
                date_created: consent.date_created,
                date_expired: consent.date_expired,
            });
            (view.binding.patient_id, summary)
        })
        .collect();

    Ok(StudyResponse {
        pk: study.id,
        title: study.title.clone(),
        author: study.author_id,
        doctors,
        consent_docs,
        patients_consents,
    })
}

pub async fn list_studies(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
) -> Result<Json<Vec<StudyResponse>>> {
    let studies = state.studies.list_for_actor(&actor).await?;
    let mut responses = Vec::with_capacity(studies.len());
    for study in &studies {
        responses.push(study_response(&state, study).await?);
    }
    Ok(Json(responses))
}

pub async fn create_study(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
    Json(payload): Json<StudyPayload>,
) -> Result<Json<StudyResponse>> {
    let study = state
        .studies
        .create(&actor, &payload.title, &payload.consent_docs)
        .await?;
    Ok(Json(study_response(&state, &study).await?))
}

pub async fn get_study(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
    Path(study_id): Path<Uuid>,
) -> Result<Json<StudyResponse>> {
    let study = state.studies.get_for_actor(&actor, study_id).await?;
    Ok(Json(study_response(&state, &study).await?))
}

pub async fn update_study(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
    Path(study_id): Path<Uuid>,
    Json(payload): Json<StudyPayload>,
) -> Result<Json<StudyResponse>> {
    let study = state
        .studies
        .update(&actor, study_id, &payload.title, &payload.consent_docs)
        .await?;
    Ok(Json(study_response(&state, &study).await?))
}

pub async fn delete_study(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
    Path(study_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.studies.delete(&actor, study_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_doctor(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
    Path(study_id): Path<Uuid>,
    Json(payload): Json<AddDoctorRequest>,
) -> Result<Json<AddDoctorResponse>> {
    require_doctor(&actor)?;
    let outcome = state
        .invitations
        .add_doctor(&actor, study_id, payload.doctor_pk, &payload.emails)
        .await?;
    Ok(Json(AddDoctorResponse {
        all_success: outcome.all_success,
        fail_emails: outcome.fail_emails,
    }))
}

pub async fn add_consent(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
    Path(study_id): Path<Uuid>,
    Json(payload): Json<AddConsentRequest>,
) -> Result<Json<StudyResponse>> {
    require_doctor(&actor)?;
    state
        .membership
        .add_consent(&actor, study_id, payload.patient_pk, &payload.signature)
        .await?;
    let study = state.studies.get_for_actor(&actor, study_id).await?;
    Ok(Json(study_response(&state, &study).await?))
}

pub async fn study_invites(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
    Path(study_id): Path<Uuid>,
) -> Result<Json<Vec<InvitationResponse>>> {
    require_doctor(&actor)?;
    let invitations = state.studies.invitations(&actor, study_id).await?;
    let mut responses = Vec::with_capacity(invitations.len());
    for invitation in &invitations {
        responses.push(invitation_response(&state, invitation, None).await?);
    }
    Ok(Json(responses))
}

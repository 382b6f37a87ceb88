use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::middleware::auth::{require_doctor, require_participant, AuthDoctor};
use crate::models::{Doctor, InvitationStatus, StudyInvitation};
use crate::repository::Repository;
use crate::services::invitations::ParticipantApproval;
use crate::services::AppState;

#[derive(Serialize)]
pub struct StudySummary {
    pub pk: Uuid,
    pub title: String,
}

#[derive(Serialize)]
pub struct ParticipantSummary {
    pub pk: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub public_key: String,
}

#[derive(Serialize)]
pub struct InvitationResponse {
    pub pk: Uuid,
    pub email: String,
    pub status: InvitationStatus,
    pub study: Option<StudySummary>,
    pub doctor: Uuid,
    pub patient: Option<Uuid>,
    /// Registered participant matching the invitation email, when one
    /// exists. Best-effort; null is not an error.
    pub participant: Option<ParticipantSummary>,
}

pub(crate) async fn invitation_response(
    state: &AppState,
    invitation: &StudyInvitation,
    participant: Option<&Doctor>,
) -> Result<InvitationResponse> {
    let study = state
        .repo
        .study_by_id(invitation.study_id)
        .await?
        .map(|study| StudySummary {
            pk: study.id,
            title: study.title,
        });
    Ok(InvitationResponse {
        pk: invitation.id,
        email: invitation.email.clone(),
        status: invitation.status,
        study,
        doctor: invitation.doctor_id,
        patient: invitation.patient_id,
        participant: participant.map(|doctor| ParticipantSummary {
            pk: doctor.id,
            email: doctor.email.clone(),
            first_name: doctor.first_name.clone(),
            last_name: doctor.last_name.clone(),
            public_key: doctor.public_key.clone(),
        }),
    })
}

#[derive(Deserialize)]
pub struct ParticipantApproveRequest {
    #[serde(default)]
    pub encryption_keys: HashMap<Uuid, String>,
    pub doctor_encryption_key: Option<String>,
    pub coordinator_encryption_key: Option<String>,
    pub consent_pk: Uuid,
}

#[derive(Deserialize)]
pub struct DoctorApproveRequest {
    #[serde(default)]
    pub encryption_keys: HashMap<Uuid, String>,
}

#[derive(Deserialize)]
pub struct CreateInviteRequest {
    pub email: String,
    #[serde(alias = "study_pk")]
    pub study: Uuid,
    #[serde(default, alias = "patient_pk")]
    pub patient: Option<Uuid>,
}

// Participant-addressed invitations.

pub async fn list_participant_invites(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
) -> Result<Json<Vec<InvitationResponse>>> {
    require_participant(&actor)?;
    let invitations = state.invitations.participant_invites(&actor).await?;
    let mut responses = Vec::with_capacity(invitations.len());
    for invitation in &invitations {
        responses.push(invitation_response(&state, invitation, None).await?);
    }
    Ok(Json(responses))
}

pub async fn approve_participant_invite(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
    Path(invitation_id): Path<Uuid>,
    Json(payload): Json<ParticipantApproveRequest>,
) -> Result<Json<InvitationResponse>> {
    require_participant(&actor)?;
    let approval = ParticipantApproval {
        encryption_keys: payload.encryption_keys,
        doctor_encryption_key: payload.doctor_encryption_key,
        coordinator_encryption_key: payload.coordinator_encryption_key,
        consent_id: payload.consent_pk,
    };
    let invitation = state
        .invitations
        .approve_participant_invite(&actor, invitation_id, approval)
        .await?;
    Ok(Json(invitation_response(&state, &invitation, None).await?))
}

pub async fn decline_participant_invite(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
    Path(invitation_id): Path<Uuid>,
) -> Result<Json<InvitationResponse>> {
    require_participant(&actor)?;
    let invitation = state
        .invitations
        .decline_participant_invite(&actor, invitation_id)
        .await?;
    Ok(Json(invitation_response(&state, &invitation, None).await?))
}

// Doctor-addressed, patient-targeted invitations.

pub async fn list_doctor_invites(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
) -> Result<Json<Vec<InvitationResponse>>> {
    require_doctor(&actor)?;
    let invitations = state.invitations.doctor_invites(&actor).await?;
    let mut responses = Vec::with_capacity(invitations.len());
    for (invitation, participant) in &invitations {
        responses.push(invitation_response(&state, invitation, participant.as_ref()).await?);
    }
    Ok(Json(responses))
}

pub async fn create_doctor_invite(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
    Json(payload): Json<CreateInviteRequest>,
) -> Result<Json<InvitationResponse>> {
    require_doctor(&actor)?;
    let invitation = state
        .invitations
        .create_patient_invite(&actor, &payload.email, payload.study, payload.patient)
        .await?;
    Ok(Json(invitation_response(&state, &invitation, None).await?))
}

pub async fn approve_doctor_invite(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
    Path(invitation_id): Path<Uuid>,
    Json(payload): Json<DoctorApproveRequest>,
) -> Result<Json<InvitationResponse>> {
    require_doctor(&actor)?;
    let invitation = state
        .invitations
        .approve_doctor_invite(&actor, invitation_id, payload.encryption_keys)
        .await?;
    Ok(Json(invitation_response(&state, &invitation, None).await?))
}

pub async fn decline_doctor_invite(
    State(state): State<Arc<AppState>>,
    AuthDoctor(actor): AuthDoctor,
    Path(invitation_id): Path<Uuid>,
) -> Result<Json<InvitationResponse>> {
    require_doctor(&actor)?;
    let invitation = state
        .invitations
        .decline_doctor_invite(&actor, invitation_id)
        .await?;
    Ok(Json(invitation_response(&state, &invitation, None).await?))
}

//! Study Invitation state machine.
//!
//! Invitations move `new → {accepted, declined}` exactly once. The
//! repository enforces the transition with a compare-and-swap and the
//! pending-uniqueness with a storage constraint; this service owns the
//! authorization scoping, payload validation, and the decision which
//! side effects an approval carries.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Doctor, StudyInvitation};
use crate::repository::{EdgeUpsert, NewBinding, NewInvitation, Repository};
use crate::services::notification::{Notification, NotificationService};
use crate::utils::is_valid_email;

/// Result of a batch invite: per-address soft failures, overall flag.
#[derive(Clone, Debug)]
pub struct BatchInviteOutcome {
    pub all_success: bool,
    pub fail_emails: Vec<String>,
}

/// Payload a participant submits to approve their invitation. Clients
/// send keys either as the `encryption_keys` map (doctor id → key) or
/// as the flat `doctor_encryption_key` / `coordinator_encryption_key`
/// fields; both shapes are honored.
#[derive(Clone, Debug, Default)]
pub struct ParticipantApproval {
    pub encryption_keys: HashMap<Uuid, String>,
    pub doctor_encryption_key: Option<String>,
    pub coordinator_encryption_key: Option<String>,
    pub consent_id: Uuid,
}

pub struct InvitationService {
    repo: Arc<dyn Repository>,
    notifications: Arc<NotificationService>,
}

impl InvitationService {
    pub fn new(repo: Arc<dyn Repository>, notifications: Arc<NotificationService>) -> Self {
        Self {
            repo,
            notifications,
        }
    }

    /// Batch invite into a study: adds `doctor_id` as a collaborator and
    /// invites each email. Addresses already belonging to a platform
    /// doctor, or already holding a pending invitation, land in
    /// `fail_emails` instead of failing the request; a syntactically
    /// malformed address fails the whole batch before any write.
    ///
    /// The study is hidden from doctors outside the author's site, so an
    /// unauthorized actor sees `NotFound`, not `Forbidden`.
    pub async fn add_doctor(
        &self,
        actor: &Doctor,
        study_id: Uuid,
        doctor_id: Uuid,
        emails: &[String],
    ) -> Result<BatchInviteOutcome> {
        let study = self.repo.study_by_id(study_id).await?.ok_or(Error::NotFound)?;
        let authorized =
            study.author_id == actor.id || actor.coordinator_id == Some(study.author_id);
        if !authorized {
            return Err(Error::NotFound);
        }

        if let Some(bad) = emails.iter().find(|email| !is_valid_email(email)) {
            return Err(Error::validation(format!("invalid email address: {bad}")));
        }

        let target = self
            .repo
            .doctor_by_id(doctor_id)
            .await?
            .ok_or(Error::NotFound)?;
        self.repo.add_study_doctor(study.id, target.id).await?;

        let mut fail_emails = Vec::new();
        for email in emails {
            if let Some(existing) = self.repo.doctor_by_email(email).await? {
                // Platform doctors are added directly, never invited;
                // participants go through the invitation flow.
                if !existing.is_participant() {
                    fail_emails.push(email.clone());
                    continue;
                }
            }

            let invitation = NewInvitation {
                email: email.clone(),
                study_id: study.id,
                doctor_id: target.id,
                patient_id: None,
            };
            match self.repo.create_invitation(invitation).await {
                Ok(_) => self.notifications.notify(Notification::StudyInvitation {
                    email: email.clone(),
                    study_title: study.title.clone(),
                }),
                // Someone already invited this address (possibly a
                // concurrent request; the storage constraint is the
                // arbiter). Soft failure.
                Err(Error::InvalidState(_)) => fail_emails.push(email.clone()),
                Err(other) => return Err(other),
            }
        }

        Ok(BatchInviteOutcome {
            all_success: fail_emails.is_empty(),
            fail_emails,
        })
    }

    /// A doctor invites a specific patient (as a future self-managing
    /// participant) into a study.
    pub async fn create_patient_invite(
        &self,
        actor: &Doctor,
        email: &str,
        study_id: Uuid,
        patient_id: Option<Uuid>,
    ) -> Result<StudyInvitation> {
        if !is_valid_email(email) {
            return Err(Error::validation(format!("invalid email address: {email}")));
        }
        let study = self.repo.study_by_id(study_id).await?.ok_or(Error::NotFound)?;

        if let Some(patient_id) = patient_id {
            let patient = self
                .repo
                .patient_by_id(patient_id)
                .await?
                .ok_or(Error::NotFound)?;
            let reachable = patient.doctor_id == actor.id
                || self.repo.has_patient_edge(actor.id, patient.id).await?;
            if !reachable {
                return Err(Error::NotFound);
            }
        }

        let invitation = self
            .repo
            .create_invitation(NewInvitation {
                email: email.to_string(),
                study_id: study.id,
                doctor_id: actor.id,
                patient_id,
            })
            .await?;

        self.notifications.notify(Notification::StudyInvitation {
            email: email.to_string(),
            study_title: study.title,
        });
        Ok(invitation)
    }

    /// Pending invitations addressed to this participant.
    pub async fn participant_invites(&self, actor: &Doctor) -> Result<Vec<StudyInvitation>> {
        self.repo.invitations_for_participant(&actor.email).await
    }

    /// Pending patient-targeted invitations owned by this doctor, each
    /// with a best-effort resolution of the addressed participant.
    pub async fn doctor_invites(
        &self,
        actor: &Doctor,
    ) -> Result<Vec<(StudyInvitation, Option<Doctor>)>> {
        let invitations = self.repo.invitations_for_doctor(actor.id).await?;
        let mut result = Vec::with_capacity(invitations.len());
        for invitation in invitations {
            let participant = self
                .repo
                .doctor_by_email(&invitation.email)
                .await?
                .filter(|d| d.is_participant());
            result.push((invitation, participant));
        }
        Ok(result)
    }

    /// Participant accepts: validates the key payload and the consent
    /// linkage, then settles the invitation and applies its side
    /// effects (sharing edges, enrollment binding) in one transaction.
    pub async fn approve_participant_invite(
        &self,
        actor: &Doctor,
        invitation_id: Uuid,
        approval: ParticipantApproval,
    ) -> Result<StudyInvitation> {
        let invitation = self
            .repo
            .invitation_for_participant(invitation_id, &actor.email)
            .await?
            .ok_or(Error::NotFound)?;

        let inviting = self
            .repo
            .doctor_by_id(invitation.doctor_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("invitation {} has no doctor", invitation.id))?;

        let doctor_key = approval
            .encryption_keys
            .get(&inviting.id)
            .cloned()
            .or_else(|| approval.doctor_encryption_key.clone())
            .ok_or_else(|| {
                Error::validation("encryption key for the inviting doctor is required")
            })?;

        let patient = self
            .repo
            .patient_of_participant(actor.id)
            .await?
            .ok_or_else(|| Error::validation("participant has no patient record"))?;

        let consent = self
            .repo
            .consent_by_id(approval.consent_id)
            .await?
            .ok_or_else(|| Error::validation("unknown consent"))?;
        if consent.patient_id != patient.id {
            return Err(Error::validation(
                "consent does not belong to the invited patient",
            ));
        }

        let mut edges = vec![EdgeUpsert {
            doctor_id: inviting.id,
            patient_id: patient.id,
            encrypted_key: doctor_key,
        }];
        // The inviting doctor's coordinator transitively gains access,
        // provided the client supplied a key encrypted for them.
        if let Some(coordinator_id) = inviting.coordinator_id {
            let coordinator_key = approval
                .coordinator_encryption_key
                .clone()
                .or_else(|| approval.encryption_keys.get(&coordinator_id).cloned());
            if let Some(coordinator_key) = coordinator_key {
                edges.push(EdgeUpsert {
                    doctor_id: coordinator_id,
                    patient_id: patient.id,
                    encrypted_key: coordinator_key,
                });
            }
        }

        self.repo
            .apply_approval(
                invitation.id,
                &edges,
                Some(NewBinding {
                    study_id: invitation.study_id,
                    patient_id: patient.id,
                    consent_id: consent.id,
                }),
            )
            .await
    }

    /// Owning doctor accepts a patient-targeted invitation: grants the
    /// resolved participant (and any other doctor the client supplied a
    /// key for) access to the invitation's patient. No consent binding
    /// in this flavor.
    pub async fn approve_doctor_invite(
        &self,
        actor: &Doctor,
        invitation_id: Uuid,
        encryption_keys: HashMap<Uuid, String>,
    ) -> Result<StudyInvitation> {
        let invitation = self
            .repo
            .invitation_for_doctor(invitation_id, actor.id)
            .await?
            .ok_or(Error::NotFound)?;
        let patient_id = invitation
            .patient_id
            .ok_or_else(|| anyhow::anyhow!("doctor invitation {} has no patient", invitation.id))?;

        let participant = self
            .repo
            .doctor_by_email(&invitation.email)
            .await?
            .filter(|d| d.is_participant())
            .ok_or_else(|| {
                Error::validation("no registered participant for the invitation email")
            })?;
        if !encryption_keys.contains_key(&participant.id) {
            return Err(Error::validation(
                "encryption key for the participant is required",
            ));
        }

        let mut edges = Vec::new();
        for (doctor_id, key) in &encryption_keys {
            if self.repo.doctor_by_id(*doctor_id).await?.is_some() {
                edges.push(EdgeUpsert {
                    doctor_id: *doctor_id,
                    patient_id,
                    encrypted_key: key.clone(),
                });
            }
        }

        self.repo.apply_approval(invitation.id, &edges, None).await
    }

    pub async fn decline_participant_invite(
        &self,
        actor: &Doctor,
        invitation_id: Uuid,
    ) -> Result<StudyInvitation> {
        let invitation = self
            .repo
            .invitation_for_participant(invitation_id, &actor.email)
            .await?
            .ok_or(Error::NotFound)?;
        self.repo.apply_decline(invitation.id).await
    }

    pub async fn decline_doctor_invite(
        &self,
        actor: &Doctor,
        invitation_id: Uuid,
    ) -> Result<StudyInvitation> {
        let invitation = self
            .repo
            .invitation_for_doctor(invitation_id, actor.id)
            .await?
            .ok_or(Error::NotFound)?;
        self.repo.apply_decline(invitation.id).await
    }
}

//! Study Membership Coordinator: the study↔patient relation and its
//! consent snapshots. Bindings are append-only; the membership view
//! reduces the history to the latest snapshot per patient.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Doctor;
use crate::repository::{BindingView, Repository};
use crate::services::consent_ledger::ConsentLedger;

pub struct MembershipService {
    repo: Arc<dyn Repository>,
    ledger: Arc<ConsentLedger>,
}

impl MembershipService {
    pub fn new(repo: Arc<dyn Repository>, ledger: Arc<ConsentLedger>) -> Self {
        Self { repo, ledger }
    }

    /// Record a renewed consent for an enrolled patient. The actor must
    /// hold a sharing edge to the patient and be the study's author or a
    /// collaborator. Always creates a fresh consent + binding pair; the
    /// previous binding stays in the history.
    pub async fn add_consent(
        &self,
        actor: &Doctor,
        study_id: Uuid,
        patient_id: Uuid,
        signature: &str,
    ) -> Result<Vec<BindingView>> {
        let study = self.repo.study_by_id(study_id).await?.ok_or(Error::NotFound)?;
        let patient = self
            .repo
            .patient_by_id(patient_id)
            .await?
            .ok_or(Error::NotFound)?;

        if !self.repo.has_patient_edge(actor.id, patient.id).await? {
            return Err(Error::Forbidden);
        }
        let collaborates = study.author_id == actor.id
            || self.repo.is_study_doctor(study.id, actor.id).await?;
        if !collaborates {
            return Err(Error::Forbidden);
        }

        self.ledger
            .record_consent_for_study(study.id, patient.id, signature)
            .await?;
        self.membership_view(study.id).await
    }

    /// Latest consent snapshot per enrolled patient.
    pub async fn membership_view(&self, study_id: Uuid) -> Result<Vec<BindingView>> {
        self.repo.latest_bindings(study_id).await
    }
}

//! Study lifecycle and visibility. A study is visible to its author,
//! its collaborating doctors and its enrolled participants; everyone
//! else gets `NotFound`, never a confirmation the study exists.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Doctor, DoctorRole, Study, StudyInvitation};
use crate::repository::Repository;
use crate::services::consent_ledger::ConsentLedger;

pub struct StudyService {
    repo: Arc<dyn Repository>,
    ledger: Arc<ConsentLedger>,
}

impl StudyService {
    pub fn new(repo: Arc<dyn Repository>, ledger: Arc<ConsentLedger>) -> Self {
        Self { repo, ledger }
    }

    /// Only coordinators author studies.
    pub async fn create(
        &self,
        actor: &Doctor,
        title: &str,
        consent_doc_ids: &[Uuid],
    ) -> Result<Study> {
        if !actor.is_coordinator() {
            return Err(Error::Forbidden);
        }
        if !self.repo.consent_docs_exist(consent_doc_ids).await? {
            return Err(Error::validation("unknown consent document"));
        }
        self.repo.create_study(actor.id, title, consent_doc_ids).await
    }

    pub async fn list_for_actor(&self, actor: &Doctor) -> Result<Vec<Study>> {
        match actor.role {
            DoctorRole::Coordinator => self.repo.studies_authored(actor.id).await,
            DoctorRole::Plain => self.repo.studies_with_doctor(actor.id).await,
            DoctorRole::Participant => {
                match self.repo.patient_of_participant(actor.id).await? {
                    Some(patient) => self.repo.studies_with_patient(patient.id).await,
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    pub async fn get_for_actor(&self, actor: &Doctor, study_id: Uuid) -> Result<Study> {
        let study = self.repo.study_by_id(study_id).await?.ok_or(Error::NotFound)?;
        if self.is_visible(actor, &study).await? {
            Ok(study)
        } else {
            Err(Error::NotFound)
        }
    }

    /// Author-only. A changed consent-doc set invalidates every current
    /// consent on the study through the ledger.
    pub async fn update(
        &self,
        actor: &Doctor,
        study_id: Uuid,
        title: &str,
        consent_doc_ids: &[Uuid],
    ) -> Result<Study> {
        let study = self.repo.study_by_id(study_id).await?.ok_or(Error::NotFound)?;
        if study.author_id != actor.id {
            return Err(Error::Forbidden);
        }
        if !self.repo.consent_docs_exist(consent_doc_ids).await? {
            return Err(Error::validation("unknown consent document"));
        }

        let (study, docs_changed) = self
            .repo
            .update_study(study.id, title, consent_doc_ids)
            .await?;
        if docs_changed {
            self.ledger.invalidate_consents(&study).await?;
        }
        Ok(study)
    }

    pub async fn delete(&self, actor: &Doctor, study_id: Uuid) -> Result<()> {
        let study = self.repo.study_by_id(study_id).await?.ok_or(Error::NotFound)?;
        if study.author_id != actor.id {
            return Err(Error::Forbidden);
        }
        self.repo.delete_study(study.id).await
    }

    /// Invitations of a study, for the author or a doctor overseen by
    /// them. Hidden from everyone else.
    pub async fn invitations(
        &self,
        actor: &Doctor,
        study_id: Uuid,
    ) -> Result<Vec<StudyInvitation>> {
        let study = self.repo.study_by_id(study_id).await?.ok_or(Error::NotFound)?;
        let authorized =
            study.author_id == actor.id || actor.coordinator_id == Some(study.author_id);
        if !authorized {
            return Err(Error::NotFound);
        }
        self.repo.invitations_for_study(study.id).await
    }

    async fn is_visible(&self, actor: &Doctor, study: &Study) -> Result<bool> {
        if study.author_id == actor.id {
            return Ok(true);
        }
        if self.repo.is_study_doctor(study.id, actor.id).await? {
            return Ok(true);
        }
        if actor.is_participant() {
            if let Some(patient) = self.repo.patient_of_participant(actor.id).await? {
                let enrolled = self
                    .repo
                    .latest_bindings(study.id)
                    .await?
                    .iter()
                    .any(|view| view.binding.patient_id == patient.id);
                return Ok(enrolled);
            }
        }
        Ok(false)
    }
}

//! In-memory repository used by the test suite and local development.
//!
//! A single mutex guards the whole state, so every trait method — the
//! composite `apply_*` operations included — runs serialized and
//! therefore atomic, mirroring the transactional contract of the
//! Postgres implementation. Insertion order stands in for creation
//! order, which keeps "latest binding wins" deterministic even when two
//! rows share a timestamp.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    ConsentDoc, Doctor, InvitationStatus, Patient, PatientConsent, Study, StudyInvitation,
    StudyToPatient,
};

use super::{
    BindingView, EdgeUpsert, NewBinding, NewConsent, NewInvitation, Repository,
    DUPLICATE_PENDING,
};

#[derive(Default)]
struct MemState {
    doctors: HashMap<Uuid, Doctor>,
    patients: HashMap<Uuid, Patient>,
    edges: HashMap<(Uuid, Uuid), String>,
    consents: HashMap<Uuid, PatientConsent>,
    consent_docs: HashMap<Uuid, ConsentDoc>,
    studies: HashMap<Uuid, Study>,
    study_doctors: Vec<(Uuid, Uuid)>,
    study_consent_docs: HashMap<Uuid, Vec<Uuid>>,
    bindings: Vec<StudyToPatient>,
    invitations: Vec<StudyInvitation>,
}

#[derive(Default)]
pub struct MemRepository {
    state: Mutex<MemState>,
}

impl MemRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // Seeding helpers for tests and local fixtures.

    pub fn insert_doctor(&self, doctor: Doctor) {
        self.state.lock().doctors.insert(doctor.id, doctor);
    }

    pub fn insert_patient(&self, patient: Patient) {
        self.state.lock().patients.insert(patient.id, patient);
    }

    pub fn insert_edge(&self, doctor_id: Uuid, patient_id: Uuid, encrypted_key: &str) {
        self.state
            .lock()
            .edges
            .insert((doctor_id, patient_id), encrypted_key.to_string());
    }

    pub fn insert_consent_doc(&self, doc: ConsentDoc) {
        self.state.lock().consent_docs.insert(doc.id, doc);
    }

    pub fn insert_study(&self, study: Study) {
        self.state.lock().studies.insert(study.id, study);
    }

    pub fn insert_invitation(&self, invitation: StudyInvitation) {
        self.state.lock().invitations.push(invitation);
    }

    pub fn insert_consent(&self, consent: PatientConsent) {
        self.state.lock().consents.insert(consent.id, consent);
    }

    pub fn binding_count(&self, study_id: Uuid, patient_id: Uuid) -> usize {
        self.state
            .lock()
            .bindings
            .iter()
            .filter(|b| b.study_id == study_id && b.patient_id == patient_id)
            .count()
    }

    pub fn invitation_by_id(&self, id: Uuid) -> Option<StudyInvitation> {
        self.state
            .lock()
            .invitations
            .iter()
            .find(|i| i.id == id)
            .cloned()
    }
}

#[async_trait]
impl Repository for MemRepository {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn doctor_by_id(&self, id: Uuid) -> Result<Option<Doctor>> {
        Ok(self.state.lock().doctors.get(&id).cloned())
    }

    async fn doctor_by_email(&self, email: &str) -> Result<Option<Doctor>> {
        Ok(self
            .state
            .lock()
            .doctors
            .values()
            .find(|d| d.email == email)
            .cloned())
    }

    async fn patient_by_id(&self, id: Uuid) -> Result<Option<Patient>> {
        Ok(self.state.lock().patients.get(&id).cloned())
    }

    async fn patient_of_participant(&self, doctor_id: Uuid) -> Result<Option<Patient>> {
        Ok(self
            .state
            .lock()
            .patients
            .values()
            .find(|p| p.doctor_id == doctor_id)
            .cloned())
    }

    async fn has_patient_edge(&self, doctor_id: Uuid, patient_id: Uuid) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .edges
            .contains_key(&(doctor_id, patient_id)))
    }

    async fn patient_edge_key(
        &self,
        doctor_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<String>> {
        Ok(self.state.lock().edges.get(&(doctor_id, patient_id)).cloned())
    }

    async fn create_study(
        &self,
        author_id: Uuid,
        title: &str,
        consent_doc_ids: &[Uuid],
    ) -> Result<Study> {
        let study = Study {
            id: Uuid::new_v4(),
            title: title.to_string(),
            author_id,
            date_created: Utc::now(),
        };
        let mut state = self.state.lock();
        state.studies.insert(study.id, study.clone());
        state
            .study_consent_docs
            .insert(study.id, consent_doc_ids.to_vec());
        Ok(study)
    }

    async fn study_by_id(&self, id: Uuid) -> Result<Option<Study>> {
        Ok(self.state.lock().studies.get(&id).cloned())
    }

    async fn update_study(
        &self,
        id: Uuid,
        title: &str,
        consent_doc_ids: &[Uuid],
    ) -> Result<(Study, bool)> {
        let mut state = self.state.lock();
        let mut previous: Vec<Uuid> = state.study_consent_docs.get(&id).cloned().unwrap_or_default();
        let study = state.studies.get_mut(&id).ok_or(Error::NotFound)?;
        study.title = title.to_string();
        let study = study.clone();

        let mut next = consent_doc_ids.to_vec();
        previous.sort();
        next.sort();
        let docs_changed = previous != next;
        state
            .study_consent_docs
            .insert(id, consent_doc_ids.to_vec());
        Ok((study, docs_changed))
    }

    async fn delete_study(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        state.studies.remove(&id).ok_or(Error::NotFound)?;
        state.study_consent_docs.remove(&id);
        state.study_doctors.retain(|(s, _)| *s != id);
        state.bindings.retain(|b| b.study_id != id);
        state.invitations.retain(|i| i.study_id != id);
        Ok(())
    }

    async fn studies_authored(&self, author_id: Uuid) -> Result<Vec<Study>> {
        let mut studies: Vec<Study> = self
            .state
            .lock()
            .studies
            .values()
            .filter(|s| s.author_id == author_id)
            .cloned()
            .collect();
        studies.sort_by_key(|s| s.date_created);
        Ok(studies)
    }

    async fn studies_with_doctor(&self, doctor_id: Uuid) -> Result<Vec<Study>> {
        let state = self.state.lock();
        let mut studies: Vec<Study> = state
            .study_doctors
            .iter()
            .filter(|(_, d)| *d == doctor_id)
            .filter_map(|(s, _)| state.studies.get(s).cloned())
            .collect();
        studies.sort_by_key(|s| s.date_created);
        Ok(studies)
    }

    async fn studies_with_patient(&self, patient_id: Uuid) -> Result<Vec<Study>> {
        let state = self.state.lock();
        let mut seen = Vec::new();
        for binding in &state.bindings {
            if binding.patient_id == patient_id && !seen.contains(&binding.study_id) {
                seen.push(binding.study_id);
            }
        }
        Ok(seen
            .into_iter()
            .filter_map(|id| state.studies.get(&id).cloned())
            .collect())
    }

    async fn add_study_doctor(&self, study_id: Uuid, doctor_id: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        if !state.study_doctors.contains(&(study_id, doctor_id)) {
            state.study_doctors.push((study_id, doctor_id));
        }
        Ok(())
    }

    async fn is_study_doctor(&self, study_id: Uuid, doctor_id: Uuid) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .study_doctors
            .contains(&(study_id, doctor_id)))
    }

    async fn study_doctor_ids(&self, study_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .state
            .lock()
            .study_doctors
            .iter()
            .filter(|(s, _)| *s == study_id)
            .map(|(_, d)| *d)
            .collect())
    }

    async fn study_consent_doc_ids(&self, study_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .state
            .lock()
            .study_consent_docs
            .get(&study_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn consent_docs_exist(&self, ids: &[Uuid]) -> Result<bool> {
        let state = self.state.lock();
        Ok(ids.iter().all(|id| state.consent_docs.contains_key(id)))
    }

    async fn create_consent(&self, consent: NewConsent) -> Result<PatientConsent> {
        let row = PatientConsent {
            id: Uuid::new_v4(),
            patient_id: consent.patient_id,
            signature: consent.signature,
            date_created: Utc::now(),
            date_expired: consent.date_expired,
        };
        self.state.lock().consents.insert(row.id, row.clone());
        Ok(row)
    }

    async fn consent_by_id(&self, id: Uuid) -> Result<Option<PatientConsent>> {
        Ok(self.state.lock().consents.get(&id).cloned())
    }

    async fn latest_bindings(&self, study_id: Uuid) -> Result<Vec<BindingView>> {
        let state = self.state.lock();
        let mut latest: Vec<StudyToPatient> = Vec::new();
        for binding in state.bindings.iter().rev() {
            if binding.study_id == study_id
                && !latest.iter().any(|b| b.patient_id == binding.patient_id)
            {
                latest.push(binding.clone());
            }
        }
        Ok(latest
            .into_iter()
            .map(|binding| {
                let consent = binding
                    .patient_consent_id
                    .and_then(|id| state.consents.get(&id).cloned());
                BindingView { binding, consent }
            })
            .collect())
    }

    async fn apply_consent_binding(
        &self,
        study_id: Uuid,
        consent: NewConsent,
    ) -> Result<(PatientConsent, StudyToPatient)> {
        let mut state = self.state.lock();
        let row = PatientConsent {
            id: Uuid::new_v4(),
            patient_id: consent.patient_id,
            signature: consent.signature,
            date_created: Utc::now(),
            date_expired: consent.date_expired,
        };
        state.consents.insert(row.id, row.clone());
        let binding = StudyToPatient {
            id: Uuid::new_v4(),
            study_id,
            patient_id: row.patient_id,
            patient_consent_id: Some(row.id),
            date_created: Utc::now(),
        };
        state.bindings.push(binding.clone());
        Ok((row, binding))
    }

    async fn expire_consents(&self, consent_ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        for id in consent_ids {
            if let Some(consent) = state.consents.get_mut(id) {
                if consent.is_valid(at) {
                    consent.date_expired = Some(at);
                }
            }
        }
        Ok(())
    }

    async fn create_invitation(&self, invitation: NewInvitation) -> Result<StudyInvitation> {
        let mut state = self.state.lock();
        let pending_exists = state.invitations.iter().any(|i| {
            i.study_id == invitation.study_id
                && i.email == invitation.email
                && i.status == InvitationStatus::New
        });
        if pending_exists {
            return Err(Error::invalid_state(DUPLICATE_PENDING));
        }
        let row = StudyInvitation {
            id: Uuid::new_v4(),
            email: invitation.email,
            study_id: invitation.study_id,
            doctor_id: invitation.doctor_id,
            patient_id: invitation.patient_id,
            status: InvitationStatus::New,
            date_created: Utc::now(),
        };
        state.invitations.push(row.clone());
        Ok(row)
    }

    async fn invitation_for_participant(
        &self,
        id: Uuid,
        email: &str,
    ) -> Result<Option<StudyInvitation>> {
        Ok(self
            .state
            .lock()
            .invitations
            .iter()
            .find(|i| i.id == id && i.email == email && i.status == InvitationStatus::New)
            .cloned())
    }

    async fn invitation_for_doctor(
        &self,
        id: Uuid,
        doctor_id: Uuid,
    ) -> Result<Option<StudyInvitation>> {
        Ok(self
            .state
            .lock()
            .invitations
            .iter()
            .find(|i| {
                i.id == id
                    && i.doctor_id == doctor_id
                    && i.patient_id.is_some()
                    && i.status == InvitationStatus::New
            })
            .cloned())
    }

    async fn invitations_for_participant(&self, email: &str) -> Result<Vec<StudyInvitation>> {
        Ok(self
            .state
            .lock()
            .invitations
            .iter()
            .filter(|i| i.email == email && i.status == InvitationStatus::New)
            .cloned()
            .collect())
    }

    async fn invitations_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<StudyInvitation>> {
        Ok(self
            .state
            .lock()
            .invitations
            .iter()
            .filter(|i| {
                i.doctor_id == doctor_id
                    && i.patient_id.is_some()
                    && i.status == InvitationStatus::New
            })
            .cloned()
            .collect())
    }

    async fn invitations_for_study(&self, study_id: Uuid) -> Result<Vec<StudyInvitation>> {
        Ok(self
            .state
            .lock()
            .invitations
            .iter()
            .filter(|i| i.study_id == study_id)
            .cloned()
            .collect())
    }

    async fn apply_approval(
        &self,
        invitation_id: Uuid,
        edges: &[EdgeUpsert],
        binding: Option<NewBinding>,
    ) -> Result<StudyInvitation> {
        let mut state = self.state.lock();
        let invitation = state
            .invitations
            .iter_mut()
            .find(|i| i.id == invitation_id)
            .ok_or(Error::NotFound)?;
        invitation.status = invitation.status.transition(InvitationStatus::Accepted)?;
        let updated = invitation.clone();

        for edge in edges {
            state
                .edges
                .insert((edge.doctor_id, edge.patient_id), edge.encrypted_key.clone());
        }
        if let Some(binding) = binding {
            let row = StudyToPatient {
                id: Uuid::new_v4(),
                study_id: binding.study_id,
                patient_id: binding.patient_id,
                patient_consent_id: Some(binding.consent_id),
                date_created: Utc::now(),
            };
            state.bindings.push(row);
        }
        Ok(updated)
    }

    async fn apply_decline(&self, invitation_id: Uuid) -> Result<StudyInvitation> {
        let mut state = self.state.lock();
        let invitation = state
            .invitations
            .iter_mut()
            .find(|i| i.id == invitation_id)
            .ok_or(Error::NotFound)?;
        invitation.status = invitation.status.transition(InvitationStatus::Declined)?;
        Ok(invitation.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DoctorRole;

    fn doctor(email: &str) -> Doctor {
        Doctor {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: "Test".into(),
            last_name: "Doctor".into(),
            public_key: String::new(),
            private_key: String::new(),
            role: DoctorRole::Plain,
            coordinator_id: None,
            date_created: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_pending_invitation_is_rejected() {
        let repo = MemRepository::new();
        let study_id = Uuid::new_v4();
        let doctor_id = Uuid::new_v4();
        let new = |email: &str| NewInvitation {
            email: email.to_string(),
            study_id,
            doctor_id,
            patient_id: None,
        };

        repo.create_invitation(new("a@test.com")).await.unwrap();
        let err = repo.create_invitation(new("a@test.com")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        // A different email is fine.
        repo.create_invitation(new("b@test.com")).await.unwrap();
    }

    #[tokio::test]
    async fn settled_invitation_allows_reinvite() {
        let repo = MemRepository::new();
        let study_id = Uuid::new_v4();
        let new = || NewInvitation {
            email: "a@test.com".into(),
            study_id,
            doctor_id: Uuid::new_v4(),
            patient_id: None,
        };

        let first = repo.create_invitation(new()).await.unwrap();
        repo.apply_decline(first.id).await.unwrap();
        repo.create_invitation(new()).await.unwrap();
    }

    #[tokio::test]
    async fn approval_cas_only_wins_once() {
        let repo = MemRepository::new();
        let inviting = doctor("doc@test.com");
        let patient_id = Uuid::new_v4();
        repo.insert_doctor(inviting.clone());
        let invitation = repo
            .create_invitation(NewInvitation {
                email: "p@test.com".into(),
                study_id: Uuid::new_v4(),
                doctor_id: inviting.id,
                patient_id: Some(patient_id),
            })
            .await
            .unwrap();

        let edges = vec![EdgeUpsert {
            doctor_id: inviting.id,
            patient_id,
            encrypted_key: "key".into(),
        }];
        repo.apply_approval(invitation.id, &edges, None).await.unwrap();
        let err = repo
            .apply_approval(invitation.id, &edges, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        let err = repo.apply_decline(invitation.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn latest_binding_wins_per_patient() {
        let repo = MemRepository::new();
        let study_id = Uuid::new_v4();
        let patient_id = Uuid::new_v4();
        let consent = |sig: &str| NewConsent {
            patient_id,
            signature: sig.to_string(),
            date_expired: None,
        };

        repo.apply_consent_binding(study_id, consent("first"))
            .await
            .unwrap();
        let (second, _) = repo
            .apply_consent_binding(study_id, consent("second"))
            .await
            .unwrap();

        assert_eq!(repo.binding_count(study_id, patient_id), 2);
        let views = repo.latest_bindings(study_id).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].consent.as_ref().unwrap().id, second.id);
    }
}

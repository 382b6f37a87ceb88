pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Doctor, Patient, PatientConsent, Study, StudyInvitation, StudyToPatient};

/// Input for a new invitation row.
#[derive(Clone, Debug)]
pub struct NewInvitation {
    pub email: String,
    pub study_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Option<Uuid>,
}

/// Input for a new consent row.
#[derive(Clone, Debug)]
pub struct NewConsent {
    pub patient_id: Uuid,
    pub signature: String,
    pub date_expired: Option<DateTime<Utc>>,
}

/// A (doctor, patient, key) grant applied during approval. Existing
/// edges get their key overwritten; key rotation on re-grant is
/// intentional.
#[derive(Clone, Debug)]
pub struct EdgeUpsert {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub encrypted_key: String,
}

/// Enrollment binding created as part of an approval.
#[derive(Clone, Debug)]
pub struct NewBinding {
    pub study_id: Uuid,
    pub patient_id: Uuid,
    pub consent_id: Uuid,
}

/// The latest binding for a (study, patient) pair joined with its
/// consent, as served by the membership view.
#[derive(Clone, Debug)]
pub struct BindingView {
    pub binding: StudyToPatient,
    pub consent: Option<PatientConsent>,
}

/// Storage seam. Every method is one atomic unit against the backing
/// store: the `apply_*` composites either land all their writes or none,
/// and status transitions are compare-and-swap on the current value so
/// only one of two racing settlements wins.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Liveness probe against the backing store.
    async fn ping(&self) -> Result<()>;

    // Doctors and patients.
    async fn doctor_by_id(&self, id: Uuid) -> Result<Option<Doctor>>;
    async fn doctor_by_email(&self, email: &str) -> Result<Option<Doctor>>;
    async fn patient_by_id(&self, id: Uuid) -> Result<Option<Patient>>;
    /// The patient record a participant manages for themselves.
    async fn patient_of_participant(&self, doctor_id: Uuid) -> Result<Option<Patient>>;
    async fn has_patient_edge(&self, doctor_id: Uuid, patient_id: Uuid) -> Result<bool>;
    async fn patient_edge_key(&self, doctor_id: Uuid, patient_id: Uuid)
        -> Result<Option<String>>;

    // Studies and collaborators.
    async fn create_study(
        &self,
        author_id: Uuid,
        title: &str,
        consent_doc_ids: &[Uuid],
    ) -> Result<Study>;
    async fn study_by_id(&self, id: Uuid) -> Result<Option<Study>>;
    /// Replaces title and consent-doc set; the flag reports whether the
    /// doc set actually changed.
    async fn update_study(
        &self,
        id: Uuid,
        title: &str,
        consent_doc_ids: &[Uuid],
    ) -> Result<(Study, bool)>;
    async fn delete_study(&self, id: Uuid) -> Result<()>;
    async fn studies_authored(&self, author_id: Uuid) -> Result<Vec<Study>>;
    async fn studies_with_doctor(&self, doctor_id: Uuid) -> Result<Vec<Study>>;
    async fn studies_with_patient(&self, patient_id: Uuid) -> Result<Vec<Study>>;
    async fn add_study_doctor(&self, study_id: Uuid, doctor_id: Uuid) -> Result<()>;
    async fn is_study_doctor(&self, study_id: Uuid, doctor_id: Uuid) -> Result<bool>;
    async fn study_doctor_ids(&self, study_id: Uuid) -> Result<Vec<Uuid>>;
    async fn study_consent_doc_ids(&self, study_id: Uuid) -> Result<Vec<Uuid>>;
    async fn consent_docs_exist(&self, ids: &[Uuid]) -> Result<bool>;

    // Consents and enrollment bindings.
    async fn create_consent(&self, consent: NewConsent) -> Result<PatientConsent>;
    async fn consent_by_id(&self, id: Uuid) -> Result<Option<PatientConsent>>;
    /// Latest binding per patient for a study, newest first.
    async fn latest_bindings(&self, study_id: Uuid) -> Result<Vec<BindingView>>;
    /// Consent row + fresh binding in one transaction (consent renewal
    /// is always additive).
    async fn apply_consent_binding(
        &self,
        study_id: Uuid,
        consent: NewConsent,
    ) -> Result<(PatientConsent, StudyToPatient)>;
    /// Force still-valid consents' expiry to `at`. Already-expired rows
    /// are left untouched.
    async fn expire_consents(&self, consent_ids: &[Uuid], at: DateTime<Utc>) -> Result<()>;

    // Invitations.
    /// Fails with `InvalidState` when a pending invitation for the same
    /// (study, email) already exists — enforced by the storage layer,
    /// not just checked here.
    async fn create_invitation(&self, invitation: NewInvitation) -> Result<StudyInvitation>;
    /// Pending invitation addressed to this email, or nothing.
    async fn invitation_for_participant(
        &self,
        id: Uuid,
        email: &str,
    ) -> Result<Option<StudyInvitation>>;
    /// Pending patient-targeted invitation owned by this doctor, or
    /// nothing.
    async fn invitation_for_doctor(
        &self,
        id: Uuid,
        doctor_id: Uuid,
    ) -> Result<Option<StudyInvitation>>;
    async fn invitations_for_participant(&self, email: &str) -> Result<Vec<StudyInvitation>>;
    async fn invitations_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<StudyInvitation>>;
    async fn invitations_for_study(&self, study_id: Uuid) -> Result<Vec<StudyInvitation>>;
    /// Settle an invitation as accepted and apply its side effects
    /// (edge upserts, optional enrollment binding) atomically. The
    /// status write is conditioned on the row still being pending; a
    /// lost race yields `InvalidState` and no side effects.
    async fn apply_approval(
        &self,
        invitation_id: Uuid,
        edges: &[EdgeUpsert],
        binding: Option<NewBinding>,
    ) -> Result<StudyInvitation>;
    /// Settle an invitation as declined. Same compare-and-swap rules,
    /// no side effects.
    async fn apply_decline(&self, invitation_id: Uuid) -> Result<StudyInvitation>;
}

pub(crate) const DUPLICATE_PENDING: &str = "an invitation for this email is already pending";
pub(crate) const NOT_PENDING: &str = "invitation is no longer pending";

//! Consent Ledger: decides whether a patient's consent is currently
//! valid, mints new consent rows, and supersedes stale ones when a
//! study's consent documents change. History is never deleted.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::models::{PatientConsent, Study, StudyToPatient};
use crate::repository::{NewConsent, Repository};
use crate::services::notification::{Notification, NotificationService, StudyContext};

/// Validity window for freshly signed consents. Explicit value handed
/// in at construction; the ledger reads no ambient settings.
#[derive(Clone, Copy, Debug)]
pub struct ConsentPolicy {
    pub validity_days: i64,
}

impl ConsentPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            validity_days: config.consent_validity_days,
        }
    }

    pub fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.validity_days > 0 {
            Some(now + Duration::days(self.validity_days))
        } else {
            None
        }
    }
}

pub struct ConsentLedger {
    repo: Arc<dyn Repository>,
    policy: ConsentPolicy,
    notifications: Arc<NotificationService>,
}

impl ConsentLedger {
    pub fn new(
        repo: Arc<dyn Repository>,
        policy: ConsentPolicy,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            repo,
            policy,
            notifications,
        }
    }

    /// New immutable consent row stamped with the policy's window.
    pub async fn record_consent(
        &self,
        patient_id: Uuid,
        signature: &str,
    ) -> Result<PatientConsent> {
        self.repo
            .create_consent(self.new_consent(patient_id, signature))
            .await
    }

    /// Consent plus enrollment binding in one transaction — the renewal
    /// path, always additive.
    pub async fn record_consent_for_study(
        &self,
        study_id: Uuid,
        patient_id: Uuid,
        signature: &str,
    ) -> Result<(PatientConsent, StudyToPatient)> {
        self.repo
            .apply_consent_binding(study_id, self.new_consent(patient_id, signature))
            .await
    }

    /// The consent attached to the latest binding for this patient.
    pub async fn current_binding(
        &self,
        study_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<PatientConsent>> {
        let bindings = self.repo.latest_bindings(study_id).await?;
        Ok(bindings
            .into_iter()
            .find(|view| view.binding.patient_id == patient_id)
            .and_then(|view| view.consent))
    }

    /// The study's consent documents changed: force every currently
    /// valid attached consent to expire and tell the affected
    /// participants and the study's doctors to re-sign. Binding rows
    /// stay untouched. Returns the affected patient ids.
    pub async fn invalidate_consents(&self, study: &Study) -> Result<Vec<Uuid>> {
        let now = Utc::now();
        let bindings = self.repo.latest_bindings(study.id).await?;

        let stale: Vec<Uuid> = bindings
            .iter()
            .filter_map(|view| view.consent.as_ref())
            .filter(|consent| consent.is_valid(now))
            .map(|consent| consent.id)
            .collect();
        self.repo.expire_consents(&stale, now).await?;

        let author = self
            .repo
            .doctor_by_id(study.author_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("study {} has no author", study.id))?;
        let context = StudyContext::new(study, &author);

        let mut affected = Vec::new();
        for view in &bindings {
            affected.push(view.binding.patient_id);
            if let Some(patient) = self.repo.patient_by_id(view.binding.patient_id).await? {
                if let Some(owner) = self.repo.doctor_by_id(patient.doctor_id).await? {
                    if owner.is_participant() {
                        self.notifications.notify(Notification::ParticipantConsentChanged {
                            email: owner.email,
                            context: context.clone(),
                        });
                    }
                }
            }
        }

        for doctor_id in self.repo.study_doctor_ids(study.id).await? {
            if let Some(doctor) = self.repo.doctor_by_id(doctor_id).await? {
                self.notifications.notify(Notification::DoctorConsentChanged {
                    email: doctor.email.clone(),
                    user_full_name: doctor.full_name(),
                    context: context.clone(),
                });
            }
        }

        Ok(affected)
    }

    fn new_consent(&self, patient_id: Uuid, signature: &str) -> NewConsent {
        NewConsent {
            patient_id,
            signature: signature.to_string(),
            date_expired: self.policy.expiry_from(Utc::now()),
        }
    }
}

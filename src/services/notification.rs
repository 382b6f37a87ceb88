//! Hand-off point to the mail delivery collaborator.
//!
//! The core only enqueues; a delivery worker subscribes and renders the
//! actual emails. A receiver is held alive so enqueueing works even
//! before any worker attaches, and a failed send is logged, never
//! surfaced — notifications must not fail or block the surrounding
//! transaction.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{Doctor, Study};

/// Template context shared by the consent-changed mails.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StudyContext {
    pub study_title: String,
    pub study_date_of_change: String,
    pub study_coordinator: String,
    pub study_coordinator_email: String,
}

impl StudyContext {
    pub fn new(study: &Study, author: &Doctor) -> Self {
        Self {
            study_title: study.title.clone(),
            study_date_of_change: Utc::now().format("%m/%d/%Y %H:%M").to_string(),
            study_coordinator: author.full_name(),
            study_coordinator_email: author.email.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Notification {
    /// Someone was invited into a study.
    StudyInvitation { email: String, study_title: String },
    /// A study's consent documents changed; the participant must re-sign.
    ParticipantConsentChanged {
        email: String,
        context: StudyContext,
    },
    /// Same event, doctor-facing wording.
    DoctorConsentChanged {
        email: String,
        user_full_name: String,
        context: StudyContext,
    },
}

pub struct NotificationService {
    sender: broadcast::Sender<Notification>,
    _receiver: broadcast::Receiver<Notification>,
}

impl NotificationService {
    pub fn new() -> Self {
        let (tx, rx) = broadcast::channel(100);
        Self {
            sender: tx,
            _receiver: rx,
        }
    }

    pub fn notify(&self, notification: Notification) {
        if let Err(err) = self.sender.send(notification) {
            tracing::warn!(error = %err, "failed to enqueue notification");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_reaches_subscribers() {
        let service = NotificationService::new();
        let mut rx = service.subscribe();
        service.notify(Notification::StudyInvitation {
            email: "p@test.com".into(),
            study_title: "Melanoma".into(),
        });
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, Notification::StudyInvitation { .. }));
    }

    #[tokio::test]
    async fn notify_without_subscribers_does_not_panic() {
        let service = NotificationService::new();
        service.notify(Notification::StudyInvitation {
            email: "p@test.com".into(),
            study_title: "Melanoma".into(),
        });
    }
}

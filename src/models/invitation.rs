use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Invitation lifecycle: `New` settles exactly once into `Accepted` or
/// `Declined` and is terminal afterwards. Re-inviting requires a new
/// row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    New,
    Accepted,
    Declined,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::New => "new",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(InvitationStatus::New),
            "accepted" => Some(InvitationStatus::Accepted),
            "declined" => Some(InvitationStatus::Declined),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::New)
    }

    /// Guarded transition. The storage layer enforces the same rule with
    /// a compare-and-swap on the status column; this is the shared
    /// decision both backends and callers agree on.
    pub fn transition(self, to: InvitationStatus) -> Result<InvitationStatus, Error> {
        match (self, to) {
            (InvitationStatus::New, InvitationStatus::Accepted)
            | (InvitationStatus::New, InvitationStatus::Declined) => Ok(to),
            _ => Err(Error::invalid_state(format!(
                "invitation is {} and cannot become {}",
                self.as_str(),
                to.as_str()
            ))),
        }
    }
}

/// An offer to join a study, addressed to an email that may or may not
/// belong to a registered account yet. `doctor_id` is the linking
/// doctor: the account the participant's data-sharing relationship is
/// established with on approval. `patient_id` is set when the target's
/// patient record is already known (the patient-targeted flavor).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StudyInvitation {
    pub id: Uuid,
    pub email: String,
    pub study_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub status: InvitationStatus,
    pub date_created: DateTime<Utc>,
}

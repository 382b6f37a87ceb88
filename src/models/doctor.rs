use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role extension of a doctor account.
///
/// A coordinator has site-level oversight of other doctors; a
/// participant is a patient with a login who manages their own data.
/// An account holds at most one extension at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoctorRole {
    Plain,
    Coordinator,
    Participant,
}

impl DoctorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoctorRole::Plain => "plain",
            DoctorRole::Coordinator => "coordinator",
            DoctorRole::Participant => "participant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "plain" => Some(DoctorRole::Plain),
            "coordinator" => Some(DoctorRole::Coordinator),
            "participant" => Some(DoctorRole::Participant),
            _ => None,
        }
    }
}

/// A login-capable account. Key material is opaque to the server; the
/// client encrypts and decrypts, we only store and hand back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub public_key: String,
    pub private_key: String,
    pub role: DoctorRole,
    /// The coordinator overseeing this doctor, if any.
    pub coordinator_id: Option<Uuid>,
    pub date_created: DateTime<Utc>,
}

impl Doctor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn is_coordinator(&self) -> bool {
        self.role == DoctorRole::Coordinator
    }

    pub fn is_participant(&self) -> bool {
        self.role == DoctorRole::Participant
    }
}

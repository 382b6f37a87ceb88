use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A research study authored by a coordinator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Study {
    pub id: Uuid,
    pub title: String,
    pub author_id: Uuid,
    pub date_created: DateTime<Utc>,
}

/// A consent document participants must sign to enroll. Only metadata
/// lives here; file storage is handled elsewhere.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsentDoc {
    pub id: Uuid,
    pub attachment_name: String,
    pub is_default_consent: bool,
}

/// Enrollment binding: attaches a consent snapshot to a patient's
/// membership in a study. Append-only; each consent event creates a new
/// row and the latest row per (study, patient) wins, so the full history
/// stays queryable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StudyToPatient {
    pub id: Uuid,
    pub study_id: Uuid,
    pub patient_id: Uuid,
    pub patient_consent_id: Option<Uuid>,
    pub date_created: DateTime<Utc>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A patient record, owned by the doctor who created it. A participant's
/// own record is the case where `doctor_id` points at the participant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub date_created: DateTime<Utc>,
}

/// Sharing edge: the capability list entry that lets `doctor_id` decrypt
/// `patient_id`'s data with the client-encrypted symmetric key.
/// One row per (doctor, patient); granting again rotates the key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DoctorToPatient {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub encrypted_key: String,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A signed consent artifact. Rows are never rewritten once created;
/// renewal means a new row, invalidation means forcing `date_expired`
/// into the past.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatientConsent {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub signature: String,
    pub date_created: DateTime<Utc>,
    pub date_expired: Option<DateTime<Utc>>,
}

impl PatientConsent {
    /// Validity is evaluated at the moment of use, never cached.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        match self.date_expired {
            None => true,
            Some(expired) => expired > now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn consent(date_expired: Option<DateTime<Utc>>) -> PatientConsent {
        PatientConsent {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            signature: "sig".into(),
            date_created: Utc::now(),
            date_expired,
        }
    }

    #[test]
    fn open_ended_consent_is_valid() {
        assert!(consent(None).is_valid(Utc::now()));
    }

    #[test]
    fn future_expiry_is_valid_until_reached() {
        let now = Utc::now();
        let c = consent(Some(now + Duration::days(30)));
        assert!(c.is_valid(now));
        assert!(!c.is_valid(now + Duration::days(31)));
    }

    #[test]
    fn expiry_at_now_is_invalid() {
        let now = Utc::now();
        assert!(!consent(Some(now)).is_valid(now));
    }
}

//! Shared harness: the real router over the in-memory repository, plus
//! seed helpers and a thin request wrapper.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use dermacore::config::Config;
use dermacore::create_router;
use dermacore::middleware::auth::issue_token;
use dermacore::models::{
    ConsentDoc, Doctor, DoctorRole, InvitationStatus, Patient, PatientConsent, Study,
    StudyInvitation,
};
use dermacore::repository::memory::MemRepository;
use dermacore::services::AppState;

pub const JWT_SECRET: &str = "test-secret";

pub struct TestApp {
    pub repo: Arc<MemRepository>,
    pub state: Arc<AppState>,
}

impl TestApp {
    pub fn new() -> Self {
        let repo = Arc::new(MemRepository::new());
        let config = Config {
            database_url: String::new(),
            jwt_secret: JWT_SECRET.to_string(),
            port: 0,
            consent_validity_days: 365,
        };
        let state = Arc::new(AppState::new(repo.clone(), config));
        Self { repo, state }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn token_for(&self, doctor: &Doctor) -> String {
        issue_token(doctor.id, JWT_SECRET).unwrap()
    }

    pub fn seed_doctor(
        &self,
        email: &str,
        role: DoctorRole,
        coordinator_id: Option<Uuid>,
    ) -> Doctor {
        let doctor = Doctor {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            public_key: format!("public_key_{email}"),
            private_key: String::new(),
            role,
            coordinator_id,
            date_created: Utc::now(),
        };
        self.repo.insert_doctor(doctor.clone());
        doctor
    }

    pub fn seed_patient(&self, owner: &Doctor) -> Patient {
        let patient = Patient {
            id: Uuid::new_v4(),
            doctor_id: owner.id,
            first_name: "Pat".to_string(),
            last_name: "Ient".to_string(),
            date_created: Utc::now(),
        };
        self.repo.insert_patient(patient.clone());
        patient
    }

    pub fn seed_study(&self, author: &Doctor, title: &str) -> Study {
        let study = Study {
            id: Uuid::new_v4(),
            title: title.to_string(),
            author_id: author.id,
            date_created: Utc::now(),
        };
        self.repo.insert_study(study.clone());
        study
    }

    pub fn seed_consent_doc(&self) -> ConsentDoc {
        let doc = ConsentDoc {
            id: Uuid::new_v4(),
            attachment_name: "consent.pdf".to_string(),
            is_default_consent: false,
        };
        self.repo.insert_consent_doc(doc.clone());
        doc
    }

    pub fn seed_consent(
        &self,
        patient: &Patient,
        date_expired: Option<DateTime<Utc>>,
    ) -> PatientConsent {
        let consent = PatientConsent {
            id: Uuid::new_v4(),
            patient_id: patient.id,
            signature: "signature".to_string(),
            date_created: Utc::now(),
            date_expired,
        };
        self.repo.insert_consent(consent.clone());
        consent
    }

    pub fn seed_invitation(
        &self,
        email: &str,
        study: &Study,
        doctor: &Doctor,
        patient_id: Option<Uuid>,
    ) -> StudyInvitation {
        let invitation = StudyInvitation {
            id: Uuid::new_v4(),
            email: email.to_string(),
            study_id: study.id,
            doctor_id: doctor.id,
            patient_id,
            status: InvitationStatus::New,
            date_created: Utc::now(),
        };
        self.repo.insert_invitation(invitation.clone());
        invitation
    }

    pub async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

//! Study surface: authorship, visibility, batch invites.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use dermacore::models::DoctorRole;
use dermacore::repository::Repository;

use common::TestApp;

#[tokio::test]
async fn health_endpoint_responds() {
    let app = TestApp::new();
    let (status, body) = app.request("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn study_creation_is_coordinator_only() {
    let app = TestApp::new();
    let coordinator = app.seed_doctor("coord@test.com", DoctorRole::Coordinator, None);
    let doctor = app.seed_doctor("doc@test.com", DoctorRole::Plain, None);
    let doc = app.seed_consent_doc();
    let payload = json!({"title": "sample study", "consent_docs": [doc.id]});

    let (status, _) = app
        .request("POST", "/api/v1/study/", None, Some(payload.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let doctor_token = app.token_for(&doctor);
    let (status, _) = app
        .request(
            "POST",
            "/api/v1/study/",
            Some(&doctor_token),
            Some(payload.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let coordinator_token = app.token_for(&coordinator);
    let (status, body) = app
        .request(
            "POST",
            "/api/v1/study/",
            Some(&coordinator_token),
            Some(payload),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], json!("sample study"));
    assert_eq!(body["author"], json!(coordinator.id));
    assert_eq!(body["consent_docs"], json!([doc.id]));
}

#[tokio::test]
async fn study_list_follows_role_visibility() {
    let app = TestApp::new();
    let author = app.seed_doctor("author@test.com", DoctorRole::Coordinator, None);
    let other_author = app.seed_doctor("other@test.com", DoctorRole::Coordinator, None);
    let doctor = app.seed_doctor("doc@test.com", DoctorRole::Plain, None);
    let participant = app.seed_doctor("part@test.com", DoctorRole::Participant, None);
    let patient = app.seed_patient(&participant);

    let mine = app.seed_study(&author, "mine");
    let theirs = app.seed_study(&other_author, "theirs");
    app.repo.add_study_doctor(theirs.id, doctor.id).await.unwrap();
    app.repo
        .apply_consent_binding(
            mine.id,
            dermacore::repository::NewConsent {
                patient_id: patient.id,
                signature: "sig".into(),
                date_expired: None,
            },
        )
        .await
        .unwrap();

    // Coordinator: authored studies only.
    let token = app.token_for(&author);
    let (_, body) = app.request("GET", "/api/v1/study/", Some(&token), None).await;
    let pks: Vec<_> = body.as_array().unwrap().iter().map(|s| s["pk"].clone()).collect();
    assert_eq!(pks, vec![json!(mine.id)]);

    // Plain doctor: collaborations only.
    let token = app.token_for(&doctor);
    let (_, body) = app.request("GET", "/api/v1/study/", Some(&token), None).await;
    let pks: Vec<_> = body.as_array().unwrap().iter().map(|s| s["pk"].clone()).collect();
    assert_eq!(pks, vec![json!(theirs.id)]);

    // Participant: enrollments only.
    let token = app.token_for(&participant);
    let (_, body) = app.request("GET", "/api/v1/study/", Some(&token), None).await;
    let pks: Vec<_> = body.as_array().unwrap().iter().map(|s| s["pk"].clone()).collect();
    assert_eq!(pks, vec![json!(mine.id)]);
}

#[tokio::test]
async fn membership_view_reports_latest_consent_per_patient() {
    let app = TestApp::new();
    let author = app.seed_doctor("author@test.com", DoctorRole::Coordinator, None);
    let doctor = app.seed_doctor("doc@test.com", DoctorRole::Plain, None);
    let owner = app.seed_doctor("owner@test.com", DoctorRole::Plain, None);
    let patient = app.seed_patient(&owner);
    let study = app.seed_study(&author, "Study");
    app.repo.add_study_doctor(study.id, doctor.id).await.unwrap();
    app.repo.insert_edge(doctor.id, patient.id, "key");

    let consent = app.seed_consent(&patient, Some(chrono::Utc::now()));
    app.repo
        .apply_consent_binding(
            study.id,
            dermacore::repository::NewConsent {
                patient_id: patient.id,
                signature: consent.signature.clone(),
                date_expired: consent.date_expired,
            },
        )
        .await
        .unwrap();

    let token = app.token_for(&doctor);
    let (status, body) = app.request("GET", "/api/v1/study/", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let study_json = &body.as_array().unwrap()[0];
    let consents = study_json["patients_consents"].as_object().unwrap();
    assert_eq!(consents.len(), 1);
    assert!(consents.contains_key(&patient.id.to_string()));
}

#[tokio::test]
async fn update_and_delete_are_author_only() {
    let app = TestApp::new();
    let author = app.seed_doctor("author@test.com", DoctorRole::Coordinator, None);
    let other = app.seed_doctor("other@test.com", DoctorRole::Plain, None);
    let study = app.seed_study(&author, "before");

    let payload = json!({"title": "after", "consent_docs": []});
    let path = format!("/api/v1/study/{}/", study.id);

    let (status, _) = app.request("PUT", &path, None, Some(payload.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let other_token = app.token_for(&other);
    let (status, _) = app
        .request("PUT", &path, Some(&other_token), Some(payload.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let author_token = app.token_for(&author);
    let (status, body) = app
        .request("PUT", &path, Some(&author_token), Some(payload))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], json!("after"));

    let (status, _) = app.request("DELETE", &path, Some(&other_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.request("DELETE", &path, Some(&author_token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(app.repo.study_by_id(study.id).await.unwrap().is_none());
}

// Batch invite (add_doctor) semantics.

#[tokio::test]
async fn add_doctor_partitions_batch_into_invites_and_failures() {
    let app = TestApp::new();
    let coordinator = app.seed_doctor("coord@test.com", DoctorRole::Coordinator, None);
    let doctor = app.seed_doctor(
        "doc@x.com",
        DoctorRole::Plain,
        Some(coordinator.id),
    );
    let participant = app.seed_doctor("patient@test.com", DoctorRole::Participant, None);
    let study = app.seed_study(&coordinator, "Study");

    let token = app.token_for(&coordinator);
    let body = json!({
        "doctor_pk": doctor.id,
        "emails": [
            doctor.email.clone(),
            coordinator.email.clone(),
            participant.email.clone(),
            "test@test.com",
        ],
    });
    let path = format!("/api/v1/study/{}/add_doctor/", study.id);
    let (status, response) = app.request("POST", &path, Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::OK);

    // Registered (non-participant) doctors fail softly; the participant
    // and the fresh address get invitations.
    assert_eq!(response["all_success"], json!(false));
    let mut fails: Vec<String> = response["fail_emails"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    fails.sort();
    let mut expected = vec![doctor.email.clone(), coordinator.email.clone()];
    expected.sort();
    assert_eq!(fails, expected);

    let invitations = app.repo.invitations_for_study(study.id).await.unwrap();
    let mut emails: Vec<_> = invitations.iter().map(|i| i.email.clone()).collect();
    emails.sort();
    assert_eq!(emails, vec![participant.email.clone(), "test@test.com".to_string()]);

    // The named doctor joined the collaborator set.
    assert!(app.repo.is_study_doctor(study.id, doctor.id).await.unwrap());
}

#[tokio::test]
async fn add_doctor_with_already_invited_email_reports_soft_failure() {
    let app = TestApp::new();
    let coordinator = app.seed_doctor("coord@test.com", DoctorRole::Coordinator, None);
    let doctor = app.seed_doctor("doc@test.com", DoctorRole::Plain, Some(coordinator.id));
    let study = app.seed_study(&coordinator, "Study");
    app.seed_invitation("test@test.com", &study, &doctor, None);

    let token = app.token_for(&coordinator);
    let body = json!({"doctor_pk": doctor.id, "emails": ["test@test.com"]});
    let path = format!("/api/v1/study/{}/add_doctor/", study.id);
    let (status, response) = app.request("POST", &path, Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["fail_emails"], json!(["test@test.com"]));
    assert_eq!(
        app.repo.invitations_for_study(study.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn add_doctor_rejects_whole_batch_on_malformed_email() {
    let app = TestApp::new();
    let coordinator = app.seed_doctor("coord@test.com", DoctorRole::Coordinator, None);
    let doctor = app.seed_doctor("doc@test.com", DoctorRole::Plain, Some(coordinator.id));
    let study = app.seed_study(&coordinator, "Study");

    let token = app.token_for(&coordinator);
    let body = json!({
        "doctor_pk": doctor.id,
        "emails": ["good@test.com", "bad_email"],
    });
    let path = format!("/api/v1/study/{}/add_doctor/", study.id);
    let (status, _) = app.request("POST", &path, Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app
        .repo
        .invitations_for_study(study.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn add_doctor_hides_foreign_studies() {
    let app = TestApp::new();
    let coordinator = app.seed_doctor("coord@test.com", DoctorRole::Coordinator, None);
    let foreign_author = app.seed_doctor("foreign@test.com", DoctorRole::Coordinator, None);
    let doctor = app.seed_doctor("doc@test.com", DoctorRole::Plain, Some(coordinator.id));
    let study = app.seed_study(&foreign_author, "Not yours");

    let path = format!("/api/v1/study/{}/add_doctor/", study.id);
    let body = json!({"doctor_pk": doctor.id, "emails": ["test@test.com"]});

    let (status, _) = app.request("POST", &path, None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Authorized user, wrong study: hidden, not forbidden.
    let token = app.token_for(&coordinator);
    let (status, _) = app.request("POST", &path, Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn add_doctor_with_unknown_doctor_pk_is_not_found() {
    let app = TestApp::new();
    let coordinator = app.seed_doctor("coord@test.com", DoctorRole::Coordinator, None);
    let study = app.seed_study(&coordinator, "Study");

    let token = app.token_for(&coordinator);
    let body = json!({"doctor_pk": uuid::Uuid::new_v4(), "emails": ["test@test.com"]});
    let path = format!("/api/v1/study/{}/add_doctor/", study.id);
    let (status, _) = app.request("POST", &path, Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.repo.study_doctor_ids(study.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn overseen_doctor_may_invite_into_coordinators_study() {
    let app = TestApp::new();
    let coordinator = app.seed_doctor("coord@test.com", DoctorRole::Coordinator, None);
    let doctor = app.seed_doctor("doc@test.com", DoctorRole::Plain, Some(coordinator.id));
    let study = app.seed_study(&coordinator, "Study");

    let token = app.token_for(&doctor);
    let body = json!({"doctor_pk": doctor.id, "emails": ["new@test.com"]});
    let path = format!("/api/v1/study/{}/add_doctor/", study.id);
    let (status, response) = app.request("POST", &path, Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["all_success"], json!(true));
}

#[tokio::test]
async fn study_invitation_listing_is_author_scoped() {
    let app = TestApp::new();
    let author = app.seed_doctor("author@test.com", DoctorRole::Coordinator, None);
    let other = app.seed_doctor("other@test.com", DoctorRole::Coordinator, None);
    let study = app.seed_study(&author, "Study");
    let foreign = app.seed_study(&other, "Foreign");
    let invitation = app.seed_invitation("a@test.com", &study, &author, None);
    app.seed_invitation("b@test.com", &foreign, &other, None);

    let token = app.token_for(&author);
    let path = format!("/api/v1/study/{}/invites/", study.id);
    let (status, body) = app.request("GET", &path, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["pk"], json!(invitation.id));

    let foreign_path = format!("/api/v1/study/{}/invites/", foreign.id);
    let (status, _) = app.request("GET", &foreign_path, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

//! PostgreSQL repository.
//!
//! Composite operations run inside a single transaction; the duplicate-
//! pending rule and the edge uniqueness live in the schema (partial
//! unique index, composite primary key) so concurrent writers are
//! stopped by the database, not by application-level checks. Status
//! settlement is a conditional `UPDATE ... WHERE status = 'new'`, the
//! compare-and-swap that lets only one of two racing requests win.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Doctor, DoctorRole, InvitationStatus, Patient, PatientConsent, Study, StudyInvitation,
    StudyToPatient,
};

use super::{
    BindingView, EdgeUpsert, NewBinding, NewConsent, NewInvitation, Repository,
    DUPLICATE_PENDING, NOT_PENDING,
};

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn doctor_from_row(row: &PgRow) -> Result<Doctor> {
    let role: String = row.get("role");
    Ok(Doctor {
        id: row.get("id"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        public_key: row.get("public_key"),
        private_key: row.get("private_key"),
        role: DoctorRole::parse(&role)
            .ok_or_else(|| anyhow::anyhow!("unknown doctor role: {role}"))?,
        coordinator_id: row.get("coordinator_id"),
        date_created: row.get("date_created"),
    })
}

fn patient_from_row(row: &PgRow) -> Patient {
    Patient {
        id: row.get("id"),
        doctor_id: row.get("doctor_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        date_created: row.get("date_created"),
    }
}

fn consent_from_row(row: &PgRow) -> PatientConsent {
    PatientConsent {
        id: row.get("id"),
        patient_id: row.get("patient_id"),
        signature: row.get("signature"),
        date_created: row.get("date_created"),
        date_expired: row.get("date_expired"),
    }
}

fn study_from_row(row: &PgRow) -> Study {
    Study {
        id: row.get("id"),
        title: row.get("title"),
        author_id: row.get("author_id"),
        date_created: row.get("date_created"),
    }
}

fn invitation_from_row(row: &PgRow) -> Result<StudyInvitation> {
    let status: String = row.get("status");
    Ok(StudyInvitation {
        id: row.get("id"),
        email: row.get("email"),
        study_id: row.get("study_id"),
        doctor_id: row.get("doctor_id"),
        patient_id: row.get("patient_id"),
        status: InvitationStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("unknown invitation status: {status}"))?,
        date_created: row.get("date_created"),
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

async fn upsert_edge<'e>(
    exec: impl sqlx::PgExecutor<'e>,
    edge: &EdgeUpsert,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO doctor_to_patient (doctor_id, patient_id, encrypted_key)
         VALUES ($1, $2, $3)
         ON CONFLICT (doctor_id, patient_id)
         DO UPDATE SET encrypted_key = EXCLUDED.encrypted_key",
    )
    .bind(edge.doctor_id)
    .bind(edge.patient_id)
    .bind(&edge.encrypted_key)
    .execute(exec)
    .await?;
    Ok(())
}

async fn insert_consent<'e>(
    exec: impl sqlx::PgExecutor<'e>,
    consent: &NewConsent,
) -> Result<PatientConsent> {
    let row = sqlx::query(
        "INSERT INTO patient_consents (id, patient_id, signature, date_created, date_expired)
         VALUES ($1, $2, $3, now(), $4)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(consent.patient_id)
    .bind(&consent.signature)
    .bind(consent.date_expired)
    .fetch_one(exec)
    .await?;
    Ok(consent_from_row(&row))
}

async fn insert_binding<'e>(
    exec: impl sqlx::PgExecutor<'e>,
    study_id: Uuid,
    patient_id: Uuid,
    consent_id: Uuid,
) -> Result<StudyToPatient> {
    let row = sqlx::query(
        "INSERT INTO study_to_patient (id, study_id, patient_id, patient_consent_id, date_created)
         VALUES ($1, $2, $3, $4, now())
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(study_id)
    .bind(patient_id)
    .bind(consent_id)
    .fetch_one(exec)
    .await?;
    Ok(StudyToPatient {
        id: row.get("id"),
        study_id: row.get("study_id"),
        patient_id: row.get("patient_id"),
        patient_consent_id: row.get("patient_consent_id"),
        date_created: row.get("date_created"),
    })
}

/// CAS settlement; distinguishes a lost race from a missing row.
async fn settle_invitation(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    invitation_id: Uuid,
    to: InvitationStatus,
) -> Result<StudyInvitation> {
    let row = sqlx::query(
        "UPDATE study_invitations SET status = $2
         WHERE id = $1 AND status = 'new'
         RETURNING *",
    )
    .bind(invitation_id)
    .bind(to.as_str())
    .fetch_optional(&mut **tx)
    .await?;

    match row {
        Some(row) => invitation_from_row(&row),
        None => {
            let exists = sqlx::query("SELECT 1 FROM study_invitations WHERE id = $1")
                .bind(invitation_id)
                .fetch_optional(&mut **tx)
                .await?
                .is_some();
            if exists {
                Err(Error::invalid_state(NOT_PENDING))
            } else {
                Err(Error::NotFound)
            }
        }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn doctor_by_id(&self, id: Uuid) -> Result<Option<Doctor>> {
        let row = sqlx::query("SELECT * FROM doctors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| doctor_from_row(&r)).transpose()
    }

    async fn doctor_by_email(&self, email: &str) -> Result<Option<Doctor>> {
        let row = sqlx::query("SELECT * FROM doctors WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| doctor_from_row(&r)).transpose()
    }

    async fn patient_by_id(&self, id: Uuid) -> Result<Option<Patient>> {
        let row = sqlx::query("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| patient_from_row(&r)))
    }

    async fn patient_of_participant(&self, doctor_id: Uuid) -> Result<Option<Patient>> {
        let row = sqlx::query(
            "SELECT * FROM patients WHERE doctor_id = $1 ORDER BY date_created LIMIT 1",
        )
        .bind(doctor_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| patient_from_row(&r)))
    }

    async fn has_patient_edge(&self, doctor_id: Uuid, patient_id: Uuid) -> Result<bool> {
        Ok(self.patient_edge_key(doctor_id, patient_id).await?.is_some())
    }

    async fn patient_edge_key(
        &self,
        doctor_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT encrypted_key FROM doctor_to_patient
             WHERE doctor_id = $1 AND patient_id = $2",
        )
        .bind(doctor_id)
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("encrypted_key")))
    }

    async fn create_study(
        &self,
        author_id: Uuid,
        title: &str,
        consent_doc_ids: &[Uuid],
    ) -> Result<Study> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO studies (id, title, author_id, date_created)
             VALUES ($1, $2, $3, now())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(author_id)
        .fetch_one(&mut *tx)
        .await?;
        let study = study_from_row(&row);

        for doc_id in consent_doc_ids {
            sqlx::query(
                "INSERT INTO study_consent_docs (study_id, consent_doc_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(study.id)
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(study)
    }

    async fn study_by_id(&self, id: Uuid) -> Result<Option<Study>> {
        let row = sqlx::query("SELECT * FROM studies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| study_from_row(&r)))
    }

    async fn update_study(
        &self,
        id: Uuid,
        title: &str,
        consent_doc_ids: &[Uuid],
    ) -> Result<(Study, bool)> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("UPDATE studies SET title = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(title)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::NotFound)?;
        let study = study_from_row(&row);

        let mut previous: Vec<Uuid> =
            sqlx::query("SELECT consent_doc_id FROM study_consent_docs WHERE study_id = $1")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?
                .iter()
                .map(|r| r.get("consent_doc_id"))
                .collect();

        sqlx::query("DELETE FROM study_consent_docs WHERE study_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for doc_id in consent_doc_ids {
            sqlx::query(
                "INSERT INTO study_consent_docs (study_id, consent_doc_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let mut next = consent_doc_ids.to_vec();
        previous.sort();
        next.sort();
        Ok((study, previous != next))
    }

    async fn delete_study(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM studies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn studies_authored(&self, author_id: Uuid) -> Result<Vec<Study>> {
        let rows =
            sqlx::query("SELECT * FROM studies WHERE author_id = $1 ORDER BY date_created")
                .bind(author_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(study_from_row).collect())
    }

    async fn studies_with_doctor(&self, doctor_id: Uuid) -> Result<Vec<Study>> {
        let rows = sqlx::query(
            "SELECT s.* FROM studies s
             JOIN study_doctors sd ON sd.study_id = s.id
             WHERE sd.doctor_id = $1
             ORDER BY s.date_created",
        )
        .bind(doctor_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(study_from_row).collect())
    }

    async fn studies_with_patient(&self, patient_id: Uuid) -> Result<Vec<Study>> {
        let rows = sqlx::query(
            "SELECT * FROM studies
             WHERE id IN (SELECT study_id FROM study_to_patient WHERE patient_id = $1)
             ORDER BY date_created",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(study_from_row).collect())
    }

    async fn add_study_doctor(&self, study_id: Uuid, doctor_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO study_doctors (study_id, doctor_id)
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(study_id)
        .bind(doctor_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_study_doctor(&self, study_id: Uuid, doctor_id: Uuid) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS present FROM study_doctors WHERE study_id = $1 AND doctor_id = $2",
        )
        .bind(study_id)
        .bind(doctor_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn study_doctor_ids(&self, study_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT doctor_id FROM study_doctors WHERE study_id = $1")
            .bind(study_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("doctor_id")).collect())
    }

    async fn study_consent_doc_ids(&self, study_id: Uuid) -> Result<Vec<Uuid>> {
        let rows =
            sqlx::query("SELECT consent_doc_id FROM study_consent_docs WHERE study_id = $1")
                .bind(study_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(|r| r.get("consent_doc_id")).collect())
    }

    async fn consent_docs_exist(&self, ids: &[Uuid]) -> Result<bool> {
        if ids.is_empty() {
            return Ok(true);
        }
        let row = sqlx::query("SELECT count(*) AS n FROM consent_docs WHERE id = ANY($1)")
            .bind(ids)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("n");
        Ok(count as usize == ids.len())
    }

    async fn create_consent(&self, consent: NewConsent) -> Result<PatientConsent> {
        insert_consent(&self.pool, &consent).await
    }

    async fn consent_by_id(&self, id: Uuid) -> Result<Option<PatientConsent>> {
        let row = sqlx::query("SELECT * FROM patient_consents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| consent_from_row(&r)))
    }

    async fn latest_bindings(&self, study_id: Uuid) -> Result<Vec<BindingView>> {
        let rows = sqlx::query(
            "SELECT DISTINCT ON (stp.patient_id)
                    stp.id, stp.study_id, stp.patient_id, stp.patient_consent_id,
                    stp.date_created,
                    pc.id AS consent_id, pc.patient_id AS consent_patient_id,
                    pc.signature, pc.date_created AS consent_date_created,
                    pc.date_expired
             FROM study_to_patient stp
             LEFT JOIN patient_consents pc ON pc.id = stp.patient_consent_id
             WHERE stp.study_id = $1
             ORDER BY stp.patient_id, stp.date_created DESC, stp.id DESC",
        )
        .bind(study_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let binding = StudyToPatient {
                    id: row.get("id"),
                    study_id: row.get("study_id"),
                    patient_id: row.get("patient_id"),
                    patient_consent_id: row.get("patient_consent_id"),
                    date_created: row.get("date_created"),
                };
                let consent = row
                    .get::<Option<Uuid>, _>("consent_id")
                    .map(|consent_id| PatientConsent {
                        id: consent_id,
                        patient_id: row.get("consent_patient_id"),
                        signature: row.get("signature"),
                        date_created: row.get("consent_date_created"),
                        date_expired: row.get("date_expired"),
                    });
                BindingView { binding, consent }
            })
            .collect())
    }

    async fn apply_consent_binding(
        &self,
        study_id: Uuid,
        consent: NewConsent,
    ) -> Result<(PatientConsent, StudyToPatient)> {
        let mut tx = self.pool.begin().await?;
        let row = insert_consent(&mut *tx, &consent).await?;
        let binding = insert_binding(&mut *tx, study_id, row.patient_id, row.id).await?;
        tx.commit().await?;
        Ok((row, binding))
    }

    async fn expire_consents(&self, consent_ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        if consent_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE patient_consents SET date_expired = $2
             WHERE id = ANY($1)
               AND (date_expired IS NULL OR date_expired > $2)",
        )
        .bind(consent_ids)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_invitation(&self, invitation: NewInvitation) -> Result<StudyInvitation> {
        let result = sqlx::query(
            "INSERT INTO study_invitations
                 (id, email, study_id, doctor_id, patient_id, status, date_created)
             VALUES ($1, $2, $3, $4, $5, 'new', now())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&invitation.email)
        .bind(invitation.study_id)
        .bind(invitation.doctor_id)
        .bind(invitation.patient_id)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => invitation_from_row(&row),
            Err(err) if is_unique_violation(&err) => Err(Error::invalid_state(DUPLICATE_PENDING)),
            Err(err) => Err(err.into()),
        }
    }

    async fn invitation_for_participant(
        &self,
        id: Uuid,
        email: &str,
    ) -> Result<Option<StudyInvitation>> {
        let row = sqlx::query(
            "SELECT * FROM study_invitations
             WHERE id = $1 AND email = $2 AND status = 'new'",
        )
        .bind(id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| invitation_from_row(&r)).transpose()
    }

    async fn invitation_for_doctor(
        &self,
        id: Uuid,
        doctor_id: Uuid,
    ) -> Result<Option<StudyInvitation>> {
        let row = sqlx::query(
            "SELECT * FROM study_invitations
             WHERE id = $1 AND doctor_id = $2 AND patient_id IS NOT NULL AND status = 'new'",
        )
        .bind(id)
        .bind(doctor_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| invitation_from_row(&r)).transpose()
    }

    async fn invitations_for_participant(&self, email: &str) -> Result<Vec<StudyInvitation>> {
        let rows = sqlx::query(
            "SELECT * FROM study_invitations
             WHERE email = $1 AND status = 'new'
             ORDER BY date_created",
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invitation_from_row).collect()
    }

    async fn invitations_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<StudyInvitation>> {
        let rows = sqlx::query(
            "SELECT * FROM study_invitations
             WHERE doctor_id = $1 AND patient_id IS NOT NULL AND status = 'new'
             ORDER BY date_created",
        )
        .bind(doctor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invitation_from_row).collect()
    }

    async fn invitations_for_study(&self, study_id: Uuid) -> Result<Vec<StudyInvitation>> {
        let rows = sqlx::query(
            "SELECT * FROM study_invitations WHERE study_id = $1 ORDER BY date_created",
        )
        .bind(study_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invitation_from_row).collect()
    }

    async fn apply_approval(
        &self,
        invitation_id: Uuid,
        edges: &[EdgeUpsert],
        binding: Option<NewBinding>,
    ) -> Result<StudyInvitation> {
        let mut tx = self.pool.begin().await?;
        let invitation =
            settle_invitation(&mut tx, invitation_id, InvitationStatus::Accepted).await?;
        for edge in edges {
            upsert_edge(&mut *tx, edge).await?;
        }
        if let Some(binding) = binding {
            insert_binding(&mut *tx, binding.study_id, binding.patient_id, binding.consent_id)
                .await?;
        }
        tx.commit().await?;
        Ok(invitation)
    }

    async fn apply_decline(&self, invitation_id: Uuid) -> Result<StudyInvitation> {
        let mut tx = self.pool.begin().await?;
        let invitation =
            settle_invitation(&mut tx, invitation_id, InvitationStatus::Declined).await?;
        tx.commit().await?;
        Ok(invitation)
    }
}

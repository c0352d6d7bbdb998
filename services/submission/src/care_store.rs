use crate::error::PersistenceError;
use crate::model::{Consult, FollowUpNotes, TrackingEntry, CONSULT_COMPLETE, CONSULT_PENDING};
use crate::trend::Trend;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

const CONSULT_COLUMNS: &str = "id, submission_id, doctor_id, meeting_link, status, \
     diagnosis, prescription, next_step, created_at";

/// Persistence for consultations and progress tracking
#[async_trait]
pub trait CareRepository: Send + Sync {
    /// Append a pending consult to a submission's history
    async fn create_consult(
        &self,
        submission_id: Uuid,
        doctor_id: &str,
        meeting_link: &str,
    ) -> Result<Consult, PersistenceError>;

    /// Most recent consult for a submission
    async fn latest_consult(&self, submission_id: Uuid) -> Result<Option<Consult>, PersistenceError>;

    /// Record follow-up notes and mark the consult complete
    async fn complete_consult(
        &self,
        consult_id: Uuid,
        notes: &FollowUpNotes,
    ) -> Result<Option<Consult>, PersistenceError>;

    /// Append a progress update
    async fn add_tracking(
        &self,
        submission_id: Uuid,
        update_text: &str,
        trend: Trend,
    ) -> Result<TrackingEntry, PersistenceError>;
}

/// Care repository backed by PostgreSQL
#[derive(Clone)]
pub struct PgCareRepository {
    pool: PgPool,
}

impl PgCareRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CareRepository for PgCareRepository {
    #[instrument(skip(self))]
    async fn create_consult(
        &self,
        submission_id: Uuid,
        doctor_id: &str,
        meeting_link: &str,
    ) -> Result<Consult, PersistenceError> {
        let consult = sqlx::query_as::<_, Consult>(&format!(
            r#"
            INSERT INTO consults (id, submission_id, doctor_id, meeting_link, status, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING {CONSULT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(submission_id)
        .bind(doctor_id)
        .bind(meeting_link)
        .bind(CONSULT_PENDING)
        .fetch_one(&self.pool)
        .await?;

        debug!(consult_id = %consult.id, "Consult created");

        Ok(consult)
    }

    async fn latest_consult(&self, submission_id: Uuid) -> Result<Option<Consult>, PersistenceError> {
        let consult = sqlx::query_as::<_, Consult>(&format!(
            r#"
            SELECT {CONSULT_COLUMNS}
            FROM consults
            WHERE submission_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(consult)
    }

    #[instrument(skip(self, notes))]
    async fn complete_consult(
        &self,
        consult_id: Uuid,
        notes: &FollowUpNotes,
    ) -> Result<Option<Consult>, PersistenceError> {
        let consult = sqlx::query_as::<_, Consult>(&format!(
            r#"
            UPDATE consults
            SET diagnosis = $2, prescription = $3, next_step = $4, status = $5
            WHERE id = $1
            RETURNING {CONSULT_COLUMNS}
            "#
        ))
        .bind(consult_id)
        .bind(&notes.diagnosis)
        .bind(&notes.prescription)
        .bind(&notes.next_step)
        .bind(CONSULT_COMPLETE)
        .fetch_optional(&self.pool)
        .await?;

        Ok(consult)
    }

    #[instrument(skip(self, update_text))]
    async fn add_tracking(
        &self,
        submission_id: Uuid,
        update_text: &str,
        trend: Trend,
    ) -> Result<TrackingEntry, PersistenceError> {
        let entry = sqlx::query_as::<_, TrackingEntry>(
            r#"
            INSERT INTO tracking (id, submission_id, update_text, trend, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, submission_id, update_text, trend, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(submission_id)
        .bind(update_text)
        .bind(trend.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(entry)
    }
}

use crate::config::DatabaseConfig;
use crate::error::PersistenceError;
use crate::model::{AnalysisUpdate, Submission};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SUBMISSION_COLUMNS: &str = "id, image_reference, vitals_raw, condition, confidence, \
     vital_alerts, created_at, analyzed_at";

/// Persistence for submission records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Insert a pending submission and return it with its assigned id
    async fn create(
        &self,
        image_reference: &str,
        vitals_raw: Option<String>,
    ) -> Result<Submission, PersistenceError>;

    /// Write the analysis fields of a pending submission in one mutation
    async fn update(
        &self,
        id: Uuid,
        analysis: &AnalysisUpdate,
    ) -> Result<Submission, PersistenceError>;

    /// Look a submission up; `None` when it does not exist
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Submission>, PersistenceError>;
}

/// Open a Postgres connection pool
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout())
        .idle_timeout(Some(config.idle_timeout()))
        .connect(&config.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!("Connected to PostgreSQL database");

    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), PersistenceError> {
    info!("Running database migrations");

    sqlx::migrate!("./migrations").run(pool).await?;

    info!("Database migrations completed");
    Ok(())
}

/// Submission repository backed by PostgreSQL
#[derive(Clone)]
pub struct PgSubmissionRepository {
    pool: PgPool,
}

impl PgSubmissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn exists(&self, id: Uuid) -> Result<bool, PersistenceError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM submissions WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }
}

#[async_trait]
impl SubmissionRepository for PgSubmissionRepository {
    #[instrument(skip(self, vitals_raw))]
    async fn create(
        &self,
        image_reference: &str,
        vitals_raw: Option<String>,
    ) -> Result<Submission, PersistenceError> {
        let id = Uuid::new_v4();

        let submission = sqlx::query_as::<_, Submission>(&format!(
            r#"
            INSERT INTO submissions (id, image_reference, vitals_raw, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING {SUBMISSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(image_reference)
        .bind(vitals_raw)
        .fetch_one(&self.pool)
        .await?;

        debug!(submission_id = %submission.id, "Submission created");

        Ok(submission)
    }

    #[instrument(skip(self, analysis), fields(condition = %analysis.condition))]
    async fn update(
        &self,
        id: Uuid,
        analysis: &AnalysisUpdate,
    ) -> Result<Submission, PersistenceError> {
        let updated = sqlx::query_as::<_, Submission>(&format!(
            r#"
            UPDATE submissions
            SET condition = $2, confidence = $3, vital_alerts = $4, analyzed_at = NOW()
            WHERE id = $1 AND analyzed_at IS NULL
            RETURNING {SUBMISSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&analysis.condition)
        .bind(analysis.confidence)
        .bind(&analysis.vital_alerts)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(submission) => {
                debug!(submission_id = %id, "Submission analysis recorded");
                Ok(submission)
            }
            None if self.exists(id).await? => Err(PersistenceError::AlreadyAnalyzed(id)),
            None => Err(PersistenceError::NotFound(id)),
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Submission>, PersistenceError> {
        let submission = sqlx::query_as::<_, Submission>(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(submission)
    }
}

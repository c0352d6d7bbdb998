//! Error types for the submission pipeline and its collaborators.
//!
//! Storage and persistence failures are fatal to a pipeline run and surface to
//! the caller wrapped in [`PipelineError`], tagged with the step that failed.
//! Analyzer failures never appear here; see [`crate::analyzer::AnalyzerDegraded`].

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Object store failures
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to upload object {key}: {message}")]
    Upload { key: String, message: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Submission/consult record failures
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Submission {0} not found")]
    NotFound(Uuid),

    #[error("Submission {0} has already been analyzed")]
    AlreadyAnalyzed(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Fatal step of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Store,
    Create,
    Update,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Store => "store",
            PipelineStep::Create => "create",
            PipelineStep::Update => "update",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-visible pipeline failure
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline failed at step 'store': {0}")]
    Store(#[source] StorageError),

    #[error("Pipeline failed at step 'create': {0}")]
    Create(#[source] PersistenceError),

    #[error("Pipeline failed at step 'update': {0}")]
    Update(#[source] PersistenceError),
}

impl PipelineError {
    /// Which step aborted the run
    pub fn step(&self) -> PipelineStep {
        match self {
            PipelineError::Store(_) => PipelineStep::Store,
            PipelineError::Create(_) => PipelineStep::Create,
            PipelineError::Update(_) => PipelineStep::Update,
        }
    }
}

/// Consultation and tracking failures
#[derive(Error, Debug)]
pub enum CareError {
    #[error("Submission {0} not found")]
    SubmissionNotFound(Uuid),

    #[error("No consultation found for submission {0}")]
    NoConsult(Uuid),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<sqlx::Error> for CareError {
    fn from(e: sqlx::Error) -> Self {
        CareError::Persistence(PersistenceError::Database(e))
    }
}

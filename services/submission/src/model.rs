use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::PathBuf;
use uuid::Uuid;

use crate::analyzer::AnalyzerKind;

/// Persisted patient submission
///
/// Created with `condition`/`confidence`/`vital_alerts` absent and `analyzed_at`
/// unset; the single terminal update fills all of them at once.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Submission {
    /// Assigned at creation
    pub id: Uuid,
    /// Resolvable locator of the stored image, immutable
    pub image_reference: String,
    /// Raw vitals text as submitted
    pub vitals_raw: Option<String>,
    /// Analyzer label, "unknown" when image analysis degraded
    pub condition: Option<String>,
    /// Analyzer score in [0, 1], 0 when image analysis degraded
    pub confidence: Option<f64>,
    /// Vitals alert payload
    pub vital_alerts: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Set by the terminal update
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl Submission {
    /// Whether the terminal update has been applied
    pub fn is_analyzed(&self) -> bool {
        self.analyzed_at.is_some()
    }
}

/// Analysis outputs written by the terminal update
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisUpdate {
    pub condition: String,
    pub confidence: f64,
    pub vital_alerts: Option<serde_json::Value>,
}

/// Finalized view returned by the pipeline
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubmissionView {
    pub id: Uuid,
    pub condition: String,
    pub confidence: f64,
    pub vital_alerts: Option<serde_json::Value>,
    /// Analyzers that fell back to sentinel values during this run
    #[serde(skip)]
    pub degraded: Vec<AnalyzerKind>,
}

/// Uploaded image handed to the pipeline
///
/// The payload is kept in memory for the object store; `local_path` points at a
/// spooled copy of the same bytes for analyzers that read from disk.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub payload: Bytes,
    pub content_type: String,
    pub file_name: String,
    pub local_path: PathBuf,
}

/// Consultation status
pub const CONSULT_PENDING: &str = "pending";
pub const CONSULT_COMPLETE: &str = "complete";

/// Consultation attempt for a submission (append-only history)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Consult {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub doctor_id: String,
    pub meeting_link: String,
    pub status: String,
    pub diagnosis: Option<String>,
    pub prescription: Option<String>,
    pub next_step: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Doctor's follow-up notes
#[derive(Debug, Clone, Deserialize)]
pub struct FollowUpNotes {
    pub diagnosis: Option<String>,
    pub prescription: Option<String>,
    pub next_step: Option<String>,
}

impl FollowUpNotes {
    /// All three notes are present and non-blank
    pub fn is_complete(&self) -> bool {
        [&self.diagnosis, &self.prescription, &self.next_step]
            .iter()
            .all(|note| note.as_deref().is_some_and(|text| !text.trim().is_empty()))
    }
}

/// Patient progress update
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct TrackingEntry {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub update_text: String,
    pub trend: String,
    pub created_at: DateTime<Utc>,
}

/// Consult details shown alongside results
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConsultSummary {
    pub doctor: String,
    pub link: String,
    pub status: String,
    pub diagnosis: Option<String>,
    pub prescription: Option<String>,
    pub next_step: Option<String>,
}

impl From<Consult> for ConsultSummary {
    fn from(c: Consult) -> Self {
        Self {
            doctor: c.doctor_id,
            link: c.meeting_link,
            status: c.status,
            diagnosis: c.diagnosis,
            prescription: c.prescription,
            next_step: c.next_step,
        }
    }
}

/// Analysis results plus the current consult
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultsView {
    pub id: Uuid,
    pub condition: Option<String>,
    pub confidence: Option<f64>,
    pub vital_alerts: Option<serde_json::Value>,
    pub consult: Option<ConsultSummary>,
}

impl ResultsView {
    pub fn new(submission: Submission, latest_consult: Option<Consult>) -> Self {
        Self {
            id: submission.id,
            condition: submission.condition,
            confidence: submission.confidence,
            vital_alerts: submission.vital_alerts,
            consult: latest_consult.map(Into::into),
        }
    }
}

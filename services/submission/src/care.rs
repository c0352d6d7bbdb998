//! Consultation, follow-up and progress tracking around a submission.
//!
//! Plain record mutation: every operation first checks the submission exists,
//! then appends to or updates the care history. Only the most recent consult
//! for a submission is considered current.

use crate::care_store::CareRepository;
use crate::config::ConsultConfig;
use crate::error::CareError;
use crate::model::{Consult, FollowUpNotes, ResultsView, TrackingEntry};
use crate::submission_store::SubmissionRepository;
use crate::trend::assess_trend;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const UNASSIGNED_DOCTOR: &str = "Unassigned";

pub struct CareService {
    submissions: Arc<dyn SubmissionRepository>,
    care: Arc<dyn CareRepository>,
    config: ConsultConfig,
}

impl CareService {
    pub fn new(
        submissions: Arc<dyn SubmissionRepository>,
        care: Arc<dyn CareRepository>,
        config: ConsultConfig,
    ) -> Self {
        Self {
            submissions,
            care,
            config,
        }
    }

    /// Analysis results with the current consult, `None` for an unknown id
    pub async fn results(&self, submission_id: Uuid) -> Result<Option<ResultsView>, CareError> {
        let Some(submission) = self.submissions.get_by_id(submission_id).await? else {
            return Ok(None);
        };

        let consult = self.care.latest_consult(submission_id).await?;
        Ok(Some(ResultsView::new(submission, consult)))
    }

    /// Assign a doctor and meeting link to a submission
    #[instrument(skip(self))]
    pub async fn request_consult(&self, submission_id: Uuid) -> Result<Consult, CareError> {
        self.ensure_submission(submission_id).await?;

        let (doctor, link) = self.assign(Uuid::new_v4());
        let consult = self
            .care
            .create_consult(submission_id, &doctor, &link)
            .await?;

        info!(submission_id = %submission_id, doctor = %consult.doctor_id, "Consult requested");
        Ok(consult)
    }

    /// Record a doctor's notes on the current consult and complete it
    #[instrument(skip(self, notes))]
    pub async fn follow_up(
        &self,
        submission_id: Uuid,
        notes: &FollowUpNotes,
    ) -> Result<Consult, CareError> {
        let current = self
            .care
            .latest_consult(submission_id)
            .await?
            .ok_or(CareError::NoConsult(submission_id))?;

        self.care
            .complete_consult(current.id, notes)
            .await?
            .ok_or(CareError::NoConsult(submission_id))
    }

    /// Append a patient update, classified by trend
    #[instrument(skip(self, update))]
    pub async fn track(&self, submission_id: Uuid, update: &str) -> Result<TrackingEntry, CareError> {
        self.ensure_submission(submission_id).await?;

        let trend = assess_trend(update);
        let entry = self.care.add_tracking(submission_id, update, trend).await?;

        info!(submission_id = %submission_id, trend = %trend, "Progress update recorded");
        Ok(entry)
    }

    async fn ensure_submission(&self, submission_id: Uuid) -> Result<(), CareError> {
        match self.submissions.get_by_id(submission_id).await? {
            Some(_) => Ok(()),
            None => Err(CareError::SubmissionNotFound(submission_id)),
        }
    }

    /// Pick a doctor from the roster and a nine-digit meeting id from `seed`
    fn assign(&self, seed: Uuid) -> (String, String) {
        let bits = seed.as_u128();

        let doctor = if self.config.doctors.is_empty() {
            UNASSIGNED_DOCTOR.to_string()
        } else {
            let index = (bits % self.config.doctors.len() as u128) as usize;
            self.config.doctors[index].clone()
        };

        let meeting_id = 100_000_000 + ((bits >> 64) % 900_000_000) as u64;
        let link = format!(
            "{}/{}",
            self.config.meeting_base_url.trim_end_matches('/'),
            meeting_id
        );

        (doctor, link)
    }
}

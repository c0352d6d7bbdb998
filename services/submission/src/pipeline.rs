//! Submission processing pipeline.
//!
//! One call runs these steps in order, without retries:
//!
//! 1. store the image in the object store (fatal on failure)
//! 2. create the pending submission record (fatal on failure)
//! 3. classify the image and, when vitals were supplied, assess them; the two
//!    analyzers run concurrently and never fail the run
//! 4. write all analysis fields in one update (fatal on failure)
//! 5. return the finalized view
//!
//! Each run owns its payload and its submission id; nothing mutable is shared
//! between concurrent runs.

use crate::analyzer::{AnalyzerKind, ImageAnalysis, ImageAnalyzer, VitalsAnalysis, VitalsAnalyzer};
use crate::error::PipelineError;
use crate::model::{AnalysisUpdate, ImageUpload, SubmissionView};
use crate::object_store::ObjectStore;
use crate::submission_store::SubmissionRepository;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

pub struct SubmissionPipeline {
    object_store: Arc<dyn ObjectStore>,
    submissions: Arc<dyn SubmissionRepository>,
    image_analyzer: Arc<dyn ImageAnalyzer>,
    vitals_analyzer: Arc<dyn VitalsAnalyzer>,
}

impl SubmissionPipeline {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        submissions: Arc<dyn SubmissionRepository>,
        image_analyzer: Arc<dyn ImageAnalyzer>,
        vitals_analyzer: Arc<dyn VitalsAnalyzer>,
    ) -> Self {
        Self {
            object_store,
            submissions,
            image_analyzer,
            vitals_analyzer,
        }
    }

    /// Run a submission through storage, record creation, analysis and the
    /// terminal update
    #[instrument(
        skip(self, upload, vitals_raw),
        fields(file_name = %upload.file_name, size_bytes = upload.payload.len())
    )]
    pub async fn process(
        &self,
        upload: &ImageUpload,
        vitals_raw: Option<&str>,
    ) -> Result<SubmissionView, PipelineError> {
        let started = Instant::now();
        let vitals = supplied_vitals(vitals_raw);

        let reference = self
            .object_store
            .store(upload.payload.clone(), &upload.content_type, &upload.file_name)
            .await
            .map_err(|e| record_failure(PipelineError::Store(e)))?;

        let submission = self
            .submissions
            .create(&reference.url, vitals.map(str::to_string))
            .await
            .map_err(|e| record_failure(PipelineError::Create(e)))?;

        let (image, vitals_outcome) = tokio::join!(
            self.image_analyzer.analyze_image(&upload.local_path),
            async {
                match vitals {
                    Some(text) => Some(self.vitals_analyzer.analyze_vitals(text).await),
                    None => None,
                }
            }
        );

        let degraded = degraded_analyzers(&image, vitals_outcome.as_ref());
        let classification = image.classification();
        let update = AnalysisUpdate {
            condition: classification.condition,
            confidence: classification.confidence,
            vital_alerts: vitals_outcome.as_ref().and_then(VitalsAnalysis::alerts),
        };

        let analyzed = self
            .submissions
            .update(submission.id, &update)
            .await
            .map_err(|e| record_failure(PipelineError::Update(e)))?;

        metrics::counter!("submission.pipeline.completed").increment(1);
        metrics::histogram!("submission.pipeline.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        info!(
            submission_id = %analyzed.id,
            condition = %update.condition,
            confidence = update.confidence,
            degraded = degraded.len(),
            "Submission processed"
        );

        Ok(SubmissionView {
            id: analyzed.id,
            condition: analyzed.condition.unwrap_or(update.condition),
            confidence: analyzed.confidence.unwrap_or(update.confidence),
            vital_alerts: analyzed.vital_alerts,
            degraded,
        })
    }
}

/// Vitals text worth analyzing; blank input counts as none
fn supplied_vitals(vitals_raw: Option<&str>) -> Option<&str> {
    vitals_raw.filter(|text| !text.trim().is_empty())
}

fn degraded_analyzers(image: &ImageAnalysis, vitals: Option<&VitalsAnalysis>) -> Vec<AnalyzerKind> {
    let mut degraded = Vec::new();

    if let Some(reason) = image.degraded_reason() {
        warn!(analyzer = "image", reason = %reason, "Image analysis degraded, using sentinel result");
        degraded.push(AnalyzerKind::Image);
    }
    if let Some(reason) = vitals.and_then(VitalsAnalysis::degraded_reason) {
        warn!(analyzer = "vitals", reason = %reason, "Vitals analysis degraded, recording no alerts");
        degraded.push(AnalyzerKind::Vitals);
    }

    for kind in &degraded {
        metrics::counter!("submission.analyzer.degraded", "analyzer" => kind.as_str()).increment(1);
    }

    degraded
}

fn record_failure(err: PipelineError) -> PipelineError {
    let step = err.step();
    error!(step = %step, error = %err, "Submission pipeline aborted");
    metrics::counter!("submission.pipeline.failed", "step" => step.as_str()).increment(1);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{
        AnalyzerDegraded, Classification, MockImageAnalyzer, MockVitalsAnalyzer, VitalsAssessment,
    };
    use crate::error::{PersistenceError, PipelineStep, StorageError};
    use crate::model::Submission;
    use crate::object_store::{MockObjectStore, ObjectReference};
    use crate::submission_store::MockSubmissionRepository;
    use bytes::Bytes;
    use chrono::Utc;
    use mockall::Sequence;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    const URL: &str = "https://uploads.s3.us-east-1.amazonaws.com/uploads/2024-05-01/abc_rash.jpg";

    fn upload() -> ImageUpload {
        ImageUpload {
            payload: Bytes::from_static(b"\xff\xd8\xff\xe0 jpeg"),
            content_type: "image/jpeg".to_string(),
            file_name: "rash.jpg".to_string(),
            local_path: PathBuf::from("/spool/rash.jpg"),
        }
    }

    fn pending(id: Uuid, reference: &str, vitals: Option<String>) -> Submission {
        Submission {
            id,
            image_reference: reference.to_string(),
            vitals_raw: vitals,
            condition: None,
            confidence: None,
            vital_alerts: None,
            created_at: Utc::now(),
            analyzed_at: None,
        }
    }

    fn analyzed(id: Uuid, update: &AnalysisUpdate) -> Submission {
        Submission {
            condition: Some(update.condition.clone()),
            confidence: Some(update.confidence),
            vital_alerts: update.vital_alerts.clone(),
            analyzed_at: Some(Utc::now()),
            ..pending(id, URL, None)
        }
    }

    fn stored() -> ObjectReference {
        ObjectReference {
            key: "uploads/2024-05-01/abc_rash.jpg".to_string(),
            url: URL.to_string(),
        }
    }

    fn classified(condition: &str, confidence: f64) -> ImageAnalysis {
        ImageAnalysis::Classified(Classification {
            condition: condition.to_string(),
            confidence,
        })
    }

    fn pipeline(
        store: MockObjectStore,
        repo: MockSubmissionRepository,
        image: MockImageAnalyzer,
        vitals: MockVitalsAnalyzer,
    ) -> SubmissionPipeline {
        SubmissionPipeline::new(Arc::new(store), Arc::new(repo), Arc::new(image), Arc::new(vitals))
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let mut seq = Sequence::new();
        let id = Uuid::new_v4();

        let mut store = MockObjectStore::new();
        store
            .expect_store()
            .withf(|payload, content_type, name| {
                !payload.is_empty() && content_type == "image/jpeg" && name == "rash.jpg"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(stored()));

        let mut repo = MockSubmissionRepository::new();
        repo.expect_create()
            .withf(|reference, vitals| {
                reference == URL && vitals.as_deref() == Some("fever, pain in chest, worsening")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |reference, vitals| Ok(pending(id, reference, vitals)));

        let mut image = MockImageAnalyzer::new();
        image
            .expect_analyze_image()
            .withf(|path| path == Path::new("/spool/rash.jpg"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| classified("pneumonia", 0.82));

        let mut vitals = MockVitalsAnalyzer::new();
        vitals.expect_analyze_vitals().times(1).returning(|_| {
            VitalsAnalysis::Assessed(VitalsAssessment {
                alerts: Some(json!(["elevated_temp", "pain_reported"])),
            })
        });

        repo.expect_update()
            .withf(move |update_id, update| {
                *update_id == id
                    && update.condition == "pneumonia"
                    && update.confidence == 0.82
                    && update.vital_alerts == Some(json!(["elevated_temp", "pain_reported"]))
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|id, update| Ok(analyzed(id, update)));

        let view = pipeline(store, repo, image, vitals)
            .process(&upload(), Some("fever, pain in chest, worsening"))
            .await;
        let view = assert_ok!(view);

        assert_eq!(view.id, id);
        assert_eq!(view.condition, "pneumonia");
        assert_eq!(view.confidence, 0.82);
        assert_eq!(view.vital_alerts, Some(json!(["elevated_temp", "pain_reported"])));
        assert!(view.degraded.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_aborts_before_create() {
        let mut store = MockObjectStore::new();
        store.expect_store().times(1).returning(|_, _, _| {
            Err(StorageError::Upload {
                key: "uploads/x".to_string(),
                message: "dispatch failure".to_string(),
            })
        });

        let mut repo = MockSubmissionRepository::new();
        repo.expect_create().never();
        repo.expect_update().never();
        let mut image = MockImageAnalyzer::new();
        image.expect_analyze_image().never();

        let result = pipeline(store, repo, image, MockVitalsAnalyzer::new())
            .process(&upload(), Some("HR 120"))
            .await;

        let err = assert_err!(result);
        assert_eq!(err.step(), PipelineStep::Store);
    }

    #[tokio::test]
    async fn test_create_failure_skips_analysis() {
        let mut store = MockObjectStore::new();
        store.expect_store().returning(|_, _, _| Ok(stored()));

        let mut repo = MockSubmissionRepository::new();
        repo.expect_create()
            .returning(|_, _| Err(PersistenceError::Database(sqlx::Error::PoolTimedOut)));
        repo.expect_update().never();
        let mut image = MockImageAnalyzer::new();
        image.expect_analyze_image().never();
        let mut vitals = MockVitalsAnalyzer::new();
        vitals.expect_analyze_vitals().never();

        let err = pipeline(store, repo, image, vitals)
            .process(&upload(), Some("HR 120"))
            .await
            .unwrap_err();

        assert_eq!(err.step(), PipelineStep::Create);
    }

    #[tokio::test]
    async fn test_degraded_image_analysis_still_succeeds() {
        let id = Uuid::new_v4();
        let mut store = MockObjectStore::new();
        store.expect_store().returning(|_, _, _| Ok(stored()));

        let mut repo = MockSubmissionRepository::new();
        repo.expect_create()
            .returning(move |reference, vitals| Ok(pending(id, reference, vitals)));
        repo.expect_update()
            .withf(|_, update| {
                update.condition == "unknown" && update.confidence == 0.0 && update.vital_alerts.is_none()
            })
            .times(1)
            .returning(|id, update| Ok(analyzed(id, update)));

        let mut image = MockImageAnalyzer::new();
        image.expect_analyze_image().returning(|_| {
            ImageAnalysis::Degraded(AnalyzerDegraded::Spawn(
                "python3: No such file or directory".to_string(),
            ))
        });

        let view = pipeline(store, repo, image, MockVitalsAnalyzer::new())
            .process(&upload(), None)
            .await
            .unwrap();

        assert_eq!(view.condition, "unknown");
        assert_eq!(view.confidence, 0.0);
        assert_eq!(view.degraded, vec![AnalyzerKind::Image]);
    }

    #[tokio::test]
    async fn test_blank_vitals_skip_vitals_analysis() {
        let id = Uuid::new_v4();
        let mut store = MockObjectStore::new();
        store.expect_store().returning(|_, _, _| Ok(stored()));

        let mut repo = MockSubmissionRepository::new();
        repo.expect_create()
            .withf(|_, vitals| vitals.is_none())
            .returning(move |reference, vitals| Ok(pending(id, reference, vitals)));
        repo.expect_update()
            .returning(|id, update| Ok(analyzed(id, update)));

        let mut image = MockImageAnalyzer::new();
        image.expect_analyze_image().returning(|_| classified("acne", 0.64));
        let mut vitals = MockVitalsAnalyzer::new();
        vitals.expect_analyze_vitals().never();

        let view = pipeline(store, repo, image, vitals)
            .process(&upload(), Some("   \n\t"))
            .await
            .unwrap();

        assert_eq!(view.vital_alerts, None);
        assert!(view.degraded.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_vitals_record_no_alerts() {
        let id = Uuid::new_v4();
        let mut store = MockObjectStore::new();
        store.expect_store().returning(|_, _, _| Ok(stored()));

        let mut repo = MockSubmissionRepository::new();
        repo.expect_create()
            .returning(move |reference, vitals| Ok(pending(id, reference, vitals)));
        repo.expect_update()
            .withf(|_, update| update.vital_alerts.is_none() && update.condition == "rosacea")
            .returning(|id, update| Ok(analyzed(id, update)));

        let mut image = MockImageAnalyzer::new();
        image.expect_analyze_image().returning(|_| classified("rosacea", 0.55));
        let mut vitals = MockVitalsAnalyzer::new();
        vitals.expect_analyze_vitals().times(1).returning(|_| {
            VitalsAnalysis::Degraded(AnalyzerDegraded::Exit {
                code: Some(1),
                stderr: "Traceback".to_string(),
            })
        });

        let view = pipeline(store, repo, image, vitals)
            .process(&upload(), Some("Temp 38C"))
            .await
            .unwrap();

        assert_eq!(view.condition, "rosacea");
        assert_eq!(view.vital_alerts, None);
        assert_eq!(view.degraded, vec![AnalyzerKind::Vitals]);
    }

    #[tokio::test]
    async fn test_update_not_found_is_reported() {
        let id = Uuid::new_v4();
        let mut store = MockObjectStore::new();
        store.expect_store().returning(|_, _, _| Ok(stored()));

        let mut repo = MockSubmissionRepository::new();
        repo.expect_create()
            .returning(move |reference, vitals| Ok(pending(id, reference, vitals)));
        repo.expect_update()
            .times(1)
            .returning(|id, _| Err(PersistenceError::NotFound(id)));

        let mut image = MockImageAnalyzer::new();
        image.expect_analyze_image().returning(|_| classified("eczema", 0.9));

        let err = pipeline(store, repo, image, MockVitalsAnalyzer::new())
            .process(&upload(), None)
            .await
            .unwrap_err();

        assert_eq!(err.step(), PipelineStep::Update);
        assert!(matches!(err, PipelineError::Update(PersistenceError::NotFound(missing)) if missing == id));
    }

    #[test]
    fn test_supplied_vitals() {
        assert_eq!(supplied_vitals(None), None);
        assert_eq!(supplied_vitals(Some("")), None);
        assert_eq!(supplied_vitals(Some("  \t")), None);
        assert_eq!(supplied_vitals(Some(" HR 88 ")), Some(" HR 88 "));
    }
}

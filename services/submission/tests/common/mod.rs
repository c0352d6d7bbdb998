#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use submission_service::error::{PersistenceError, StorageError};
use submission_service::model::{
    AnalysisUpdate, Consult, FollowUpNotes, TrackingEntry, CONSULT_COMPLETE, CONSULT_PENDING,
};
use submission_service::object_store::generate_object_key;
use submission_service::{
    AnalyzerDegraded, CareRepository, Classification, ImageAnalysis, ImageAnalyzer, ImageUpload,
    ObjectReference, ObjectStore, Submission, SubmissionRepository, Trend, VitalsAnalysis,
    VitalsAnalyzer, VitalsAssessment,
};
use uuid::Uuid;

pub const PUBLIC_BASE: &str = "https://media.test/uploads";

/// Object store keeping objects in memory
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
    unreachable: bool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Fetch an object through its public URL
    pub fn resolve(&self, url: &str) -> Option<Bytes> {
        let key = url.strip_prefix(PUBLIC_BASE)?.trim_start_matches('/');
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn store(
        &self,
        payload: Bytes,
        _content_type: &str,
        suggested_name: &str,
    ) -> Result<ObjectReference, StorageError> {
        let key = generate_object_key("uploads", suggested_name, Utc::now());
        if self.unreachable {
            return Err(StorageError::Upload {
                key,
                message: "connection refused".to_string(),
            });
        }

        self.objects.lock().unwrap().insert(key.clone(), payload);
        let url = format!("{}/{}", PUBLIC_BASE, key);
        Ok(ObjectReference { key, url })
    }
}

/// Submission repository keeping records in memory
///
/// When linked to an object store it records whether each image reference
/// already resolved at the moment the record was created.
#[derive(Default)]
pub struct InMemorySubmissionRepository {
    records: Mutex<HashMap<Uuid, Submission>>,
    object_store: Option<Arc<InMemoryObjectStore>>,
    unresolvable_at_create: AtomicUsize,
    updates: AtomicUsize,
}

impl InMemorySubmissionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn linked_to(object_store: Arc<InMemoryObjectStore>) -> Self {
        Self {
            object_store: Some(object_store),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn unresolvable_at_create(&self) -> usize {
        self.unresolvable_at_create.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Remove every record (a concurrent deletion)
    pub fn delete_all(&self) {
        self.records.lock().unwrap().clear();
    }

    pub fn get(&self, id: Uuid) -> Option<Submission> {
        self.records.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl SubmissionRepository for InMemorySubmissionRepository {
    async fn create(
        &self,
        image_reference: &str,
        vitals_raw: Option<String>,
    ) -> Result<Submission, PersistenceError> {
        if let Some(store) = &self.object_store {
            if store.resolve(image_reference).is_none() {
                self.unresolvable_at_create.fetch_add(1, Ordering::SeqCst);
            }
        }

        let submission = Submission {
            id: Uuid::new_v4(),
            image_reference: image_reference.to_string(),
            vitals_raw,
            condition: None,
            confidence: None,
            vital_alerts: None,
            created_at: Utc::now(),
            analyzed_at: None,
        };
        self.records
            .lock()
            .unwrap()
            .insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn update(
        &self,
        id: Uuid,
        analysis: &AnalysisUpdate,
    ) -> Result<Submission, PersistenceError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).ok_or(PersistenceError::NotFound(id))?;
        if record.analyzed_at.is_some() {
            return Err(PersistenceError::AlreadyAnalyzed(id));
        }

        record.condition = Some(analysis.condition.clone());
        record.confidence = Some(analysis.confidence);
        record.vital_alerts = analysis.vital_alerts.clone();
        record.analyzed_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Submission>, PersistenceError> {
        Ok(self.get(id))
    }
}

/// Image analyzer returning a fixed outcome
pub struct FixedImageAnalyzer {
    outcome: ImageAnalysis,
    calls: AtomicUsize,
    seen_payloads: Mutex<Vec<Vec<u8>>>,
}

impl FixedImageAnalyzer {
    pub fn classifying(condition: &str, confidence: f64) -> Self {
        Self::with_outcome(ImageAnalysis::Classified(Classification {
            condition: condition.to_string(),
            confidence,
        }))
    }

    pub fn failing(reason: AnalyzerDegraded) -> Self {
        Self::with_outcome(ImageAnalysis::Degraded(reason))
    }

    fn with_outcome(outcome: ImageAnalysis) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
            seen_payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Bytes read from the image path on each call
    pub fn seen_payloads(&self) -> Vec<Vec<u8>> {
        self.seen_payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageAnalyzer for FixedImageAnalyzer {
    async fn analyze_image(&self, image_path: &Path) -> ImageAnalysis {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(bytes) = std::fs::read(image_path) {
            self.seen_payloads.lock().unwrap().push(bytes);
        }
        self.outcome.clone()
    }
}

/// Image analyzer that deletes every record while "analyzing"
pub struct DeletingImageAnalyzer {
    pub repository: Arc<InMemorySubmissionRepository>,
}

#[async_trait]
impl ImageAnalyzer for DeletingImageAnalyzer {
    async fn analyze_image(&self, _image_path: &Path) -> ImageAnalysis {
        self.repository.delete_all();
        ImageAnalysis::Classified(Classification {
            condition: "melanoma".to_string(),
            confidence: 0.91,
        })
    }
}

/// Vitals analyzer returning a fixed outcome
pub struct FixedVitalsAnalyzer {
    outcome: VitalsAnalysis,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl FixedVitalsAnalyzer {
    pub fn alerting(alerts: Value) -> Self {
        Self::with_outcome(VitalsAnalysis::Assessed(VitalsAssessment {
            alerts: Some(alerts),
        }))
    }

    pub fn failing(reason: AnalyzerDegraded) -> Self {
        Self::with_outcome(VitalsAnalysis::Degraded(reason))
    }

    fn with_outcome(outcome: VitalsAnalysis) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl VitalsAnalyzer for FixedVitalsAnalyzer {
    async fn analyze_vitals(&self, vitals_text: &str) -> VitalsAnalysis {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(vitals_text.to_string());
        self.outcome.clone()
    }
}

/// Care repository keeping consults and tracking in memory
#[derive(Default)]
pub struct InMemoryCareRepository {
    consults: Mutex<Vec<Consult>>,
    tracking: Mutex<Vec<TrackingEntry>>,
}

impl InMemoryCareRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consult_count(&self) -> usize {
        self.consults.lock().unwrap().len()
    }

    pub fn tracking(&self) -> Vec<TrackingEntry> {
        self.tracking.lock().unwrap().clone()
    }
}

#[async_trait]
impl CareRepository for InMemoryCareRepository {
    async fn create_consult(
        &self,
        submission_id: Uuid,
        doctor_id: &str,
        meeting_link: &str,
    ) -> Result<Consult, PersistenceError> {
        let consult = Consult {
            id: Uuid::new_v4(),
            submission_id,
            doctor_id: doctor_id.to_string(),
            meeting_link: meeting_link.to_string(),
            status: CONSULT_PENDING.to_string(),
            diagnosis: None,
            prescription: None,
            next_step: None,
            created_at: Utc::now(),
        };
        self.consults.lock().unwrap().push(consult.clone());
        Ok(consult)
    }

    async fn latest_consult(&self, submission_id: Uuid) -> Result<Option<Consult>, PersistenceError> {
        // Insertion order is creation order
        Ok(self
            .consults
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.submission_id == submission_id)
            .cloned())
    }

    async fn complete_consult(
        &self,
        consult_id: Uuid,
        notes: &FollowUpNotes,
    ) -> Result<Option<Consult>, PersistenceError> {
        let mut consults = self.consults.lock().unwrap();
        Ok(consults.iter_mut().find(|c| c.id == consult_id).map(|c| {
            c.diagnosis = notes.diagnosis.clone();
            c.prescription = notes.prescription.clone();
            c.next_step = notes.next_step.clone();
            c.status = CONSULT_COMPLETE.to_string();
            c.clone()
        }))
    }

    async fn add_tracking(
        &self,
        submission_id: Uuid,
        update_text: &str,
        trend: Trend,
    ) -> Result<TrackingEntry, PersistenceError> {
        let entry = TrackingEntry {
            id: Uuid::new_v4(),
            submission_id,
            update_text: update_text.to_string(),
            trend: trend.as_str().to_string(),
            created_at: Utc::now(),
        };
        self.tracking.lock().unwrap().push(entry.clone());
        Ok(entry)
    }
}

/// Spool `payload` into `dir` and describe it as an upload
pub fn spooled_upload(dir: &Path, file_name: &str, payload: &'static [u8]) -> ImageUpload {
    let local_path: PathBuf = dir.join(format!("{}-{}", Uuid::new_v4(), file_name));
    std::fs::write(&local_path, payload).unwrap();

    ImageUpload {
        payload: Bytes::from_static(payload),
        content_type: "image/jpeg".to_string(),
        file_name: file_name.to_string(),
        local_path,
    }
}

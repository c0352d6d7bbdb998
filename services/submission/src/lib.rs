//! Avelon Submission Service
//!
//! Intake service for patient submissions: a photo of the affected area plus
//! optional free-text vitals. Each submission is stored, recorded, analyzed by
//! external condition analyzers and finalized in one synchronous request.
//!
//! ## Features
//!
//! - **Durable media storage**: images land in S3 under collision-free keys and
//!   are referenced by a public URL
//! - **Two-phase records**: a submission is created pending and receives all
//!   analysis fields in a single terminal update
//! - **Best-effort analysis**: analyzer failures degrade to sentinel values
//!   instead of failing the submission
//! - **Care workflow**: consult requests, doctor follow-up and progress tracking
//!
//! ## Architecture
//!
//! ```text
//!  POST /api/upload
//!        │
//!        ▼
//! ┌──────────────┐  1  ┌──────────────┐
//! │ Submission   │────▶│ Object Store │──▶ S3 bucket
//! │ Pipeline     │     └──────────────┘
//! │              │  2,4 ┌──────────────┐
//! │              │────▶│ Submission   │──▶ PostgreSQL
//! │              │     │ Repository   │
//! │              │  3  └──────────────┘
//! │              │────▶┌──────────────┐
//! └──────────────┘     │ Image/Vitals │──▶ analyzer executables
//!                      │ Analyzers    │
//!                      └──────────────┘
//! ```

pub mod analyzer;
pub mod api;
pub mod care;
pub mod care_store;
pub mod config;
pub mod error;
pub mod model;
pub mod object_store;
pub mod pipeline;
pub mod submission_store;
pub mod trend;

pub use analyzer::{
    AnalyzerDegraded, AnalyzerKind, Classification, ImageAnalysis, ImageAnalyzer, ProcessAnalyzer,
    VitalsAnalysis, VitalsAnalyzer, VitalsAssessment,
};
pub use api::{create_router, AppState};
pub use care::CareService;
pub use care_store::{CareRepository, PgCareRepository};
pub use config::Config;
pub use error::{CareError, PersistenceError, PipelineError, PipelineStep, StorageError};
pub use model::{ImageUpload, Submission, SubmissionView};
pub use object_store::{ObjectReference, ObjectStore, S3ObjectStore};
pub use pipeline::SubmissionPipeline;
pub use submission_store::{PgSubmissionRepository, SubmissionRepository};
pub use trend::{assess_trend, Trend};

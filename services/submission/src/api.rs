use crate::care::CareService;
use crate::config::ApiConfig;
use crate::error::{CareError, PipelineError, PipelineStep};
use crate::model::{Consult, FollowUpNotes, ImageUpload, ResultsView, SubmissionView};
use crate::object_store::content_type_for;
use crate::pipeline::SubmissionPipeline;
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path,
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SubmissionPipeline>,
    pub care: Arc<CareService>,
    /// Pool probed by the readiness check
    pub pool: PgPool,
    /// Directory uploads are spooled into for analysis
    pub spool_dir: PathBuf,
}

/// Success envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self {
            status: "success",
            data,
        })
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// Consult assignment in API responses
#[derive(Debug, Serialize)]
pub struct ConsultResponse {
    pub doctor: String,
    pub link: String,
    pub status: String,
}

impl From<Consult> for ConsultResponse {
    fn from(c: Consult) -> Self {
        Self {
            doctor: c.doctor_id,
            link: c.meeting_link,
            status: c.status,
        }
    }
}

/// Completed consult in API responses
#[derive(Debug, Serialize)]
pub struct FollowUpResponse {
    pub id: Uuid,
    pub diagnosis: Option<String>,
    pub prescription: Option<String>,
    pub next_step: Option<String>,
    pub status: String,
}

impl From<Consult> for FollowUpResponse {
    fn from(c: Consult) -> Self {
        Self {
            id: c.id,
            diagnosis: c.diagnosis,
            prescription: c.prescription,
            next_step: c.next_step,
            status: c.status,
        }
    }
}

/// Recorded progress update in API responses
#[derive(Debug, Serialize)]
pub struct TrackResponse {
    pub id: Uuid,
    pub trend: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsultRequest {
    pub submission_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct FollowUpRequest {
    pub submission_id: Uuid,
    #[serde(flatten)]
    pub notes: FollowUpNotes,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub submission_id: Uuid,
    pub update: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/health", get(health_check))
        .route("/api/upload", post(upload_submission))
        .route("/api/results/:id", get(get_results))
        .route("/api/consult", post(request_consult))
        .route("/api/followup", post(follow_up))
        .route("/api/track", post(track_update))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "submission-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

struct ImagePart {
    file_name: String,
    content_type: String,
    data: Bytes,
}

/// Accept an image (and optional vitals) and run it through the pipeline
#[instrument(skip(state, multipart))]
async fn upload_submission(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<SubmissionView>>), ApiError> {
    let mut image: Option<ImagePart> = None;
    let mut vitals: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| content_type_for(&file_name).to_string());
                let data = field.bytes().await.map_err(multipart_error)?;
                image = Some(ImagePart {
                    file_name,
                    content_type,
                    data,
                });
            }
            Some("vitals") => {
                vitals = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let image = image
        .filter(|part| !part.data.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No image file provided", "MISSING_IMAGE"))?;

    let spooled = spool_upload(state.spool_dir.clone(), image.data.clone())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to spool upload");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to stage upload",
                "SPOOL_ERROR",
            )
        })?;

    let upload = ImageUpload {
        payload: image.data,
        content_type: image.content_type,
        file_name: image.file_name,
        local_path: spooled.path().to_path_buf(),
    };

    let view = state
        .pipeline
        .process(&upload, vitals.as_deref())
        .await
        .map_err(pipeline_error)?;

    // The spooled copy is only needed while the analyzers run
    drop(spooled);

    Ok((StatusCode::CREATED, ApiResponse::success(view)))
}

/// Analysis results and current consult for a submission
#[instrument(skip(state))]
async fn get_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ResultsView>>, ApiError> {
    match state.care.results(id).await.map_err(care_error)? {
        Some(results) => Ok(ApiResponse::success(results)),
        None => Err(api_error(StatusCode::NOT_FOUND, "Submission not found", "NOT_FOUND")),
    }
}

#[instrument(skip(state, payload))]
async fn request_consult(
    State(state): State<AppState>,
    payload: Result<Json<ConsultRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<ConsultResponse>>), ApiError> {
    let Json(request) = payload.map_err(json_error)?;

    let consult = state
        .care
        .request_consult(request.submission_id)
        .await
        .map_err(care_error)?;

    Ok((StatusCode::CREATED, ApiResponse::success(consult.into())))
}

#[instrument(skip(state, payload))]
async fn follow_up(
    State(state): State<AppState>,
    payload: Result<Json<FollowUpRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<FollowUpResponse>>, ApiError> {
    let Json(request) = payload.map_err(json_error)?;

    if !request.notes.is_complete() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Diagnosis, prescription, and next step are required",
            "MISSING_NOTES",
        ));
    }

    let consult = state
        .care
        .follow_up(request.submission_id, &request.notes)
        .await
        .map_err(care_error)?;

    Ok(ApiResponse::success(consult.into()))
}

#[instrument(skip(state, payload))]
async fn track_update(
    State(state): State<AppState>,
    payload: Result<Json<TrackRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<TrackResponse>>), ApiError> {
    let Json(request) = payload.map_err(json_error)?;

    if request.update.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Update text is required",
            "MISSING_UPDATE",
        ));
    }

    let entry = state
        .care
        .track(request.submission_id, &request.update)
        .await
        .map_err(care_error)?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::success(TrackResponse {
            id: entry.id,
            trend: entry.trend,
        }),
    ))
}

/// Write the payload to a temp file that is removed on drop
async fn spool_upload(dir: PathBuf, data: Bytes) -> Result<NamedTempFile> {
    tokio::task::spawn_blocking(move || -> Result<NamedTempFile> {
        std::fs::create_dir_all(&dir).context("Failed to create spool directory")?;
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&dir)
            .context("Failed to create spool file")?;
        file.write_all(&data).context("Failed to write spool file")?;
        file.flush().context("Failed to flush spool file")?;
        Ok(file)
    })
    .await
    .context("Spool task panicked")?
}

fn json_error(e: JsonRejection) -> ApiError {
    warn!(error = %e, "Rejected request body");
    api_error(StatusCode::BAD_REQUEST, e.body_text(), "INVALID_REQUEST")
}

fn multipart_error(e: MultipartError) -> ApiError {
    warn!(error = %e, "Rejected multipart upload");
    api_error(e.status(), e.body_text(), "INVALID_UPLOAD")
}

fn pipeline_error(e: PipelineError) -> ApiError {
    let (status, code) = match e.step() {
        PipelineStep::Store => (StatusCode::BAD_GATEWAY, "STORE_FAILED"),
        PipelineStep::Create => (StatusCode::INTERNAL_SERVER_ERROR, "CREATE_FAILED"),
        PipelineStep::Update => (StatusCode::INTERNAL_SERVER_ERROR, "UPDATE_FAILED"),
    };
    api_error(status, format!("Failed to process submission at step '{}'", e.step()), code)
}

fn care_error(e: CareError) -> ApiError {
    match e {
        CareError::SubmissionNotFound(_) => {
            api_error(StatusCode::NOT_FOUND, "Submission not found", "NOT_FOUND")
        }
        CareError::NoConsult(_) => api_error(
            StatusCode::NOT_FOUND,
            "No consultation found for this submission",
            "NO_CONSULT",
        ),
        CareError::Persistence(e) => {
            error!(error = %e, "Care record operation failed");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to access care records",
                "PERSISTENCE_ERROR",
            )
        }
    }
}

/// Start the submission API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting submission API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

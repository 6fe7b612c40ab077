use crate::auth::{AuthError, JwtVerifier};
use crate::config::ApiConfig;
use crate::ingest::{IngestError, UploadRequest, ValidationError, VideoIngestor};
use crate::metadata_store::{MetadataStore, VideoMetadata};
use crate::presigned_urls::{PlaybackUrlSigner, SignError};
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Multipart form field carrying the video
pub const VIDEO_FIELD: &str = "video";

/// Headroom above the file limit for multipart boundaries and headers
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<VideoIngestor>,
    pub signer: PlaybackUrlSigner,
    pub metadata_store: Arc<dyn MetadataStore>,
    pub verifier: Arc<JwtVerifier>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Handler failure rendered as an [`ErrorResponse`]
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        let (status, code) = match &e {
            ValidationError::InvalidVideoId(_) => (StatusCode::BAD_REQUEST, "INVALID_VIDEO_ID"),
            ValidationError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ValidationError::VideoNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ValidationError::UnsupportedMediaType(_) => {
                (StatusCode::BAD_REQUEST, "UNSUPPORTED_MEDIA_TYPE")
            }
            ValidationError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE")
            }
            ValidationError::MissingFile(_) => (StatusCode::BAD_REQUEST, "MISSING_FILE"),
        };
        Self::new(status, code, e.to_string())
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Validation(e) => e.into(),
            IngestError::Lookup(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "QUERY_ERROR",
                "Couldn't get video",
            ),
            IngestError::Io(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "UPLOAD_ERROR",
                "Couldn't buffer upload",
            ),
            IngestError::Classification(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROBE_ERROR",
                "Couldn't determine video aspect ratio",
            ),
            IngestError::Remux(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROCESSING_ERROR",
                "Couldn't process video for fast start",
            ),
            IngestError::Key(_) | IngestError::Upload(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                "Couldn't store video",
            ),
            IngestError::Persist { .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "PERSIST_ERROR",
                "Couldn't update video",
            ),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", e.to_string())
    }
}

impl From<SignError> for ApiError {
    fn from(e: SignError) -> Self {
        error!(error = %e, "Failed to generate presigned URL");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "PRESIGN_ERROR",
            "Failed to generate presigned URL",
        )
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(e.status(), "INVALID_MULTIPART", e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, code = self.code, "Request failed");
        } else {
            warn!(status = %self.status, code = self.code, error = %self.message, "Request rejected");
        }

        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code.to_string(),
            }),
        )
            .into_response()
    }
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

    let upload_limit = state
        .ingestor
        .config()
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let upload_limit = usize::try_from(upload_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/api/video_upload/:video_id",
            post(upload_video)
                .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(upload_limit)),
        )
        .route("/api/videos/:video_id", get(get_video))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "tubely-storage"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.metadata_store.ping().await {
        Ok(()) => (
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
                "error": format!("{e:#}")
            })),
        ),
    }
}

fn parse_video_id(raw: &str) -> Result<Uuid, ValidationError> {
    Uuid::parse_str(raw).map_err(|_| ValidationError::InvalidVideoId(raw.to_string()))
}

/// Upload the video file for an existing video record
#[instrument(skip(state, headers, multipart))]
async fn upload_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<VideoMetadata>, ApiError> {
    let user_id = state.verifier.authenticate(&headers)?;
    let video_id = parse_video_id(&video_id)?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }

        let media_type = field.content_type().unwrap_or_default().to_string();
        let body = StreamReader::new(Box::pin(
            field.map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        ));

        let video = state
            .ingestor
            .ingest(UploadRequest {
                user_id,
                video_id,
                media_type,
                body,
            })
            .await?;

        let video = state.signer.sign_video(video).await?;
        return Ok(Json(video));
    }

    Err(ValidationError::MissingFile(VIDEO_FIELD).into())
}

/// Video metadata with a freshly signed playback URL
#[instrument(skip(state, headers))]
async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<VideoMetadata>, ApiError> {
    let user_id = state.verifier.authenticate(&headers)?;
    let video_id = parse_video_id(&video_id)?;

    let video = state.ingestor.owned_video(user_id, video_id).await?;
    let video = state.signer.sign_video(video).await?;

    Ok(Json(video))
}

/// Start the upload and playback API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting video API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

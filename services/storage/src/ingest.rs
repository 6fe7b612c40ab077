use crate::config::Config;
use crate::media_inspector::{InspectError, MediaInspector};
use crate::metadata_store::{MetadataStore, VideoMetadata};
use crate::remuxer::{RemuxError, Remuxer};
use crate::s3_uploader::{ObjectStore, StoreError};
use crate::storage_key::{derive_key, extension_for, KeyError};
use crate::storage_reference::StorageReference;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Prefix of every buffered upload in the temp directory
const UPLOAD_PREFIX: &str = "tubely-upload.";

/// Request rejected before any processing
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid video ID: {0}")]
    InvalidVideoId(String),

    #[error("User is not the owner of this video")]
    Unauthorized,

    #[error("Video not found: {0}")]
    VideoNotFound(Uuid),

    #[error("Unsupported file format for video: {0}")]
    UnsupportedMediaType(String),

    #[error("Upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    #[error("Missing form file: {0}")]
    MissingFile(&'static str),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to look up video: {0:#}")]
    Lookup(#[source] anyhow::Error),

    #[error("Failed to buffer upload: {0}")]
    Io(#[source] io::Error),

    #[error(transparent)]
    Classification(#[from] InspectError),

    #[error(transparent)]
    Remux(#[from] RemuxError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Upload(#[from] StoreError),

    #[error("Failed to persist storage reference {reference}: {source:#}")]
    Persist {
        reference: String,
        #[source]
        source: anyhow::Error,
    },
}

impl IngestError {
    /// Last stage reached before the failure
    pub fn stage(&self) -> IngestStage {
        match self {
            IngestError::Validation(_) | IngestError::Lookup(_) | IngestError::Io(_) => {
                IngestStage::Received
            }
            IngestError::Classification(_) => IngestStage::Buffered,
            IngestError::Remux(_) => IngestStage::Classified,
            IngestError::Key(_) | IngestError::Upload(_) => IngestStage::Remuxed,
            IngestError::Persist { .. } => IngestStage::Uploaded,
        }
    }
}

/// Progress of a single ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Received,
    Buffered,
    Classified,
    Remuxed,
    Uploaded,
    Persisted,
}

impl IngestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStage::Received => "received",
            IngestStage::Buffered => "buffered",
            IngestStage::Classified => "classified",
            IngestStage::Remuxed => "remuxed",
            IngestStage::Uploaded => "uploaded",
            IngestStage::Persisted => "persisted",
        }
    }
}

/// One upload as handed over by the HTTP layer
pub struct UploadRequest<R> {
    /// Verified identity of the caller
    pub user_id: Uuid,
    pub video_id: Uuid,
    /// Declared `Content-Type` of the uploaded file
    pub media_type: String,
    pub body: R,
}

/// Settings the orchestrator is constructed with
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Bucket processed videos are stored in
    pub bucket: String,
    /// Directory for temporary artifacts
    pub temp_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub accepted_media_types: Vec<String>,
    pub max_concurrent: usize,
}

impl IngestConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket: config.s3.bucket.clone(),
            temp_dir: config.temp_dir(),
            max_upload_bytes: config.ingest.max_upload_bytes,
            accepted_media_types: config.ingest.accepted_media_types.clone(),
            max_concurrent: config.ingest.max_concurrent,
        }
    }
}

/// Media type without parameters, lowercased
fn media_type_essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Sequences buffering, classification, remuxing, upload and persistence.
///
/// Local artifacts are held by RAII guards and removed whichever stage a run
/// ends in. Upload and persist are not atomic: an object whose metadata update
/// fails stays in the bucket and is counted under `ingest.objects.orphaned`.
pub struct VideoIngestor {
    inspector: Arc<dyn MediaInspector>,
    remuxer: Arc<dyn Remuxer>,
    object_store: Arc<dyn ObjectStore>,
    metadata_store: Arc<dyn MetadataStore>,
    config: IngestConfig,
    permits: Semaphore,
}

impl VideoIngestor {
    pub fn new(
        inspector: Arc<dyn MediaInspector>,
        remuxer: Arc<dyn Remuxer>,
        object_store: Arc<dyn ObjectStore>,
        metadata_store: Arc<dyn MetadataStore>,
        config: IngestConfig,
    ) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            inspector,
            remuxer,
            object_store,
            metadata_store,
            config,
            permits,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Load a video and check that `user_id` owns it
    pub async fn owned_video(
        &self,
        user_id: Uuid,
        video_id: Uuid,
    ) -> Result<VideoMetadata, IngestError> {
        let video = self
            .metadata_store
            .get_video(video_id)
            .await
            .map_err(IngestError::Lookup)?
            .ok_or(ValidationError::VideoNotFound(video_id))?;

        if video.user_id != user_id {
            warn!(
                video_id = %video_id,
                user_id = %user_id,
                owner_id = %video.user_id,
                "Rejected access to video owned by another user"
            );
            return Err(ValidationError::Unauthorized.into());
        }

        Ok(video)
    }

    /// Reject media types that are not accepted for upload
    pub fn check_media_type(&self, media_type: &str) -> Result<String, ValidationError> {
        let essence = media_type_essence(media_type);
        let accepted = self
            .config
            .accepted_media_types
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(&essence));

        if accepted {
            Ok(essence)
        } else {
            Err(ValidationError::UnsupportedMediaType(media_type.to_string()))
        }
    }

    /// Ingest one upload, returning the updated (unsigned) metadata
    #[instrument(
        skip(self, request),
        fields(video_id = %request.video_id, user_id = %request.user_id, stage = tracing::field::Empty)
    )]
    pub async fn ingest<R>(&self, request: UploadRequest<R>) -> Result<VideoMetadata, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let started = Instant::now();
        let result = self.run(request).await;

        match &result {
            Ok(video) => {
                metrics::counter!("ingest.uploads.completed").increment(1);
                metrics::histogram!("ingest.duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                info!(
                    video_url = video.video_url.as_deref().unwrap_or_default(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Video ingested"
                );
            }
            Err(e) => {
                let stage = e.stage().as_str();
                tracing::Span::current().record("stage", stage);
                metrics::counter!("ingest.uploads.failed", "stage" => stage).increment(1);
                match e {
                    IngestError::Validation(_) => warn!(stage, error = %e, "Upload rejected"),
                    _ => error!(stage, error = %e, "Video ingestion failed"),
                }
            }
        }

        result
    }

    async fn run<R>(&self, request: UploadRequest<R>) -> Result<VideoMetadata, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let UploadRequest {
            user_id,
            video_id,
            media_type,
            mut body,
        } = request;

        let mut video = self.owned_video(user_id, video_id).await?;
        let media_type = self.check_media_type(&media_type)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| IngestError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

        // Received -> Buffered
        let upload = tempfile::Builder::new()
            .prefix(UPLOAD_PREFIX)
            .suffix(extension_for(&media_type).unwrap_or_default())
            .tempfile_in(&self.config.temp_dir)
            .map_err(IngestError::Io)?;
        let bytes = buffer_upload(&mut body, upload.path(), self.config.max_upload_bytes).await?;
        debug!(stage = IngestStage::Buffered.as_str(), bytes, "Upload buffered");

        // Buffered -> Classified
        let orientation = self.inspector.classify(upload.path()).await?;
        debug!(stage = IngestStage::Classified.as_str(), orientation = %orientation, "Upload classified");

        // Classified -> Remuxed
        // The guard exists before ffmpeg runs so partial output is removed too
        let expected_output = TempPath::from_path(self.remuxer.output_path(upload.path()));
        let remuxed = self.remuxer.remux(upload.path()).await?;
        let _unexpected_output =
            (remuxed.as_path() != &*expected_output).then(|| TempPath::from_path(&remuxed));
        debug!(stage = IngestStage::Remuxed.as_str(), path = %remuxed.display(), "Upload remuxed");

        // Remuxed -> Uploaded
        let key = derive_key(orientation, &media_type)?;
        self.object_store
            .put_object(&self.config.bucket, &key, &remuxed, &media_type)
            .await?;
        debug!(stage = IngestStage::Uploaded.as_str(), key = %key, "Upload stored");

        // Uploaded -> Persisted
        let reference = StorageReference::new(self.config.bucket.clone(), key).encode();
        video.video_url = Some(reference.clone());
        video.updated_at = Utc::now();

        if let Err(source) = self.metadata_store.update_video(&video).await {
            metrics::counter!("ingest.objects.orphaned").increment(1);
            error!(reference = %reference, "Uploaded object is orphaned: metadata update failed");
            return Err(IngestError::Persist { reference, source });
        }
        debug!(stage = IngestStage::Persisted.as_str(), "Storage reference persisted");

        Ok(video)
    }
}

/// Copy the request body into `path`, failing once more than `limit` bytes arrive
async fn buffer_upload<R>(body: &mut R, path: &Path, limit: u64) -> Result<u64, IngestError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(IngestError::Io)?;

    let mut limited = body.take(limit.saturating_add(1));
    let written = tokio::io::copy(&mut limited, &mut file)
        .await
        .map_err(IngestError::Io)?;

    if written > limit {
        return Err(ValidationError::PayloadTooLarge { limit }.into());
    }

    file.flush().await.map_err(IngestError::Io)?;
    file.sync_all().await.map_err(IngestError::Io)?;

    Ok(written)
}

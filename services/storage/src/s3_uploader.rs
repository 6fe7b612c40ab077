use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Upload failed: {0}")]
    UploadFailure(String),

    #[error("Presigning failed: {0}")]
    SigningFailure(String),
}

/// Durable object storage used for processed videos
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream the file at `path` to `bucket/key`
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), StoreError>;

    /// Time-limited GET URL for `bucket/key`
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError>;
}

/// S3 uploader for processed videos
pub struct S3Uploader {
    client: S3Client,
    config: S3Config,
}

impl S3Uploader {
    /// Create a new S3 uploader
    pub async fn new(config: &S3Config) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 uploader initialized"
        );

        Ok(Self::from_client(client, config))
    }

    /// Wrap an already configured client
    pub fn from_client(client: S3Client, config: &S3Config) -> Self {
        Self {
            client,
            config: config.clone(),
        }
    }

    /// Simple single-part upload, body streamed from disk
    async fn simple_upload(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StoreError::UploadFailure(format!("failed to open {}: {}", path.display(), e)))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StoreError::UploadFailure(e.to_string()))?;

        Ok(())
    }

    /// Multipart upload for large files, one part in memory at a time
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StoreError::UploadFailure(format!("failed to create multipart upload: {}", e)))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| StoreError::UploadFailure("no upload ID in response".to_string()))?
            .to_string();

        match self.upload_parts(bucket, key, path, &upload_id).await {
            Ok(completed_parts) => {
                let completed_upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed_upload)
                    .send()
                    .await
                    .map_err(|e| {
                        StoreError::UploadFailure(format!("failed to complete multipart upload: {}", e))
                    })?;

                Ok(())
            }
            Err(e) => {
                // Abort so no partial object becomes addressable under the key
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(error = %abort_err, key = %key, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, StoreError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| StoreError::UploadFailure(format!("failed to open {}: {}", path.display(), e)))?;

        let part_size = self.config.part_size_bytes;
        let mut completed_parts = Vec::new();
        let mut part_number = 1;

        loop {
            let mut chunk = Vec::with_capacity(part_size);
            (&mut file)
                .take(part_size as u64)
                .read_to_end(&mut chunk)
                .await
                .map_err(|e| StoreError::UploadFailure(format!("failed to read {}: {}", path.display(), e)))?;

            if chunk.is_empty() {
                break;
            }

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| StoreError::UploadFailure(format!("failed to upload part {}: {}", part_number, e)))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
            part_number += 1;
        }

        Ok(completed_parts)
    }
}

#[async_trait]
impl ObjectStore for S3Uploader {
    #[instrument(skip(self, path), fields(bucket = %bucket, key = %key))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let size_bytes = tokio::fs::metadata(path)
            .await
            .map_err(|e| StoreError::UploadFailure(format!("failed to stat {}: {}", path.display(), e)))?
            .len();

        debug!(size_bytes = size_bytes, "Uploading video to S3");

        // Check if we should use multipart upload
        if size_bytes > self.config.multipart_threshold_bytes as u64 {
            self.multipart_upload(bucket, key, path, content_type).await?;
        } else {
            self.simple_upload(bucket, key, path, content_type).await?;
        }

        metrics::counter!("storage.objects.uploaded").increment(1);
        metrics::histogram!("storage.objects.size_bytes").record(size_bytes as f64);

        info!(size_bytes = size_bytes, "Video uploaded successfully");

        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StoreError::SigningFailure(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StoreError::SigningFailure(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

use crate::metadata_store::VideoMetadata;
use crate::s3_uploader::ObjectStore;
use crate::storage_reference::{MalformedReference, StorageReference};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum SignError {
    #[error(transparent)]
    MalformedReference(#[from] MalformedReference),

    #[error("Failed to generate presigned URL: {0}")]
    SigningFailure(String),
}

/// A presigned playback URL
#[derive(Debug, Clone, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Produces time-limited playback URLs for stored videos
#[derive(Clone)]
pub struct PlaybackUrlSigner {
    object_store: Arc<dyn ObjectStore>,
    validity: Duration,
}

impl PlaybackUrlSigner {
    pub fn new(object_store: Arc<dyn ObjectStore>, validity: Duration) -> Self {
        Self {
            object_store,
            validity,
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Presign a GET for an encoded `bucket,key` reference
    #[instrument(skip(self))]
    pub async fn sign(&self, encoded_reference: &str) -> Result<SignedUrl, SignError> {
        let reference: StorageReference = encoded_reference.parse()?;

        let validity = chrono::Duration::from_std(self.validity)
            .map_err(|e| SignError::SigningFailure(e.to_string()))?;
        let issued_at = Utc::now();

        let url = self
            .object_store
            .presign_get(&reference.bucket, &reference.key, self.validity)
            .await
            .map_err(|e| SignError::SigningFailure(e.to_string()))?;

        metrics::counter!("storage.urls.signed").increment(1);
        debug!(bucket = %reference.bucket, key = %reference.key, "Generated playback URL");

        Ok(SignedUrl {
            url,
            expires_at: issued_at + validity,
        })
    }

    /// Replace a video's stored reference with a playback URL.
    /// Videos that were never ingested are returned unchanged.
    pub async fn sign_video(&self, mut video: VideoMetadata) -> Result<VideoMetadata, SignError> {
        if let Some(reference) = video.video_url.as_deref() {
            let signed = self.sign(reference).await?;
            video.video_url = Some(signed.url);
        }
        Ok(video)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3_uploader::tests::{offline_uploader, query_param};
    use crate::s3_uploader::{MockObjectStore, StoreError};
    use uuid::Uuid;

    fn video(video_url: Option<&str>) -> VideoMetadata {
        let now = Utc::now();
        VideoMetadata {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Boots".to_string(),
            description: String::new(),
            video_url: video_url.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_sign_splits_reference() {
        let mut store = MockObjectStore::new();
        store
            .expect_presign_get()
            .withf(|bucket, key, expires_in| {
                bucket == "tubely-videos"
                    && key == "landscape/abc.mp4"
                    && *expires_in == Duration::from_secs(3600)
            })
            .times(1)
            .returning(|_, _, _| Ok("https://signed.example/landscape/abc.mp4".to_string()));

        let signer = PlaybackUrlSigner::new(Arc::new(store), Duration::from_secs(3600));
        let before = Utc::now();
        let signed = signer.sign("tubely-videos,landscape/abc.mp4").await.unwrap();

        assert_eq!(signed.url, "https://signed.example/landscape/abc.mp4");
        let lifetime = (signed.expires_at - before).num_seconds();
        assert!((3599..=3601).contains(&lifetime), "lifetime was {lifetime}s");
    }

    #[tokio::test]
    async fn test_sign_malformed_reference() {
        let mut store = MockObjectStore::new();
        store.expect_presign_get().never();
        let signer = PlaybackUrlSigner::new(Arc::new(store), Duration::from_secs(3600));

        for encoded in ["no-separator", "a,b,c"] {
            let err = signer.sign(encoded).await.unwrap_err();
            assert!(matches!(err, SignError::MalformedReference(_)), "{encoded}");
        }
    }

    #[tokio::test]
    async fn test_sign_store_failure() {
        let mut store = MockObjectStore::new();
        store
            .expect_presign_get()
            .returning(|_, _, _| Err(StoreError::SigningFailure("no credentials".to_string())));
        let signer = PlaybackUrlSigner::new(Arc::new(store), Duration::from_secs(3600));

        let err = signer.sign("b,k.mp4").await.unwrap_err();
        assert!(matches!(err, SignError::SigningFailure(_)));
    }

    #[tokio::test]
    async fn test_sign_video_without_reference_is_untouched() {
        let mut store = MockObjectStore::new();
        store.expect_presign_get().never();
        let signer = PlaybackUrlSigner::new(Arc::new(store), Duration::from_secs(3600));

        let original = video(None);
        let signed = signer.sign_video(original.clone()).await.unwrap();
        assert_eq!(signed, original);
    }

    #[tokio::test]
    async fn test_every_read_resigns() {
        let mut store = MockObjectStore::new();
        store
            .expect_presign_get()
            .times(2)
            .returning(|_, key, _| Ok(format!("https://signed.example/{key}")));
        let signer = PlaybackUrlSigner::new(Arc::new(store), Duration::from_secs(3600));

        let stored = video(Some("tubely-videos,portrait/id.mp4"));
        signer.sign_video(stored.clone()).await.unwrap();
        let signed = signer.sign_video(stored).await.unwrap();
        assert_eq!(
            signed.video_url.as_deref(),
            Some("https://signed.example/portrait/id.mp4")
        );
    }

    #[tokio::test]
    async fn test_sign_video_with_s3_presigner() {
        let signer = PlaybackUrlSigner::new(Arc::new(offline_uploader()), Duration::from_secs(3600));

        let signed = signer
            .sign_video(video(Some("tubely-videos,landscape/abc.mp4")))
            .await
            .unwrap();

        let url = signed.video_url.unwrap();
        assert!(url.contains("landscape/abc.mp4"));
        assert_eq!(query_param(&url, "X-Amz-Expires"), Some("3600"));
    }
}

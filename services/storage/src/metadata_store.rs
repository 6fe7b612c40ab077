use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Stored video metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct VideoMetadata {
    /// Unique video ID
    pub id: Uuid,
    /// Owning user
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    /// Encoded storage reference (`bucket,key`) once a video has been ingested.
    /// API responses carry a presigned URL here instead.
    pub video_url: Option<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

/// Access to video records owned by the metadata database
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch a video by ID
    async fn get_video(&self, video_id: Uuid) -> Result<Option<VideoMetadata>>;

    /// Overwrite the mutable fields of an existing video
    async fn update_video(&self, video: &VideoMetadata) -> Result<()>;

    /// Cheap connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}

/// Metadata store for video records in PostgreSQL
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn get_video(&self, video_id: Uuid) -> Result<Option<VideoMetadata>> {
        let video = sqlx::query_as::<_, VideoMetadata>(
            r#"
            SELECT id, user_id, title, description, video_url,
                   created_at, updated_at
            FROM videos
            WHERE id = $1
            "#,
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query video")?;

        Ok(video)
    }

    #[instrument(skip(self, video), fields(video_id = %video.id))]
    async fn update_video(&self, video: &VideoMetadata) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE videos
            SET title = $2,
                description = $3,
                video_url = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(video.id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.video_url)
        .bind(video.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update video")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Video {} no longer exists", video.id);
        }

        debug!("Video metadata updated");

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_metadata_serializes_reference() {
        let now = Utc::now();
        let video = VideoMetadata {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Boots".to_string(),
            description: "A pair of boots".to_string(),
            video_url: Some("tubely-videos,landscape/abc.mp4".to_string()),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&video).unwrap();
        assert_eq!(json["video_url"], "tubely-videos,landscape/abc.mp4");
        assert_eq!(json["title"], "Boots");
    }

    #[test]
    fn test_video_metadata_without_reference() {
        let now = Utc::now();
        let video = VideoMetadata {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: String::new(),
            description: String::new(),
            video_url: None,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&video).unwrap();
        assert!(json["video_url"].is_null());
    }
}

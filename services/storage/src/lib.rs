//! Tubely Storage Service
//!
//! Video ingestion and playback storage for Tubely. Users upload an MP4 for a
//! video record they own; the service classifies its orientation, rewrites the
//! container for fast start, stores it in S3 under an orientation-partitioned
//! key and serves playback through short-lived presigned URLs.
//!
//! ## Features
//!
//! - **Orientation Classification**: `ffprobe` reports the first stream's
//!   dimensions, which map to `landscape`, `portrait` or `other`
//! - **Fast-Start Remux**: `ffmpeg` moves the `moov` index to the front
//!   without re-encoding
//! - **Efficient S3 Storage**: unguessable keys, multipart uploads for large
//!   files
//! - **Presigned Playback**: every read re-signs the stored `bucket,key`
//!   reference for one hour
//!
//! ## Architecture
//!
//! ```text
//! HTTP upload                                                   PostgreSQL
//! ┌──────────────┐     ┌──────────────┐                         ┌──────────────┐
//! │ API          │────▶│ Video        │────────────────────────▶│ videos       │
//! │ (JWT auth)   │     │ Ingestor     │   bucket,key            └──────────────┘
//! └──────────────┘     └──────────────┘                                │
//!        ▲                    │                                        │
//!        │          ┌─────────┼──────────┬──────────────┐              │
//!        │          ▼         ▼          ▼              ▼              │
//!        │   ┌──────────┐ ┌────────┐ ┌─────────┐ ┌────────────┐        │
//!        │   │ ffprobe  │ │ ffmpeg │ │ Key     │ │ S3         │        │
//!        │   │ inspector│ │ remuxer│ │ deriver │ │ uploader   │        │
//!        │   └──────────┘ └────────┘ └─────────┘ └────────────┘        │
//!        │                                                             │
//!        │                     ┌──────────────┐                        │
//!        └─────────────────────│ Playback URL │◀───────────────────────┘
//!                              │ Signer       │
//!                              └──────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod ingest;
pub mod media_inspector;
pub mod metadata_store;
pub mod presigned_urls;
pub mod remuxer;
pub mod s3_uploader;
pub mod storage_key;
pub mod storage_reference;

pub use api::{create_router, start_api_server, AppState};
pub use auth::{AuthError, JwtVerifier};
pub use config::Config;
pub use ingest::{IngestConfig, IngestError, IngestStage, UploadRequest, ValidationError, VideoIngestor};
pub use media_inspector::{FfprobeInspector, InspectError, MediaInspector, Orientation};
pub use metadata_store::{MetadataStore, PgMetadataStore, VideoMetadata};
pub use presigned_urls::{PlaybackUrlSigner, SignError, SignedUrl};
pub use remuxer::{FfmpegRemuxer, RemuxError, Remuxer};
pub use s3_uploader::{ObjectStore, S3Uploader, StoreError};
pub use storage_key::{derive_key, KeyError};
pub use storage_reference::{MalformedReference, StorageReference};

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Smallest part size S3 accepts for every part but the last
const S3_MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Main configuration for the storage service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Bearer token configuration
    pub auth: AuthConfig,
    /// External media tools
    #[serde(default)]
    pub media: MediaConfig,
    /// Upload ingestion limits
    #[serde(default)]
    pub ingest: IngestSettings,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for video storage
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
    /// Files larger than this are sent as a multipart upload
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// API configuration for the upload and playback endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// JWT verification settings
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret shared with the identity service
    pub jwt_secret: String,
    /// Expected `iss` claim
    #[serde(default = "default_jwt_issuer")]
    pub jwt_issuer: String,
}

/// Locations of the external media tools
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

/// Upload ingestion settings
#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    /// Directory for temporary artifacts (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,
    /// Largest accepted upload body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Container types accepted for upload
    #[serde(default = "default_accepted_media_types")]
    pub accepted_media_types: Vec<String>,
    /// Maximum ingests running at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

// Default value functions
fn default_service_name() -> String {
    "tubely-storage".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    3600
}

fn default_multipart_threshold() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_part_size() -> usize {
    16 * 1024 * 1024 // 16MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8091
}

fn default_jwt_issuer() -> String {
    "tubely-access".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_max_upload_bytes() -> u64 {
    1 << 30 // 1GB
}

fn default_accepted_media_types() -> Vec<String> {
    vec!["video/mp4".to_string()]
}

fn default_max_concurrent() -> usize {
    4
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "tubely-storage")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/storage").required(false))
            .add_source(config::File::with_name("/etc/tubely/storage").required(false))
            // Override with environment variables
            // STORAGE__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("STORAGE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("ingest.accepted_media_types")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.s3.bucket.trim().is_empty() {
            anyhow::bail!("s3.bucket must not be empty");
        }
        if self.s3.bucket.contains(',') {
            anyhow::bail!("s3.bucket must not contain ','");
        }
        if self.auth.jwt_secret.is_empty() {
            anyhow::bail!("auth.jwt_secret must not be empty");
        }
        if self.s3.part_size_bytes < S3_MIN_PART_SIZE {
            anyhow::bail!(
                "s3.part_size_bytes must be at least {} (got {})",
                S3_MIN_PART_SIZE,
                self.s3.part_size_bytes
            );
        }
        if self.ingest.max_concurrent == 0 {
            anyhow::bail!("ingest.max_concurrent must be greater than zero");
        }
        if self.ingest.accepted_media_types.is_empty() {
            anyhow::bail!("ingest.accepted_media_types must list at least one type");
        }
        Ok(())
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }

    /// Directory used for temporary upload artifacts
    pub fn temp_dir(&self) -> PathBuf {
        self.ingest
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: default_ffprobe_path(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            temp_dir: None,
            max_upload_bytes: default_max_upload_bytes(),
            accepted_media_types: default_accepted_media_types(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            service: ServiceConfig::default(),
            s3: S3Config {
                bucket: "tubely-videos".to_string(),
                region: default_region(),
                endpoint_url: None,
                force_path_style: false,
                presigned_url_expiry_secs: default_presigned_url_expiry_secs(),
                multipart_threshold_bytes: default_multipart_threshold(),
                part_size_bytes: default_part_size(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/tubely".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout_secs(),
                idle_timeout_secs: default_idle_timeout_secs(),
                run_migrations: true,
            },
            api: ApiConfig::default(),
            auth: AuthConfig {
                jwt_secret: "secret".to_string(),
                jwt_issuer: default_jwt_issuer(),
            },
            media: MediaConfig::default(),
            ingest: IngestSettings::default(),
        }
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_presigned_url_expiry_secs(), 3600);
        assert_eq!(default_max_upload_bytes(), 1 << 30);
        assert_eq!(default_accepted_media_types(), vec!["video/mp4"]);
        assert_eq!(default_ffprobe_path(), "ffprobe");
        assert_eq!(default_ffmpeg_path(), "ffmpeg");
    }

    #[test]
    fn test_presigned_url_expiry_is_one_hour() {
        assert_eq!(test_config().presigned_url_expiry(), Duration::from_secs(3600));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = test_config();
        config.s3.bucket = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.s3.bucket = "a,b".to_string();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.auth.jwt_secret.clear();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.s3.part_size_bytes = 1024;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.ingest.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_temp_dir_falls_back_to_system_temp() {
        let mut config = test_config();
        assert_eq!(config.temp_dir(), std::env::temp_dir());

        config.ingest.temp_dir = Some(PathBuf::from("/var/tmp/tubely"));
        assert_eq!(config.temp_dir(), PathBuf::from("/var/tmp/tubely"));
    }
}

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the submission service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Analyzer executables
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    /// Consultation assignment
    #[serde(default)]
    pub consult: ConsultConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
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
    /// S3 bucket name for patient uploads
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base URL under which stored objects are publicly readable.
    /// Derived from the endpoint/bucket when unset.
    pub public_base_url: Option<String>,
    /// Prefix for every object key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
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

/// External analyzer executables
///
/// Each analyzer is invoked as `<program> <args...> <input>`, where the input is
/// the spooled image path or the vitals text.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_analyzer_program")]
    pub image_program: String,
    #[serde(default = "default_image_args")]
    pub image_args: Vec<String>,
    #[serde(default = "default_analyzer_program")]
    pub vitals_program: String,
    #[serde(default = "default_vitals_args")]
    pub vitals_args: Vec<String>,
    /// Wall-clock limit for a single analyzer run, in seconds
    #[serde(default = "default_analyzer_timeout_secs")]
    pub timeout_secs: u64,
    /// Directory for spooled uploads (system temp dir when unset)
    pub spool_dir: Option<PathBuf>,
}

/// Consultation assignment configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConsultConfig {
    /// Roster doctors are assigned from
    #[serde(default = "default_doctors")]
    pub doctors: Vec<String>,
    /// Base URL for generated meeting links
    #[serde(default = "default_meeting_base_url")]
    pub meeting_base_url: String,
}

/// API configuration
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
    /// Largest accepted upload request body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "submission-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_bucket() -> String {
    "uploads".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_key_prefix() -> String {
    "uploads".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
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

fn default_analyzer_program() -> String {
    "python3".to_string()
}

fn default_image_args() -> Vec<String> {
    vec!["scripts/analyze_image.py".to_string()]
}

fn default_vitals_args() -> Vec<String> {
    vec!["scripts/analyze_vitals.py".to_string()]
}

fn default_analyzer_timeout_secs() -> u64 {
    60
}

fn default_doctors() -> Vec<String> {
    ["Dr. Smith", "Dr. Johnson", "Dr. Williams", "Dr. Brown", "Dr. Davis"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_meeting_base_url() -> String {
    "https://zoom.us/j".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "submission-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(
                config::File::with_name("config/submission")
                    .required(false)
            )
            .add_source(
                config::File::with_name("/etc/avelon/submission")
                    .required(false)
            )
            // Override with environment variables
            // SUBMISSION__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("SUBMISSION")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("analyzer.image_args")
                    .with_list_parse_key("analyzer.vitals_args")
                    .with_list_parse_key("consult.doctors")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl DatabaseConfig {
    /// Pool acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl AnalyzerConfig {
    /// Wall-clock limit for one analyzer run
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Directory uploads are spooled into before analysis
    pub fn spool_dir(&self) -> PathBuf {
        self.spool_dir.clone().unwrap_or_else(std::env::temp_dir)
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

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            public_base_url: None,
            key_prefix: default_key_prefix(),
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            image_program: default_analyzer_program(),
            image_args: default_image_args(),
            vitals_program: default_analyzer_program(),
            vitals_args: default_vitals_args(),
            timeout_secs: default_analyzer_timeout_secs(),
            spool_dir: None,
        }
    }
}

impl Default for ConsultConfig {
    fn default() -> Self {
        Self {
            doctors: default_doctors(),
            meeting_base_url: default_meeting_base_url(),
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
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

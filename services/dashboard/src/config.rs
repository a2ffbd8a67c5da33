use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the dashboard service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Document store configuration
    #[serde(default)]
    pub document_store: DocumentStoreConfig,
    /// Key-value store configuration
    #[serde(default)]
    pub key_value: KeyValueConfig,
    /// Image analysis service configuration
    #[serde(default)]
    pub inference: InferenceConfig,
    /// Batch ingestion configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,
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

/// HTTP API configuration
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
    /// Maximum request body size (image uploads arrive as data URIs)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Document store (MongoDB) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentStoreConfig {
    /// Connection string. Checked on first use, not at startup.
    pub uri: Option<String>,
    /// Database holding every collection the dashboard reads
    #[serde(default = "default_database")]
    pub database: String,
    /// Application name reported to the server
    #[serde(default = "default_service_name")]
    pub app_name: String,
    /// Collection scanned by the user-info endpoint
    #[serde(default = "default_user_collection")]
    pub user_collection: String,
    /// Collection holding day memos
    #[serde(default = "default_memo_collection")]
    pub memo_collection: String,
}

/// Key-value store (DynamoDB) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KeyValueConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for LocalStack, DynamoDB Local, etc.)
    pub endpoint_url: Option<String>,
    /// Static access key. Falls back to the default provider chain when unset.
    pub access_key_id: Option<String>,
    /// Static secret key, used together with `access_key_id`
    pub secret_access_key: Option<String>,
    /// Table receiving HRV samples
    #[serde(default = "default_table")]
    pub table: String,
    /// Partition key attribute of the HRV table
    #[serde(default = "default_partition_key")]
    pub partition_key: String,
    /// Sort key attribute of the HRV table
    #[serde(default = "default_sort_key")]
    pub sort_key: Option<String>,
}

/// Image analysis service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// API key. Checked on first use, not at startup.
    pub api_key: Option<String>,
    /// Base URL of the generative API
    #[serde(default = "default_inference_base_url")]
    pub base_url: String,
    /// Multimodal model name
    #[serde(default = "default_inference_model")]
    pub model: String,
    /// Request timeout in seconds. No timeout when unset.
    pub request_timeout_secs: Option<u64>,
}

/// Batch ingestion configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    /// Local JSON file holding exported heart-rate records
    #[serde(default = "default_source_path")]
    pub source_path: String,
}

// Default value functions
fn default_service_name() -> String {
    "dashboard-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_database() -> String {
    "health_dashboard".to_string()
}

fn default_user_collection() -> String {
    "user_info".to_string()
}

fn default_memo_collection() -> String {
    "day_memo".to_string()
}

fn default_region() -> String {
    "ap-northeast-2".to_string()
}

fn default_table() -> String {
    "HRV".to_string()
}

fn default_partition_key() -> String {
    "id".to_string()
}

fn default_sort_key() -> Option<String> {
    Some("time".to_string())
}

fn default_inference_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_inference_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_source_path() -> String {
    "data/hrv.json".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "dashboard-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/dashboard").required(false))
            .add_source(config::File::with_name("/etc/healthdash/dashboard").required(false))
            // DASHBOARD__DOCUMENT_STORE__URI -> document_store.uri
            .add_source(
                config::Environment::with_prefix("DASHBOARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get the inference request timeout, if one is configured
    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference.request_timeout_secs.map(Duration::from_secs)
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
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            uri: None,
            database: default_database(),
            app_name: default_service_name(),
            user_collection: default_user_collection(),
            memo_collection: default_memo_collection(),
        }
    }
}

impl Default for KeyValueConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            table: default_table(),
            partition_key: default_partition_key(),
            sort_key: default_sort_key(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_inference_base_url(),
            model: default_inference_model(),
            request_timeout_secs: None,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            source_path: default_source_path(),
        }
    }
}

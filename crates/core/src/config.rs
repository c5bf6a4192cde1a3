use serde::Deserialize;
use std::path::PathBuf;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `SPEND_INSIGHTS__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Where records come from.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Dataset name; namespaces the cache key.
    #[serde(default = "default_dataset")]
    pub dataset: String,
    /// Published spreadsheet document id.
    #[serde(default)]
    pub document_id: Option<String>,
    /// Sheet (tab) id within the document.
    #[serde(default = "default_sheet_gid")]
    pub sheet_gid: String,
    /// Extra candidate URLs tried after the spreadsheet exports.
    #[serde(default)]
    pub fallback_urls: Vec<String>,
    /// Row endpoint for database-backed loading.
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub rest_api_key: Option<String>,
    #[serde(default)]
    pub health_check: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    #[serde(default = "default_cache_fallback")]
    pub cache_fallback: bool,
    /// Page size for database-backed loading.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParserConfig {
    /// Parse on a blocking worker thread instead of the async task.
    #[serde(default = "default_use_worker")]
    pub use_worker: bool,
    #[serde(default = "default_yield_every_rows")]
    pub yield_every_rows: usize,
    /// Fraction of malformed rows above which a payload is rejected.
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Byte budget of the fast in-memory tier.
    #[serde(default = "default_memory_quota_bytes")]
    pub memory_quota_bytes: usize,
}

// Default functions
fn default_dataset() -> String {
    "ad-performance".to_string()
}
fn default_sheet_gid() -> String {
    "0".to_string()
}
fn default_batch_size() -> usize {
    500
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    8000
}
fn default_fetch_timeout_ms() -> u64 {
    30_000
}
fn default_inter_batch_delay_ms() -> u64 {
    20
}
fn default_cache_fallback() -> bool {
    true
}
fn default_page_size() -> usize {
    1000
}
fn default_use_worker() -> bool {
    true
}
fn default_yield_every_rows() -> usize {
    500
}
fn default_max_error_rate() -> f64 {
    0.10
}
fn default_cache_enabled() -> bool {
    true
}
fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("spend-insights-cache")
}
fn default_cache_ttl_secs() -> u64 {
    600
}
fn default_memory_quota_bytes() -> usize {
    5 * 1024 * 1024
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dataset: default_dataset(),
            document_id: None,
            sheet_gid: default_sheet_gid(),
            fallback_urls: Vec::new(),
            rest_url: None,
            rest_api_key: None,
            health_check: false,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            cache_fallback: default_cache_fallback(),
            page_size: default_page_size(),
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            use_worker: default_use_worker(),
            yield_every_rows: default_yield_every_rows(),
            max_error_rate: default_max_error_rate(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            dir: default_cache_dir(),
            ttl_secs: default_cache_ttl_secs(),
            memory_quota_bytes: default_memory_quota_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file, then environment
    /// variables (which win).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("SPEND_INSIGHTS")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("source.fallback_urls"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Cache key for the configured dataset; one entry per key.
    pub fn cache_key(&self) -> String {
        format!("spend-insights:{}", self.source.dataset)
    }
}

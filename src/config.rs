//! Configuration loading and types for partwise.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct, then validated with `garde`.  Every section is
//! optional; omitted values fall back to the defaults below.

use garde::Validate;
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct Config {
    /// Part sizing, retry and concurrency settings.
    #[serde(default)]
    #[garde(dive)]
    pub upload: UploadConfig,

    /// Storage service settings.
    #[serde(default)]
    #[garde(dive)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    #[garde(dive)]
    pub logging: LoggingConfig,

    /// Metrics export settings.
    #[serde(default)]
    #[garde(dive)]
    pub observability: ObservabilityConfig,
}

/// Upload tuning.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UploadConfig {
    /// Target bucket. The `--bucket` flag overrides it.
    #[serde(default)]
    #[garde(length(min = 3, max = 63))]
    pub bucket: Option<String>,

    /// Maximum part size in bytes (default 5 MiB).
    #[serde(default = "default_part_size")]
    #[garde(range(min = 1))]
    pub part_size: u64,

    /// Attempts per part, initial attempt included (default 3).
    #[serde(alias = "max_retries", default = "default_max_attempts")]
    #[garde(range(min = 1))]
    pub max_attempts: u32,

    /// Parts uploaded at once; 1 uploads strictly sequentially.
    #[serde(default = "default_concurrency")]
    #[garde(range(min = 1, max = 64))]
    pub concurrency: usize,

    /// Delay before the first retry in milliseconds (0 = immediate).
    #[serde(default)]
    #[garde(skip)]
    pub retry_backoff_ms: u64,

    /// Cap for the exponentially growing retry delay in milliseconds.
    #[serde(default = "default_max_retry_backoff_ms")]
    #[garde(skip)]
    pub max_retry_backoff_ms: u64,

    /// Randomize each retry delay within `[d/2, d]`.
    #[serde(default)]
    #[garde(skip)]
    pub retry_jitter: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            part_size: default_part_size(),
            max_attempts: default_max_attempts(),
            concurrency: default_concurrency(),
            retry_backoff_ms: 0,
            max_retry_backoff_ms: default_max_retry_backoff_ms(),
            retry_jitter: false,
        }
    }
}

/// Storage service configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StorageConfig {
    /// Backend type: `aws` or `memory` (dry run).
    #[serde(default = "default_storage_backend")]
    #[garde(pattern(r"^(aws|memory)$"))]
    pub backend: String,

    /// AWS S3 (or S3-compatible) client configuration.
    #[serde(default)]
    #[garde(dive)]
    pub aws: AwsStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            aws: AwsStorageConfig::default(),
        }
    }
}

/// AWS S3 client configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AwsStorageConfig {
    /// AWS region.
    #[serde(default = "default_region")]
    #[garde(length(min = 1))]
    pub region: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    #[garde(skip)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    #[garde(skip)]
    pub use_path_style: bool,
    /// Explicit AWS access key (falls back to env/credential chain).
    #[serde(default)]
    #[garde(skip)]
    pub access_key_id: String,
    /// Explicit AWS secret key (falls back to env/credential chain).
    #[serde(default)]
    #[garde(skip)]
    pub secret_access_key: String,
    /// Attempts the SDK makes internally per request. 1 disables SDK
    /// retries so the per-part budget is the only one in effect.
    #[serde(default = "default_sdk_max_attempts")]
    #[garde(range(min = 1))]
    pub sdk_max_attempts: u32,
}

impl Default for AwsStorageConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: String::new(),
            use_path_style: false,
            access_key_id: String::new(),
            secret_access_key: String::new(),
            sdk_max_attempts: default_sdk_max_attempts(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    #[garde(pattern(r"^(trace|debug|info|warn|error)$"))]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    #[garde(pattern(r"^(text|json)$"))]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection.
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub metrics: bool,

    /// Where to write the Prometheus text exposition after the upload
    /// (empty = don't write).
    #[serde(default)]
    #[garde(skip)]
    pub metrics_file: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            metrics_file: String::new(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_part_size() -> u64 {
    5 * 1024 * 1024 // 5 MiB
}

fn default_max_attempts() -> u32 {
    3
}

fn default_concurrency() -> usize {
    1
}

fn default_max_retry_backoff_ms() -> u64 {
    5_000
}

fn default_storage_backend() -> String {
    "aws".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_sdk_max_attempts() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Command-line overrides ---------------------------------------------------

/// Upload settings given on the command line. `None` keeps the configured
/// value.
#[derive(Debug, Clone, Default)]
pub struct UploadOverrides {
    pub bucket: Option<String>,
    pub part_size: Option<u64>,
    pub max_attempts: Option<u32>,
    pub concurrency: Option<usize>,
}

impl Config {
    /// Apply command-line overrides, then validate the merged result with
    /// the same rules as the YAML file.
    pub fn apply_overrides(&mut self, overrides: UploadOverrides) -> anyhow::Result<()> {
        if let Some(bucket) = overrides.bucket {
            self.upload.bucket = Some(bucket);
        }
        if let Some(part_size) = overrides.part_size {
            self.upload.part_size = part_size;
        }
        if let Some(max_attempts) = overrides.max_attempts {
            self.upload.max_attempts = max_attempts;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.upload.concurrency = concurrency;
        }
        self.validate()
            .map_err(|report| anyhow::anyhow!("invalid configuration: {report}"))
    }
}

// -- Loader ------------------------------------------------------------------

/// Parse and validate configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    config
        .validate()
        .map_err(|report| anyhow::anyhow!("invalid configuration: {report}"))?;
    Ok(config)
}

/// Load, parse and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.upload.part_size, 5 * 1024 * 1024);
        assert_eq!(config.upload.max_attempts, 3);
        assert_eq!(config.upload.concurrency, 1);
        assert_eq!(config.upload.retry_backoff_ms, 0);
        assert_eq!(config.storage.backend, "aws");
        assert_eq!(config.storage.aws.region, "us-east-1");
        assert_eq!(config.storage.aws.sdk_max_attempts, 1);
        assert_eq!(config.logging.format, "text");
        assert!(config.observability.metrics);
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
upload:
  bucket: media-archive
  part_size: 8388608
  max_attempts: 5
  concurrency: 4
  retry_backoff_ms: 200
  retry_jitter: true
storage:
  backend: aws
  aws:
    region: eu-west-1
    endpoint_url: http://localhost:9000
    use_path_style: true
logging:
  level: debug
  format: json
observability:
  metrics_file: /var/lib/node_exporter/partwise.prom
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.upload.bucket.as_deref(), Some("media-archive"));
        assert_eq!(config.upload.part_size, 8 * 1024 * 1024);
        assert_eq!(config.upload.max_attempts, 5);
        assert_eq!(config.upload.concurrency, 4);
        assert!(config.upload.retry_jitter);
        assert_eq!(config.storage.aws.region, "eu-west-1");
        assert!(config.storage.aws.use_path_style);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.observability.metrics_file,
            "/var/lib/node_exporter/partwise.prom"
        );
    }

    #[test]
    fn test_max_retries_alias() {
        let config = parse_config("upload:\n  max_retries: 7\n").unwrap();
        assert_eq!(config.upload.max_attempts, 7);
    }

    #[test]
    fn test_zero_part_size_rejected() {
        assert!(parse_config("upload:\n  part_size: 0\n").is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(parse_config("upload:\n  max_attempts: 0\n").is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(parse_config("storage:\n  backend: ftp\n").is_err());
    }

    #[test]
    fn test_bad_log_format_rejected() {
        assert!(parse_config("logging:\n  format: xml\n").is_err());
    }

    #[test]
    fn test_short_bucket_rejected() {
        assert!(parse_config("upload:\n  bucket: ab\n").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partwise.yaml");
        std::fs::write(&path, "storage:\n  backend: memory\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.storage.backend, "memory");
    }

    #[test]
    fn test_overrides_replace_configured_values() {
        let mut config = parse_config("upload:\n  bucket: from-file\n").unwrap();
        config
            .apply_overrides(UploadOverrides {
                bucket: Some("from-flag".into()),
                concurrency: Some(8),
                ..UploadOverrides::default()
            })
            .unwrap();
        assert_eq!(config.upload.bucket.as_deref(), Some("from-flag"));
        assert_eq!(config.upload.concurrency, 8);
        assert_eq!(config.upload.max_attempts, 3);
    }

    #[test]
    fn test_overrides_are_validated() {
        let rejected = [
            UploadOverrides {
                concurrency: Some(5000),
                ..UploadOverrides::default()
            },
            UploadOverrides {
                bucket: Some("ab".into()),
                ..UploadOverrides::default()
            },
            UploadOverrides {
                part_size: Some(0),
                ..UploadOverrides::default()
            },
            UploadOverrides {
                max_attempts: Some(0),
                ..UploadOverrides::default()
            },
        ];
        for overrides in rejected {
            let mut config = Config::default();
            assert!(config.apply_overrides(overrides).is_err());
        }
    }

    #[test]
    fn test_default_config_passes_validation() {
        let mut config = Config::default();
        assert!(config.apply_overrides(UploadOverrides::default()).is_ok());
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/partwise.yaml").is_err());
    }
}

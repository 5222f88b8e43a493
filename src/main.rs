//! partwise -- upload a local file to S3-compatible storage as a multipart
//! object.
//!
//! Exits non-zero when the upload fails.  A failed upload has already
//! aborted its multipart session (unless completion itself failed, in
//! which case the upload id is logged for manual cleanup).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use partwise::config::{Config, LoggingConfig, UploadOverrides};
use partwise::storage::aws::AwsStorageClient;
use partwise::storage::client::StorageServiceClient;
use partwise::storage::memory::MemoryStorageService;
use partwise::upload::coordinator::DEFAULT_PART_SIZE;
use partwise::upload::{FileSource, UploadCoordinator, UploadOptions};

/// Command-line arguments for partwise.
#[derive(Parser, Debug)]
#[command(
    name = "partwise",
    version,
    about = "Multipart object uploader for S3-compatible storage"
)]
struct Cli {
    /// Local file to upload.
    file: PathBuf,

    /// Target bucket (overrides `upload.bucket`).
    #[arg(short, long)]
    bucket: Option<String>,

    /// Object key. Defaults to the file name.
    #[arg(short, long)]
    key: Option<String>,

    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the part size in bytes.
    #[arg(long)]
    part_size: Option<u64>,

    /// Override the per-part attempt budget.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Override the number of parts uploaded at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => partwise::config::load_config(path)?,
        None => Config::default(),
    };

    init_tracing(&config.logging);
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path.display());
    }

    // Flags win over the file; the merged result is validated either way.
    config.apply_overrides(UploadOverrides {
        bucket: cli.bucket.clone(),
        part_size: cli.part_size,
        max_attempts: cli.max_attempts,
        concurrency: cli.concurrency,
    })?;

    let bucket = config
        .upload
        .bucket
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no bucket given: pass --bucket or set upload.bucket"))?;
    let key = match &cli.key {
        Some(key) => key.clone(),
        None => cli
            .file
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                anyhow::anyhow!("cannot derive an object key from {}", cli.file.display())
            })?,
    };

    if config.observability.metrics {
        partwise::metrics::init_metrics()?;
        partwise::metrics::describe_metrics();
    }

    let client: Arc<dyn StorageServiceClient> = match config.storage.backend.as_str() {
        "memory" => {
            info!("Using in-memory storage service (dry run)");
            Arc::new(MemoryStorageService::new().discarding_data())
        }
        _ => {
            if config.upload.part_size < DEFAULT_PART_SIZE {
                warn!(
                    "part_size {} is below the 5 MiB S3 minimum; completion will fail for objects with more than one part",
                    config.upload.part_size
                );
            }
            Arc::new(AwsStorageClient::new(&config.storage.aws).await?)
        }
    };

    let options = UploadOptions::from_config(&config.upload)?;
    let coordinator = UploadCoordinator::new(client, options);

    let source = FileSource::open(&cli.file).await?;
    info!(
        "Uploading {} to {}/{} (part_size={} concurrency={} max_attempts={})",
        cli.file.display(),
        bucket,
        key,
        options.part_size,
        options.concurrency,
        options.retry.max_attempts
    );

    let result = coordinator.upload(&bucket, &key, source).await;

    if !config.observability.metrics_file.is_empty() {
        if let Err(e) = partwise::metrics::write_textfile(&config.observability.metrics_file) {
            warn!(
                "Failed to write metrics to {}: {}",
                config.observability.metrics_file, e
            );
        }
    }

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(abort_error) = e.abort_error() {
                error!("Abort of the multipart session also failed: {}", abort_error);
            }
            if let Some(upload_id) = e.upload_id() {
                error!("Upload failed (upload id {})", upload_id);
            }
            return Err(e.into());
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!(
            "uploaded {}/{} ({} bytes, {} part(s)) etag={}",
            outcome.bucket,
            outcome.key,
            outcome.total_size,
            outcome.parts,
            outcome.e_tag.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

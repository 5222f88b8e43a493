//! Multipart upload orchestration.
//!
//! [`UploadCoordinator::upload`] drives one object through the whole
//! lifecycle: initiate a session, segment the source, upload every part
//! (sequentially, or on a bounded pool of workers), then either complete
//! the session from the sorted receipts or abort it.
//!
//! Any terminal part failure stops new part work immediately; in-flight
//! workers are cancelled and drained before the abort call goes out, so
//! no part is uploaded after abort has been decided.

use bytes::Bytes;
use serde::Serialize;
use std::num::{NonZeroU64, NonZeroUsize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::part::PartUploader;
use super::progress::{ProgressObserver, TracingProgress};
use super::retry::RetryPolicy;
use super::segmenter::{part_count, segment, PartDescriptor};
use super::session::{ActiveSession, UploadSession, UploadState};
use super::source::ByteSource;
use crate::config::UploadConfig;
use crate::errors::{AbortCause, UploadError};
use crate::metrics;
use crate::storage::client::{PartReceipt, StorageServiceClient};

/// The storage protocol accepts at most this many parts per upload.
pub const MAX_PARTS: u64 = 10_000;

/// Default part size: 5 MiB.
pub const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Construction-time tuning for an [`UploadCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Maximum part size; every part but the last has exactly this size.
    pub part_size: NonZeroU64,
    /// Per-part attempt budget and backoff.
    pub retry: RetryPolicy,
    /// Parts in flight at once. `1` is the sequential baseline, which
    /// holds a single part buffer in memory.
    pub concurrency: NonZeroUsize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            part_size: NonZeroU64::new(DEFAULT_PART_SIZE).unwrap_or(NonZeroU64::MIN),
            retry: RetryPolicy::default(),
            concurrency: NonZeroUsize::MIN,
        }
    }
}

impl UploadOptions {
    /// Build options from the `upload` config section.
    pub fn from_config(config: &UploadConfig) -> Result<Self, UploadError> {
        let part_size = NonZeroU64::new(config.part_size)
            .ok_or_else(|| UploadError::InvalidConfig("part_size must be positive".into()))?;
        let concurrency = NonZeroUsize::new(config.concurrency)
            .ok_or_else(|| UploadError::InvalidConfig("concurrency must be positive".into()))?;
        if config.max_attempts == 0 {
            return Err(UploadError::InvalidConfig(
                "max_attempts must be positive".into(),
            ));
        }
        Ok(Self {
            part_size,
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                initial_backoff: std::time::Duration::from_millis(config.retry_backoff_ms),
                max_backoff: std::time::Duration::from_millis(config.max_retry_backoff_ms),
                jitter: config.retry_jitter,
            },
            concurrency,
        })
    }
}

/// Result of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub bucket: String,
    pub key: String,
    /// Multipart session id; `None` for the empty-object single put.
    pub upload_id: Option<String>,
    pub location: Option<String>,
    pub e_tag: Option<String>,
    pub version_id: Option<String>,
    /// Number of parts committed.
    pub parts: usize,
    pub total_size: u64,
}

/// Orchestrates multipart uploads against one storage service.
pub struct UploadCoordinator {
    client: Arc<dyn StorageServiceClient>,
    options: UploadOptions,
    observer: Arc<dyn ProgressObserver>,
}

impl UploadCoordinator {
    pub fn new(client: Arc<dyn StorageServiceClient>, options: UploadOptions) -> Self {
        Self {
            client,
            options,
            observer: Arc::new(TracingProgress),
        }
    }

    /// Replace the default tracing progress observer.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Upload the whole of `source` as `bucket`/`key`.
    ///
    /// The source is owned for the duration of the call and dropped (file
    /// handle closed) on every exit path.
    pub async fn upload<S: ByteSource>(
        &self,
        bucket: &str,
        key: &str,
        source: S,
    ) -> Result<UploadOutcome, UploadError> {
        let result = self.run(bucket, key, source).await;
        metrics::record_upload(match &result {
            Ok(_) => "completed",
            Err(UploadError::Aborted { .. }) => "aborted",
            Err(_) => "failed",
        });
        result
    }

    async fn run<S: ByteSource>(
        &self,
        bucket: &str,
        key: &str,
        source: S,
    ) -> Result<UploadOutcome, UploadError> {
        let total_size = source.len();
        if total_size == 0 {
            return self.put_empty(bucket, key).await;
        }

        let parts = part_count(total_size, self.options.part_size);
        if parts > MAX_PARTS {
            return Err(UploadError::InvalidConfig(format!(
                "{total_size} bytes at part_size {} needs {parts} parts; the limit is {MAX_PARTS}",
                self.options.part_size
            )));
        }

        // Initiated
        let initiated = self.client.initiate(bucket, key).await.map_err(|source| {
            UploadError::Initiation {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source,
            }
        })?;
        info!(
            "Created multipart upload {} for {}/{} ({} bytes, {} part(s))",
            initiated.upload_id, initiated.bucket, initiated.key, total_size, parts
        );
        let mut active = ActiveSession::new(
            self.client.clone(),
            UploadSession {
                bucket: initiated.bucket,
                key: initiated.key,
                upload_id: initiated.upload_id,
                total_size,
            },
        );
        let session = active.session().clone();

        // InProgress
        active.transition(UploadState::InProgress);
        let uploader = PartUploader::new(
            self.client.clone(),
            self.options.retry,
            self.observer.clone(),
        );
        let collected = if self.options.concurrency.get() == 1 {
            self.drive_sequential(&uploader, &session, &source).await
        } else {
            self.drive_concurrent(&uploader, &session, Arc::new(source))
                .await
        };
        let receipts = collected.and_then(|receipts| sorted_receipts(receipts, parts as usize));

        let receipts = match receipts {
            Ok(receipts) => receipts,
            Err(cause) => {
                // Aborting
                error!("Multipart upload {} failed: {}", session.upload_id, cause);
                let abort_error = active.abort().await.err();
                if let Some(abort_err) = &abort_error {
                    warn!(
                        "Failed to abort multipart upload {}: {}",
                        session.upload_id, abort_err
                    );
                }
                return Err(UploadError::Aborted {
                    upload_id: session.upload_id.clone(),
                    cause,
                    abort_error,
                });
            }
        };

        // Completing
        let completed = active
            .complete(&receipts)
            .await
            .map_err(|source| UploadError::Completion {
                upload_id: session.upload_id.clone(),
                source,
            })?;
        info!(
            "Completed multipart upload {} for {}/{} ({} parts)",
            session.upload_id,
            session.bucket,
            session.key,
            receipts.len()
        );

        Ok(UploadOutcome {
            bucket: session.bucket.clone(),
            key: session.key.clone(),
            upload_id: Some(session.upload_id.clone()),
            location: completed.location,
            e_tag: completed.e_tag,
            version_id: completed.version_id,
            parts: receipts.len(),
            total_size,
        })
    }

    /// Empty objects cannot be stored as zero-part multipart uploads, so
    /// they go through a single put with an empty body.
    async fn put_empty(&self, bucket: &str, key: &str) -> Result<UploadOutcome, UploadError> {
        info!("{}/{} is empty; using a single put instead of multipart", bucket, key);
        let completed = self
            .client
            .put_object(bucket, key, Bytes::new())
            .await
            .map_err(|source| UploadError::SinglePut {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source,
            })?;
        Ok(UploadOutcome {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: None,
            location: completed.location,
            e_tag: completed.e_tag,
            version_id: completed.version_id,
            parts: 0,
            total_size: 0,
        })
    }

    /// Read, upload and resolve one part at a time.
    async fn drive_sequential<S: ByteSource>(
        &self,
        uploader: &PartUploader,
        session: &UploadSession,
        source: &S,
    ) -> Result<Vec<PartReceipt>, AbortCause> {
        let mut receipts = Vec::new();
        for descriptor in segment(session.total_size, self.options.part_size) {
            let receipt = upload_one(uploader, session, source, descriptor).await?;
            receipts.push(receipt);
        }
        Ok(receipts)
    }

    /// Keep up to `concurrency` parts in flight; stop at the first failure.
    async fn drive_concurrent<S: ByteSource>(
        &self,
        uploader: &PartUploader,
        session: &Arc<UploadSession>,
        source: Arc<S>,
    ) -> Result<Vec<PartReceipt>, AbortCause> {
        let limit = self.options.concurrency.get();
        let mut pending = segment(session.total_size, self.options.part_size);
        let mut in_flight = JoinSet::new();
        let mut receipts = Vec::with_capacity(pending.len());

        loop {
            while in_flight.len() < limit {
                let Some(descriptor) = pending.next() else {
                    break;
                };
                let uploader = uploader.clone();
                let session = session.clone();
                let source = source.clone();
                in_flight.spawn(async move {
                    upload_one(&uploader, &session, source.as_ref(), descriptor).await
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let failure = match joined {
                Ok(Ok(receipt)) => {
                    receipts.push(receipt);
                    continue;
                }
                Ok(Err(cause)) => cause,
                Err(join_err) => AbortCause::Worker {
                    message: join_err.to_string(),
                },
            };

            debug!(
                "Cancelling {} in-flight part(s) of upload {}",
                in_flight.len(),
                session.upload_id
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
            return Err(failure);
        }

        Ok(receipts)
    }
}

/// Read the bytes of one part and upload them. A source that hands back
/// a different number of bytes than the descriptor covers fails the part
/// before anything is sent.
async fn upload_one<S: ByteSource + ?Sized>(
    uploader: &PartUploader,
    session: &UploadSession,
    source: &S,
    descriptor: PartDescriptor,
) -> Result<PartReceipt, AbortCause> {
    let body = source
        .read_range(descriptor.offset, descriptor.length)
        .await
        .map_err(|source| AbortCause::Read {
            part_number: descriptor.part_number,
            source,
        })?;
    if body.len() as u64 != descriptor.length {
        return Err(AbortCause::Read {
            part_number: descriptor.part_number,
            source: std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "read {} bytes at offset {}, expected {}",
                    body.len(),
                    descriptor.offset,
                    descriptor.length
                ),
            ),
        });
    }
    Ok(uploader.upload_part(session, &descriptor, body).await?)
}

/// Sort receipts by part number and check they are exactly 1..=expected.
fn sorted_receipts(
    mut receipts: Vec<PartReceipt>,
    expected: usize,
) -> Result<Vec<PartReceipt>, AbortCause> {
    receipts.sort_by_key(|r| r.part_number);
    let contiguous = receipts
        .iter()
        .enumerate()
        .all(|(idx, r)| r.part_number as usize == idx + 1);
    if receipts.len() != expected || !contiguous {
        return Err(AbortCause::ReceiptMismatch {
            expected,
            received: receipts.len(),
        });
    }
    Ok(receipts)
}

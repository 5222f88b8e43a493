//! Single-part upload with a bounded retry budget.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::progress::{PartEvent, PartProgress, ProgressObserver};
use super::retry::{RetryPolicy, RetryState};
use super::segmenter::PartDescriptor;
use super::session::UploadSession;
use crate::errors::TerminalUploadError;
use crate::metrics;
use crate::storage::client::{PartReceipt, StorageServiceClient};

/// Uploads one part, retrying transient failures in place.
///
/// Cheap to clone; concurrent workers each hold a copy.
#[derive(Clone)]
pub struct PartUploader {
    client: Arc<dyn StorageServiceClient>,
    retry: RetryPolicy,
    observer: Arc<dyn ProgressObserver>,
}

impl PartUploader {
    pub fn new(
        client: Arc<dyn StorageServiceClient>,
        retry: RetryPolicy,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            client,
            retry,
            observer,
        }
    }

    /// Upload `body` as part `descriptor.part_number` of `session`.
    ///
    /// Every attempt sends the same part number and the same bytes.  A
    /// transient failure is retried until `max_attempts` attempts have been
    /// made; a permanent failure ends the part at once.  Either way the
    /// caller gets a receipt or a [`TerminalUploadError`], never nothing.
    pub async fn upload_part(
        &self,
        session: &UploadSession,
        descriptor: &PartDescriptor,
        body: Bytes,
    ) -> Result<PartReceipt, TerminalUploadError> {
        let part_number = descriptor.part_number;
        let mut state = RetryState::new(self.retry.max_attempts);

        loop {
            let attempt = state.begin_attempt();
            self.observe(descriptor, &state, attempt, PartEvent::Attempting);
            debug!(
                "upload_part: upload_id={} part={} attempt={}/{} bytes={}",
                session.upload_id,
                part_number,
                attempt,
                state.max_attempts(),
                descriptor.length
            );

            let started = Instant::now();
            let result = self
                .client
                .upload_part(
                    &session.bucket,
                    &session.key,
                    &session.upload_id,
                    part_number,
                    body.clone(),
                )
                .await;

            let err = match result {
                Ok(uploaded) => {
                    metrics::record_part_attempt("ok");
                    metrics::record_part_uploaded(descriptor.length, started.elapsed());
                    self.observe(descriptor, &state, attempt, PartEvent::Uploaded);
                    return Ok(PartReceipt {
                        part_number,
                        e_tag: uploaded.e_tag,
                    });
                }
                Err(err) => err,
            };

            if err.is_transient() && !state.exhausted() {
                metrics::record_part_attempt("transient");
                metrics::record_part_retry();
                self.observe(
                    descriptor,
                    &state,
                    attempt,
                    PartEvent::Retrying {
                        error: err.to_string(),
                    },
                );
                let delay = self.retry.backoff(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }

            metrics::record_part_attempt(if err.is_transient() {
                "transient"
            } else {
                "permanent"
            });
            self.observe(
                descriptor,
                &state,
                attempt,
                PartEvent::Failed {
                    error: err.to_string(),
                },
            );
            return Err(TerminalUploadError {
                part_number,
                attempts: state.attempts(),
                source: err,
            });
        }
    }

    fn observe(
        &self,
        descriptor: &PartDescriptor,
        state: &RetryState,
        attempt: u32,
        event: PartEvent,
    ) {
        self.observer.on_part_event(&PartProgress {
            part_number: descriptor.part_number,
            attempt,
            max_attempts: state.max_attempts(),
            bytes: descriptor.length,
            event,
        });
    }
}

//! In-memory storage service.
//!
//! Pending multipart sessions and committed objects are held in a
//! `tokio::sync::Mutex`-protected map.  The service validates completion
//! requests the way S3 does (ascending part order, known parts, matching
//! ETags) and computes composite `md5-of-md5s-N` ETags.
//!
//! Every call is appended to a log, and failures can be scripted per
//! operation or per part number, which makes this the collaborator of
//! choice for exercising the upload coordinator without a network.

use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use super::client::{
    CompletedObject, InitiatedUpload, PartReceipt, ServiceFuture, StorageServiceClient,
    UploadedPart,
};
use crate::errors::{ErrorKind, ServiceError};

/// One recorded call against the service, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Initiate {
        bucket: String,
        key: String,
    },
    UploadPart {
        upload_id: String,
        part_number: u32,
        length: usize,
    },
    Complete {
        upload_id: String,
        part_numbers: Vec<u32>,
    },
    Abort {
        upload_id: String,
    },
    PutObject {
        bucket: String,
        key: String,
        length: usize,
    },
}

/// A scripted failure.
#[derive(Debug, Clone, Copy)]
pub struct Fault {
    kind: ErrorKind,
    /// Remaining failures; `None` fails forever.
    remaining: Option<u32>,
}

impl Fault {
    /// Fail the next `times` calls, then succeed.
    pub fn times(times: u32, kind: ErrorKind) -> Self {
        Self {
            kind,
            remaining: Some(times),
        }
    }

    /// Fail every call.
    pub fn always(kind: ErrorKind) -> Self {
        Self {
            kind,
            remaining: None,
        }
    }

    /// Consume one failure if any are left.
    fn trip(&mut self) -> Option<ErrorKind> {
        match self.remaining.as_mut() {
            None => Some(self.kind),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(self.kind)
            }
        }
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    initiate: Option<Fault>,
    complete: Option<Fault>,
    abort: Option<Fault>,
    put_object: Option<Fault>,
    parts: HashMap<u32, Fault>,
}

fn trip(slot: &mut Option<Fault>) -> Option<ErrorKind> {
    slot.as_mut().and_then(Fault::trip)
}

/// A stored multipart part: data plus its quoted MD5 ETag.
#[derive(Debug, Clone)]
struct StoredPart {
    data: Bytes,
    e_tag: String,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Debug, Default)]
struct State {
    uploads: HashMap<String, PendingUpload>,
    /// Committed objects: "bucket/key" -> (data, etag).
    objects: HashMap<String, (Bytes, String)>,
    calls: Vec<ServiceCall>,
}

/// In-memory multipart storage service.
#[derive(Debug, Default)]
pub struct MemoryStorageService {
    state: tokio::sync::Mutex<State>,
    faults: Mutex<FaultPlan>,
    /// Artificial delay applied inside every `upload_part` call.
    part_latency: Option<Duration>,
    /// Keep ETags only: part and object bytes are dropped once hashed and
    /// no call log is kept.
    discard_data: bool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every part upload by `latency`, so concurrent uploads overlap.
    pub fn with_part_latency(mut self, latency: Duration) -> Self {
        self.part_latency = Some(latency);
        self
    }

    /// Dry-run mode: validate the protocol without retaining payloads or
    /// the call log, so memory stays bounded by the parts in flight.
    /// `object` then returns empty bodies and `calls` stays empty.
    pub fn discarding_data(mut self) -> Self {
        self.discard_data = true;
        self
    }

    fn record(&self, state: &mut State, call: ServiceCall) {
        if !self.discard_data {
            state.calls.push(call);
        }
    }

    fn retained(&self, data: Bytes) -> Bytes {
        if self.discard_data {
            Bytes::new()
        } else {
            data
        }
    }

    // ── Fault scripting ─────────────────────────────────────────────

    fn plan(&self) -> std::sync::MutexGuard<'_, FaultPlan> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fail_initiate(&self, fault: Fault) {
        self.plan().initiate = Some(fault);
    }

    pub fn fail_part(&self, part_number: u32, fault: Fault) {
        self.plan().parts.insert(part_number, fault);
    }

    pub fn fail_complete(&self, fault: Fault) {
        self.plan().complete = Some(fault);
    }

    pub fn fail_abort(&self, fault: Fault) {
        self.plan().abort = Some(fault);
    }

    pub fn fail_put_object(&self, fault: Fault) {
        self.plan().put_object = Some(fault);
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// All calls received so far, in arrival order.
    pub async fn calls(&self) -> Vec<ServiceCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of `upload_part` calls received for `part_number`.
    pub async fn part_attempts(&self, part_number: u32) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| matches!(c, ServiceCall::UploadPart { part_number: n, .. } if *n == part_number))
            .count()
    }

    /// Committed object data, if `bucket`/`key` exists.
    pub async fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state
            .lock()
            .await
            .objects
            .get(&object_key(bucket, key))
            .map(|(data, _)| data.clone())
    }

    /// Number of multipart sessions neither completed nor aborted.
    pub async fn pending_uploads(&self) -> usize {
        self.state.lock().await.uploads.len()
    }

    /// Highest number of `upload_part` calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    // ── ETag helpers ────────────────────────────────────────────────

    /// Compute the quoted MD5-hex ETag for a byte slice.
    fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }

    /// Composite multipart ETag: md5 over the concatenated binary part
    /// digests, suffixed with the part count.
    fn composite_etag(part_etags: &[&str]) -> String {
        let mut combined = Vec::with_capacity(part_etags.len() * 16);
        for etag in part_etags {
            if let Ok(bytes) = hex::decode(etag.trim_matches('"')) {
                combined.extend_from_slice(&bytes);
            }
        }
        let mut hasher = Md5::new();
        hasher.update(&combined);
        format!("\"{}-{}\"", hex::encode(hasher.finalize()), part_etags.len())
    }
}

fn object_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

fn injected(operation: &'static str, kind: ErrorKind) -> ServiceError {
    ServiceError::new(operation, kind, "injected failure")
}

/// Tracks one in-flight part upload for the peak gauge.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StorageServiceClient for MemoryStorageService {
    fn initiate(&self, bucket: &str, key: &str) -> ServiceFuture<'_, InitiatedUpload> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            self.record(&mut state, ServiceCall::Initiate {
                bucket: bucket.clone(),
                key: key.clone(),
            });
            let fault = trip(&mut self.plan().initiate);
            if let Some(kind) = fault {
                return Err(injected("initiate", kind));
            }

            let upload_id = uuid::Uuid::new_v4().to_string();
            debug!("memory initiate: {}/{} upload_id={}", bucket, key, upload_id);
            state.uploads.insert(
                upload_id.clone(),
                PendingUpload {
                    bucket: bucket.clone(),
                    key: key.clone(),
                    parts: BTreeMap::new(),
                },
            );
            Ok(InitiatedUpload {
                upload_id,
                bucket,
                key,
            })
        })
    }

    fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> ServiceFuture<'_, UploadedPart> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let _guard = InFlight::enter(&self.in_flight, &self.peak_in_flight);

            {
                let mut state = self.state.lock().await;
                self.record(
                    &mut state,
                    ServiceCall::UploadPart {
                        upload_id: upload_id.clone(),
                        part_number,
                        length: body.len(),
                    },
                );
            }

            if let Some(latency) = self.part_latency {
                tokio::time::sleep(latency).await;
            }

            let fault = self
                .plan()
                .parts
                .get_mut(&part_number)
                .and_then(Fault::trip);
            if let Some(kind) = fault {
                return Err(injected("upload_part", kind));
            }

            let mut state = self.state.lock().await;
            let upload = state.uploads.get_mut(&upload_id).ok_or_else(|| {
                ServiceError::permanent("upload_part", format!("NoSuchUpload: {upload_id}"))
            })?;
            let e_tag = Self::compute_etag(&body);
            upload.parts.insert(
                part_number,
                StoredPart {
                    data: self.retained(body),
                    e_tag: e_tag.clone(),
                },
            );
            Ok(UploadedPart { e_tag })
        })
    }

    fn complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartReceipt],
    ) -> ServiceFuture<'_, CompletedObject> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        let parts = parts.to_vec();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            self.record(&mut state, ServiceCall::Complete {
                upload_id: upload_id.clone(),
                part_numbers: parts.iter().map(|p| p.part_number).collect(),
            });
            let fault = trip(&mut self.plan().complete);
            if let Some(kind) = fault {
                return Err(injected("complete", kind));
            }

            let upload = state.uploads.get(&upload_id).ok_or_else(|| {
                ServiceError::permanent("complete", format!("NoSuchUpload: {upload_id}"))
            })?;
            if upload.bucket != bucket || upload.key != key {
                return Err(ServiceError::permanent(
                    "complete",
                    format!("NoSuchUpload: {upload_id} is not for {bucket}/{key}"),
                ));
            }
            if parts.is_empty() {
                return Err(ServiceError::permanent(
                    "complete",
                    "MalformedXML: at least one part is required",
                ));
            }
            if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
                return Err(ServiceError::permanent(
                    "complete",
                    "InvalidPartOrder: parts must be in ascending order",
                ));
            }

            let mut data = BytesMut::new();
            let mut etags = Vec::with_capacity(parts.len());
            for receipt in &parts {
                let stored = upload.parts.get(&receipt.part_number).ok_or_else(|| {
                    ServiceError::permanent(
                        "complete",
                        format!("InvalidPart: part {} was never uploaded", receipt.part_number),
                    )
                })?;
                if stored.e_tag != receipt.e_tag {
                    return Err(ServiceError::permanent(
                        "complete",
                        format!("InvalidPart: ETag mismatch for part {}", receipt.part_number),
                    ));
                }
                data.extend_from_slice(&stored.data);
                etags.push(stored.e_tag.as_str());
            }
            let e_tag = Self::composite_etag(&etags);

            state.uploads.remove(&upload_id);
            state
                .objects
                .insert(object_key(&bucket, &key), (data.freeze(), e_tag.clone()));
            debug!(
                "memory complete: {}/{} upload_id={} parts={}",
                bucket,
                key,
                upload_id,
                parts.len()
            );

            Ok(CompletedObject {
                location: Some(format!("memory://{bucket}/{key}")),
                bucket,
                key,
                e_tag: Some(e_tag),
                version_id: None,
            })
        })
    }

    fn abort(&self, _bucket: &str, _key: &str, upload_id: &str) -> ServiceFuture<'_, ()> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            self.record(&mut state, ServiceCall::Abort {
                upload_id: upload_id.clone(),
            });
            let fault = trip(&mut self.plan().abort);
            if let Some(kind) = fault {
                return Err(injected("abort", kind));
            }
            state
                .uploads
                .remove(&upload_id)
                .map(|_| ())
                .ok_or_else(|| ServiceError::permanent("abort", format!("NoSuchUpload: {upload_id}")))
        })
    }

    fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> ServiceFuture<'_, CompletedObject> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            self.record(&mut state, ServiceCall::PutObject {
                bucket: bucket.clone(),
                key: key.clone(),
                length: body.len(),
            });
            let fault = trip(&mut self.plan().put_object);
            if let Some(kind) = fault {
                return Err(injected("put_object", kind));
            }

            let e_tag = Self::compute_etag(&body);
            state
                .objects
                .insert(object_key(&bucket, &key), (self.retained(body), e_tag.clone()));
            Ok(CompletedObject {
                location: Some(format!("memory://{bucket}/{key}")),
                bucket,
                key,
                e_tag: Some(e_tag),
                version_id: None,
            })
        })
    }
}

//! Abstract storage service contract.
//!
//! Every storage backend must implement [`StorageServiceClient`].  The
//! trait speaks the four calls of the multipart protocol (plus a
//! single-shot put for empty objects) in terms of plain strings and
//! bytes, so the upload core never sees SDK or wire types.

use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

use crate::errors::ServiceError;

/// Boxed future returned by every storage call.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// Response of a successful initiate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedUpload {
    /// Opaque session token issued by the service.
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
}

/// Response of a successful part upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// Integrity tag (ETag) for the stored part.
    pub e_tag: String,
}

/// Completion receipt for one part: what the completion call needs to
/// stitch the object together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartReceipt {
    pub part_number: u32,
    pub e_tag: String,
}

/// Final location descriptor of a committed object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompletedObject {
    pub bucket: String,
    pub key: String,
    /// Service-reported URL of the object, when provided.
    pub location: Option<String>,
    /// Object ETag (multipart ETags carry a `-N` suffix).
    pub e_tag: Option<String>,
    pub version_id: Option<String>,
}

/// Async multipart storage contract.
pub trait StorageServiceClient: Send + Sync + 'static {
    /// Open a multipart session for `bucket`/`key`.
    fn initiate(&self, bucket: &str, key: &str) -> ServiceFuture<'_, InitiatedUpload>;

    /// Upload one part. `body.len()` is sent as the content length.
    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> ServiceFuture<'_, UploadedPart>;

    /// Commit the session from `parts`, which must be sorted ascending by
    /// part number.
    fn complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartReceipt],
    ) -> ServiceFuture<'_, CompletedObject>;

    /// Release the session and any stored parts.
    fn abort(&self, bucket: &str, key: &str, upload_id: &str) -> ServiceFuture<'_, ()>;

    /// Store `body` as a whole object without a multipart session.
    fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> ServiceFuture<'_, CompletedObject>;
}

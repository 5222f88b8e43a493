//! partwise library: multipart object uploads for S3-compatible storage.
//!
//! An object is split into fixed-size parts, each part is uploaded with a
//! bounded retry budget, and the multipart session is then either
//! completed from the ordered part receipts or aborted so no orphaned
//! parts are left behind.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod storage;
pub mod upload;

pub use errors::{ServiceError, TerminalUploadError, UploadError};
pub use storage::client::StorageServiceClient;
pub use upload::{UploadCoordinator, UploadOptions, UploadOutcome};

//! Storage service clients.
//!
//! The [`client::StorageServiceClient`] trait is the contract the upload
//! core talks to.  Implementations: the AWS S3 SDK client for real
//! uploads, and an in-memory service used for dry runs and tests.

pub mod aws;
pub mod client;
pub mod memory;

//! Multipart upload core: segmentation, per-part retry, and session
//! orchestration.

pub mod coordinator;
pub mod part;
pub mod progress;
pub mod retry;
pub mod segmenter;
pub mod session;
pub mod source;

pub use coordinator::{UploadCoordinator, UploadOptions, UploadOutcome, MAX_PARTS};
pub use part::PartUploader;
pub use progress::{PartEvent, PartProgress, ProgressObserver};
pub use retry::RetryPolicy;
pub use segmenter::{segment, PartDescriptor};
pub use session::{UploadSession, UploadState};
pub use source::{ByteSource, FileSource};

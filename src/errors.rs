//! Upload error types.
//!
//! Storage calls fail with [`ServiceError`], which carries the
//! transient/permanent classification the part retry loop depends on.
//! Everything that escapes the coordinator is an [`UploadError`]: the
//! caller sees exactly one classified failure per upload.

use std::fmt;

use thiserror::Error;

/// Whether a failed storage call is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network blip, throttling, 5xx. Retrying the same request may succeed.
    Transient,
    /// The service rejected the request. Retrying will not help.
    Permanent,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => f.write_str("transient"),
            ErrorKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// A failed call against the storage service.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed ({kind}): {message}")]
pub struct ServiceError {
    /// Name of the storage operation, e.g. `upload_part`.
    pub operation: &'static str,
    /// Retry classification.
    pub kind: ErrorKind,
    /// Human-readable detail from the service or transport.
    pub message: String,
}

impl ServiceError {
    pub fn new(operation: &'static str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
        }
    }

    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, ErrorKind::Transient, message)
    }

    pub fn permanent(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, ErrorKind::Permanent, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// A part that could not be uploaded within its attempt budget, or that the
/// service rejected outright.
#[derive(Debug, Clone, Error)]
#[error("part {part_number} failed after {attempts} attempt(s): {source}")]
pub struct TerminalUploadError {
    pub part_number: u32,
    /// Attempts actually made, including the one that failed last.
    pub attempts: u32,
    /// The last underlying failure.
    #[source]
    pub source: ServiceError,
}

/// Why an in-progress multipart session was abandoned.
#[derive(Debug, Error)]
pub enum AbortCause {
    /// A part exhausted its retry budget or was rejected.
    #[error(transparent)]
    Part(#[from] TerminalUploadError),

    /// Reading the part's bytes from the local source failed.
    #[error("reading part {part_number} from source: {source}")]
    Read {
        part_number: u32,
        #[source]
        source: std::io::Error,
    },

    /// A part worker task panicked or was cancelled unexpectedly.
    #[error("part worker failed: {message}")]
    Worker { message: String },

    /// The collected receipts do not cover part numbers 1..=expected exactly.
    #[error("collected {received} receipt(s) that do not match the {expected} segmented part(s)")]
    ReceiptMismatch { expected: usize, received: usize },
}

/// Terminal failure of a whole upload.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Upload options are unusable for this object.
    #[error("invalid upload configuration: {0}")]
    InvalidConfig(String),

    /// The multipart session could not be created. Nothing to clean up.
    #[error("failed to initiate multipart upload for {bucket}/{key}: {source}")]
    Initiation {
        bucket: String,
        key: String,
        #[source]
        source: ServiceError,
    },

    /// Part work failed and the session was aborted (best-effort).
    ///
    /// `abort_error` is set when the abort call itself failed; it is
    /// advisory and never replaces `cause`.
    #[error("multipart upload {upload_id} aborted: {cause}")]
    Aborted {
        upload_id: String,
        #[source]
        cause: AbortCause,
        abort_error: Option<ServiceError>,
    },

    /// Every part succeeded but the completion call failed. The session is
    /// left open for an operator to retry completion or abort it.
    #[error("failed to complete multipart upload {upload_id}: {source}")]
    Completion {
        upload_id: String,
        #[source]
        source: ServiceError,
    },

    /// The single-shot put used for empty objects failed.
    #[error("failed to put empty object {bucket}/{key}: {source}")]
    SinglePut {
        bucket: String,
        key: String,
        #[source]
        source: ServiceError,
    },
}

impl UploadError {
    /// The terminal part failure behind an aborted upload, if that is what
    /// ended it.
    pub fn part_failure(&self) -> Option<&TerminalUploadError> {
        match self {
            UploadError::Aborted {
                cause: AbortCause::Part(err),
                ..
            } => Some(err),
            _ => None,
        }
    }

    /// The secondary failure of the best-effort abort call, if any.
    pub fn abort_error(&self) -> Option<&ServiceError> {
        match self {
            UploadError::Aborted { abort_error, .. } => abort_error.as_ref(),
            _ => None,
        }
    }

    /// The multipart upload id involved, when a session had been opened.
    pub fn upload_id(&self) -> Option<&str> {
        match self {
            UploadError::Aborted { upload_id, .. } | UploadError::Completion { upload_id, .. } => {
                Some(upload_id)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_classification() {
        assert!(ServiceError::transient("upload_part", "timeout").is_transient());
        assert!(!ServiceError::permanent("upload_part", "AccessDenied").is_transient());
    }

    #[test]
    fn test_service_error_display() {
        let err = ServiceError::transient("upload_part", "connection reset");
        assert_eq!(
            err.to_string(),
            "upload_part failed (transient): connection reset"
        );
    }

    #[test]
    fn test_terminal_error_display_names_part() {
        let err = TerminalUploadError {
            part_number: 7,
            attempts: 3,
            source: ServiceError::transient("upload_part", "503 SlowDown"),
        };
        let msg = err.to_string();
        assert!(msg.contains("part 7"));
        assert!(msg.contains("3 attempt(s)"));
    }

    #[test]
    fn test_aborted_accessors() {
        let err = UploadError::Aborted {
            upload_id: "abc".to_string(),
            cause: AbortCause::Part(TerminalUploadError {
                part_number: 2,
                attempts: 3,
                source: ServiceError::transient("upload_part", "boom"),
            }),
            abort_error: Some(ServiceError::permanent("abort", "NoSuchUpload")),
        };
        assert_eq!(err.part_failure().map(|e| e.part_number), Some(2));
        assert_eq!(err.abort_error().map(|e| e.operation), Some("abort"));
        assert_eq!(err.upload_id(), Some("abc"));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_completion_error_has_no_part_failure() {
        let err = UploadError::Completion {
            upload_id: "xyz".to_string(),
            source: ServiceError::permanent("complete", "InvalidPart"),
        };
        assert!(err.part_failure().is_none());
        assert!(err.abort_error().is_none());
        assert_eq!(err.upload_id(), Some("xyz"));
    }

    #[test]
    fn test_initiation_error_has_no_upload_id() {
        let err = UploadError::Initiation {
            bucket: "b".to_string(),
            key: "k".to_string(),
            source: ServiceError::permanent("initiate", "NoSuchBucket"),
        };
        assert!(err.upload_id().is_none());
        assert!(err.to_string().contains("b/k"));
    }
}

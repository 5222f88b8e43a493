//! Multipart session identity and lifecycle state.
//!
//! [`ActiveSession`] owns an open session between initiation and
//! finalization.  `complete` and `abort` both consume it, so a session
//! can be finalized at most once; dropping it unfinalized is logged.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::ServiceError;
use crate::storage::client::{CompletedObject, PartReceipt, StorageServiceClient};

/// Identity of one multipart upload in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub bucket: String,
    pub key: String,
    /// Opaque token issued by the storage service.
    pub upload_id: String,
    /// Total object size in bytes.
    pub total_size: u64,
}

/// Coordinator lifecycle.
///
/// `Initiated -> InProgress -> Completing -> Done`, or
/// `Initiated -> InProgress -> Aborting -> Done`.  Whether `Done` means
/// success is carried by the coordinator's result, not by the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Initiated,
    InProgress,
    Completing,
    Aborting,
    Done,
}

impl UploadState {
    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Initiated, InProgress)
                | (InProgress, Completing)
                | (InProgress, Aborting)
                | (Completing, Done)
                | (Aborting, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == UploadState::Done
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadState::Initiated => "initiated",
            UploadState::InProgress => "in-progress",
            UploadState::Completing => "completing",
            UploadState::Aborting => "aborting",
            UploadState::Done => "done",
        };
        f.write_str(name)
    }
}

/// An open multipart session awaiting exactly one finalize call.
pub struct ActiveSession {
    client: Arc<dyn StorageServiceClient>,
    session: Arc<UploadSession>,
    state: UploadState,
}

impl ActiveSession {
    pub(crate) fn new(client: Arc<dyn StorageServiceClient>, session: UploadSession) -> Self {
        debug!(
            "Upload {} for {}/{}: {}",
            session.upload_id,
            session.bucket,
            session.key,
            UploadState::Initiated
        );
        Self {
            client,
            session: Arc::new(session),
            state: UploadState::Initiated,
        }
    }

    pub fn session(&self) -> &Arc<UploadSession> {
        &self.session
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: UploadState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal upload transition {} -> {}",
            self.state,
            next
        );
        debug!(
            "Upload {}: {} -> {}",
            self.session.upload_id, self.state, next
        );
        self.state = next;
    }

    /// Commit the session from receipts sorted by part number.
    pub(crate) async fn complete(
        mut self,
        receipts: &[PartReceipt],
    ) -> Result<CompletedObject, ServiceError> {
        self.transition(UploadState::Completing);
        let result = self
            .client
            .complete(
                &self.session.bucket,
                &self.session.key,
                &self.session.upload_id,
                receipts,
            )
            .await;
        // Completion failure is terminal too; the session stays open
        // server-side for an operator, but this handle is done with it.
        self.transition(UploadState::Done);
        result
    }

    /// Release the session. Best-effort: the error is returned for
    /// reporting only.
    pub(crate) async fn abort(mut self) -> Result<(), ServiceError> {
        self.transition(UploadState::Aborting);
        warn!(
            "Aborting multipart upload {} for {}/{}",
            self.session.upload_id, self.session.bucket, self.session.key
        );
        let result = self
            .client
            .abort(
                &self.session.bucket,
                &self.session.key,
                &self.session.upload_id,
            )
            .await;
        self.transition(UploadState::Done);
        result
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            warn!(
                "Multipart upload {} for {}/{} dropped while {}; it was neither completed nor aborted",
                self.session.upload_id, self.session.bucket, self.session.key, self.state
            );
        }
    }
}

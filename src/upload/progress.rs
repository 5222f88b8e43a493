//! Part progress observation.
//!
//! Observers are advisory: they see every attempt, retry and outcome but
//! cannot change what the uploader does next.

use tracing::{info, warn};

/// What just happened to a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartEvent {
    /// An attempt is about to be sent.
    Attempting,
    /// The attempt failed transiently and another one will follow.
    Retrying { error: String },
    /// The part was stored.
    Uploaded,
    /// The part failed for good.
    Failed { error: String },
}

/// Progress observation for one part attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartProgress {
    pub part_number: u32,
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Byte length of the part.
    pub bytes: u64,
    pub event: PartEvent,
}

/// Receives part progress observations.
pub trait ProgressObserver: Send + Sync {
    fn on_part_event(&self, progress: &PartProgress);
}

/// Ignores every observation.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_part_event(&self, _progress: &PartProgress) {}
}

/// Reports retries and completed parts through `tracing`.
pub struct TracingProgress;

impl ProgressObserver for TracingProgress {
    fn on_part_event(&self, progress: &PartProgress) {
        match &progress.event {
            PartEvent::Attempting => {}
            PartEvent::Retrying { error } => warn!(
                "Retrying part #{} (attempt {}/{} failed): {}",
                progress.part_number, progress.attempt, progress.max_attempts, error
            ),
            PartEvent::Uploaded => info!(
                "Uploaded part #{} ({} bytes, attempt {})",
                progress.part_number, progress.bytes, progress.attempt
            ),
            PartEvent::Failed { error } => warn!(
                "Giving up on part #{} after {} attempt(s): {}",
                progress.part_number, progress.attempt, error
            ),
        }
    }
}

/// A progress observer that wraps a closure.
pub struct FnProgress<F>(pub F);

impl<F> ProgressObserver for FnProgress<F>
where
    F: Fn(&PartProgress) + Send + Sync,
{
    fn on_part_event(&self, progress: &PartProgress) {
        (self.0)(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fn_progress_receives_events() {
        let seen = AtomicU32::new(0);
        let observer = FnProgress(|p: &PartProgress| {
            seen.fetch_add(p.attempt, Ordering::SeqCst);
        });
        let progress = PartProgress {
            part_number: 1,
            attempt: 2,
            max_attempts: 3,
            bytes: 10,
            event: PartEvent::Uploaded,
        };
        observer.on_part_event(&progress);
        observer.on_part_event(&progress);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_builtin_observers_accept_all_events() {
        let events = [
            PartEvent::Attempting,
            PartEvent::Retrying {
                error: "timeout".to_string(),
            },
            PartEvent::Uploaded,
            PartEvent::Failed {
                error: "denied".to_string(),
            },
        ];
        for event in events {
            let progress = PartProgress {
                part_number: 3,
                attempt: 1,
                max_attempts: 3,
                bytes: 5,
                event,
            };
            NoProgress.on_part_event(&progress);
            TracingProgress.on_part_event(&progress);
        }
    }
}

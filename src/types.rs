//! Data structures shared by the transfer and unpack pipelines.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::TransferError;

/// Label written into semaphore files and notification mails.
pub const APPLICATION_LABEL: &str = "Exactly";

/// One transfer request: what to move, where to, and which optional
/// stages to run. Immutable once a pipeline run starts.
#[derive(Debug, Clone)]
pub struct TransferJob {
    /// Source files or directories to copy into the bag payload.
    pub sources: Vec<PathBuf>,
    /// Destination root; the bag is materialized at `destination/name`.
    pub destination: PathBuf,
    /// Transfer name. Must not collide with an existing sibling under
    /// the destination root.
    pub name: String,
    /// Identity of the operator running the transfer.
    pub operator: String,
    /// Fold the finished bag into a single `.zip` and delete the directory.
    pub serialize: bool,
    /// Upload the finished artifact to the configured FTP server.
    pub deliver: bool,
    /// Send a summary mail to the operator and configured recipients.
    pub notify: bool,
}

impl TransferJob {
    /// Checks the required fields before any stage runs.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.sources.is_empty() {
            return Err(TransferError::Validation(
                "at least one source path is required".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(TransferError::Validation(
                "please provide a transfer name".to_string(),
            ));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(TransferError::Validation(
                "please select a transfer destination".to_string(),
            ));
        }
        Ok(())
    }
}

/// Final status of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every requested stage succeeded.
    Completed,
    /// The local package is valid and complete, but the FTP upload failed.
    CompletedDeliveryFailed,
    /// A stage failed; partial output may remain on disk.
    Failed(String),
    /// The cancellation signal was observed at a stage boundary.
    Cancelled,
}

/// Pipeline stages, used to tag progress/status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preflight,
    Copy,
    Package,
    ExportMetadata,
    Serialize,
    Deliver,
    Notify,
    Finalize,
    Classify,
    Validate,
    Unbag,
    Settle,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Preflight => "preflight",
            Stage::Copy => "copy",
            Stage::Package => "package",
            Stage::ExportMetadata => "export-metadata",
            Stage::Serialize => "serialize",
            Stage::Deliver => "deliver",
            Stage::Notify => "notify",
            Stage::Finalize => "finalize",
            Stage::Classify => "classify",
            Stage::Validate => "validate",
            Stage::Unbag => "unbag",
            Stage::Settle => "settle",
        };
        f.write_str(name)
    }
}

/// Severity of a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Events emitted by a running pipeline. Consumers (CLI, tests) subscribe
/// through an [`EventSink`]; the pipeline never depends on a presentation
/// type.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A stage started or reported something notable.
    Stage {
        stage: Stage,
        message: String,
        severity: Severity,
    },
    /// The progress counter advanced. `done` never decreases and never
    /// exceeds `total`.
    Progress { done: u64, total: u64 },
}

/// Observer interface for pipeline events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<PipelineEvent> {
    fn emit(&self, event: PipelineEvent) {
        // A dropped receiver must not fail the pipeline.
        let _ = self.send(event);
    }
}

/// Sink that discards all events.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Cooperative cancellation flag, one per running job.
///
/// Setting the flag never interrupts a stage mid-flight; each pipeline
/// checks it at stage boundaries only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation before the next stage starts.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_without_sources_is_rejected() {
        let job = TransferJob {
            sources: vec![],
            destination: PathBuf::from("/tmp/dest"),
            name: "job".to_string(),
            operator: "op".to_string(),
            serialize: false,
            deliver: false,
            notify: false,
        };
        assert!(job.validate().is_err());
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}

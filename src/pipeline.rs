//! The transfer orchestration pipeline.
//!
//! Runs the ordered stage sequence (collision check, credential preflight,
//! copy, package, checksum fix, metadata export, optional serialize, deliver
//! and notify, finalize) on the caller's thread, emitting progress and status
//! events. Cancellation is observed at stage boundaries only; a stage that
//! has begun external side effects runs to completion or hard failure.

use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::bag::{self, BAG_INFO_TXT};
use crate::checksum::md5_file;
use crate::error::TransferError;
use crate::ftp::{remote_target, FtpClient, UploadKind};
use crate::fsutil;
use crate::mail::{MailSender, TransferSummary};
use crate::metadata;
use crate::semaphore::{self, SemaphoreRecord};
use crate::settings::Settings;
use crate::types::{
    CancelFlag, EventSink, Outcome, PipelineEvent, Severity, Stage, TransferJob,
};

/// Monotone progress counter bounded by a precomputed maximum. Owned by the
/// pipeline; observers only see its events.
struct Progress<'a> {
    done: u64,
    total: u64,
    events: &'a dyn EventSink,
}

impl<'a> Progress<'a> {
    fn new(total: u64, events: &'a dyn EventSink) -> Self {
        events.emit(PipelineEvent::Progress { done: 0, total });
        Self {
            done: 0,
            total,
            events,
        }
    }

    fn advance(&mut self, steps: u64) {
        self.done = (self.done + steps).min(self.total);
        self.events.emit(PipelineEvent::Progress {
            done: self.done,
            total: self.total,
        });
    }

    fn finish(&mut self) {
        self.done = self.total;
        self.events.emit(PipelineEvent::Progress {
            done: self.done,
            total: self.total,
        });
    }
}

/// Orchestrates one transfer job at a time.
pub struct TransferPipeline<'a> {
    settings: &'a Settings,
    events: &'a dyn EventSink,
    cancel: CancelFlag,
}

impl<'a> TransferPipeline<'a> {
    pub fn new(settings: &'a Settings, events: &'a dyn EventSink, cancel: CancelFlag) -> Self {
        Self {
            settings,
            events,
            cancel,
        }
    }

    /// Runs the job to an [`Outcome`]. Component errors are caught here, at
    /// the outermost boundary, and reported as `Failed`; partially copied or
    /// packaged data is deliberately left for the operator to clean up.
    pub fn run(&self, job: &TransferJob) -> Outcome {
        match self.execute(job) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.status(Stage::Finalize, &err.to_string(), Severity::Error);
                Outcome::Failed(err.to_string())
            }
        }
    }

    fn execute(&self, job: &TransferJob) -> Result<Outcome, TransferError> {
        job.validate()?;
        let target = job.destination.join(&job.name);

        // Name collision is a hard stop; no auto-renaming on transfer.
        if target.exists() {
            return Err(TransferError::Validation(format!(
                "a folder named '{}' already exists in the destination; please change the title",
                job.name
            )));
        }

        self.status(Stage::Preflight, "Verifying transfer...", Severity::Info);
        let recipients = self.preflight(job)?;
        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        // Precomputed progress maximum: payload files, two delivery steps,
        // one notification step.
        let mut total = 0u64;
        for source in &job.sources {
            total += fsutil::count_files(source)?;
        }
        if job.deliver {
            total += 2;
        }
        if job.notify {
            total += 1;
        }
        let mut progress = Progress::new(total, self.events);

        fs::create_dir_all(&job.destination)?;
        fs::create_dir_all(&target)?;

        self.status(Stage::Copy, "Transferring files...", Severity::Info);
        for source in &job.sources {
            let leaf = source.file_name().ok_or_else(|| {
                TransferError::Validation(format!(
                    "source {} has no usable name",
                    source.display()
                ))
            })?;
            fsutil::copy_tree(source, &target.join(leaf), &mut || progress.advance(1))?;
        }
        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        self.status(Stage::Package, "Preparing bag...", Severity::Info);
        let report = bag::make_bag_in_place(&target)?;
        metadata::append_bag_info(&target, &self.settings.metadata)?;
        let new_digest = md5_file(&target.join(BAG_INFO_TXT))?;
        bag::patch_tag_manifest(&target, BAG_INFO_TXT, &new_digest)?;

        self.status(Stage::ExportMetadata, "Writing metadata sidecar...", Severity::Info);
        metadata::write_bag_info_xml(&target)?;
        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let display_name = self.display_name(job);
        let display_target = self.display_target(job, &target);
        let ftp_target = self.ftp_target(job, &display_name);
        let record = SemaphoreRecord {
            operator: job.operator.clone(),
            transfer_name: display_name.clone(),
            target: display_target.clone(),
            ftp_target: ftp_target.clone(),
            payload_files: report.payload_files,
            payload_bytes: report.payload_bytes,
        };

        let artifact: PathBuf;
        if job.serialize {
            self.status(Stage::Serialize, "Serializing bag...", Severity::Info);
            // The semaphore must travel inside the archive, so it is written
            // before folding the bag.
            semaphore::write_success_semaphore(&target, &record)?;
            let zip_path = PathBuf::from(format!("{}.zip", target.display()));
            crate::serialize::archive_dir(&target, &zip_path, &job.name)?;
            fs::remove_dir_all(&target)?;
            artifact = zip_path;
        } else {
            artifact = target.clone();
        }
        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let mut delivery_failed = false;
        if job.deliver {
            self.status(Stage::Deliver, "Uploading data on FTP...", Severity::Info);
            // Settings may have changed on the server side since preflight.
            let ftp = self.settings.ftp.as_ref().ok_or_else(|| {
                TransferError::Credentials("FTP settings are missing".to_string())
            })?;
            let client = FtpClient::new(ftp);
            let kind = if job.serialize {
                UploadKind::File
            } else {
                UploadKind::Directory
            };
            if !client.validate_credentials() || !client.upload(&artifact, kind) {
                delivery_failed = true;
                self.status(
                    Stage::Deliver,
                    "FTP transfer failed; local transfer remains valid.",
                    Severity::Warn,
                );
            }
            progress.advance(2);
        }
        if self.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        if job.notify {
            self.status(
                Stage::Notify,
                "Preparing to send notification email(s)...",
                Severity::Info,
            );
            let mail = self.settings.mail.as_ref().ok_or_else(|| {
                TransferError::Credentials("mail settings are missing".to_string())
            })?;
            let sender = MailSender::new(mail);
            let summary = TransferSummary {
                transfer_name: display_name.clone(),
                target: display_target.clone(),
                ftp_target: ftp_target.clone(),
                operator: job.operator.clone(),
                payload_bytes: report.payload_bytes,
                payload_files: report.payload_files,
                delivery_failed,
            };
            for recipient in &recipients {
                if let Err(err) = sender.send_summary(recipient, &summary) {
                    warn!("notification to {} failed: {}", recipient, err);
                    self.status(
                        Stage::Notify,
                        &format!("Could not notify {}: {}", recipient, err),
                        Severity::Warn,
                    );
                }
            }
            progress.advance(1);
        }

        self.status(Stage::Finalize, "Session complete.", Severity::Info);
        if !job.serialize {
            semaphore::write_success_semaphore(&target, &record)?;
        }
        progress.finish();
        info!("transfer '{}' complete: {} files, {} bytes", job.name, report.payload_files, report.payload_bytes);

        Ok(if delivery_failed {
            Outcome::CompletedDeliveryFailed
        } else {
            Outcome::Completed
        })
    }

    /// Credential and recipient checks, all before any file is moved: a
    /// transfer that cannot be completed end-to-end should not start.
    fn preflight(&self, job: &TransferJob) -> Result<Vec<String>, TransferError> {
        let mut recipients = Vec::new();
        if job.notify {
            let mail = self.settings.mail.as_ref().ok_or_else(|| {
                TransferError::Credentials(
                    "email notification requested but no mail settings are configured".to_string(),
                )
            })?;
            if !MailSender::new(mail).validate() {
                return Err(TransferError::Credentials(
                    "credentials not valid; please update email settings".to_string(),
                ));
            }
            if !mail.username.is_empty() {
                recipients.push(mail.username.clone());
            }
            for recipient in &self.settings.recipients {
                if !recipients.contains(recipient) {
                    recipients.push(recipient.clone());
                }
            }
            if recipients.is_empty() {
                return Err(TransferError::Validation(
                    "please add at least one recipient".to_string(),
                ));
            }
        }
        if job.deliver {
            let ftp = self.settings.ftp.as_ref().ok_or_else(|| {
                TransferError::Credentials(
                    "FTP delivery requested but no FTP settings are configured".to_string(),
                )
            })?;
            if !FtpClient::new(ftp).validate_credentials() {
                return Err(TransferError::Credentials(
                    "credentials not valid; please update FTP settings".to_string(),
                ));
            }
        }
        Ok(recipients)
    }

    fn display_name(&self, job: &TransferJob) -> String {
        if job.serialize {
            format!("{}.zip", job.name)
        } else {
            job.name.clone()
        }
    }

    fn display_target(&self, job: &TransferJob, target: &std::path::Path) -> String {
        if job.serialize {
            format!("{}.zip", target.display())
        } else {
            target.display().to_string()
        }
    }

    fn ftp_target(&self, job: &TransferJob, display_name: &str) -> Option<String> {
        if !job.deliver {
            return None;
        }
        let destination = self
            .settings
            .ftp
            .as_ref()
            .map(|f| f.destination.as_str())
            .unwrap_or("");
        Some(remote_target(destination, display_name))
    }

    fn status(&self, stage: Stage, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!("[{}] {}", stage, message),
            _ => warn!("[{}] {}", stage, message),
        }
        self.events.emit(PipelineEvent::Stage {
            stage,
            message: message.to_string(),
            severity,
        });
    }
}

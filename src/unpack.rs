//! The unpack pipeline: restores a received bag (zipped or on disk) back
//! to a plain directory tree.
//!
//! A source is classified by its extension, staged into a hidden working
//! directory, validated against its manifests, and only then unbagged into
//! the destination. Failures before the final rename leave the destination
//! untouched apart from the removed staging directory.

use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::bag;
use crate::error::TransferError;
use crate::fsutil;
use crate::metadata;
use crate::serialize;
use crate::types::{CancelFlag, EventSink, Outcome, PipelineEvent, Severity, Stage};

/// One unpack request: a bag directory or `.zip` serialization, and the
/// directory its payload should land in.
#[derive(Debug, Clone)]
pub struct UnpackJob {
    pub source: PathBuf,
    pub destination: PathBuf,
}

pub struct UnpackPipeline<'a> {
    events: &'a dyn EventSink,
    cancel: CancelFlag,
}

impl<'a> UnpackPipeline<'a> {
    pub fn new(events: &'a dyn EventSink, cancel: CancelFlag) -> Self {
        Self { events, cancel }
    }

    pub fn run(&self, job: &UnpackJob) -> Outcome {
        match self.execute(job) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.status(Stage::Settle, &err.to_string(), Severity::Error);
                Outcome::Failed(err.to_string())
            }
        }
    }

    fn execute(&self, job: &UnpackJob) -> Result<Outcome, TransferError> {
        if !job.source.exists() {
            return Err(TransferError::Validation(format!(
                "source {} does not exist",
                job.source.display()
            )));
        }
        fs::create_dir_all(&job.destination)?;

        self.status(Stage::Classify, "Inspecting source...", Severity::Info);
        let archived = metadata::is_archive(&job.source);
        let stem = if archived {
            job.source.file_stem()
        } else {
            job.source.file_name()
        };
        let stem = stem
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TransferError::Validation(format!(
                    "source {} has no usable name",
                    job.source.display()
                ))
            })?;
        let final_name = next_available_name(&job.destination, &stem);
        if final_name != stem {
            self.status(
                Stage::Classify,
                &format!("'{}' already exists; unpacking as '{}'", stem, final_name),
                Severity::Warn,
            );
        }

        let staging = job.destination.join(format!(".exactly-stage-{}", final_name));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        let staged_bag = if archived {
            self.status(Stage::Unbag, "Extracting archive...", Severity::Info);
            serialize::extract_archive(&job.source, &staging)?;
            single_root(&staging)?.unwrap_or_else(|| staging.clone())
        } else {
            self.status(Stage::Unbag, "Staging bag copy...", Severity::Info);
            fsutil::copy_tree(&job.source, &staging, &mut || {})?;
            staging.clone()
        };
        if self.cancel.is_cancelled() {
            fs::remove_dir_all(&staging)?;
            return Ok(Outcome::Cancelled);
        }

        self.status(Stage::Validate, "Validating bag...", Severity::Info);
        if !bag::is_bag_structured(&staged_bag)? {
            fs::remove_dir_all(&staging)?;
            return Err(TransferError::InvalidBag(format!(
                "{} is not a bag",
                job.source.display()
            )));
        }
        let problems = bag::verify_valid(&staged_bag)?;
        if !problems.is_empty() {
            for problem in &problems {
                warn!("{}", problem);
            }
            fs::remove_dir_all(&staging)?;
            return Err(TransferError::InvalidBag(problems.join("; ")));
        }

        self.status(Stage::Unbag, "Restoring payload...", Severity::Info);
        let restored = bag::unbag(&staged_bag, &job.destination, &final_name)?;
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        self.status(Stage::Settle, "Syncing destination...", Severity::Info);
        settle(&job.destination)?;
        info!("unpacked '{}' to {}", stem, restored.display());
        Ok(Outcome::Completed)
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

/// First free name in `root`: `name`, then `name_1`, `name_2`, and so on.
pub fn next_available_name(root: &Path, name: &str) -> String {
    if !root.join(name).exists() {
        return name.to_string();
    }
    let mut counter = 1u32;
    loop {
        let candidate = format!("{}_{}", name, counter);
        if !root.join(&candidate).exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// If `root` holds exactly one directory entry (the usual layout of a
/// serialized bag), returns that entry.
fn single_root(root: &Path) -> Result<Option<PathBuf>, TransferError> {
    let mut entries = fs::read_dir(root)?;
    let first = match entries.next() {
        Some(entry) => entry?,
        None => return Ok(None),
    };
    if entries.next().is_some() || !first.path().is_dir() {
        return Ok(None);
    }
    Ok(Some(first.path()))
}

/// Flushes directory metadata so the restored tree is durably visible before
/// reporting completion.
fn settle(directory: &Path) -> Result<(), TransferError> {
    let handle = File::open(directory)?;
    handle.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::{DATA_DIR, MANIFEST};
    use crate::settings::Settings;
    use crate::types::{NullSink, TransferJob};

    fn build_bag(dir: &Path, name: &str) -> PathBuf {
        let source = dir.join("incoming");
        if !source.exists() {
            fs::create_dir_all(source.join("sub")).unwrap();
            fs::write(source.join("a.txt"), "alpha").unwrap();
            fs::write(source.join("sub/b.txt"), "beta").unwrap();
        }
        let job = TransferJob {
            sources: vec![source],
            destination: dir.join("bags"),
            name: name.to_string(),
            operator: "jordan".to_string(),
            serialize: false,
            deliver: false,
            notify: false,
        };
        let settings = Settings::default();
        let pipeline =
            crate::pipeline::TransferPipeline::new(&settings, &NullSink, CancelFlag::new());
        assert_eq!(pipeline.run(&job), Outcome::Completed);
        dir.join("bags").join(name)
    }

    #[test]
    fn next_name_suffixes_until_free() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_available_name(dir.path(), "records"), "records");
        fs::create_dir(dir.path().join("records")).unwrap();
        assert_eq!(next_available_name(dir.path(), "records"), "records_1");
        fs::create_dir(dir.path().join("records_1")).unwrap();
        assert_eq!(next_available_name(dir.path(), "records"), "records_2");
    }

    #[test]
    fn unpacks_bag_directory_to_plain_tree() {
        let dir = tempfile::tempdir().unwrap();
        let bag = build_bag(dir.path(), "records");
        let dest = dir.path().join("out");

        let job = UnpackJob {
            source: bag,
            destination: dest.clone(),
        };
        let pipeline = UnpackPipeline::new(&NullSink, CancelFlag::new());
        assert_eq!(pipeline.run(&job), Outcome::Completed);

        let restored = dest.join("records");
        assert!(restored.join("incoming/a.txt").is_file());
        assert!(restored.join("incoming/sub/b.txt").is_file());
        assert!(!restored.join(MANIFEST).exists());
        assert!(!restored.join(DATA_DIR).exists());
    }

    #[test]
    fn unpacks_zip_serialization() {
        let dir = tempfile::tempdir().unwrap();
        let bag = build_bag(dir.path(), "records");
        let zip = dir.path().join("records.zip");
        serialize::archive_dir(&bag, &zip, "records").unwrap();
        let dest = dir.path().join("out");

        let job = UnpackJob {
            source: zip,
            destination: dest.clone(),
        };
        let pipeline = UnpackPipeline::new(&NullSink, CancelFlag::new());
        assert_eq!(pipeline.run(&job), Outcome::Completed);
        assert!(dest.join("records/incoming/a.txt").is_file());
    }

    #[test]
    fn existing_destination_gets_suffixed_name() {
        let dir = tempfile::tempdir().unwrap();
        let bag = build_bag(dir.path(), "records");
        let dest = dir.path().join("out");
        fs::create_dir_all(dest.join("records")).unwrap();

        let job = UnpackJob {
            source: bag,
            destination: dest.clone(),
        };
        let pipeline = UnpackPipeline::new(&NullSink, CancelFlag::new());
        assert_eq!(pipeline.run(&job), Outcome::Completed);
        assert!(dest.join("records_1/incoming/a.txt").is_file());
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bag = build_bag(dir.path(), "records");
        fs::write(bag.join(DATA_DIR).join("incoming/a.txt"), "tampered").unwrap();
        let dest = dir.path().join("out");

        let job = UnpackJob {
            source: bag,
            destination: dest.clone(),
        };
        let pipeline = UnpackPipeline::new(&NullSink, CancelFlag::new());
        match pipeline.run(&job) {
            Outcome::Failed(reason) => assert!(reason.contains("a.txt")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(!dest.join("records").exists());
    }

    #[test]
    fn plain_directory_is_not_a_bag() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        fs::create_dir_all(&plain).unwrap();
        fs::write(plain.join("file.txt"), "no bag here").unwrap();

        let job = UnpackJob {
            source: plain,
            destination: dir.path().join("out"),
        };
        let pipeline = UnpackPipeline::new(&NullSink, CancelFlag::new());
        match pipeline.run(&job) {
            Outcome::Failed(reason) => assert!(reason.contains("not a bag")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }
}

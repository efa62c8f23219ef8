//! In-place bag creation, verification, recognition, and unbagging.
//!
//! Implements the narrow BagIt subset the pipelines consume: a `data/`
//! payload subtree, an MD5 payload manifest, a `bag-info.txt` metadata
//! file, and an MD5 tag manifest covering the bag's own metadata files.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::checksum::md5_file;
use crate::error::TransferError;
use crate::fsutil;

pub const BAGIT_TXT: &str = "bagit.txt";
pub const BAG_INFO_TXT: &str = "bag-info.txt";
pub const MANIFEST: &str = "manifest-md5.txt";
pub const TAG_MANIFEST: &str = "tagmanifest-md5.txt";
pub const DATA_DIR: &str = "data";

const BAGIT_DECLARATION: &str = "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n";

/// Payload statistics recorded while packaging, reported in the semaphore
/// file and notification mails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BagReport {
    pub payload_files: u64,
    pub payload_bytes: u64,
}

/// A completeness problem found while inspecting a candidate bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletenessError {
    /// `bagit.txt` is absent.
    MissingBagitDeclaration,
    /// `manifest-md5.txt` is absent.
    MissingPayloadManifest,
    /// A manifest entry has no file on disk.
    MissingPayloadFile(String),
    /// A payload file has no manifest entry.
    UntrackedPayloadFile(String),
    /// A tag-manifest entry has no file on disk.
    MissingTagFile(String),
}

impl fmt::Display for CompletenessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletenessError::MissingBagitDeclaration => {
                write!(f, "bag does not have {}", BAGIT_TXT)
            }
            CompletenessError::MissingPayloadManifest => {
                write!(f, "bag does not have any payload manifest")
            }
            CompletenessError::MissingPayloadFile(p) => {
                write!(f, "manifest lists missing payload file {}", p)
            }
            CompletenessError::UntrackedPayloadFile(p) => {
                write!(f, "payload file {} is not listed in the manifest", p)
            }
            CompletenessError::MissingTagFile(p) => {
                write!(f, "tag manifest lists missing file {}", p)
            }
        }
    }
}

/// Turns `target` into a bag in place: every existing entry moves under
/// `data/`, empty payload directories are pruned, and the declaration,
/// payload manifest, `bag-info.txt`, and tag manifest are written.
///
/// Returns the payload statistics derived from the manifest.
pub fn make_bag_in_place(target: &Path) -> Result<BagReport, TransferError> {
    let data = target.join(DATA_DIR);
    fs::create_dir_all(&data)?;

    // Move the copied entries under data/. read_dir is collected first so
    // the renames do not disturb iteration.
    let entries: Vec<PathBuf> = fs::read_dir(target)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.file_name().map(|n| n != DATA_DIR).unwrap_or(true))
        .collect();
    for entry in entries {
        let name = entry
            .file_name()
            .ok_or_else(|| TransferError::Validation("unnamed payload entry".to_string()))?;
        fs::rename(&entry, data.join(name))?;
    }

    // keep-empty-directories = false
    fsutil::prune_empty_dirs(&data)?;

    let mut report = BagReport {
        payload_files: 0,
        payload_bytes: 0,
    };
    let mut manifest = String::new();
    for entry in WalkDir::new(&data).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let digest = md5_file(entry.path())?;
        let relative = relative_slash_path(target, entry.path());
        manifest.push_str(&format!("{}  {}\n", digest, relative));
        report.payload_files += 1;
        report.payload_bytes += entry.metadata()?.len();
    }
    fs::write(target.join(MANIFEST), manifest)?;

    fs::write(target.join(BAGIT_TXT), BAGIT_DECLARATION)?;

    let bag_info = format!(
        "Bagging-Date: {}\nPayload-Oxum: {}.{}\n",
        chrono::Local::now().format("%Y-%m-%d"),
        report.payload_bytes,
        report.payload_files,
    );
    fs::write(target.join(BAG_INFO_TXT), bag_info)?;

    write_tag_manifest(target)?;
    Ok(report)
}

fn write_tag_manifest(bag: &Path) -> Result<(), TransferError> {
    let mut tag_manifest = String::new();
    for tag_file in [BAGIT_TXT, BAG_INFO_TXT, MANIFEST] {
        let digest = md5_file(&bag.join(tag_file))?;
        tag_manifest.push_str(&format!("{}  {}\n", digest, tag_file));
    }
    fs::write(bag.join(TAG_MANIFEST), tag_manifest)?;
    Ok(())
}

/// Rewrites the tag-manifest digest for `tag_name`, keyed by file name.
///
/// Used after `bag-info.txt` is augmented with operator metadata so the bag
/// stays self-consistent. Matching by name rather than by old digest avoids
/// corrupting an unrelated line that happens to carry the same digest.
pub fn patch_tag_manifest(
    bag: &Path,
    tag_name: &str,
    new_digest: &str,
) -> Result<(), TransferError> {
    let path = bag.join(TAG_MANIFEST);
    let contents = fs::read_to_string(&path)?;
    let mut out = String::with_capacity(contents.len());
    for line in contents.lines() {
        match parse_manifest_line(line) {
            Some((_, name)) if name == tag_name => {
                out.push_str(&format!("{}  {}\n", new_digest, tag_name));
            }
            _ => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    fs::write(&path, out)?;
    Ok(())
}

/// Reads a `digest  path` manifest into (digest, slash path) pairs.
pub fn read_manifest(path: &Path) -> Result<Vec<(String, String)>, TransferError> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .filter_map(parse_manifest_line)
        .map(|(d, p)| (d.to_string(), p.to_string()))
        .collect())
}

fn parse_manifest_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }
    let (digest, rest) = line.split_once(' ')?;
    Some((digest, rest.trim_start()))
}

/// Checks bag completeness: declaration and payload manifest present, every
/// manifest entry on disk, every payload file listed, every tag-manifest
/// entry on disk. Checksums are not verified here.
pub fn verify_complete(bag: &Path) -> Result<Vec<CompletenessError>, TransferError> {
    let mut errors = Vec::new();

    if !bag.join(BAGIT_TXT).is_file() {
        errors.push(CompletenessError::MissingBagitDeclaration);
    }

    let manifest_path = bag.join(MANIFEST);
    if !manifest_path.is_file() {
        errors.push(CompletenessError::MissingPayloadManifest);
    } else {
        let listed = read_manifest(&manifest_path)?;
        for (_, relative) in &listed {
            if !bag.join(relative).is_file() {
                errors.push(CompletenessError::MissingPayloadFile(relative.clone()));
            }
        }
        let data = bag.join(DATA_DIR);
        if data.is_dir() {
            for entry in WalkDir::new(&data) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = relative_slash_path(bag, entry.path());
                if !listed.iter().any(|(_, p)| *p == relative) {
                    errors.push(CompletenessError::UntrackedPayloadFile(relative));
                }
            }
        }
    }

    let tag_manifest_path = bag.join(TAG_MANIFEST);
    if tag_manifest_path.is_file() {
        for (_, tag_file) in read_manifest(&tag_manifest_path)? {
            if !bag.join(&tag_file).is_file() {
                errors.push(CompletenessError::MissingTagFile(tag_file));
            }
        }
    }

    Ok(errors)
}

/// Validates a bag: completeness plus checksum verification of every
/// payload-manifest and tag-manifest entry. Returns the collected problem
/// messages; an empty list means the bag is valid.
pub fn verify_valid(bag: &Path) -> Result<Vec<String>, TransferError> {
    let mut problems: Vec<String> = verify_complete(bag)?
        .into_iter()
        .map(|e| e.to_string())
        .collect();

    for manifest in [MANIFEST, TAG_MANIFEST] {
        let path = bag.join(manifest);
        if !path.is_file() {
            continue;
        }
        for (recorded, relative) in read_manifest(&path)? {
            let file = bag.join(&relative);
            if !file.is_file() {
                continue; // already reported by completeness
            }
            let actual = md5_file(&file)?;
            if actual != recorded {
                problems.push(format!(
                    "checksum mismatch for {}: recorded {}, computed {}",
                    relative, recorded, actual
                ));
            }
        }
    }

    Ok(problems)
}

/// Lightweight recognition check, usable before committing to a full
/// validation: a directory is only "not a bag" when its completeness errors
/// include a missing payload manifest or a missing bagit declaration. Any
/// other completeness error still counts as a (merely invalid) bag.
pub fn is_bag_structured(path: &Path) -> Result<bool, TransferError> {
    let errors = verify_complete(path)?;
    let not_a_bag = errors.iter().any(|e| {
        matches!(
            e,
            CompletenessError::MissingBagitDeclaration | CompletenessError::MissingPayloadManifest
        )
    });
    Ok(!not_a_bag)
}

/// Replaces the staged bag directory with its payload: `staged/data` moves
/// up to `destination_root/final_name`, and the bag metadata files are
/// discarded with the staged directory.
pub fn unbag(
    staged: &Path,
    destination_root: &Path,
    final_name: &str,
) -> Result<PathBuf, TransferError> {
    let data = staged.join(DATA_DIR);
    if !data.is_dir() {
        return Err(TransferError::InvalidBag(format!(
            "{} has no {} payload directory",
            staged.display(),
            DATA_DIR
        )));
    }

    let holding = destination_root.join(".exactly-unbag");
    if holding.exists() {
        fs::remove_dir_all(&holding)?;
    }
    fs::rename(&data, &holding)?;
    fs::remove_dir_all(staged)?;

    let final_path = destination_root.join(final_name);
    fs::rename(&holding, &final_path)?;
    Ok(final_path)
}

/// Relative path from `base` using forward slashes, as manifests expect.
fn relative_slash_path(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

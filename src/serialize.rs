//! Folding a directory tree into a single zip archive and the inverse.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::TransferError;

/// Folds `source` into a zip at `output`, prefixing every entry name with
/// `entry_prefix` so extraction reproduces one root directory.
///
/// The walk is depth-first and name-sorted so the archive layout is
/// deterministic. Only files become entries; directories are reconstructed
/// implicitly on extraction.
pub fn archive_dir(
    source: &Path,
    output: &Path,
    entry_prefix: &str,
) -> Result<(), TransferError> {
    let file = File::create(output)?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walked entry is under its root");
        let name = format!("{}/{}", entry_prefix, slash_join(relative));
        writer.start_file(name, options)?;
        let mut input = File::open(entry.path())?;
        io::copy(&mut input, &mut writer)?;
    }

    writer.finish()?;
    Ok(())
}

/// Unfolds `archive` into `output`, creating parent directories before
/// writing each file so entry order never matters. Existing files are
/// overwritten silently; entries escaping `output` are rejected.
pub fn extract_archive(archive: &Path, output: &Path) -> Result<(), TransferError> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file)?;
    fs::create_dir_all(output)?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let relative = sanitize_entry_path(entry.name())?;
        let destination = output.join(&relative);

        if entry.name().ends_with('/') {
            fs::create_dir_all(&destination)?;
            continue;
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&destination)?;
        io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

/// Rejects absolute entries and parent-directory escapes (zip-slip).
fn sanitize_entry_path(entry: &str) -> Result<PathBuf, TransferError> {
    let path = Path::new(entry);
    if path.is_absolute() {
        return Err(TransferError::Validation(format!(
            "archive entry '{}' may not be absolute",
            entry
        )));
    }
    let mut sanitized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir => {}
            _ => {
                return Err(TransferError::Validation(format!(
                    "archive entry '{}' contains invalid segments",
                    entry
                )))
            }
        }
    }
    Ok(sanitized)
}

fn slash_join(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_then_extract_round_trips_modulo_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("bag");
        fs::create_dir_all(src.join("data/sub")).unwrap();
        fs::write(src.join("bagit.txt"), "BagIt-Version: 0.97\n").unwrap();
        fs::write(src.join("data/a.txt"), "alpha").unwrap();
        fs::write(src.join("data/sub/b.bin"), vec![7u8; 4096]).unwrap();

        let zip_path = dir.path().join("bag.zip");
        archive_dir(&src, &zip_path, "mybag").unwrap();

        let out = dir.path().join("out");
        extract_archive(&zip_path, &out).unwrap();

        let root = out.join("mybag");
        assert_eq!(
            fs::read_to_string(root.join("bagit.txt")).unwrap(),
            "BagIt-Version: 0.97\n"
        );
        assert_eq!(fs::read_to_string(root.join("data/a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read(root.join("data/sub/b.bin")).unwrap(), vec![7u8; 4096]);
    }

    #[test]
    fn directories_are_not_emitted_as_entries() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/file"), "x").unwrap();

        let zip_path = dir.path().join("a.zip");
        archive_dir(&src, &zip_path, "p").unwrap();

        let mut zip = ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
        assert_eq!(zip.by_index(0).unwrap().name(), "p/nested/file");
    }

    #[test]
    fn escaping_entries_are_rejected() {
        assert!(sanitize_entry_path("../evil").is_err());
        assert!(sanitize_entry_path("/abs/evil").is_err());
        assert!(sanitize_entry_path("ok/./fine").is_ok());
    }
}

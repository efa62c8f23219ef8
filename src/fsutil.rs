//! Filesystem walks shared by the pipelines: copy, count, prune.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::TransferError;

/// Copies `source` (file or directory, recursively) to `dest`.
///
/// `dest` is the new entry itself, not its parent: copying `/a/photos` to
/// `/t/photos` reproduces the tree under `/t/photos`. `on_file` is invoked
/// once per copied file so the caller can advance its progress counter.
pub fn copy_tree(
    source: &Path,
    dest: &Path,
    on_file: &mut dyn FnMut(),
) -> Result<(), TransferError> {
    if source.is_file() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest)?;
        on_file();
        return Ok(());
    }

    for entry in WalkDir::new(source) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walked entry is under its root");
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            on_file();
        }
    }
    Ok(())
}

/// Counts regular files under `path` (1 if `path` is itself a file).
pub fn count_files(path: &Path) -> Result<u64, TransferError> {
    if path.is_file() {
        return Ok(1);
    }
    let mut count = 0u64;
    for entry in WalkDir::new(path) {
        if entry?.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

/// Removes empty directories under `root`, deepest first. `root` itself is
/// kept even when empty.
pub fn prune_empty_dirs(root: &Path) -> Result<(), TransferError> {
    let mut directories = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            directories.push(entry);
        }
    }

    directories.sort_by_key(walkdir::DirEntry::depth);
    directories.reverse();

    for entry in directories {
        let is_empty = entry
            .path()
            .read_dir()
            .map(|mut iter| iter.next().is_none())
            .unwrap_or(false);
        if is_empty {
            fs::remove_dir(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn copy_tree_reproduces_nested_layout() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write(&src.join("a.txt"), "a");
        write(&src.join("sub/b.txt"), "b");

        let dest = dir.path().join("dest");
        let mut copied = 0;
        copy_tree(&src, &dest, &mut || copied += 1).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "b");
    }

    #[test]
    fn copy_tree_handles_single_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("only.txt");
        fs::write(&src, "payload").unwrap();

        let dest = dir.path().join("out/only.txt");
        let mut copied = 0;
        copy_tree(&src, &dest, &mut || copied += 1).unwrap();

        assert_eq!(copied, 1);
        assert_eq!(fs::read_to_string(dest).unwrap(), "payload");
    }

    #[test]
    fn count_files_ignores_directories() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("x/a"), "1");
        write(&dir.path().join("x/y/b"), "2");
        fs::create_dir_all(dir.path().join("x/empty")).unwrap();
        assert_eq!(count_files(&dir.path().join("x")).unwrap(), 2);
    }

    #[test]
    fn prune_removes_nested_empty_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("empty/inner")).unwrap();
        write(&root.join("kept/file"), "x");

        prune_empty_dirs(&root).unwrap();

        assert!(!root.join("empty").exists());
        assert!(root.join("kept/file").exists());
        assert!(root.exists());
    }
}

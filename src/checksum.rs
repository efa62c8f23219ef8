//! Streamed MD5 digests for payload and tag files.

use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};

use crate::error::TransferError;

/// Computes the MD5 hash of a file as a lowercase hex string.
///
/// The file is read through a fixed 1 MiB buffer so arbitrarily large
/// payload files never have to fit in memory.
pub fn md5_file(path: &Path) -> Result<String, TransferError> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);

    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 1024 * 1024];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();
        // md5("hello world")
        assert_eq!(
            md5_file(&path).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn digest_is_deterministic_for_large_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        // Spans several read buffers.
        std::fs::write(&path, vec![0xabu8; 3 * 1024 * 1024 + 17]).unwrap();
        assert_eq!(md5_file(&path).unwrap(), md5_file(&path).unwrap());
    }
}

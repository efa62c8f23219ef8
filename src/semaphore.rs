//! The durable completion marker consulted by downstream archival staff.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::TransferError;
use crate::types::APPLICATION_LABEL;

/// File name of the success marker inside the final target.
pub const SEMAPHORE_FILE: &str = "TransferComplete.txt";

/// Fields recorded in the success semaphore, fixed order.
#[derive(Debug, Clone)]
pub struct SemaphoreRecord {
    pub operator: String,
    /// Transfer name, already `.zip`-suffixed when serialized.
    pub transfer_name: String,
    /// Local target path, already `.zip`-suffixed when serialized.
    pub target: String,
    /// Remote path, present when FTP delivery was requested.
    pub ftp_target: Option<String>,
    pub payload_files: u64,
    pub payload_bytes: u64,
}

/// Writes `TransferComplete.txt` into `directory`, recording the completed
/// transfer independently of any in-process status.
pub fn write_success_semaphore(
    directory: &Path,
    record: &SemaphoreRecord,
) -> Result<PathBuf, TransferError> {
    let mut contents = format!(
        "Transfer completed: {}\nTransfer name: {}\nTarget: {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        record.transfer_name,
        record.target,
    );
    if let Some(ftp_target) = &record.ftp_target {
        contents.push_str(&format!("FTP Target: {}\n", ftp_target));
    }
    contents.push_str(&format!(
        "Application used: {}\nUser: {}\nTotal File count: {}\nTotal Bytes: {}\n",
        APPLICATION_LABEL, record.operator, record.payload_files, record.payload_bytes,
    ));

    let path = directory.join(SEMAPHORE_FILE);
    fs::write(&path, contents)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphore_records_fields_in_fixed_order() {
        let dir = tempfile::tempdir().unwrap();
        let record = SemaphoreRecord {
            operator: "jordan".to_string(),
            transfer_name: "records".to_string(),
            target: "/archive/records".to_string(),
            ftp_target: None,
            payload_files: 3,
            payload_bytes: 14,
        };
        let path = write_success_semaphore(dir.path(), &record).unwrap();

        let contents = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert!(lines[0].starts_with("Transfer completed: "));
        assert_eq!(lines[1], "Transfer name: records");
        assert_eq!(lines[2], "Target: /archive/records");
        assert_eq!(lines[3], "Application used: Exactly");
        assert_eq!(lines[4], "User: jordan");
        assert_eq!(lines[5], "Total File count: 3");
        assert_eq!(lines[6], "Total Bytes: 14");
    }

    #[test]
    fn ftp_target_line_appears_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let record = SemaphoreRecord {
            operator: "jordan".to_string(),
            transfer_name: "records.zip".to_string(),
            target: "/archive/records.zip".to_string(),
            ftp_target: Some("/incoming/records.zip".to_string()),
            payload_files: 3,
            payload_bytes: 14,
        };
        let path = write_success_semaphore(dir.path(), &record).unwrap();
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains("FTP Target: /incoming/records.zip\n"));
    }
}

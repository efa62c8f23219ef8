//! FTP delivery client: credential validation and file/directory upload.
//!
//! Failures are logged and reported as `false`, never propagated past this
//! boundary; the pipeline decides whether that is terminal or soft.

use std::fs::File;
use std::path::Path;

use suppaftp::types::FileType;
use suppaftp::{FtpStream, Mode};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Data-connection mode requested by the server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FtpMode {
    Active,
    #[default]
    Passive,
}

impl FtpMode {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("active") {
            FtpMode::Active
        } else {
            FtpMode::Passive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FtpMode::Active => "active",
            FtpMode::Passive => "passive",
        }
    }
}

/// FTP server settings, an immutable snapshot taken at job start.
#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub port: u16,
    pub mode: FtpMode,
    /// Remote destination prefix uploads are placed under.
    pub destination: String,
}

/// What is being uploaded, which decides the remote layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// A single serialized archive file.
    File,
    /// A directory tree, mirrored remotely.
    Directory,
}

/// Joins the configured destination prefix with a transfer leaf name the
/// way it appears in semaphore files and notification mails: absolute,
/// single separator.
pub fn remote_target(destination: &str, leaf: &str) -> String {
    let mut prefix = destination.to_string();
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    if prefix.ends_with('/') {
        format!("{}{}", prefix, leaf)
    } else {
        format!("{}/{}", prefix, leaf)
    }
}

/// Thin client over one FTP server configuration.
pub struct FtpClient<'a> {
    config: &'a FtpConfig,
}

impl<'a> FtpClient<'a> {
    pub fn new(config: &'a FtpConfig) -> Self {
        Self { config }
    }

    fn connect(&self) -> Result<FtpStream, suppaftp::FtpError> {
        let mut stream =
            FtpStream::connect(format!("{}:{}", self.config.host, self.config.port))?;
        stream.login(&self.config.username, &self.config.password)?;
        Ok(stream)
    }

    /// Full authentication round trip: connect, login, quit. A TCP-level
    /// check alone would not catch rejected credentials.
    pub fn validate_credentials(&self) -> bool {
        if self.config.host.is_empty() || self.config.username.is_empty() {
            return false;
        }
        match self.connect() {
            Ok(mut stream) => {
                let _ = stream.quit();
                true
            }
            Err(err) => {
                warn!("FTP credential check failed for {}: {}", self.config.host, err);
                false
            }
        }
    }

    /// Uploads `local` to the configured destination, as a single file or a
    /// mirrored directory tree. Returns `false` on any failure.
    pub fn upload(&self, local: &Path, kind: UploadKind) -> bool {
        match self.try_upload(local, kind) {
            Ok(()) => {
                info!("uploaded {} to {}", local.display(), self.config.host);
                true
            }
            Err(err) => {
                warn!("FTP upload of {} failed: {}", local.display(), err);
                false
            }
        }
    }

    fn try_upload(&self, local: &Path, kind: UploadKind) -> Result<(), suppaftp::FtpError> {
        let mut stream = self.connect()?;
        stream.set_mode(match self.config.mode {
            FtpMode::Active => Mode::Active,
            FtpMode::Passive => Mode::Passive,
        });
        stream.transfer_type(FileType::Binary)?;

        let leaf = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let remote_root = remote_target(&self.config.destination, &leaf);

        let result = match kind {
            UploadKind::File => self.put_file(&mut stream, local, &remote_root),
            UploadKind::Directory => self.put_tree(&mut stream, local, &remote_root),
        };
        let _ = stream.quit();
        result
    }

    fn put_file(
        &self,
        stream: &mut FtpStream,
        local: &Path,
        remote: &str,
    ) -> Result<(), suppaftp::FtpError> {
        let mut reader = File::open(local).map_err(suppaftp::FtpError::ConnectionError)?;
        stream.put_file(remote, &mut reader)?;
        Ok(())
    }

    fn put_tree(
        &self,
        stream: &mut FtpStream,
        local: &Path,
        remote_root: &str,
    ) -> Result<(), suppaftp::FtpError> {
        stream.mkdir(remote_root)?;
        let walk = WalkDir::new(local).min_depth(1).sort_by_file_name();
        for entry in walk {
            let entry = entry.map_err(|e| {
                suppaftp::FtpError::ConnectionError(e.into())
            })?;
            let relative = entry
                .path()
                .strip_prefix(local)
                .expect("walked entry is under its root");
            let remote = format!(
                "{}/{}",
                remote_root,
                relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            );
            if entry.file_type().is_dir() {
                stream.mkdir(&remote)?;
            } else {
                self.put_file(stream, entry.path(), &remote)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_target_normalizes_separators() {
        assert_eq!(remote_target("incoming", "bag"), "/incoming/bag");
        assert_eq!(remote_target("/incoming/", "bag"), "/incoming/bag");
        assert_eq!(remote_target("/incoming", "bag.zip"), "/incoming/bag.zip");
    }

    #[test]
    fn unroutable_server_fails_validation() {
        let config = FtpConfig {
            host: "127.0.0.1".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            port: 1, // nothing listens here
            mode: FtpMode::Passive,
            destination: "/incoming".to_string(),
        };
        assert!(!FtpClient::new(&config).validate_credentials());
    }

    #[test]
    fn empty_host_fails_validation_without_connecting() {
        let config = FtpConfig {
            host: String::new(),
            username: "user".to_string(),
            password: "pass".to_string(),
            port: 21,
            mode: FtpMode::Active,
            destination: String::new(),
        };
        assert!(!FtpClient::new(&config).validate_credentials());
    }
}

//! Error types for transfer and unpack operations.

use std::io;
use thiserror::Error;

/// Errors that can occur during transfer and unpack operations.
#[derive(Error, Debug)]
pub enum TransferError {
    /// I/O error during file operations.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Directory walk error (unreadable entry, symlink loop).
    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    /// Zip serialization/extraction error.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// XML read/write error in sidecars or settings files.
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    /// A job precondition failed (name collision, missing fields, bad input).
    #[error("{0}")]
    Validation(String),

    /// Mail or FTP credentials were rejected before any file was moved.
    #[error("{0}")]
    Credentials(String),

    /// The staged input is not a valid bag.
    #[error("invalid bag: {0}")]
    InvalidBag(String),

    /// Mail composition or transport failure.
    #[error("mail failure: {0}")]
    Mail(String),
}

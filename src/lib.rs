//! Exactly - BagIt packaging and delivery for digital transfers
//!
//! This library packages source directories into BagIt bags with MD5
//! manifests, optionally serializes them to zip, delivers them over FTP,
//! and notifies recipients by email. It also restores received bags back
//! to plain directory trees after validating them.
//!
//! # Features
//!
//! - **BagIt Packaging**: In-place bag creation with payload and tag manifests
//! - **MD5 Verification**: Every payload and tag file is checksummed
//! - **Zip Serialization**: Optional single-file archive of the finished bag
//! - **FTP Delivery**: Active or passive mode upload of the bag or archive
//! - **Email Notification**: Transfer summaries sent to configured recipients
//! - **Unpacking**: Validate-then-restore of received bags, zipped or not
//!
//! # Example
//!
//! ```no_run
//! use exactly::{CancelFlag, NullSink, Settings, TransferJob, TransferPipeline};
//!
//! let job = TransferJob {
//!     sources: vec!["/data/photos".into()],
//!     destination: "/archive".into(),
//!     name: "photos-2026".to_string(),
//!     operator: "jordan".to_string(),
//!     serialize: false,
//!     deliver: false,
//!     notify: false,
//! };
//!
//! let settings = Settings::default();
//! let pipeline = TransferPipeline::new(&settings, &NullSink, CancelFlag::new());
//! let outcome = pipeline.run(&job);
//! println!("{:?}", outcome);
//! ```

pub mod bag;
pub mod checksum;
pub mod error;
pub mod fsutil;
pub mod ftp;
pub mod mail;
pub mod metadata;
pub mod pipeline;
pub mod semaphore;
pub mod serialize;
pub mod settings;
pub mod types;
pub mod unpack;

pub use error::TransferError;
pub use ftp::{FtpConfig, FtpMode};
pub use mail::MailConfig;
pub use pipeline::TransferPipeline;
pub use settings::{export_settings, import_settings, Settings};
pub use types::{CancelFlag, EventSink, NullSink, Outcome, PipelineEvent, Severity, Stage, TransferJob};
pub use unpack::{UnpackJob, UnpackPipeline};

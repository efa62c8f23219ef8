//! Summary-mail notifier over SMTP.

use chrono::Local;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::warn;

use crate::error::TransferError;
use crate::types::APPLICATION_LABEL;

/// SMTP connection security requested by the server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MailProtocol {
    /// STARTTLS upgrade on the submission port.
    #[default]
    Tls,
    /// Implicit TLS ("SMTPS").
    Ssl,
}

impl MailProtocol {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("ssl") {
            MailProtocol::Ssl
        } else {
            MailProtocol::Tls
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MailProtocol::Tls => "tls",
            MailProtocol::Ssl => "ssl",
        }
    }
}

/// Mail server settings, an immutable snapshot taken at job start.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub host: String,
    /// Operator mail account; doubles as the sender address.
    pub username: String,
    pub password: String,
    pub port: u16,
    pub protocol: MailProtocol,
}

/// Everything a summary message reports about one finished transfer.
#[derive(Debug, Clone)]
pub struct TransferSummary {
    /// Transfer name, already `.zip`-suffixed when serialized.
    pub transfer_name: String,
    /// Local target path, already `.zip`-suffixed when serialized.
    pub target: String,
    /// Remote path, present when FTP delivery was requested.
    pub ftp_target: Option<String>,
    pub operator: String,
    pub payload_bytes: u64,
    pub payload_files: u64,
    /// Set when the upload soft-failed; adds a note to the body.
    pub delivery_failed: bool,
}

const SUBJECT: &str = "Exactly Digital Transfer";

/// Composes and sends one summary message per recipient.
pub struct MailSender<'a> {
    config: &'a MailConfig,
}

impl<'a> MailSender<'a> {
    pub fn new(config: &'a MailConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<SmtpTransport, TransferError> {
        let builder = match self.config.protocol {
            MailProtocol::Tls => SmtpTransport::starttls_relay(&self.config.host),
            MailProtocol::Ssl => SmtpTransport::relay(&self.config.host),
        }
        .map_err(|e| TransferError::Mail(e.to_string()))?;
        Ok(builder
            .port(self.config.port)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .build())
    }

    /// Authenticated no-op connection to the mail server. Returns `false`
    /// on any connect or authentication failure.
    pub fn validate(&self) -> bool {
        if self.config.username.is_empty() {
            return false;
        }
        let transport = match self.transport() {
            Ok(t) => t,
            Err(err) => {
                warn!("mail transport setup failed: {}", err);
                return false;
            }
        };
        match transport.test_connection() {
            Ok(ok) => ok,
            Err(err) => {
                warn!(
                    "mail credential check failed for {}: {}",
                    self.config.host, err
                );
                false
            }
        }
    }

    /// Sends one summary message to `recipient`.
    pub fn send_summary(
        &self,
        recipient: &str,
        summary: &TransferSummary,
    ) -> Result<(), TransferError> {
        let from: Mailbox = self
            .config
            .username
            .parse()
            .map_err(|_| TransferError::Mail(format!("invalid sender address {}", self.config.username)))?;
        let to: Mailbox = recipient
            .parse()
            .map_err(|_| TransferError::Mail(format!("invalid recipient address {}", recipient)))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(SUBJECT)
            .body(compose_body(summary))
            .map_err(|e| TransferError::Mail(e.to_string()))?;

        self.transport()?
            .send(&message)
            .map_err(|e| TransferError::Mail(e.to_string()))?;
        Ok(())
    }
}

/// The fixed-order summary body shared by every recipient.
pub fn compose_body(summary: &TransferSummary) -> String {
    let mut body = format!(
        "Transfer completed at: {}\nTransfer Name: {}\nTarget: {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        summary.transfer_name,
        summary.target,
    );
    if let Some(ftp_target) = &summary.ftp_target {
        body.push_str(&format!("FTP Target: {}\n", ftp_target));
    }
    body.push_str(&format!(
        "Application Used: {}\nUser: {}\nTransfer Size: {} bytes\nFiles count: {}\n",
        APPLICATION_LABEL, summary.operator, summary.payload_bytes, summary.payload_files,
    ));
    if summary.delivery_failed {
        body.push_str("FTP transfer failed.\n");
    }
    body
}

//! Settings snapshots and the `<Exactly>` configuration XML.
//!
//! Persistent storage is a collaborator, not a concern of the pipelines:
//! at job start the settings file is loaded into an immutable [`Settings`]
//! snapshot and passed in. Import replaces the whole snapshot; export
//! writes the same shape back.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::warn;

use crate::error::TransferError;
use crate::ftp::{FtpConfig, FtpMode};
use crate::mail::{MailConfig, MailProtocol};
use crate::metadata::{sanitize_label, MetadataField};

/// Immutable configuration snapshot handed to a pipeline at job start.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Operator-supplied bag-info labels, appended during packaging.
    pub metadata: Vec<MetadataField>,
    /// Configured notification recipients (the operator is added on top).
    pub recipients: Vec<String>,
    pub ftp: Option<FtpConfig>,
    pub mail: Option<MailConfig>,
    /// Default for the job's notify flag.
    pub mail_notifications: bool,
}

/// Result of an import: the replacement snapshot plus collected warnings
/// (skipped recipients and the like) that did not abort the import.
#[derive(Debug)]
pub struct ImportOutcome {
    pub settings: Settings,
    pub warnings: Vec<String>,
}

/// Basic shape check for a recipient address: local part, one `@`, dotted
/// domain, no whitespace.
pub fn is_valid_email(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    // split_once splits at the first @, so a second one lands in the domain.
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    if address.contains(char::is_whitespace) {
        return false;
    }
    let Some((_, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !tld.is_empty() && domain.split('.').all(|part| !part.is_empty())
}

fn obfuscate(password: &str) -> String {
    BASE64.encode(password.as_bytes())
}

fn deobfuscate(stored: &str) -> String {
    match BASE64.decode(stored.as_bytes()) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| stored.to_string()),
        Err(_) => {
            warn!("stored password is not base64; using it verbatim");
            stored.to_string()
        }
    }
}

/// Reads an `<Exactly>` settings file, replacing every collection.
/// Recipients failing the email pattern check are skipped with a collected
/// warning rather than aborting the import.
pub fn import_settings(path: &Path) -> Result<ImportOutcome, TransferError> {
    let mut reader = Reader::from_file(path)?;
    reader.trim_text(true);

    let mut settings = Settings::default();
    let mut warnings = Vec::new();

    // Scratch fields for the FTP and configurations sections.
    let mut ftp_fields: Vec<(String, String)> = Vec::new();
    let mut mail_fields: Vec<(String, String)> = Vec::new();

    let mut stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Event::Empty(e) => {
                // An empty element is a present-but-blank field.
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                stack.push(name);
                record_field(
                    &stack,
                    "",
                    &mut settings,
                    &mut warnings,
                    &mut ftp_fields,
                    &mut mail_fields,
                );
                stack.pop();
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(e) => {
                let value = e.unescape()?.into_owned();
                record_field(
                    &stack,
                    &value,
                    &mut settings,
                    &mut warnings,
                    &mut ftp_fields,
                    &mut mail_fields,
                );
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !ftp_fields.is_empty() {
        settings.ftp = Some(ftp_from_fields(&ftp_fields));
    }
    if !mail_fields.is_empty() {
        let (mail, notifications) = mail_from_fields(&mail_fields);
        settings.mail = Some(mail);
        settings.mail_notifications = notifications;
    }

    Ok(ImportOutcome { settings, warnings })
}

fn record_field(
    stack: &[String],
    value: &str,
    settings: &mut Settings,
    warnings: &mut Vec<String>,
    ftp_fields: &mut Vec<(String, String)>,
    mail_fields: &mut Vec<(String, String)>,
) {
    let [root, section, field] = stack else {
        return;
    };
    if root != "Exactly" {
        return;
    }
    match section.as_str() {
        "Metadata" => settings.metadata.push(MetadataField {
            label: field.replace('-', " "),
            value: value.to_string(),
        }),
        "Recipients" => {
            if field == "Email" && !value.is_empty() {
                if is_valid_email(value) {
                    settings.recipients.push(value.to_string());
                } else {
                    warnings.push(format!(
                        "can't save {} because of invalid email format",
                        value
                    ));
                }
            }
        }
        "FTP" => ftp_fields.push((field.clone(), value.to_string())),
        "configurations" => mail_fields.push((field.clone(), value.to_string())),
        _ => {}
    }
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> &'a str {
    fields
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
        .unwrap_or("")
}

fn ftp_from_fields(fields: &[(String, String)]) -> FtpConfig {
    FtpConfig {
        host: field(fields, "Host").to_string(),
        username: field(fields, "Username").to_string(),
        password: deobfuscate(field(fields, "Password")),
        port: field(fields, "Port").parse().unwrap_or(21),
        mode: FtpMode::parse(field(fields, "Mode")),
        destination: field(fields, "Destination").to_string(),
    }
}

fn mail_from_fields(fields: &[(String, String)]) -> (MailConfig, bool) {
    let config = MailConfig {
        host: field(fields, "Server-Name").to_string(),
        username: field(fields, "Username").to_string(),
        password: deobfuscate(field(fields, "Password")),
        port: field(fields, "Port").parse().unwrap_or(587),
        protocol: MailProtocol::parse(field(fields, "Protocol")),
    };
    let notifications = field(fields, "Email-Notification") == "true";
    (config, notifications)
}

/// Writes a settings snapshot as an `<Exactly>` XML file.
pub fn export_settings(settings: &Settings, path: &Path) -> Result<(), TransferError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Start(BytesStart::new("Exactly")))?;

    writer.write_event(Event::Start(BytesStart::new("Metadata")))?;
    for entry in &settings.metadata {
        let element = sanitize_label(&entry.label);
        if element.is_empty() {
            continue;
        }
        write_text_element(&mut writer, &element, &entry.value)?;
    }
    writer.write_event(Event::End(BytesEnd::new("Metadata")))?;

    writer.write_event(Event::Start(BytesStart::new("Recipients")))?;
    for recipient in &settings.recipients {
        write_text_element(&mut writer, "Email", recipient)?;
    }
    writer.write_event(Event::End(BytesEnd::new("Recipients")))?;

    writer.write_event(Event::Start(BytesStart::new("FTP")))?;
    let ftp = settings.ftp.clone().unwrap_or(FtpConfig {
        host: String::new(),
        username: String::new(),
        password: String::new(),
        port: 21,
        mode: FtpMode::Passive,
        destination: String::new(),
    });
    write_text_element(&mut writer, "Host", &ftp.host)?;
    write_text_element(&mut writer, "Username", &ftp.username)?;
    let ftp_password = if ftp.password.is_empty() {
        String::new()
    } else {
        obfuscate(&ftp.password)
    };
    write_text_element(&mut writer, "Password", &ftp_password)?;
    write_text_element(&mut writer, "Port", &ftp.port.to_string())?;
    write_text_element(&mut writer, "Mode", ftp.mode.as_str())?;
    write_text_element(&mut writer, "Destination", &ftp.destination)?;
    writer.write_event(Event::End(BytesEnd::new("FTP")))?;

    writer.write_event(Event::Start(BytesStart::new("configurations")))?;
    let mail = settings.mail.clone().unwrap_or(MailConfig {
        host: String::new(),
        username: String::new(),
        password: String::new(),
        port: 587,
        protocol: MailProtocol::Tls,
    });
    write_text_element(&mut writer, "Server-Name", &mail.host)?;
    write_text_element(&mut writer, "Username", &mail.username)?;
    let mail_password = if mail.password.is_empty() {
        String::new()
    } else {
        obfuscate(&mail.password)
    };
    write_text_element(&mut writer, "Password", &mail_password)?;
    write_text_element(&mut writer, "Port", &mail.port.to_string())?;
    write_text_element(&mut writer, "Protocol", mail.protocol.as_str())?;
    write_text_element(
        &mut writer,
        "Email-Notification",
        if settings.mail_notifications {
            "true"
        } else {
            "false"
        },
    )?;
    writer.write_event(Event::End(BytesEnd::new("configurations")))?;

    writer.write_event(Event::End(BytesEnd::new("Exactly")))?;

    fs::write(path, writer.into_inner())?;
    Ok(())
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &str,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    if !value.is_empty() {
        writer.write_event(Event::Text(BytesText::new(value)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_pattern_check() {
        assert!(is_valid_email("user@example.org"));
        assert!(is_valid_email("first.last+tag@mail.example.co"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("user@nodot"));
        assert!(!is_valid_email("user@@example.org"));
        assert!(!is_valid_email("user@other@example.org"));
        assert!(!is_valid_email("user@example.org@"));
        assert!(!is_valid_email("user name@example.org"));
        assert!(!is_valid_email("user@example."));
    }

    #[test]
    fn export_then_import_round_trips_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exactly.xml");

        let settings = Settings {
            metadata: vec![MetadataField {
                label: "Source Organization".to_string(),
                value: "AV Preserve".to_string(),
            }],
            recipients: vec!["archivist@example.org".to_string()],
            ftp: Some(FtpConfig {
                host: "ftp.example.org".to_string(),
                username: "uploader".to_string(),
                password: "s3cret".to_string(),
                port: 2121,
                mode: FtpMode::Active,
                destination: "/incoming".to_string(),
            }),
            mail: Some(MailConfig {
                host: "smtp.example.org".to_string(),
                username: "operator@example.org".to_string(),
                password: "hunter2".to_string(),
                port: 465,
                protocol: MailProtocol::Ssl,
            }),
            mail_notifications: true,
        };
        export_settings(&settings, &path).unwrap();

        // Passwords are not stored as plaintext.
        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("s3cret"));
        assert!(!raw.contains("hunter2"));

        let imported = import_settings(&path).unwrap();
        assert!(imported.warnings.is_empty());
        let got = imported.settings;
        assert_eq!(got.metadata.len(), 1);
        assert_eq!(got.metadata[0].label, "Source Organization");
        assert_eq!(got.recipients, vec!["archivist@example.org".to_string()]);

        let ftp = got.ftp.unwrap();
        assert_eq!(ftp.host, "ftp.example.org");
        assert_eq!(ftp.password, "s3cret");
        assert_eq!(ftp.port, 2121);
        assert_eq!(ftp.mode, FtpMode::Active);

        let mail = got.mail.unwrap();
        assert_eq!(mail.username, "operator@example.org");
        assert_eq!(mail.password, "hunter2");
        assert_eq!(mail.protocol, MailProtocol::Ssl);
        assert!(got.mail_notifications);
    }

    #[test]
    fn invalid_recipient_is_skipped_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exactly.xml");
        fs::write(
            &path,
            "<Exactly>\
               <Metadata/>\
               <Recipients>\
                 <Email>good@example.org</Email>\
                 <Email>not-an-address</Email>\
                 <Email>twice@@example.org</Email>\
               </Recipients>\
             </Exactly>",
        )
        .unwrap();

        let imported = import_settings(&path).unwrap();
        assert_eq!(
            imported.settings.recipients,
            vec!["good@example.org".to_string()]
        );
        assert_eq!(imported.warnings.len(), 2);
        assert!(imported.warnings[0].contains("not-an-address"));
        assert!(imported.warnings[1].contains("twice@@example.org"));
    }
}

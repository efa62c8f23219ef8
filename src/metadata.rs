//! Bag-info augmentation and the human-readable XML sidecar.

use std::fs;
use std::io::Write as _;
use std::path::Path;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::bag::BAG_INFO_TXT;
use crate::error::TransferError;

/// Name of the XML sidecar mirroring `bag-info.txt`.
pub const BAG_INFO_XML: &str = "bag-info.xml";

/// Characters stripped from labels when they become XML element names.
const RESERVED: &[char] = &[
    '<', '>', '&', '"', '\\', '!', '#', '$', '%', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    ':', ';', '=', '?', '@', '[', ']', '^', '`', '{', '|', '}', '~',
];

/// One operator-supplied metadata label/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataField {
    pub label: String,
    pub value: String,
}

/// Appends `Label: Value` lines to the bag's `bag-info.txt`.
///
/// The caller is responsible for re-digesting the file and patching the tag
/// manifest afterwards so the bag stays self-consistent.
pub fn append_bag_info(bag: &Path, fields: &[MetadataField]) -> Result<(), TransferError> {
    if fields.is_empty() {
        return Ok(());
    }
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(bag.join(BAG_INFO_TXT))?;
    for field in fields {
        writeln!(file, "{}: {}", field.label, field.value)?;
    }
    Ok(())
}

/// Turns a bag-info label into an XML element name: reserved markup-unsafe
/// characters are stripped and spaces become hyphens.
pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| !RESERVED.contains(c))
        .map(|c| if c == ' ' { '-' } else { c })
        .collect()
}

/// Writes the `bag-info.xml` sidecar next to `bag-info.txt`: one root
/// element with one child per label, element text carrying the raw value.
pub fn write_bag_info_xml(bag: &Path) -> Result<(), TransferError> {
    let contents = fs::read_to_string(bag.join(BAG_INFO_TXT))?;

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Start(BytesStart::new("transfer_metadata")))?;
    for line in contents.lines() {
        let Some((label, value)) = line.split_once(": ") else {
            continue;
        };
        let element = sanitize_label(label);
        if element.is_empty() {
            continue;
        }
        writer.write_event(Event::Start(BytesStart::new(element.as_str())))?;
        writer.write_event(Event::Text(BytesText::new(value)))?;
        writer.write_event(Event::End(BytesEnd::new(element.as_str())))?;
    }
    writer.write_event(Event::End(BytesEnd::new("transfer_metadata")))?;

    fs::write(bag.join(BAG_INFO_XML), writer.into_inner())?;
    Ok(())
}

/// True when the path looks like a serialized bag rather than a directory.
pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_reserved_and_hyphenates_spaces() {
        assert_eq!(sanitize_label("Source Organization"), "Source-Organization");
        assert_eq!(sanitize_label("Contact: E-mail!"), "Contact-Email");
        assert_eq!(sanitize_label("Plain"), "Plain");
    }

    #[test]
    fn append_then_sidecar_mirrors_all_labels() {
        let dir = tempfile::tempdir().unwrap();
        let bag = dir.path();
        fs::write(bag.join(BAG_INFO_TXT), "Payload-Oxum: 10.2\n").unwrap();

        append_bag_info(
            bag,
            &[
                MetadataField {
                    label: "Source Organization".to_string(),
                    value: "AV Preserve".to_string(),
                },
                MetadataField {
                    label: "Contact Name".to_string(),
                    value: "Jordan".to_string(),
                },
            ],
        )
        .unwrap();
        write_bag_info_xml(bag).unwrap();

        let text = fs::read_to_string(bag.join(BAG_INFO_TXT)).unwrap();
        assert!(text.contains("Source Organization: AV Preserve"));

        let xml = fs::read_to_string(bag.join(BAG_INFO_XML)).unwrap();
        assert!(xml.starts_with("<transfer_metadata>"));
        assert!(xml.contains("<Source-Organization>AV Preserve</Source-Organization>"));
        assert!(xml.contains("<Contact-Name>Jordan</Contact-Name>"));
        assert!(xml.contains("<PayloadOxum>10.2</PayloadOxum>"));
    }

    #[test]
    fn archive_detection_is_case_insensitive() {
        assert!(is_archive(Path::new("/x/bag.ZIP")));
        assert!(is_archive(Path::new("/x/bag.zip")));
        assert!(!is_archive(Path::new("/x/bag")));
        assert!(!is_archive(Path::new("/x/bag.tar")));
    }
}

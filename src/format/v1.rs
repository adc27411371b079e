//! XML layout of the document.
//!
//! ```text
//! <cardnest>
//!   <app-data>
//!     <version major=".." minor=".." patch=".."/>
//!     <date>..</date>
//!     <crypt-algorithm>..</crypt-algorithm>
//!     <passwordhash>..</passwordhash>
//!     <smartcard useCard=".." card-id=".."/>
//!   </app-data>
//!   <passwords>
//!     <group name="..">
//!       <property key=".." value=".." hidden=".." encrypted=".." type=".."/>
//!     </group>
//!   </passwords>
//! </cardnest>
//! ```

use std::str::FromStr;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::{Element, ROOT, xml_error};
use crate::document::{AppData, CardInfo, Document, Group, Node, Property, PropertyKind, Version};
use crate::error::DataError;

pub const APP_DATA: &str = "app-data";
const VERSION: &str = "version";
const DATE: &str = "date";
const CRYPT_ALGORITHM: &str = "crypt-algorithm";
const PASSWORD_HASH: &str = "passwordhash";
const SMARTCARD: &str = "smartcard";
const PASSWORDS: &str = "passwords";
const GROUP: &str = "group";
const PROPERTY: &str = "property";

fn parse_bool(element: &Element, name: &str, value: &str) -> Result<bool, DataError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(DataError::Structure(format!(
            "<{}> attribute '{name}' is not a bool: '{other}'",
            element.name
        ))),
    }
}

fn parse_number<T: FromStr>(element: &Element, name: &str) -> Result<T, DataError> {
    let value = element.required_attr(name)?;
    value.parse().map_err(|_| {
        DataError::Structure(format!(
            "<{}> attribute '{name}' is not a number: '{value}'",
            element.name
        ))
    })
}

pub(super) fn parse_version(app_data: &Element) -> Result<Version, DataError> {
    let version = app_data.required_child(VERSION)?;
    Ok(Version {
        major: parse_number(version, "major")?,
        minor: parse_number(version, "minor")?,
        patch: parse_number(version, "patch")?,
    })
}

fn parse_app_data(element: &Element) -> Result<AppData, DataError> {
    let smartcard = element.required_child(SMARTCARD)?;
    let use_card = parse_bool(smartcard, "useCard", smartcard.required_attr("useCard")?)?;

    Ok(AppData {
        version: parse_version(element)?,
        date: element.required_child(DATE)?.text.clone(),
        crypt_algorithm: element.required_child(CRYPT_ALGORITHM)?.text.clone(),
        password_hash: element.required_child(PASSWORD_HASH)?.text.clone(),
        smartcard: CardInfo {
            use_card,
            card_id: parse_number(smartcard, "card-id")?,
        },
    })
}

fn parse_property(element: &Element) -> Result<Property, DataError> {
    let key = element.required_attr("key")?;
    let kind: PropertyKind = element.required_attr("type")?.parse()?;

    let mut property = match element.attr("value") {
        Some(value) => Property::new(key, value, kind),
        None => Property::without_value(key, kind),
    };
    if let Some(hidden) = element.attr("hidden") {
        property = property.with_masked(parse_bool(element, "hidden", hidden)?);
    }
    if let Some(encrypted) = element.attr("encrypted") {
        if parse_bool(element, "encrypted", encrypted)? != property.is_secret() {
            return Err(DataError::Structure(format!(
                "property '{key}' of type {kind} has encrypted={encrypted}"
            )));
        }
    }
    Ok(property)
}

fn parse_nodes(elements: &[Element]) -> Result<Vec<Node>, DataError> {
    elements
        .iter()
        .map(|element| match element.name.as_str() {
            GROUP => Ok(Node::Group(Group::new(
                element.required_attr("name")?,
                parse_nodes(&element.children)?,
            ))),
            PROPERTY => parse_property(element).map(Node::Property),
            other => Err(DataError::Structure(format!("unexpected element <{other}>"))),
        })
        .collect()
}

/// Maps a parsed `<cardnest>` tree onto a document.
pub fn parse(root: &Element) -> Result<Document, DataError> {
    let app_data = parse_app_data(root.required_child(APP_DATA)?)?;
    let passwords = parse_nodes(&root.required_child(PASSWORDS)?.children)?;
    Ok(Document::new(app_data, passwords))
}

type XmlWriter = Writer<Vec<u8>>;

fn write(writer: &mut XmlWriter, event: Event<'_>) -> Result<(), DataError> {
    writer.write_event(event).map_err(xml_error)
}

fn write_text(writer: &mut XmlWriter, name: &str, text: &str) -> Result<(), DataError> {
    write(writer, Event::Start(BytesStart::new(name)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn write_app_data(writer: &mut XmlWriter, app_data: &AppData) -> Result<(), DataError> {
    write(writer, Event::Start(BytesStart::new(APP_DATA)))?;

    let mut version = BytesStart::new(VERSION);
    version.push_attribute(("major", app_data.version.major.to_string().as_str()));
    version.push_attribute(("minor", app_data.version.minor.to_string().as_str()));
    version.push_attribute(("patch", app_data.version.patch.to_string().as_str()));
    write(writer, Event::Empty(version))?;

    write_text(writer, DATE, &app_data.date)?;
    write_text(writer, CRYPT_ALGORITHM, &app_data.crypt_algorithm)?;
    write_text(writer, PASSWORD_HASH, &app_data.password_hash)?;

    let mut smartcard = BytesStart::new(SMARTCARD);
    smartcard.push_attribute(("useCard", bool_str(app_data.smartcard.use_card)));
    smartcard.push_attribute(("card-id", app_data.smartcard.card_id.to_string().as_str()));
    write(writer, Event::Empty(smartcard))?;

    write(writer, Event::End(BytesEnd::new(APP_DATA)))
}

fn write_nodes(writer: &mut XmlWriter, nodes: &[Node]) -> Result<(), DataError> {
    for node in nodes {
        match node {
            Node::Group(group) => {
                let mut start = BytesStart::new(GROUP);
                start.push_attribute(("name", group.name.as_str()));
                if group.children.is_empty() {
                    write(writer, Event::Empty(start))?;
                } else {
                    write(writer, Event::Start(start))?;
                    write_nodes(writer, &group.children)?;
                    write(writer, Event::End(BytesEnd::new(GROUP)))?;
                }
            }
            Node::Property(property) => {
                let mut start = BytesStart::new(PROPERTY);
                start.push_attribute(("key", property.key()));
                if let Some(value) = property.value() {
                    start.push_attribute(("value", value));
                }
                start.push_attribute(("hidden", bool_str(property.is_masked())));
                start.push_attribute(("encrypted", bool_str(property.is_secret())));
                start.push_attribute(("type", property.kind().as_str()));
                write(writer, Event::Empty(start))?;
            }
        }
    }
    Ok(())
}

/// Writes a document as indented XML.
pub fn serialize(document: &Document) -> Result<Vec<u8>, DataError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    write(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;
    write(&mut writer, Event::Start(BytesStart::new(ROOT)))?;
    write_app_data(&mut writer, &document.app_data)?;
    write(&mut writer, Event::Start(BytesStart::new(PASSWORDS)))?;
    write_nodes(&mut writer, &document.passwords)?;
    write(&mut writer, Event::End(BytesEnd::new(PASSWORDS)))?;
    write(&mut writer, Event::End(BytesEnd::new(ROOT)))?;

    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format;

    fn sample() -> Document {
        let mut app_data = AppData::new("BLOWFISH");
        app_data.password_hash = "c2FsdHNhbHQ=".into();
        app_data.smartcard = CardInfo {
            use_card: true,
            card_id: 200,
        };
        Document::new(
            app_data,
            vec![
                Group::new(
                    "mail & news",
                    vec![
                        Property::new("user", "bob <b@example.org>", PropertyKind::Username)
                            .into(),
                        Property::new("pw", "SMARTCARD:0:8", PropertyKind::Password).into(),
                        Group::new("empty", Vec::new()).into(),
                    ],
                )
                .into(),
                Property::without_value("note", PropertyKind::Misc)
                    .with_masked(true)
                    .into(),
            ],
        )
    }

    #[test]
    fn document_survives_serialization() {
        let document = sample();
        let xml = format::serialize(&document).unwrap();
        assert_eq!(format::parse(&xml).unwrap(), document);
    }

    #[test]
    fn absent_value_is_omitted() {
        let xml = String::from_utf8(format::serialize(&sample()).unwrap()).unwrap();
        assert!(xml.contains(r#"<property key="note" hidden="true" encrypted="false" type="MISC"/>"#));
        assert!(xml.contains(r#"<smartcard useCard="true" card-id="200"/>"#));
        assert!(xml.starts_with("<?xml"));
    }

    fn document_with(passwords: &str) -> String {
        format!(
            r#"<cardnest>
                 <app-data>
                   <version major="0" minor="1" patch="0"/>
                   <date>2024-01-01T00:00:00Z</date>
                   <crypt-algorithm>AES</crypt-algorithm>
                   <passwordhash>abc</passwordhash>
                   <smartcard useCard="false" card-id="0"/>
                 </app-data>
                 <passwords>{passwords}</passwords>
               </cardnest>"#
        )
    }

    #[test]
    fn minimal_document_parses() {
        let document = format::parse(document_with("").as_bytes()).unwrap();
        assert!(document.passwords.is_empty());
        assert_eq!(document.app_data.crypt_algorithm, "AES");
        assert!(!document.app_data.smartcard.use_card);
    }

    #[test]
    fn encrypted_flag_must_match_type() {
        let bad = document_with(r#"<property key="k" value="v" encrypted="true" type="URL"/>"#);
        assert!(matches!(
            format::parse(bad.as_bytes()),
            Err(DataError::Structure(_))
        ));

        let bad =
            document_with(r#"<property key="k" value="v" encrypted="false" type="PASSWORD"/>"#);
        assert!(format::parse(bad.as_bytes()).is_err());
    }

    #[test]
    fn malformed_fields_are_rejected() {
        for passwords in [
            r#"<property key="k" type="SECRET"/>"#,
            r#"<property key="k" hidden="yes" type="MISC"/>"#,
            r#"<property value="v" type="MISC"/>"#,
            r#"<group/>"#,
            r#"<entry key="k"/>"#,
        ] {
            assert!(
                format::parse(document_with(passwords).as_bytes()).is_err(),
                "{passwords} accepted"
            );
        }
    }

    #[test]
    fn missing_sections_are_rejected() {
        let no_passwords = document_with("").replace("<passwords></passwords>", "");
        assert!(format::parse(no_passwords.as_bytes()).is_err());
        assert!(format::parse(b"<cardnest><passwords/></cardnest>").is_err());
    }

    #[test]
    fn future_major_version_is_rejected() {
        let future = document_with("").replace(r#"major="0""#, r#"major="7""#);
        assert!(matches!(
            format::parse(future.as_bytes()),
            Err(DataError::Structure(msg)) if msg.contains("7.1.0")
        ));
    }

    #[test]
    fn bad_card_id_is_rejected() {
        let bad = document_with("").replace(r#"card-id="0""#, r#"card-id="300""#);
        assert!(format::parse(bad.as_bytes()).is_err());
    }
}

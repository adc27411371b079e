//! The credential document: metadata plus a forest of groups and
//! properties.

pub mod walker;

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DataError;

pub use walker::{Direction, walk};

/// Literal stored in place of the password hash when the card holds it.
pub const SMARTCARD_HASH: &str = "SMARTCARD";

/// What a property's value represents.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PropertyKind {
    #[default]
    Misc,
    Username,
    Password,
    Url,
}

impl PropertyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PropertyKind::Misc => "MISC",
            PropertyKind::Username => "USERNAME",
            PropertyKind::Password => "PASSWORD",
            PropertyKind::Url => "URL",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, DataError> {
        match s {
            "MISC" => Ok(PropertyKind::Misc),
            "USERNAME" => Ok(PropertyKind::Username),
            "PASSWORD" => Ok(PropertyKind::Password),
            "URL" => Ok(PropertyKind::Url),
            other => Err(DataError::Structure(format!(
                "unknown property type '{other}'"
            ))),
        }
    }
}

/// A leaf of the document tree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Property {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, rename = "type")]
    kind: PropertyKind,
    #[serde(default)]
    masked: bool,
}

impl Property {
    /// Creates a property. Passwords start out masked.
    pub fn new(key: impl Into<String>, value: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            kind,
            masked: kind == PropertyKind::Password,
        }
    }

    pub fn without_value(key: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            key: key.into(),
            value: None,
            kind,
            masked: kind == PropertyKind::Password,
        }
    }

    pub fn with_masked(mut self, masked: bool) -> Self {
        self.masked = masked;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// Value is encrypted at rest. Holds exactly for passwords.
    pub fn is_secret(&self) -> bool {
        self.kind == PropertyKind::Password
    }

    /// Value is hidden from on-screen display.
    pub fn is_masked(&self) -> bool {
        self.masked
    }

    pub(crate) fn value_mut(&mut self) -> Option<&mut String> {
        self.value.as_mut()
    }
}

/// A named container of further nodes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Group {
    pub fn new(name: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "node", rename_all = "lowercase")]
pub enum Node {
    Group(Group),
    Property(Property),
}

impl From<Group> for Node {
    fn from(group: Group) -> Self {
        Node::Group(group)
    }
}

impl From<Property> for Node {
    fn from(property: Property) -> Self {
        Node::Property(property)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Version of this crate.
    pub fn current() -> Self {
        let part = |s: &str| s.parse().unwrap_or(0);
        Self {
            major: part(env!("CARGO_PKG_VERSION_MAJOR")),
            minor: part(env!("CARGO_PKG_VERSION_MINOR")),
            patch: part(env!("CARGO_PKG_VERSION_PATCH")),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Smartcard usage recorded in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CardInfo {
    pub use_card: bool,
    pub card_id: u8,
}

/// The `app-data` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppData {
    pub version: Version,
    /// ISO-8601 UTC timestamp of the last write.
    pub date: String,
    pub crypt_algorithm: String,
    /// Base64 salted hash, or [`SMARTCARD_HASH`].
    pub password_hash: String,
    pub smartcard: CardInfo,
}

impl AppData {
    pub fn new(crypt_algorithm: impl Into<String>) -> Self {
        Self {
            version: Version::current(),
            date: now(),
            crypt_algorithm: crypt_algorithm.into(),
            password_hash: String::new(),
            smartcard: CardInfo::default(),
        }
    }
}

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A whole document as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub app_data: AppData,
    pub passwords: Vec<Node>,
}

impl Document {
    pub fn new(app_data: AppData, passwords: Vec<Node>) -> Self {
        Self {
            app_data,
            passwords,
        }
    }

    /// Iterates over every property, depth first in document order.
    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        let mut stack: Vec<&Node> = self.passwords.iter().rev().collect();
        std::iter::from_fn(move || {
            while let Some(node) = stack.pop() {
                match node {
                    Node::Property(p) => return Some(p),
                    Node::Group(g) => stack.extend(g.children.iter().rev()),
                }
            }
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_iff_password() {
        for kind in [
            PropertyKind::Misc,
            PropertyKind::Username,
            PropertyKind::Password,
            PropertyKind::Url,
        ] {
            let p = Property::new("k", "v", kind);
            assert_eq!(p.is_secret(), kind == PropertyKind::Password);
            assert_eq!(kind.as_str().parse::<PropertyKind>().unwrap(), kind);
        }
        assert!("password".parse::<PropertyKind>().is_err());
    }

    #[test]
    fn passwords_are_masked_by_default() {
        assert!(Property::new("pw", "x", PropertyKind::Password).is_masked());
        assert!(!Property::new("user", "x", PropertyKind::Username).is_masked());
        assert!(Property::new("pin", "1", PropertyKind::Misc).with_masked(true).is_masked());
    }

    #[test]
    fn properties_in_document_order() {
        let doc = Document::new(
            AppData::new("AES"),
            vec![
                Property::new("a", "1", PropertyKind::Misc).into(),
                Group::new(
                    "g",
                    vec![
                        Property::new("b", "2", PropertyKind::Misc).into(),
                        Group::new("h", vec![Property::new("c", "3", PropertyKind::Misc).into()])
                            .into(),
                    ],
                )
                .into(),
                Property::new("d", "4", PropertyKind::Misc).into(),
            ],
        );
        let keys: Vec<&str> = doc.properties().map(Property::key).collect();
        assert_eq!(keys, ["a", "b", "c", "d"]);
    }

    #[test]
    fn json_shape() {
        let node: Node = Property::new("pw", "x", PropertyKind::Password).into();
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["node"], "property");
        assert_eq!(json["type"], "PASSWORD");

        let parsed: Vec<Node> = serde_json::from_str(
            r#"[{"node":"group","name":"mail","children":[{"node":"property","key":"user","value":"bob","type":"USERNAME"}]}]"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            vec![Node::Group(Group::new(
                "mail",
                vec![Property::new("user", "bob", PropertyKind::Username).into()]
            ))]
        );
    }

    #[test]
    fn current_version_matches_package() {
        assert_eq!(Version::current().to_string(), env!("CARGO_PKG_VERSION"));
    }
}

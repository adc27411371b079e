//! Settings consumed by the store.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::default_algorithm;
use crate::error::{Error, Result};

pub const APP_NAME: &str = "cardnest";
pub const DOCUMENT_FILE: &str = "cardnest.xml";
pub const CONFIG_FILE: &str = "config.json";

#[cfg(windows)]
const DEFAULT_LIBRARY: &str = "ctapi.dll";
#[cfg(not(windows))]
const DEFAULT_LIBRARY: &str = "libctapi.so";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub use_smartcard: bool,
    /// Name of the block cipher, e.g. `BLOWFISH`.
    pub cipher_algorithm: String,
    /// CT-API driver library of the card terminal.
    pub smartcard_library_path: PathBuf,
    pub smartcard_port: u16,
    /// The card asks for a PIN before accepting writes.
    pub card_has_write_protection: bool,
    pub dictionary_file_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_smartcard: false,
            cipher_algorithm: default_algorithm()
                .map(|a| a.name().to_string())
                .unwrap_or_default(),
            smartcard_library_path: PathBuf::from(DEFAULT_LIBRARY),
            smartcard_port: 1,
            card_has_write_protection: false,
            dictionary_file_path: None,
        }
    }
}

impl Config {
    /// Reads settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&text)
            .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Configuration(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
        .ok_or_else(|| Error::Configuration("could not determine platform directories".into()))
}

/// Platform location of the document file.
pub fn default_document_path() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().join(DOCUMENT_FILE))
}

/// Platform location of the settings file.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE))
}

//! Build settings shared by the configuration phase and every task.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::WiringError;

/// Settings of a single build.
///
/// Every field has a default, so a settings file only needs to list what it
/// overrides:
///
/// ```json
/// { "build_root": "out", "tool_version": "8.9" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of everything the build writes.
    pub build_root: Utf8PathBuf,
    /// Directory below `build_root` holding engine-assigned task outputs.
    pub intermediates_dir: Utf8PathBuf,
    /// Root of the static source sets (`<source_root>/main/assets`, ...).
    pub source_root: Utf8PathBuf,
    /// Version of the build tool, checked by the pre-build validation.
    pub tool_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            build_root: "build".into(),
            intermediates_dir: "intermediates".into(),
            source_root: "src".into(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, WiringError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, WiringError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Settings rooted in `root`, with build output and sources below it.
    pub fn rooted(root: impl AsRef<Utf8Path>) -> Self {
        let root = root.as_ref();

        Self {
            build_root: root.join("build"),
            source_root: root.join("src"),
            ..Self::default()
        }
    }

    pub fn with_tool_version(mut self, version: impl Into<String>) -> Self {
        self.tool_version = version.into();
        self
    }

    /// `<build_root>/<intermediates_dir>`
    pub fn intermediates(&self) -> Utf8PathBuf {
        self.build_root.join(&self.intermediates_dir)
    }
}

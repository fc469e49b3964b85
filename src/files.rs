//! Payload data model: file references, in-memory variable files and
//! request arguments.
//!
//! The sampler merges four payload categories into one multipart body;
//! the types here carry the per-entry metadata (field name, file name,
//! MIME type) and the "empty entry" rules used to weed out placeholder
//! rows coming from the configuration layer.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A file on disk to be uploaded as one multipart part.
///
/// Used for both static files (read fresh for each configuration) and
/// dynamic files (registered once, content-cached across samples).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    /// Path to the file, absolute or relative to the configured base dir
    pub path: String,

    /// Multipart field name for this part
    #[serde(rename = "paramName")]
    pub param_name: String,

    /// MIME type sent as the part's Content-Type
    #[serde(rename = "mimeType", default = "default_mime_type")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

impl FileReference {
    pub fn new(path: impl Into<String>, param_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            param_name: param_name.into(),
            mime_type: mime_type.into(),
        }
    }

    /// An entry with no path is a placeholder row and is never sent.
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// Base name of the path, used as the part's file name on the wire.
    pub fn file_name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.path)
    }
}

/// An upload whose content lives in memory (e.g. extracted from a prior
/// response) instead of on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableFileEntry {
    /// File content as text
    #[serde(default)]
    pub content: String,

    /// File name reported on the wire
    pub name: String,

    /// Multipart field name for this part
    #[serde(rename = "paramName")]
    pub param_name: String,

    /// MIME type sent as the part's Content-Type
    #[serde(rename = "mimeType", default = "default_mime_type")]
    pub mime_type: String,
}

impl VariableFileEntry {
    pub fn new(
        content: impl Into<String>,
        name: impl Into<String>,
        param_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            name: name.into(),
            param_name: param_name.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Empty iff both name and content are empty.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.content.is_empty()
    }
}

/// A plain name/value request argument, sent as a text multipart part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Arguments without a name are skipped when building the body.
    pub fn is_skippable(&self) -> bool {
        self.name.is_empty()
    }
}

/// Drops empty entries, keeping the original order.
///
/// Configuration panels hand over fixed-size tables with blank rows;
/// weeding happens once at set time so execution never sees them.
pub fn weed_empty_files(files: Vec<FileReference>) -> Vec<FileReference> {
    files.into_iter().filter(|f| !f.is_empty()).collect()
}

/// Drops empty variable-file entries, keeping the original order.
pub fn weed_empty_variable_files(files: Vec<VariableFileEntry>) -> Vec<VariableFileEntry> {
    files.into_iter().filter(|f| !f.is_empty()).collect()
}

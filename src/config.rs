//! Sampler configuration surface.
//!
//! The configuration layer (GUI or YAML test plan) populates one
//! `SamplerConfig` per sampler: two endpoints, the threshold routing
//! fields, the gating flags and the three file lists. Numeric fields may
//! arrive as strings because they pass through a text-based property
//! layer; they are parsed and validated before any network I/O.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::client_pool::ProxySettings;
use crate::content_cache::{CacheError, FileContentCache};
use crate::errors::SamplerError;
use crate::files::{
    weed_empty_files, weed_empty_variable_files, Argument, FileReference, VariableFileEntry,
};
use crate::router::{EndpointChoice, ThresholdConfig};
use crate::utils::parse_timeout_string;

/// Errors loading a config document.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

/// A numeric field that may be given as a number or as a string
/// expression coming from the text-property layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericField {
    Number(u32),
    Text(String),
}

impl Default for NumericField {
    fn default() -> Self {
        NumericField::Number(0)
    }
}

impl NumericField {
    /// Resolve to a concrete value; a malformed string is a
    /// configuration error.
    pub fn resolve(&self, field: &str) -> Result<u32, SamplerError> {
        match self {
            NumericField::Number(n) => Ok(*n),
            NumericField::Text(s) => s.trim().parse().map_err(|_| {
                SamplerError::Config(format!("{} is not a non-negative number: '{}'", field, s))
            }),
        }
    }
}

/// Full configuration of one upload sampler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Endpoint targeted once the threshold is met
    #[serde(rename = "endpointAchieved")]
    pub endpoint_achieved: String,

    /// Endpoint targeted while below the threshold
    #[serde(rename = "endpointBelow")]
    pub endpoint_below: String,

    #[serde(rename = "recordType", default)]
    pub record_type: NumericField,

    #[serde(default)]
    pub threshold: NumericField,

    #[serde(rename = "gateArguments", default)]
    pub gate_arguments: bool,

    #[serde(rename = "gateStaticFiles", default)]
    pub gate_static_files: bool,

    #[serde(rename = "gateDynamicFiles", default)]
    pub gate_dynamic_files: bool,

    #[serde(rename = "gateVariableFiles", default)]
    pub gate_variable_files: bool,

    /// Comma-separated 1-based indices into the dynamic file list
    #[serde(rename = "attachmentNumbers", default)]
    pub attachment_selector: String,

    /// When false, file bytes are replaced by a placeholder in the
    /// loggable copy of the posted body
    #[serde(rename = "logFileContents", default)]
    pub log_file_contents: bool,

    /// Refuse externally merged dynamic file sets
    #[serde(rename = "blockMerge", default)]
    pub block_merge: bool,

    /// Also publish SHA-256 hashes when exporting dynamic file metadata
    #[serde(rename = "exportSha256", default)]
    pub export_sha256: bool,

    /// Variable-name prefix for exported dynamic file metadata
    #[serde(rename = "propertyPrefix", default)]
    pub property_prefix: String,

    /// Connect timeout string ("500ms", "30s", bare millis); empty = unset
    #[serde(rename = "connectTimeout", default)]
    pub connect_timeout: String,

    /// Response timeout string; empty = unset
    #[serde(rename = "responseTimeout", default)]
    pub response_timeout: String,

    #[serde(default)]
    pub arguments: Vec<Argument>,

    #[serde(rename = "ownArguments", default)]
    pub own_arguments: Vec<Argument>,

    #[serde(rename = "staticFiles", default)]
    pub static_files: Vec<FileReference>,

    #[serde(rename = "dynamicFiles", default)]
    pub dynamic_files: Vec<FileReference>,

    #[serde(rename = "variableFiles", default)]
    pub variable_files: Vec<VariableFileEntry>,

    /// Per-target proxy override; takes precedence over the pool's
    /// static proxy
    #[serde(default)]
    pub proxy: Option<ProxySettings>,
}

impl SamplerConfig {
    /// Load from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Check everything that can fail before network I/O: endpoint URLs,
    /// numeric fields and timeout strings.
    pub fn validate(&self) -> Result<(), SamplerError> {
        for (name, url) in [
            ("endpointAchieved", &self.endpoint_achieved),
            ("endpointBelow", &self.endpoint_below),
        ] {
            reqwest::Url::parse(url).map_err(|e| SamplerError::InvalidEndpoint {
                url: format!("{}: {}", name, url),
                reason: e.to_string(),
            })?;
        }

        self.record_type.resolve("recordType")?;
        self.threshold.resolve("threshold")?;
        self.parsed_connect_timeout()?;
        self.parsed_response_timeout()?;
        Ok(())
    }

    /// The threshold-routing view of this config.
    pub fn threshold_config(&self) -> Result<ThresholdConfig, SamplerError> {
        Ok(ThresholdConfig {
            record_type: self.record_type.resolve("recordType")?,
            threshold: self.threshold.resolve("threshold")?,
            gate_arguments: self.gate_arguments,
            gate_static_files: self.gate_static_files,
            gate_dynamic_files: self.gate_dynamic_files,
            gate_variable_files: self.gate_variable_files,
            attachment_selector: self.attachment_selector.clone(),
        })
    }

    /// The endpoint string for a routing decision.
    pub fn endpoint_for(&self, choice: EndpointChoice) -> &str {
        match choice {
            EndpointChoice::Achieved => &self.endpoint_achieved,
            EndpointChoice::Below => &self.endpoint_below,
        }
    }

    pub fn parsed_connect_timeout(&self) -> Result<Option<Duration>, SamplerError> {
        parse_timeout_string(&self.connect_timeout)
            .map_err(|e| SamplerError::Config(format!("connectTimeout: {}", e)))
    }

    pub fn parsed_response_timeout(&self) -> Result<Option<Duration>, SamplerError> {
        parse_timeout_string(&self.response_timeout)
            .map_err(|e| SamplerError::Config(format!("responseTimeout: {}", e)))
    }

    /// Replace the dynamic file list, weeding out empty entries.
    pub fn set_dynamic_files(&mut self, files: Vec<FileReference>) {
        self.dynamic_files = weed_empty_files(files);
    }

    /// Replace the variable file list, weeding out empty entries.
    pub fn set_variable_files(&mut self, files: Vec<VariableFileEntry>) {
        self.variable_files = weed_empty_variable_files(files);
    }

    /// Merge an externally supplied dynamic file set, unless merging is
    /// blocked. Returns true when the set was taken.
    pub fn merge_dynamic_files(&mut self, files: Vec<FileReference>) -> bool {
        if self.block_merge {
            warn!("dynamic file merge blocked by configuration");
            return false;
        }
        self.set_dynamic_files(files);
        true
    }

    /// Export per-file metadata variables for the dynamic file list:
    /// `<prefix>_<n>_Path`, `_ParamName`, `_MimeType` and, when enabled,
    /// `_SHA256`. Indices are 1-based to line up with the attachment
    /// selector.
    pub fn dynamic_file_variables(
        &self,
        cache: &FileContentCache,
    ) -> Result<HashMap<String, String>, CacheError> {
        let mut vars = HashMap::new();
        for (i, file) in self.dynamic_files.iter().enumerate() {
            let name = format!("{}_{}", self.property_prefix, i + 1);
            vars.insert(format!("{}_Path", name), file.path.clone());
            vars.insert(format!("{}_ParamName", name), file.param_name.clone());
            vars.insert(format!("{}_MimeType", name), file.mime_type.clone());
            if self.export_sha256 {
                vars.insert(format!("{}_SHA256", name), cache.sha256(&file.path)?);
            }
        }
        Ok(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
endpointAchieved: "http://upload.example.com/full"
endpointBelow: "http://upload.example.com/partial"
recordType: "7"
threshold: 5
gateDynamicFiles: true
attachmentNumbers: "1,2"
staticFiles:
  - path: "a.jpg"
    paramName: "f1"
    mimeType: "image/jpeg"
variableFiles:
  - content: "hello"
    name: "h.txt"
    paramName: "v1"
    mimeType: "text/plain"
"#
    }

    #[test]
    fn test_parse_yaml_config() {
        let config = SamplerConfig::from_yaml_str(minimal_yaml()).unwrap();
        assert_eq!(config.endpoint_achieved, "http://upload.example.com/full");
        assert!(config.gate_dynamic_files);
        assert!(!config.gate_arguments);
        assert_eq!(config.attachment_selector, "1,2");
        assert_eq!(config.static_files.len(), 1);
        assert_eq!(config.variable_files[0].name, "h.txt");
        config.validate().unwrap();
    }

    #[test]
    fn test_numeric_fields_accept_numbers_and_strings() {
        let config = SamplerConfig::from_yaml_str(minimal_yaml()).unwrap();
        assert_eq!(config.record_type.resolve("recordType").unwrap(), 7);
        assert_eq!(config.threshold.resolve("threshold").unwrap(), 5);
    }

    #[test]
    fn test_malformed_numeric_field_is_config_error() {
        let field = NumericField::Text("seven".to_string());
        let err = field.resolve("recordType").unwrap_err();
        assert!(err.to_string().contains("recordType"));
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let mut config = SamplerConfig::from_yaml_str(minimal_yaml()).unwrap();
        config.endpoint_below = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_timeout() {
        let mut config = SamplerConfig::from_yaml_str(minimal_yaml()).unwrap();
        config.connect_timeout = "soon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_config_view() {
        let config = SamplerConfig::from_yaml_str(minimal_yaml()).unwrap();
        let tc = config.threshold_config().unwrap();
        assert_eq!(tc.record_type, 7);
        assert_eq!(tc.threshold, 5);
        assert!(tc.gate_dynamic_files);
        assert!(!tc.gate_static_files);
        assert_eq!(tc.attachment_selector, "1,2");
    }

    #[test]
    fn test_set_dynamic_files_weeds_empties() {
        let mut config = SamplerConfig::default();
        config.set_dynamic_files(vec![
            FileReference::new("d.bin", "a1", "application/octet-stream"),
            FileReference::new("", "", ""),
        ]);
        assert_eq!(config.dynamic_files.len(), 1);
    }

    #[test]
    fn test_block_merge_refuses_external_set() {
        let mut config = SamplerConfig::default();
        config.block_merge = true;
        let merged = config.merge_dynamic_files(vec![FileReference::new("x", "p", "m")]);
        assert!(!merged);
        assert!(config.dynamic_files.is_empty());

        config.block_merge = false;
        assert!(config.merge_dynamic_files(vec![FileReference::new("x", "p", "m")]));
        assert_eq!(config.dynamic_files.len(), 1);
    }

    #[test]
    fn test_dynamic_file_variables_export() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("d.bin"), b"abc").unwrap();
        let cache = FileContentCache::new(dir.path());

        let mut config = SamplerConfig::default();
        config.property_prefix = "att".to_string();
        config.export_sha256 = true;
        config.set_dynamic_files(vec![FileReference::new(
            "d.bin",
            "a1",
            "application/octet-stream",
        )]);

        let vars = config.dynamic_file_variables(&cache).unwrap();
        assert_eq!(vars.get("att_1_Path").map(String::as_str), Some("d.bin"));
        assert_eq!(vars.get("att_1_ParamName").map(String::as_str), Some("a1"));
        assert_eq!(
            vars.get("att_1_SHA256").map(String::as_str),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn test_dynamic_file_variables_without_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileContentCache::new(dir.path());

        let mut config = SamplerConfig::default();
        config.property_prefix = "att".to_string();
        config.set_dynamic_files(vec![FileReference::new("missing.bin", "a1", "m")]);

        // No hash export requested: the file is never read, so a missing
        // file is not an error here.
        let vars = config.dynamic_file_variables(&cache).unwrap();
        assert_eq!(vars.len(), 3);
        assert!(vars.contains_key("att_1_MimeType"));
    }
}

//! Plugin descriptor model
//!
//! Every plugin package is a directory containing a `plugin.json` descriptor.
//! The descriptor carries the identity and metadata of the diagnostic, its
//! declared parameter schema, and optionally a shell command template for
//! command-backed plugins.

use crate::core::error::{NetProbeError, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Stable identifier of a plugin within the catalog.
pub type PluginId = String;

/// Parameter value types a plugin may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    List,
}

/// A single declared parameter of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

/// Parsed `plugin.json` descriptor.
///
/// `name`, `version`, `description` and `author` are mandatory; a descriptor
/// missing any of them fails to parse and the package is cataloged as
/// unavailable with the parse error as the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: PluginId,
    pub version: Version,
    pub description: String,
    pub author: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Shell command template for command-backed plugins. Placeholders of the
    /// form `{param}` are substituted from the resolved parameters.
    #[serde(default)]
    pub command: Option<String>,
    /// Directory the descriptor was discovered in. Not part of the document.
    #[serde(skip)]
    pub package_dir: PathBuf,
}

fn default_category() -> String {
    "general".to_string()
}

impl PluginDescriptor {
    /// Parse a descriptor document and attach the package directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            NetProbeError::DiscoveryError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut descriptor: PluginDescriptor = serde_json::from_str(&raw).map_err(|e| {
            NetProbeError::DiscoveryError(format!("invalid descriptor {}: {}", path.display(), e))
        })?;
        descriptor.package_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Structural checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(NetProbeError::DiscoveryError(
                "descriptor field 'name' must not be empty".to_string(),
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(NetProbeError::DiscoveryError(format!(
                "invalid plugin name '{}': only lowercase letters, digits and underscores",
                self.name
            )));
        }
        for param in &self.parameters {
            if param.name.trim().is_empty() {
                return Err(NetProbeError::DiscoveryError(format!(
                    "plugin '{}' declares a parameter with an empty name",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Human-facing name, falling back to the identifier.
    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Merge caller-supplied parameters over declared defaults.
    ///
    /// Unknown keys are passed through untouched; a declared required
    /// parameter with neither a supplied value nor a default is rejected.
    pub fn resolve_params(&self, supplied: Value) -> Result<Value> {
        let supplied = match supplied {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(NetProbeError::ValidationError(format!(
                    "parameters must be an object, got {}",
                    value_kind(&other)
                )))
            }
        };
        let mut resolved = Map::new();
        for spec in &self.parameters {
            if let Some(default) = &spec.default {
                resolved.insert(spec.name.clone(), default.clone());
            }
        }
        for (key, value) in supplied {
            resolved.insert(key, value);
        }
        for spec in &self.parameters {
            if spec.required && !resolved.contains_key(&spec.name) {
                return Err(NetProbeError::ValidationError(format!(
                    "missing required parameter '{}' for plugin '{}'",
                    spec.name, self.name
                )));
            }
        }
        Ok(Value::Object(resolved))
    }

    /// Metadata snapshot embedded in persisted run records.
    pub fn snapshot(&self) -> DescriptorSnapshot {
        DescriptorSnapshot {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
            category: self.category.clone(),
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Descriptor metadata captured at run time, so stored results remain
/// interpretable even after the plugin is upgraded or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorSnapshot {
    pub name: PluginId,
    pub version: Version,
    pub description: String,
    pub author: String,
    pub category: String,
}

/// One row of the plugin catalog.
///
/// Invalid packages still get an entry, with `available = false` and the
/// failure reason preserved, so callers can see *why* a plugin is missing
/// instead of it silently disappearing.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub identifier: PluginId,
    pub package_dir: PathBuf,
    pub available: bool,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<PluginDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor_json() -> Value {
        json!({
            "name": "ping",
            "version": "1.2.0",
            "description": "ICMP reachability check",
            "author": "netprobe",
            "category": "connectivity",
            "parameters": [
                {"name": "target", "type": "string", "default": "8.8.8.8"},
                {"name": "count", "type": "integer", "default": 4},
                {"name": "token", "type": "string", "required": true}
            ]
        })
    }

    fn parse(value: Value) -> PluginDescriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_full_descriptor() {
        let d = parse(descriptor_json());
        assert_eq!(d.name, "ping");
        assert_eq!(d.version, Version::new(1, 2, 0));
        assert_eq!(d.parameters.len(), 3);
        assert_eq!(d.title(), "ping");
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let mut doc = descriptor_json();
        doc.as_object_mut().unwrap().remove("version");
        let result: std::result::Result<PluginDescriptor, _> = serde_json::from_value(doc);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_name_fails_validation() {
        let mut d = parse(descriptor_json());
        d.name = "Bad Name".to_string();
        assert!(d.validate().is_err());
    }

    #[test]
    fn resolve_params_applies_defaults_and_overrides() {
        let d = parse(descriptor_json());
        let resolved = d
            .resolve_params(json!({"count": 10, "token": "abc"}))
            .unwrap();
        assert_eq!(resolved["target"], "8.8.8.8");
        assert_eq!(resolved["count"], 10);
        assert_eq!(resolved["token"], "abc");
    }

    #[test]
    fn resolve_params_rejects_missing_required() {
        let d = parse(descriptor_json());
        let err = d.resolve_params(json!({})).unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn resolve_params_rejects_non_object() {
        let d = parse(descriptor_json());
        assert!(d.resolve_params(json!([1, 2, 3])).is_err());
    }
}

//! On-disk YAML documents: festival config, override files, named policies.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::model::GateTaskSpec;
use crate::error::{GateError, Result};

/// Highest override document version understood by this engine.
pub const OVERRIDE_VERSION: u32 = 1;

fn default_true() -> bool {
    true
}

/// `quality_gates` section of `fest.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGatesSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_append: bool,
    #[serde(default)]
    pub tasks: Vec<GateTaskSpec>,
}

/// The parts of `fest.yaml` this engine reads. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FestivalConfig {
    #[serde(default)]
    pub quality_gates: Option<QualityGatesSection>,
    #[serde(default)]
    pub excluded_patterns: Vec<String>,
    /// Explicit phase types keyed by phase directory name.
    #[serde(default)]
    pub phase_types: BTreeMap<String, String>,
}

/// Per-phase / per-sequence override document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideFile {
    #[serde(default)]
    pub version: u32,
    #[serde(default = "default_true")]
    pub inherit: bool,
    #[serde(default)]
    pub append: Vec<GateTaskSpec>,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for OverrideFile {
    /// The override implied by an absent file.
    fn default() -> Self {
        Self {
            version: OVERRIDE_VERSION,
            inherit: true,
            append: Vec::new(),
            remove: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl OverrideFile {
    /// Structural checks that make a document unusable.
    pub fn validate(&self, path: &Path) -> Result<()> {
        if self.version > OVERRIDE_VERSION {
            return Err(GateError::InvalidOverride {
                path: path.to_path_buf(),
                message: format!(
                    "unsupported version {} (max {})",
                    self.version, OVERRIDE_VERSION
                ),
            });
        }
        if let Some(bad) = self.append.iter().find(|g| g.id.trim().is_empty()) {
            return Err(GateError::InvalidOverride {
                path: path.to_path_buf(),
                message: format!("append entry with empty id (template {:?})", bad.template),
            });
        }
        Ok(())
    }
}

/// A named policy document from a policy directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<GateTaskSpec>,
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| GateError::io(path, e))?;
    if text.trim().is_empty() {
        // An empty document deserializes like `{}`.
        return serde_yaml::from_str("{}").map_err(|e| GateError::parse(path, e));
    }
    serde_yaml::from_str(&text).map_err(|e| GateError::parse(path, e))
}

/// Load `fest.yaml` from a festival root. `Ok(None)` when the file is absent.
pub fn load_festival_config(festival_root: &Path) -> Result<Option<(PathBuf, FestivalConfig)>> {
    let path = festival_root.join(crate::config::FESTIVAL_CONFIG_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let config = read_yaml(&path)?;
    Ok(Some((path, config)))
}

/// Read and validate an override document.
pub fn load_override_file(path: &Path) -> Result<OverrideFile> {
    let doc: OverrideFile = read_yaml(path)?;
    doc.validate(path)?;
    Ok(doc)
}

pub fn load_policy_document(path: &Path) -> Result<PolicyDocument> {
    read_yaml(path)
}

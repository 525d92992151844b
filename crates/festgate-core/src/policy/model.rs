//! Gate policy data model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Level of the hierarchy (or registry layer) a policy entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceLevel {
    Builtin,
    NamedPolicy,
    Festival,
    Phase,
    Sequence,
}

impl SourceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::NamedPolicy => "named-policy",
            Self::Festival => "festival",
            Self::Phase => "phase",
            Self::Sequence => "sequence",
        }
    }
}

impl fmt::Display for SourceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a gate entry or exclude pattern. Never mutated once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySource {
    pub level: SourceLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PolicySource {
    pub fn builtin(name: &str) -> Self {
        Self {
            level: SourceLevel::Builtin,
            path: None,
            name: Some(name.to_string()),
        }
    }

    pub fn named_policy(name: &str, path: Option<PathBuf>) -> Self {
        Self {
            level: SourceLevel::NamedPolicy,
            path,
            name: Some(name.to_string()),
        }
    }

    /// A level that was checked but had no document.
    pub fn consulted(level: SourceLevel) -> Self {
        Self {
            level,
            path: None,
            name: None,
        }
    }

    /// Source for a document found at `path` on `level`.
    pub fn at(level: SourceLevel, path: &Path) -> Self {
        Self {
            level,
            path: Some(path.to_path_buf()),
            name: None,
        }
    }
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.path) {
            (Some(name), Some(path)) => write!(f, "{}:{} ({})", self.level, name, path.display()),
            (Some(name), None) => write!(f, "{}:{}", self.level, name),
            (None, Some(path)) => write!(f, "{} ({})", self.level, path.display()),
            (None, None) => write!(f, "{} (no override)", self.level),
        }
    }
}

fn default_true() -> bool {
    true
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// A gate entry as written in `fest.yaml`, override files, and policy documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateTaskSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl GateTaskSpec {
    pub fn new(id: &str, template: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            template: Some(template.to_string()),
            name: Some(name.to_string()),
            enabled: true,
        }
    }

    /// Materialize into a [`GateTask`] attributed to `source`.
    ///
    /// A missing template defaults to the gate ID; a missing name to the ID.
    pub fn into_task(self, source: PolicySource) -> GateTask {
        let template = self.template.unwrap_or_else(|| self.id.clone());
        let name = self.name.unwrap_or_else(|| self.id.clone());
        GateTask {
            id: self.id,
            template,
            name,
            enabled: self.enabled,
            removed: false,
            source: Some(source),
            removed_by: None,
        }
    }
}

/// Derived view of a gate's lifecycle for show-style inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Active,
    Disabled,
    Removed,
}

/// One gate in a resolved policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateTask {
    pub id: String,
    pub template: String,
    pub name: String,
    pub enabled: bool,
    /// Tombstone. Removed gates stay in the list with their provenance.
    #[serde(default, skip_serializing_if = "is_false")]
    pub removed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PolicySource>,
    /// Level whose `remove` list tombstoned this gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_by: Option<PolicySource>,
}

impl GateTask {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.removed
    }

    pub fn state(&self) -> GateState {
        if self.removed {
            GateState::Removed
        } else if !self.enabled {
            GateState::Disabled
        } else {
            GateState::Active
        }
    }

    pub fn source_level(&self) -> Option<SourceLevel> {
        self.source.as_ref().map(|s| s.level)
    }
}

/// Fully resolved gate policy for one node of the hierarchy.
///
/// # Invariants
///
/// - `gates` IDs are unique.
/// - `gates` keeps inherited entries first, in inheritance order, followed by
///   entries appended at each level visited, outermost first.
/// - `exclude_patterns` is the union of every visited level's patterns in
///   first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedPolicy {
    pub gates: Vec<GateTask>,
    pub sources: Vec<PolicySource>,
    pub level: SourceLevel,
    pub fest_yaml_enabled: bool,
    pub auto_append: bool,
    pub exclude_patterns: Vec<String>,
    /// First contributor of each exclude pattern.
    pub exclude_sources: BTreeMap<String, PolicySource>,
    /// Non-fatal problems met while resolving (unreadable overrides, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl MergedPolicy {
    pub fn new(level: SourceLevel) -> Self {
        Self {
            gates: Vec::new(),
            sources: Vec::new(),
            level,
            fest_yaml_enabled: false,
            auto_append: true,
            exclude_patterns: Vec::new(),
            exclude_sources: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Gates that are enabled and not removed, in list order.
    pub fn active_gates(&self) -> Vec<&GateTask> {
        self.gates.iter().filter(|g| g.is_active()).collect()
    }

    /// Owned copies of the active gates, for handing to the generator.
    pub fn active_gate_tasks(&self) -> Vec<GateTask> {
        self.gates.iter().filter(|g| g.is_active()).cloned().collect()
    }

    pub fn gate(&self, id: &str) -> Option<&GateTask> {
        self.gates.iter().find(|g| g.id == id)
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.gates.iter().position(|g| g.id == id)
    }

    /// Union `patterns` into the accumulated exclude set.
    pub fn add_exclude_patterns<I, S>(&mut self, patterns: I, source: &PolicySource)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() || self.exclude_sources.contains_key(pattern) {
                continue;
            }
            self.exclude_patterns.push(pattern.to_string());
            self.exclude_sources
                .insert(pattern.to_string(), source.clone());
        }
    }
}

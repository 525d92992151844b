//! Named gate policies: built-ins, user policies, festival-local policies.
//!
//! Layers are loaded in precedence order (built-in < user < festival) and a
//! later layer shadows an earlier one by name. The registry is read-only after
//! construction; every lookup hands out an owned copy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::documents::load_policy_document;
use super::model::{GateTask, GateTaskSpec, PolicySource, SourceLevel};
use crate::config::GatesConfig;
use crate::error::{check_cancelled, GateError, Result};

/// Name of the policy used when a festival declares no gates.
pub const DEFAULT_POLICY: &str = "default";

/// Registry layer a named policy was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOrigin {
    Builtin,
    User,
    Festival,
}

/// A complete, self-contained gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPolicy {
    pub name: String,
    pub description: String,
    pub origin: PolicyOrigin,
    pub source: PolicySource,
    pub exclude_patterns: Vec<String>,
    pub tasks: Vec<GateTask>,
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub name: String,
    pub origin: PolicyOrigin,
    pub level: SourceLevel,
    pub description: String,
    pub task_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, NamedPolicy>,
    load_warnings: Vec<String>,
}

fn builtin(name: &str, description: &str, tasks: &[(&str, &str)]) -> NamedPolicy {
    let source = PolicySource::builtin(name);
    NamedPolicy {
        name: name.to_string(),
        description: description.to_string(),
        origin: PolicyOrigin::Builtin,
        source: source.clone(),
        exclude_patterns: Vec::new(),
        tasks: tasks
            .iter()
            .map(|(id, label)| {
                GateTaskSpec::new(id, &format!("gates/{id}"), label).into_task(source.clone())
            })
            .collect(),
    }
}

const TESTING: (&str, &str) = ("testing_and_verify", "Testing and Verification");
const CODE_REVIEW: (&str, &str) = ("code_review", "Code Review");
const ITERATE: (&str, &str) = ("review_results_iterate", "Review Results and Iterate");
const SECURITY: (&str, &str) = ("security_audit", "Security Audit");
const PERFORMANCE: (&str, &str) = ("performance_review", "Performance Review");

/// The built-in policy set.
pub fn builtin_policies() -> Vec<NamedPolicy> {
    vec![
        builtin(
            DEFAULT_POLICY,
            "Standard gates: test, review, iterate",
            &[TESTING, CODE_REVIEW, ITERATE],
        ),
        builtin(
            "strict",
            "Standard gates plus security and performance review",
            &[TESTING, CODE_REVIEW, SECURITY, PERFORMANCE, ITERATE],
        ),
        builtin("light", "Testing only", &[TESTING]),
        builtin("none", "No quality gates", &[]),
    ]
}

impl PolicyRegistry {
    /// Registry holding only the built-in policies.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for policy in builtin_policies() {
            registry.insert(policy);
        }
        registry
    }

    /// Load all layers: built-ins, the user policy directory (if configured),
    /// and the festival-local policy directory (if `festival_root` is given).
    pub fn load(
        config: &GatesConfig,
        festival_root: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        check_cancelled(cancel)?;
        let mut registry = Self::builtin();

        if let Some(dir) = config.user_policy_dir() {
            registry.load_dir(&dir, PolicyOrigin::User);
        }
        if let Some(root) = festival_root {
            check_cancelled(cancel)?;
            registry.load_dir(&config.festival_policy_dir(root), PolicyOrigin::Festival);
        }

        debug!(policies = registry.policies.len(), "policy registry loaded");
        Ok(registry)
    }

    /// Insert or shadow a policy by name.
    pub fn insert(&mut self, policy: NamedPolicy) {
        if let Some(prev) = self.policies.get(&policy.name) {
            debug!(
                policy = %policy.name,
                shadowed = ?prev.origin,
                by = ?policy.origin,
                "named policy shadowed"
            );
        }
        self.policies.insert(policy.name.clone(), policy);
    }

    fn load_dir(&mut self, dir: &Path, origin: PolicyOrigin) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                self.warn(format!("cannot read policy dir {}: {}", dir.display(), e));
                return;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .map(|ext| ext == "yml" || ext == "yaml")
                        .unwrap_or(false)
            })
            .collect();
        paths.sort();

        for path in paths {
            match load_named_policy(&path, origin) {
                Ok(policy) => self.insert(policy),
                Err(e) => self.warn(format!("skipping policy file: {e}")),
            }
        }
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.load_warnings.push(message);
    }

    /// Owned copy of the policy named `name`.
    pub fn get_policy(&self, name: &str) -> Result<NamedPolicy> {
        self.policies
            .get(name)
            .cloned()
            .ok_or_else(|| GateError::PolicyNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    /// Listing sorted by name.
    pub fn list_info(&self) -> Vec<PolicyInfo> {
        self.policies
            .values()
            .map(|p| PolicyInfo {
                name: p.name.clone(),
                origin: p.origin,
                level: p.source.level,
                description: p.description.clone(),
                task_count: p.tasks.len(),
                path: p.source.path.clone(),
            })
            .collect()
    }

    /// Non-fatal problems met while loading policy directories.
    pub fn load_warnings(&self) -> &[String] {
        &self.load_warnings
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

fn load_named_policy(path: &Path, origin: PolicyOrigin) -> Result<NamedPolicy> {
    let doc = load_policy_document(path)?;
    let name = match doc.name.filter(|n| !n.trim().is_empty()) {
        Some(name) => name,
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| GateError::InvalidGate(format!("unnamed policy {}", path.display())))?,
    };
    if let Some(bad) = doc.tasks.iter().find(|t| t.id.trim().is_empty()) {
        return Err(GateError::InvalidGate(format!(
            "policy '{}' has a task with empty id (template {:?})",
            name, bad.template
        )));
    }

    let source = PolicySource::named_policy(&name, Some(path.to_path_buf()));
    Ok(NamedPolicy {
        tasks: doc
            .tasks
            .into_iter()
            .map(|t| t.into_task(source.clone()))
            .collect(),
        name,
        description: doc.description,
        origin,
        source,
        exclude_patterns: doc.exclude_patterns,
    })
}

//! Configuration validation: the strict counterpart of resolution.
//!
//! Where [`HierarchicalLoader`](super::merge::HierarchicalLoader) treats an
//! unusable override as absent, validation walks every phase and sequence
//! and reports each problem it finds.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::documents::{load_festival_config, load_override_file, OverrideFile};
use super::merge::{resolve_root, ConfigMerger, LoadOptions};
use super::model::{GateTaskSpec, MergedPolicy, PolicySource, SourceLevel};
use super::registry::PolicyRegistry;
use crate::config::GatesConfig;
use crate::discovery::{compile_patterns, numbered_dirs};
use crate::error::{check_cancelled, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigIssue {
    pub severity: IssueSeverity,
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ConfigIssue>,
    /// Number of override documents inspected.
    pub overrides_checked: usize,
}

impl ValidationReport {
    /// `true` when no error-severity issue was found.
    pub fn is_ok(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ConfigIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ConfigIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
    }

    fn error(&mut self, path: &Path, message: impl Into<String>) {
        self.issues.push(ConfigIssue {
            severity: IssueSeverity::Error,
            path: path.to_path_buf(),
            message: message.into(),
        });
    }

    fn warning(&mut self, path: &Path, message: impl Into<String>) {
        self.issues.push(ConfigIssue {
            severity: IssueSeverity::Warning,
            path: path.to_path_buf(),
            message: message.into(),
        });
    }
}

/// Validate every gate configuration document under `festival_root`.
///
/// Only a missing festival root or cancellation is returned as `Err`; every
/// other problem lands in the report.
pub fn validate_festival(
    festival_root: &Path,
    registry: &PolicyRegistry,
    config: &GatesConfig,
    opts: &LoadOptions,
    cancel: &CancellationToken,
) -> Result<ValidationReport> {
    check_cancelled(cancel)?;
    let root = resolve_root(festival_root)?;
    let mut report = ValidationReport::default();

    let base = match &opts.policy {
        Some(name) => match registry.get_policy(name) {
            Ok(named) => ConfigMerger::named_base(named),
            Err(e) => {
                report.error(&root, e.to_string());
                MergedPolicy::new(SourceLevel::Festival)
            }
        },
        None => match load_festival_config(&root) {
            Ok(Some((path, festival))) => {
                if let Some(section) = &festival.quality_gates {
                    check_specs(&mut report, &path, &section.tasks, "quality_gates.tasks");
                }
                check_patterns(&mut report, &path, &festival.excluded_patterns);
                ConfigMerger::festival_base(Some((&path, &festival)), registry)
            }
            Ok(None) => ConfigMerger::festival_base(None, registry),
            Err(e) => {
                report.error(&root, e.to_string());
                ConfigMerger::festival_base(None, registry)
            }
        },
    };

    for (phase_dir, _) in list_or_report(&mut report, &root) {
        check_cancelled(cancel)?;
        let phase_policy = check_level(&mut report, config, &base, &phase_dir, SourceLevel::Phase);
        for (sequence_dir, _) in list_or_report(&mut report, &phase_dir) {
            check_level(
                &mut report,
                config,
                &phase_policy,
                &sequence_dir,
                SourceLevel::Sequence,
            );
        }
    }

    tracing::info!(
        event = "config.validated",
        root = %root.display(),
        issues = report.issues.len(),
        ok = report.is_ok(),
    );
    Ok(report)
}

fn list_or_report(report: &mut ValidationReport, dir: &Path) -> Vec<(PathBuf, String)> {
    match numbered_dirs(dir) {
        Ok(dirs) => dirs,
        Err(e) => {
            report.error(dir, e.to_string());
            Vec::new()
        }
    }
}

/// Check the override in `dir` and return the policy as resolved there.
fn check_level(
    report: &mut ValidationReport,
    config: &GatesConfig,
    parent: &MergedPolicy,
    dir: &Path,
    level: SourceLevel,
) -> MergedPolicy {
    let mut policy = parent.clone();
    let Some(path) = config.find_override_file(dir) else {
        return policy;
    };
    report.overrides_checked += 1;

    let doc: OverrideFile = match load_override_file(&path) {
        Ok(doc) => doc,
        Err(e) => {
            report.error(&path, e.to_string());
            return policy;
        }
    };

    check_specs(report, &path, &doc.append, "append");
    check_patterns(report, &path, &doc.exclude_patterns);

    let step = ConfigMerger::apply_override(&mut policy, &doc, &PolicySource::at(level, &path));
    for id in step.unmatched_removals {
        let message = if doc.inherit {
            format!("remove '{id}' matches no gate")
        } else {
            format!("remove '{id}' has no effect: inherit is false")
        };
        report.warning(&path, message);
    }
    policy
}

fn check_specs(report: &mut ValidationReport, path: &Path, specs: &[GateTaskSpec], field: &str) {
    let mut seen = HashSet::new();
    for spec in specs {
        if spec.id.trim().is_empty() {
            report.error(path, format!("{field}: entry with empty id"));
            continue;
        }
        if spec
            .template
            .as_deref()
            .map(|t| t.trim().is_empty())
            .unwrap_or(false)
        {
            report.error(path, format!("{field}: gate '{}' has empty template", spec.id));
        }
        if !seen.insert(spec.id.as_str()) {
            report.warning(
                path,
                format!("{field}: duplicate gate id '{}' (last entry wins)", spec.id),
            );
        }
    }
}

fn check_patterns(report: &mut ValidationReport, path: &Path, patterns: &[String]) {
    if let Err(e) = compile_patterns(patterns) {
        report.error(path, e.to_string());
    }
}

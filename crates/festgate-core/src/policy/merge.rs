//! Hierarchical gate policy resolution.
//!
//! [`ConfigMerger`] holds the pure merge rules; [`HierarchicalLoader`] walks
//! festival → phase → sequence on disk and feeds each level's override
//! document (or its absence) through the merger.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::documents::{load_festival_config, load_override_file, FestivalConfig, OverrideFile};
use super::model::{GateTask, GateTaskSpec, MergedPolicy, PolicySource, SourceLevel};
use super::registry::{builtin_policies, NamedPolicy, PolicyRegistry, DEFAULT_POLICY};
use crate::config::GatesConfig;
use crate::error::{check_cancelled, GateError, Result};
use crate::obs;

/// What one override application changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStep {
    /// Inherited gates dropped by `inherit: false`.
    pub discarded: usize,
    /// IDs added at the end of the list.
    pub appended: Vec<String>,
    /// IDs whose existing entry was replaced in place.
    pub replaced: Vec<String>,
    /// IDs tombstoned.
    pub removed: Vec<String>,
    /// `remove` entries that matched no gate.
    pub unmatched_removals: Vec<String>,
}

/// Pure merge rules, independent of the filesystem.
pub struct ConfigMerger;

impl ConfigMerger {
    /// Festival-level base policy.
    ///
    /// - declaration present and enabled with tasks: those tasks, in order;
    /// - declaration present and enabled without tasks, or absent: the
    ///   registry's default policy;
    /// - declaration present and disabled: no gates.
    pub fn festival_base(
        festival: Option<(&Path, &FestivalConfig)>,
        registry: &PolicyRegistry,
    ) -> MergedPolicy {
        let mut policy = MergedPolicy::new(SourceLevel::Festival);

        let section = match festival {
            Some((path, config)) => {
                let source = PolicySource::at(SourceLevel::Festival, path);
                policy.sources.push(source.clone());
                policy.add_exclude_patterns(&config.excluded_patterns, &source);
                config.quality_gates.as_ref().map(|s| (s, source))
            }
            None => None,
        };

        match section {
            Some((section, _)) if !section.enabled => {
                policy.fest_yaml_enabled = false;
                policy.auto_append = section.auto_append;
            }
            Some((section, source)) if !section.tasks.is_empty() => {
                policy.fest_yaml_enabled = true;
                policy.auto_append = section.auto_append;
                for spec in &section.tasks {
                    if Self::skip_blank_id(&mut policy, spec, &source) {
                        continue;
                    }
                    Self::append_gate(&mut policy, spec.clone().into_task(source.clone()));
                }
            }
            other => {
                if let Some((section, _)) = other {
                    policy.fest_yaml_enabled = true;
                    policy.auto_append = section.auto_append;
                }
                let default = registry
                    .get_policy(DEFAULT_POLICY)
                    .ok()
                    .or_else(|| {
                        builtin_policies()
                            .into_iter()
                            .find(|p| p.name == DEFAULT_POLICY)
                    });
                let Some(default) = default else {
                    return policy;
                };
                policy.sources.push(default.source.clone());
                policy.add_exclude_patterns(&default.exclude_patterns, &default.source);
                for task in default.tasks {
                    Self::append_gate(&mut policy, task);
                }
            }
        }
        policy
    }

    /// Base policy from an explicitly selected named policy. The festival
    /// declaration is not consulted.
    pub fn named_base(named: NamedPolicy) -> MergedPolicy {
        let mut policy = MergedPolicy::new(SourceLevel::Festival);
        policy.sources.push(named.source.clone());
        policy.add_exclude_patterns(&named.exclude_patterns, &named.source);
        for task in named.tasks {
            Self::append_gate(&mut policy, task);
        }
        policy
    }

    /// Apply one level's override document.
    ///
    /// Order: optional inheritance reset, then `append`, then `remove`, then
    /// the exclude-pattern union.
    pub fn apply_override(
        policy: &mut MergedPolicy,
        doc: &OverrideFile,
        source: &PolicySource,
    ) -> MergeStep {
        let mut step = MergeStep::default();
        policy.sources.push(source.clone());

        if !doc.inherit {
            step.discarded = policy.gates.len();
            policy.gates.clear();
        }

        for spec in &doc.append {
            if Self::skip_blank_id(policy, spec, source) {
                continue;
            }
            let gate = spec.clone().into_task(source.clone());
            let id = gate.id.clone();
            if Self::append_gate(policy, gate) {
                step.replaced.push(id);
            } else {
                step.appended.push(id);
            }
        }

        for id in &doc.remove {
            match policy.position(id) {
                Some(idx) => {
                    let gate = &mut policy.gates[idx];
                    if !gate.removed {
                        gate.removed = true;
                        gate.removed_by = Some(source.clone());
                    }
                    step.removed.push(id.clone());
                }
                None => {
                    debug!(gate_id = %id, source = %source, "remove matched no gate");
                    step.unmatched_removals.push(id.clone());
                }
            }
        }

        policy.add_exclude_patterns(&doc.exclude_patterns, source);
        step
    }

    /// Gates need an ID to name their file. Blank ones are dropped with a
    /// warning.
    fn skip_blank_id(
        policy: &mut MergedPolicy,
        spec: &GateTaskSpec,
        source: &PolicySource,
    ) -> bool {
        if !spec.id.trim().is_empty() {
            return false;
        }
        warn!(source = %source, "ignoring gate with empty id");
        policy
            .warnings
            .push(format!("{source}: ignoring gate with empty id"));
        true
    }

    /// Add `gate` at the end, or replace an entry with the same ID in place.
    /// Returns `true` when an existing entry was replaced.
    fn append_gate(policy: &mut MergedPolicy, gate: GateTask) -> bool {
        match policy.position(&gate.id) {
            Some(idx) => {
                policy.gates[idx] = gate;
                true
            }
            None => {
                policy.gates.push(gate);
                false
            }
        }
    }
}

/// Options shared by the `load_for_*` entry points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Start from this named policy instead of the festival declaration.
    pub policy: Option<String>,
}

impl LoadOptions {
    pub fn with_policy(name: impl Into<String>) -> Self {
        Self {
            policy: Some(name.into()),
        }
    }
}

/// Resolves the effective policy of a festival, phase, or sequence.
pub struct HierarchicalLoader<'a> {
    registry: &'a PolicyRegistry,
    config: &'a GatesConfig,
}

impl<'a> HierarchicalLoader<'a> {
    pub fn new(registry: &'a PolicyRegistry, config: &'a GatesConfig) -> Self {
        Self { registry, config }
    }

    pub fn load_for_festival(
        &self,
        festival_root: &Path,
        opts: &LoadOptions,
        cancel: &CancellationToken,
    ) -> Result<MergedPolicy> {
        check_cancelled(cancel)?;
        let root = resolve_root(festival_root)?;
        let policy = self.base(&root, opts)?;
        obs::emit_policy_resolved(&root, &policy);
        Ok(policy)
    }

    /// `phase` may be absolute or relative to the festival root.
    pub fn load_for_phase(
        &self,
        festival_root: &Path,
        phase: &Path,
        opts: &LoadOptions,
        cancel: &CancellationToken,
    ) -> Result<MergedPolicy> {
        check_cancelled(cancel)?;
        let root = resolve_root(festival_root)?;
        let phase_dir = resolve_phase(&root, phase)?;

        let mut policy = self.base(&root, opts)?;
        self.apply_level(&mut policy, &phase_dir, SourceLevel::Phase);
        policy.level = SourceLevel::Phase;
        obs::emit_policy_resolved(&phase_dir, &policy);
        Ok(policy)
    }

    /// `sequence` may be absolute or relative to the festival root.
    pub fn load_for_sequence(
        &self,
        festival_root: &Path,
        sequence: &Path,
        opts: &LoadOptions,
        cancel: &CancellationToken,
    ) -> Result<MergedPolicy> {
        check_cancelled(cancel)?;
        let root = resolve_root(festival_root)?;
        let sequence_dir = resolve_sequence(&root, sequence)?;
        let phase_dir = sequence_dir
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| GateError::SequenceNotFound(sequence_dir.clone()))?;

        let mut policy = self.base(&root, opts)?;
        self.apply_level(&mut policy, &phase_dir, SourceLevel::Phase);
        self.apply_level(&mut policy, &sequence_dir, SourceLevel::Sequence);
        policy.level = SourceLevel::Sequence;
        obs::emit_policy_resolved(&sequence_dir, &policy);
        Ok(policy)
    }

    fn base(&self, root: &Path, opts: &LoadOptions) -> Result<MergedPolicy> {
        if let Some(name) = &opts.policy {
            let named = self.registry.get_policy(name)?;
            return Ok(ConfigMerger::named_base(named));
        }

        match load_festival_config(root) {
            Ok(Some((path, festival))) => Ok(ConfigMerger::festival_base(
                Some((&path, &festival)),
                self.registry,
            )),
            Ok(None) => Ok(ConfigMerger::festival_base(None, self.registry)),
            Err(e) => {
                warn!(error = %e, "festival config unreadable, using default policy");
                let mut policy = ConfigMerger::festival_base(None, self.registry);
                policy.warnings.push(e.to_string());
                Ok(policy)
            }
        }
    }

    /// Apply the override file in `dir`, if any. Failures leave the policy
    /// as inherited and are recorded as warnings.
    fn apply_level(&self, policy: &mut MergedPolicy, dir: &Path, level: SourceLevel) {
        let Some(path) = self.config.find_override_file(dir) else {
            policy.sources.push(PolicySource::consulted(level));
            return;
        };
        match load_override_file(&path) {
            Ok(doc) => {
                let source = PolicySource::at(level, &path);
                let step = ConfigMerger::apply_override(policy, &doc, &source);
                debug!(
                    level = %level,
                    path = %path.display(),
                    discarded = step.discarded,
                    appended = step.appended.len(),
                    replaced = step.replaced.len(),
                    removed = step.removed.len(),
                    "override applied"
                );
            }
            Err(e) => {
                warn!(level = %level, error = %e, "ignoring unusable override file");
                policy.warnings.push(e.to_string());
            }
        }
    }
}

pub(crate) fn resolve_root(festival_root: &Path) -> Result<PathBuf> {
    if !festival_root.is_dir() {
        return Err(GateError::FestivalNotFound(festival_root.to_path_buf()));
    }
    std::fs::canonicalize(festival_root).map_err(|e| GateError::io(festival_root, e))
}

fn under_root(root: &Path, target: &Path) -> PathBuf {
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        root.join(target)
    }
}

fn resolve_phase(root: &Path, phase: &Path) -> Result<PathBuf> {
    let candidate = under_root(root, phase);
    if !candidate.is_dir() {
        return Err(GateError::PhaseNotFound(candidate));
    }
    let dir = std::fs::canonicalize(&candidate).map_err(|e| GateError::io(&candidate, e))?;
    if dir.parent() != Some(root) {
        return Err(GateError::PhaseNotFound(candidate));
    }
    Ok(dir)
}

fn resolve_sequence(root: &Path, sequence: &Path) -> Result<PathBuf> {
    let candidate = under_root(root, sequence);
    if !candidate.is_dir() {
        return Err(GateError::SequenceNotFound(candidate));
    }
    let dir = std::fs::canonicalize(&candidate).map_err(|e| GateError::io(&candidate, e))?;
    if dir.parent().and_then(Path::parent) != Some(root) {
        return Err(GateError::SequenceNotFound(candidate));
    }
    Ok(dir)
}

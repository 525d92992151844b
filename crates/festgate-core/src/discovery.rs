//! Sequence discovery: which sequences of a festival receive gates.
//!
//! Layout: `<festival>/<NNN_phase>/<NN_sequence>/<NN_task>.md`. Phases whose
//! name carries a non-implementation marker are skipped, sequences matching an
//! exclude pattern are skipped, and every surviving phase must resolve to a
//! phase type.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PHASE_GOAL_FILE;
use crate::error::{check_cancelled, GateError, Result};
use crate::policy::documents::load_festival_config;

/// Case-insensitive substrings marking phases that never receive gates.
pub const NON_IMPLEMENTATION_MARKERS: &[&str] =
    &["planning", "design", "review", "uat", "docs", "research"];

/// Phase type assigned by the fallback rules.
pub const IMPLEMENTATION: &str = "implementation";

const IMPLEMENTATION_KEYWORDS: &[&str] = &[
    "implement",
    "impl",
    "build",
    "develop",
    "feature",
    "fix",
    "code",
    "integration",
];

pub fn is_non_implementation(name: &str) -> bool {
    non_implementation_marker(name).is_some()
}

/// Compiled exclude patterns.
#[derive(Debug, Clone, Default)]
pub struct ExcludeMatcher {
    patterns: Vec<glob::Pattern>,
}

impl ExcludeMatcher {
    /// The first pattern matching `name`.
    pub fn matching(&self, name: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.matches(name))
            .map(|p| p.as_str())
    }

    pub fn matches(&self, name: &str) -> bool {
        self.matching(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Compile glob patterns; the first invalid one is a validation error.
pub fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<ExcludeMatcher> {
    let patterns = patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p.as_ref()).map_err(|e| GateError::InvalidPattern {
                pattern: p.as_ref().to_string(),
                message: e.msg.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ExcludeMatcher { patterns })
}

fn is_numbered(name: &str) -> bool {
    let digits = name.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && name[digits..].starts_with('_')
}

/// Numbered child directories of `dir` (`<digits>_<name>`), sorted by name.
pub fn numbered_dirs(dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let entries = std::fs::read_dir(dir).map_err(|e| GateError::io(dir, e))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| GateError::io(dir, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() && is_numbered(&name) {
            dirs.push((path, name));
        }
    }
    dirs.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(dirs)
}

fn has_numbered_tasks(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries.filter_map(|e| e.ok()).any(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                is_numbered(&name) && name.ends_with(".md") && e.path().is_file()
            })
        })
        .unwrap_or(false)
}

/// Resolves the type of a phase directory.
pub trait PhaseTypeResolver {
    fn resolve(&self, phase_dir: &Path, phase_name: &str) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct PhaseGoalFrontmatter {
    #[serde(default)]
    phase_type: Option<String>,
    #[serde(default)]
    fest_phase_type: Option<String>,
}

/// Explicit declarations first, then filesystem fallbacks:
///
/// 1. `phase_type` / `fest_phase_type` in `PHASE_GOAL.md` frontmatter
/// 2. `phase_types` in `fest.yaml`
/// 3. implementation keywords in the phase name
/// 4. any sequence holding numbered task files
#[derive(Debug, Clone, Default)]
pub struct DefaultPhaseTypeResolver {
    declared: BTreeMap<String, String>,
}

impl DefaultPhaseTypeResolver {
    /// Resolver reading `phase_types` from the festival's `fest.yaml`.
    pub fn for_festival(festival_root: &Path) -> Self {
        let declared = match load_festival_config(festival_root) {
            Ok(Some((_, config))) => config.phase_types,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                debug!(error = %e, "phase_types unavailable");
                BTreeMap::new()
            }
        };
        Self { declared }
    }

    pub fn with_declared(mut self, phase_name: &str, phase_type: &str) -> Self {
        self.declared
            .insert(phase_name.to_string(), phase_type.to_string());
        self
    }

    fn from_goal_file(phase_dir: &Path) -> Option<String> {
        let content = std::fs::read_to_string(phase_dir.join(PHASE_GOAL_FILE)).ok()?;
        let fm: PhaseGoalFrontmatter = crate::frontmatter::parse(&content)?;
        fm.phase_type
            .or(fm.fest_phase_type)
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
    }
}

impl PhaseTypeResolver for DefaultPhaseTypeResolver {
    fn resolve(&self, phase_dir: &Path, phase_name: &str) -> Option<String> {
        if let Some(t) = Self::from_goal_file(phase_dir) {
            return Some(t);
        }
        if let Some(t) = self.declared.get(phase_name).filter(|t| !t.trim().is_empty()) {
            return Some(t.trim().to_lowercase());
        }
        let lower = phase_name.to_lowercase();
        if IMPLEMENTATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return Some(IMPLEMENTATION.to_string());
        }
        let has_tasks = numbered_dirs(phase_dir)
            .map(|seqs| seqs.iter().any(|(p, _)| has_numbered_tasks(p)))
            .unwrap_or(false);
        has_tasks.then(|| IMPLEMENTATION.to_string())
    }
}

/// A sequence eligible for gate generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceInfo {
    pub path: PathBuf,
    pub phase_path: PathBuf,
    pub name: String,
    pub phase_name: String,
    pub phase_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NonImplementationPhase { marker: String },
    Excluded { pattern: String },
    UnresolvedPhaseType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub name: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub sequences: Vec<SequenceInfo>,
    pub skipped: Vec<SkippedEntry>,
    pub warnings: Vec<String>,
}

pub struct SequenceDiscovery<R = DefaultPhaseTypeResolver> {
    resolver: R,
}

impl SequenceDiscovery<DefaultPhaseTypeResolver> {
    pub fn for_festival(festival_root: &Path) -> Self {
        Self::new(DefaultPhaseTypeResolver::for_festival(festival_root))
    }
}

impl<R: PhaseTypeResolver> SequenceDiscovery<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Walk `festival_root` and classify every numbered sequence.
    pub fn discover<S: AsRef<str>>(
        &self,
        festival_root: &Path,
        exclude_patterns: &[S],
        cancel: &CancellationToken,
    ) -> Result<DiscoveryReport> {
        check_cancelled(cancel)?;
        if !festival_root.is_dir() {
            return Err(GateError::FestivalNotFound(festival_root.to_path_buf()));
        }
        let excludes = compile_patterns(exclude_patterns)?;
        let mut report = DiscoveryReport::default();

        for (phase_dir, phase_name) in numbered_dirs(festival_root)? {
            check_cancelled(cancel)?;

            if let Some(marker) = non_implementation_marker(&phase_name) {
                debug!(phase = %phase_name, marker, "skipping non-implementation phase");
                report.skipped.push(SkippedEntry {
                    path: phase_dir,
                    name: phase_name,
                    reason: SkipReason::NonImplementationPhase {
                        marker: marker.to_string(),
                    },
                });
                continue;
            }

            let phase_type = self.resolver.resolve(&phase_dir, &phase_name);
            if let Some(marker) = phase_type.as_deref().and_then(non_implementation_marker) {
                report.skipped.push(SkippedEntry {
                    path: phase_dir,
                    name: phase_name,
                    reason: SkipReason::NonImplementationPhase {
                        marker: marker.to_string(),
                    },
                });
                continue;
            }

            let sequences = match numbered_dirs(&phase_dir) {
                Ok(s) => s,
                Err(e) => {
                    warn!(phase = %phase_name, error = %e, "cannot list sequences");
                    report.warnings.push(e.to_string());
                    continue;
                }
            };

            for (sequence_dir, sequence_name) in sequences {
                if let Some(pattern) = excludes.matching(&sequence_name) {
                    report.skipped.push(SkippedEntry {
                        path: sequence_dir,
                        name: sequence_name,
                        reason: SkipReason::Excluded {
                            pattern: pattern.to_string(),
                        },
                    });
                    continue;
                }

                let Some(phase_type) = phase_type.clone() else {
                    let message = format!(
                        "phase type unresolvable for {}; skipping sequence {}",
                        phase_name, sequence_name
                    );
                    warn!("{}", message);
                    report.warnings.push(message);
                    report.skipped.push(SkippedEntry {
                        path: sequence_dir,
                        name: sequence_name,
                        reason: SkipReason::UnresolvedPhaseType,
                    });
                    continue;
                };

                report.sequences.push(SequenceInfo {
                    path: sequence_dir,
                    phase_path: phase_dir.clone(),
                    name: sequence_name,
                    phase_name: phase_name.clone(),
                    phase_type,
                });
            }
        }

        debug!(
            sequences = report.sequences.len(),
            skipped = report.skipped.len(),
            "discovery complete"
        );
        Ok(report)
    }
}

fn non_implementation_marker(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    NON_IMPLEMENTATION_MARKERS
        .iter()
        .copied()
        .find(|m| lower.contains(m))
}

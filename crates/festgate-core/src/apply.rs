//! Festival-wide gate application: discover → resolve → generate, per
//! sequence, aggregated into one [`ApplyReport`].

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::GatesConfig;
use crate::discovery::{compile_patterns, SequenceDiscovery, SequenceInfo, SkipReason, SkippedEntry};
use crate::error::{check_cancelled, GateError, Result};
use crate::generate::{
    BuiltinRenderer, GenerateOptions, GenerateSummary, SequenceGeneration, TaskGenerator,
    TemplateRenderer,
};
use crate::obs;
use crate::policy::merge::resolve_root;
use crate::policy::{HierarchicalLoader, LoadOptions, PolicyRegistry};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    pub generate: GenerateOptions,
    /// Start from this named policy instead of the festival declaration.
    pub policy: Option<String>,
    /// Only sequences of the phase with this directory name.
    pub phase: Option<String>,
    /// Only sequences with this directory name.
    pub sequence: Option<String>,
}

impl ApplyOptions {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            policy: self.policy.clone(),
        }
    }

    fn selects(&self, sequence: &SequenceInfo) -> bool {
        self.phase
            .as_deref()
            .map_or(true, |p| p == sequence.phase_name)
            && self
                .sequence
                .as_deref()
                .map_or(true, |s| s == sequence.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub root: PathBuf,
    pub summary: GenerateSummary,
    pub sequences: Vec<SequenceGeneration>,
    pub skipped: Vec<SkippedEntry>,
}

pub struct GateApplier<'a, R = BuiltinRenderer> {
    loader: HierarchicalLoader<'a>,
    generator: TaskGenerator<R>,
}

impl<'a> GateApplier<'a, BuiltinRenderer> {
    pub fn new(registry: &'a PolicyRegistry, config: &'a GatesConfig) -> Self {
        Self::with_generator(registry, config, TaskGenerator::default())
    }
}

impl<'a, R: TemplateRenderer> GateApplier<'a, R> {
    pub fn with_generator(
        registry: &'a PolicyRegistry,
        config: &'a GatesConfig,
        generator: TaskGenerator<R>,
    ) -> Self {
        Self {
            loader: HierarchicalLoader::new(registry, config),
            generator,
        }
    }

    /// Generate gates into every eligible sequence of `festival_root`.
    ///
    /// Failures inside one sequence become summary warnings. Root
    /// resolution, an unknown named policy, invalid festival-level exclude
    /// patterns, and cancellation abort the run.
    pub fn apply(
        &self,
        festival_root: &Path,
        opts: &ApplyOptions,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport> {
        let started = Instant::now();
        let root = resolve_root(festival_root)?;
        let load_opts = opts.load_options();

        let festival_policy = self.loader.load_for_festival(&root, &load_opts, cancel)?;
        let discovery = SequenceDiscovery::for_festival(&root).discover(
            &root,
            &festival_policy.exclude_patterns,
            cancel,
        )?;

        let mut report = ApplyReport {
            root: root.clone(),
            skipped: discovery.skipped,
            ..ApplyReport::default()
        };
        report.summary.warnings.extend(festival_policy.warnings);
        report.summary.warnings.extend(discovery.warnings);

        for sequence in discovery.sequences.iter().filter(|s| opts.selects(s)) {
            check_cancelled(cancel)?;
            let _span = obs::SequenceSpan::enter(&sequence.phase_name, &sequence.name);

            match self.apply_sequence(&root, sequence, opts, &load_opts, cancel) {
                Ok(Outcome::Generated(generation, policy_warnings)) => {
                    for w in policy_warnings {
                        if !report.summary.warnings.contains(&w) {
                            report.summary.warnings.push(w);
                        }
                    }
                    report.summary.record(&generation);
                    report.sequences.push(generation);
                }
                Ok(Outcome::Excluded(pattern)) => report.skipped.push(SkippedEntry {
                    path: sequence.path.clone(),
                    name: sequence.name.clone(),
                    reason: SkipReason::Excluded { pattern },
                }),
                Err(GateError::Cancelled) => return Err(GateError::Cancelled),
                Err(e) => {
                    let message = format!("{}/{}: {}", sequence.phase_name, sequence.name, e);
                    warn!(error = %e, "sequence failed");
                    report.summary.warnings.push(message);
                }
            }
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        obs::emit_apply_finished(&root, &report.summary, duration_ms);
        Ok(report)
    }

    fn apply_sequence(
        &self,
        root: &Path,
        sequence: &SequenceInfo,
        opts: &ApplyOptions,
        load_opts: &LoadOptions,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let policy = self
            .loader
            .load_for_sequence(root, &sequence.path, load_opts, cancel)?;

        // Phase- and sequence-level overrides may add patterns discovery
        // never saw.
        let excludes = compile_patterns(&policy.exclude_patterns)?;
        if let Some(pattern) = excludes.matching(&sequence.name) {
            return Ok(Outcome::Excluded(pattern.to_string()));
        }

        let generation =
            self.generator
                .generate_for_sequence(&sequence.path, &policy.gates, &opts.generate, cancel)?;
        Ok(Outcome::Generated(generation, policy.warnings))
    }
}

enum Outcome {
    Generated(SequenceGeneration, Vec<String>),
    Excluded(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn festival() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(
            root.join("fest.yaml"),
            "quality_gates:\n  tasks:\n    - id: testing\n    - id: review\n",
        )
        .unwrap();
        for seq in ["002_IMPLEMENT/01_api", "002_IMPLEMENT/02_cli", "003_BUILD/01_core"] {
            fs::create_dir_all(root.join(seq)).unwrap();
            fs::write(root.join(seq).join("01_work.md"), "# work\n").unwrap();
        }
        fs::create_dir_all(root.join("001_PLANNING/01_scope")).unwrap();
        dir
    }

    fn apply(root: &Path, opts: &ApplyOptions) -> ApplyReport {
        let registry = PolicyRegistry::builtin();
        let config = GatesConfig::isolated();
        GateApplier::new(&registry, &config)
            .apply(root, opts, &CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn test_apply_generates_into_every_sequence() {
        let dir = festival();
        let report = apply(dir.path(), &ApplyOptions::default());
        assert_eq!(report.summary.total_sequences, 3);
        assert_eq!(report.summary.files_created, 6);
        assert!(dir.path().join("002_IMPLEMENT/02_cli/03_review.md").is_file());
        assert!(report
            .skipped
            .iter()
            .any(|s| s.name == "001_PLANNING"));
    }

    #[test]
    fn test_filters_restrict_sequences() {
        let dir = festival();
        let opts = ApplyOptions {
            phase: Some("002_IMPLEMENT".into()),
            sequence: Some("02_cli".into()),
            ..ApplyOptions::default()
        };
        let report = apply(dir.path(), &opts);
        assert_eq!(report.summary.total_sequences, 1);
        assert!(!dir.path().join("002_IMPLEMENT/01_api/02_testing.md").exists());
    }

    #[test]
    fn test_phase_level_exclude_skips_sequence() {
        let dir = festival();
        fs::write(
            dir.path().join("002_IMPLEMENT/.fest.gates.yml"),
            "exclude_patterns: [\"*_cli\"]\n",
        )
        .unwrap();
        let report = apply(dir.path(), &ApplyOptions::default());
        assert_eq!(report.summary.total_sequences, 2);
        let skipped = report.skipped.iter().find(|s| s.name == "02_cli").unwrap();
        assert_eq!(
            skipped.reason,
            SkipReason::Excluded {
                pattern: "*_cli".into()
            }
        );
    }

    #[test]
    fn test_second_apply_creates_nothing() {
        let dir = festival();
        apply(dir.path(), &ApplyOptions::default());
        let report = apply(dir.path(), &ApplyOptions::default());
        assert_eq!(report.summary.files_created, 0);
        assert_eq!(report.summary.files_existing, 6);
        assert_eq!(report.summary.sequences_updated, 0);
    }

    #[test]
    fn test_unknown_policy_is_fatal() {
        let dir = festival();
        let registry = PolicyRegistry::builtin();
        let config = GatesConfig::isolated();
        let opts = ApplyOptions {
            policy: Some("paranoid".into()),
            ..ApplyOptions::default()
        };
        let err = GateApplier::new(&registry, &config)
            .apply(dir.path(), &opts, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, GateError::PolicyNotFound(_)));
    }

    #[test]
    fn test_cancelled_apply_writes_nothing() {
        let dir = festival();
        let registry = PolicyRegistry::builtin();
        let config = GatesConfig::isolated();
        let token = CancellationToken::new();
        token.cancel();
        let err = GateApplier::new(&registry, &config)
            .apply(dir.path(), &ApplyOptions::default(), &token)
            .unwrap_err();
        assert!(matches!(err, GateError::Cancelled));
        assert!(!dir.path().join("002_IMPLEMENT/01_api/02_testing.md").exists());
    }
}

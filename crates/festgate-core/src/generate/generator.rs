//! Idempotent gate task file generation for one sequence.
//!
//! Per `(sequence, gate)` pair the target file moves through:
//!
//! ```text
//! Absent            → create (written unless dry-run)
//! Present, matching → exists
//! Present, differs  → skip "modified" | create (force, overwritten)
//! ```
//!
//! Nothing is ever deleted.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::render::{BuiltinRenderer, RenderContext, TemplateRenderer, GATE_FEST_TYPE};
use crate::error::{check_cancelled, GateError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::policy::GateTask;

/// Reason attached to a `skip` for a hand-edited gate file.
pub const REASON_MODIFIED: &str = "modified";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Report what would happen without touching the filesystem.
    pub dry_run: bool,
    /// Overwrite gate files that differ from the generated content.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerateKind {
    Create,
    Skip,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResult {
    pub kind: GenerateKind,
    pub path: PathBuf,
    pub gate_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// SHA-256 of the content generation produces for this file.
    pub content_digest: String,
}

/// Results and warnings for one sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceGeneration {
    pub sequence: PathBuf,
    pub results: Vec<GenerateResult>,
    pub warnings: Vec<String>,
}

impl SequenceGeneration {
    pub fn count(&self, kind: GenerateKind) -> usize {
        self.results.iter().filter(|r| r.kind == kind).count()
    }
}

/// Aggregate over all sequences of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateSummary {
    pub total_sequences: usize,
    /// Sequences with at least one `create`.
    pub sequences_updated: usize,
    pub files_created: usize,
    pub files_skipped: usize,
    pub files_existing: usize,
    pub warnings: Vec<String>,
}

impl GenerateSummary {
    pub fn record(&mut self, generation: &SequenceGeneration) {
        let created = generation.count(GenerateKind::Create);
        self.total_sequences += 1;
        if created > 0 {
            self.sequences_updated += 1;
        }
        self.files_created += created;
        self.files_skipped += generation.count(GenerateKind::Skip);
        self.files_existing += generation.count(GenerateKind::Exists);
        self.warnings.extend(generation.warnings.iter().cloned());
    }

    /// Pairs attempted across all recorded sequences.
    pub fn files_attempted(&self) -> usize {
        self.files_created + self.files_skipped + self.files_existing
    }
}

/// Hex SHA-256 of `content`.
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

struct TaskFile {
    number: u32,
    width: usize,
    slug: String,
    path: PathBuf,
}

fn parse_task_file(path: &Path) -> Option<TaskFile> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".md")?;
    let digits = stem.chars().take_while(|c| c.is_ascii_digit()).count();
    let slug = stem[digits..].strip_prefix('_')?;
    if digits == 0 || slug.is_empty() {
        return None;
    }
    Some(TaskFile {
        number: stem[..digits].parse().ok()?,
        width: digits,
        slug: slug.to_string(),
        path: path.to_path_buf(),
    })
}

#[derive(Deserialize)]
struct TaskFrontmatter {
    #[serde(default)]
    fest_type: Option<String>,
}

fn is_gate_file(file: &TaskFile, gate_slugs: &HashSet<String>) -> bool {
    if gate_slugs.contains(&file.slug) {
        return true;
    }
    std::fs::read_to_string(&file.path)
        .ok()
        .and_then(|c| crate::frontmatter::parse::<TaskFrontmatter>(&c))
        .and_then(|fm| fm.fest_type)
        .map(|t| t == GATE_FEST_TYPE)
        .unwrap_or(false)
}

/// File-name slug for a gate ID.
pub fn gate_slug(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Planned placement of one gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePlacement {
    pub task_number: u32,
    pub path: PathBuf,
}

/// Compute target paths, in gate order.
///
/// A gate whose slug already names a task file keeps that file. Gates without
/// one get the next numbers after the highest non-gate task that no existing
/// file holds.
pub fn plan_placements(sequence_dir: &Path, gates: &[&GateTask]) -> Result<Vec<GatePlacement>> {
    let entries = std::fs::read_dir(sequence_dir).map_err(|e| GateError::io(sequence_dir, e))?;
    let gate_slugs: HashSet<String> = gates.iter().map(|g| gate_slug(&g.id)).collect();

    let mut highest = 0u32;
    let mut width = 2usize;
    let mut taken: HashSet<u32> = HashSet::new();
    let mut by_slug: HashMap<String, TaskFile> = HashMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| GateError::io(sequence_dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file) = parse_task_file(&path) else {
            continue;
        };
        width = width.max(file.width);
        taken.insert(file.number);
        if !is_gate_file(&file, &gate_slugs) {
            highest = highest.max(file.number);
            continue;
        }
        match by_slug.get(&file.slug) {
            Some(kept) if kept.number <= file.number => {}
            _ => {
                by_slug.insert(file.slug.clone(), file);
            }
        }
    }

    let mut next = highest;
    let mut placements = Vec::with_capacity(gates.len());
    for gate in gates {
        let slug = gate_slug(&gate.id);
        if let Some(file) = by_slug.get(&slug) {
            placements.push(GatePlacement {
                task_number: file.number,
                path: file.path.clone(),
            });
            continue;
        }
        let task_number = loop {
            let Some(candidate) = next.checked_add(1) else {
                return Err(GateError::InvalidGate(format!(
                    "no task number left after {} in {}",
                    next,
                    sequence_dir.display()
                )));
            };
            next = candidate;
            if taken.insert(candidate) {
                break candidate;
            }
        };
        let file_name = format!("{:0width$}_{}.md", task_number, slug, width = width);
        placements.push(GatePlacement {
            task_number,
            path: sequence_dir.join(file_name),
        });
    }
    Ok(placements)
}

fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Materializes resolved gates as task files.
pub struct TaskGenerator<R = BuiltinRenderer> {
    renderer: R,
}

impl Default for TaskGenerator<BuiltinRenderer> {
    fn default() -> Self {
        Self::new(BuiltinRenderer)
    }
}

impl<R: TemplateRenderer> TaskGenerator<R> {
    pub fn new(renderer: R) -> Self {
        Self { renderer }
    }

    /// Generate the active gates of `gates` into `sequence_dir`.
    ///
    /// Write failures are reported per file (a `skip` result plus a warning);
    /// only a missing or unreadable sequence directory, a render failure, or
    /// cancellation returns `Err`.
    pub fn generate_for_sequence(
        &self,
        sequence_dir: &Path,
        gates: &[GateTask],
        opts: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<SequenceGeneration> {
        check_cancelled(cancel)?;
        if !sequence_dir.is_dir() {
            return Err(GateError::SequenceNotFound(sequence_dir.to_path_buf()));
        }

        let active: Vec<&GateTask> = gates.iter().filter(|g| g.is_active()).collect();
        let placements = plan_placements(sequence_dir, &active)?;

        let sequence_name = dir_name(sequence_dir);
        let phase_name = sequence_dir.parent().map(dir_name).unwrap_or_default();
        let mut generation = SequenceGeneration {
            sequence: sequence_dir.to_path_buf(),
            ..SequenceGeneration::default()
        };

        for (gate, placement) in active.into_iter().zip(placements) {
            let ctx = RenderContext {
                sequence_name: &sequence_name,
                phase_name: &phase_name,
                task_number: placement.task_number,
            };
            let content = self.renderer.render(gate, &ctx)?;
            let result = self.realize(sequence_dir, gate, placement.path, &content, opts);
            let result = match result {
                Ok(result) => result,
                Err((result, warning)) => {
                    warn!(gate_id = %gate.id, "{}", warning);
                    generation.warnings.push(warning);
                    result
                }
            };
            obs::emit_gate_file(&result, opts.dry_run);
            METRICS.record(result.kind);
            generation.results.push(result);
        }

        obs::emit_sequence_generated(&generation, opts.dry_run);
        METRICS.inc_sequences();
        Ok(generation)
    }

    /// Decide and (unless dry-run) perform the transition for one file.
    /// `Err` carries the result to record plus a warning.
    fn realize(
        &self,
        sequence_dir: &Path,
        gate: &GateTask,
        path: PathBuf,
        content: &str,
        opts: &GenerateOptions,
    ) -> std::result::Result<GenerateResult, (GenerateResult, String)> {
        let result = |kind: GenerateKind, path: PathBuf, reason: Option<String>| GenerateResult {
            kind,
            path,
            gate_id: gate.id.clone(),
            reason,
            content_digest: content_digest(content.as_bytes()),
        };

        let reason = match std::fs::read(&path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            // Nothing to compare against; the write below reports the clash.
            Err(_) if path.is_dir() => None,
            Err(e) => {
                let warning = format!("cannot read {}: {}", path.display(), e);
                return Err((
                    result(GenerateKind::Skip, path, Some(format!("unreadable: {e}"))),
                    warning,
                ));
            }
            Ok(existing) if existing == content.as_bytes() => {
                return Ok(result(GenerateKind::Exists, path, None));
            }
            Ok(_) if !opts.force => {
                return Ok(result(
                    GenerateKind::Skip,
                    path,
                    Some(REASON_MODIFIED.to_string()),
                ));
            }
            Ok(_) => Some("overwritten".to_string()),
        };

        if !opts.dry_run {
            if let Err(e) = write_atomic(sequence_dir, &path, content.as_bytes()) {
                let warning = format!("write failed for {}: {}", path.display(), e);
                return Err((
                    result(GenerateKind::Skip, path, Some(format!("write failed: {e}"))),
                    warning,
                ));
            }
        }
        Ok(result(GenerateKind::Create, path, reason))
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{GateTaskSpec, PolicySource};
    use std::fs;

    fn gates(ids: &[&str]) -> Vec<GateTask> {
        ids.iter()
            .map(|id| {
                GateTaskSpec::new(id, &format!("gates/{id}"), id)
                    .into_task(PolicySource::builtin("default"))
            })
            .collect()
    }

    fn sequence() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let seq = dir.path().join("002_IMPLEMENT").join("01_api");
        fs::create_dir_all(&seq).unwrap();
        fs::write(seq.join("01_design_schema.md"), "# one\n").unwrap();
        fs::write(seq.join("02_build_handlers.md"), "# two\n").unwrap();
        (dir, seq)
    }

    fn run(seq: &Path, gates: &[GateTask], opts: GenerateOptions) -> SequenceGeneration {
        TaskGenerator::default()
            .generate_for_sequence(seq, gates, &opts, &CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn test_parse_task_file() {
        let f = parse_task_file(Path::new("/s/003_write_docs.md")).unwrap();
        assert_eq!(f.number, 3);
        assert_eq!(f.width, 3);
        assert_eq!(f.slug, "write_docs");
        assert!(parse_task_file(Path::new("/s/README.md")).is_none());
        assert!(parse_task_file(Path::new("/s/01_.md")).is_none());
        assert!(parse_task_file(Path::new("/s/01_notes.txt")).is_none());
    }

    #[test]
    fn test_gate_slug() {
        assert_eq!(gate_slug("Security Audit!"), "security_audit_");
        assert_eq!(gate_slug("code-review"), "code-review");
    }

    #[test]
    fn test_placements_follow_highest_non_gate_task() {
        let (_dir, seq) = sequence();
        let gates = gates(&["testing", "review"]);
        let refs: Vec<&GateTask> = gates.iter().collect();
        let plan = plan_placements(&seq, &refs).unwrap();
        assert_eq!(plan[0].path, seq.join("03_testing.md"));
        assert_eq!(plan[1].path, seq.join("04_review.md"));
    }

    #[test]
    fn test_existing_gate_files_do_not_shift_numbering() {
        let (_dir, seq) = sequence();
        let gates = gates(&["testing", "review"]);
        run(&seq, &gates, GenerateOptions::default());

        let refs: Vec<&GateTask> = gates.iter().collect();
        let plan = plan_placements(&seq, &refs).unwrap();
        assert_eq!(plan[0].path, seq.join("03_testing.md"));
    }

    #[test]
    fn test_files_of_dropped_gates_keep_their_numbers() {
        let (_dir, seq) = sequence();
        run(&seq, &gates(&["old_gate"]), GenerateOptions::default());
        assert!(seq.join("03_old_gate.md").exists());

        let current = gates(&["testing"]);
        let refs: Vec<&GateTask> = current.iter().collect();
        let plan = plan_placements(&seq, &refs).unwrap();
        assert_eq!(plan[0].path, seq.join("04_testing.md"));
    }

    fn listing(seq: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(seq)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_shrunk_gate_list_reuses_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let seq = dir.path().join("002_IMPLEMENT").join("01_api");
        fs::create_dir_all(&seq).unwrap();
        fs::write(seq.join("01_work.md"), "# work\n").unwrap();

        run(&seq, &gates(&["testing", "review"]), GenerateOptions::default());
        let gen = run(&seq, &gates(&["review"]), GenerateOptions::default());

        assert_eq!(gen.results.len(), 1);
        assert_eq!(gen.results[0].kind, GenerateKind::Exists);
        assert_eq!(gen.results[0].path, seq.join("03_review.md"));
        assert_eq!(
            listing(&seq),
            vec!["01_work.md", "02_testing.md", "03_review.md"]
        );
    }

    #[test]
    fn test_reordered_gates_create_nothing() {
        let (_dir, seq) = sequence();
        run(&seq, &gates(&["testing", "review"]), GenerateOptions::default());
        let gen = run(&seq, &gates(&["review", "testing"]), GenerateOptions::default());
        assert_eq!(gen.count(GenerateKind::Exists), 2);
        assert_eq!(listing(&seq).len(), 4);
    }

    #[test]
    fn test_new_gate_skips_numbers_held_by_gate_files() {
        let (_dir, seq) = sequence();
        run(&seq, &gates(&["testing", "review"]), GenerateOptions::default());
        let gen = run(
            &seq,
            &gates(&["review", "security_audit"]),
            GenerateOptions::default(),
        );
        assert_eq!(gen.results[0].kind, GenerateKind::Exists);
        assert_eq!(gen.results[1].path, seq.join("05_security_audit.md"));
    }

    #[test]
    fn test_task_number_overflow_is_invalid_gate() {
        let dir = tempfile::tempdir().unwrap();
        let seq = dir.path().join("01_api");
        fs::create_dir_all(&seq).unwrap();
        fs::write(seq.join("4294967295_work.md"), "# work\n").unwrap();

        let err = TaskGenerator::default()
            .generate_for_sequence(
                &seq,
                &gates(&["testing"]),
                &GenerateOptions::default(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidGate(_)));
        assert_eq!(listing(&seq), vec!["4294967295_work.md"]);
    }

    #[test]
    fn test_write_failure_is_skip_with_warning() {
        let (_dir, seq) = sequence();
        fs::create_dir(seq.join("03_testing.md")).unwrap();

        let gen = run(&seq, &gates(&["testing", "review"]), GenerateOptions::default());
        let failed = &gen.results[0];
        assert_eq!(failed.kind, GenerateKind::Skip);
        assert!(failed
            .reason
            .as_deref()
            .unwrap_or_default()
            .starts_with("write failed"));
        assert_eq!(gen.warnings.len(), 1);
        assert_eq!(gen.results[1].kind, GenerateKind::Create);
        assert!(seq.join("04_review.md").is_file());
    }

    #[test]
    fn test_create_then_exists() {
        let (_dir, seq) = sequence();
        let gates = gates(&["testing", "review"]);

        let first = run(&seq, &gates, GenerateOptions::default());
        assert_eq!(first.count(GenerateKind::Create), 2);
        assert!(seq.join("03_testing.md").is_file());

        let second = run(&seq, &gates, GenerateOptions::default());
        assert_eq!(second.count(GenerateKind::Create), 0);
        assert_eq!(second.count(GenerateKind::Exists), 2);
        assert!(second.warnings.is_empty());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let (_dir, seq) = sequence();
        let gen = run(
            &seq,
            &gates(&["testing", "review"]),
            GenerateOptions {
                dry_run: true,
                force: false,
            },
        );
        assert_eq!(gen.count(GenerateKind::Create), 2);
        assert!(!seq.join("03_testing.md").exists());
        assert!(!seq.join("04_review.md").exists());
    }

    #[test]
    fn test_modified_file_skip_or_force() {
        let (_dir, seq) = sequence();
        let gates = gates(&["testing"]);
        run(&seq, &gates, GenerateOptions::default());
        let target = seq.join("03_testing.md");
        fs::write(&target, "hand edited\n").unwrap();

        let skipped = run(&seq, &gates, GenerateOptions::default());
        assert_eq!(skipped.results[0].kind, GenerateKind::Skip);
        assert_eq!(skipped.results[0].reason.as_deref(), Some(REASON_MODIFIED));
        assert_eq!(fs::read_to_string(&target).unwrap(), "hand edited\n");

        let forced = run(
            &seq,
            &gates,
            GenerateOptions {
                dry_run: false,
                force: true,
            },
        );
        assert_eq!(forced.results[0].kind, GenerateKind::Create);
        assert_ne!(fs::read_to_string(&target).unwrap(), "hand edited\n");
    }

    #[test]
    fn test_inactive_gates_are_not_generated() {
        let (_dir, seq) = sequence();
        let mut gates = gates(&["testing", "review", "iterate"]);
        gates[0].removed = true;
        gates[2].enabled = false;
        let gen = run(&seq, &gates, GenerateOptions::default());
        assert_eq!(gen.results.len(), 1);
        assert_eq!(gen.results[0].path, seq.join("03_review.md"));
    }

    #[test]
    fn test_summary_arithmetic() {
        let (_dir, seq) = sequence();
        let gates = gates(&["testing", "review"]);
        let mut summary = GenerateSummary::default();
        summary.record(&run(&seq, &gates, GenerateOptions::default()));
        fs::write(seq.join("04_review.md"), "edited").unwrap();
        summary.record(&run(&seq, &gates, GenerateOptions::default()));

        assert_eq!(summary.total_sequences, 2);
        assert_eq!(summary.sequences_updated, 1);
        assert_eq!(summary.files_created, 2);
        assert_eq!(summary.files_existing, 1);
        assert_eq!(summary.files_skipped, 1);
        assert_eq!(summary.files_attempted(), 4);
    }

    #[test]
    fn test_missing_sequence_is_not_found() {
        let err = TaskGenerator::default()
            .generate_for_sequence(
                Path::new("/no/such/sequence"),
                &gates(&["testing"]),
                &GenerateOptions::default(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, GateError::SequenceNotFound(_)));
    }

    #[test]
    fn test_cancelled_before_start() {
        let (_dir, seq) = sequence();
        let token = CancellationToken::new();
        token.cancel();
        let err = TaskGenerator::default()
            .generate_for_sequence(&seq, &gates(&["testing"]), &GenerateOptions::default(), &token)
            .unwrap_err();
        assert!(matches!(err, GateError::Cancelled));
        assert!(!seq.join("03_testing.md").exists());
    }
}

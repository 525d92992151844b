//! Structured lifecycle events.
//!
//! Every event carries an `event` field (`policy.resolved`, `gate.file`,
//! `sequence.generated`, `apply.finished`) so JSON logs can be filtered on it.

use std::path::Path;

use tracing::info;

use crate::generate::{GenerateResult, GenerateSummary, SequenceGeneration};
use crate::policy::MergedPolicy;

/// RAII guard entering a span tagged with the sequence being processed.
pub struct SequenceSpan {
    _span: tracing::span::EnteredSpan,
}

impl SequenceSpan {
    pub fn enter(phase: &str, sequence: &str) -> Self {
        let span = tracing::info_span!("festgate.sequence", phase = %phase, sequence = %sequence);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_policy_resolved(target: &Path, policy: &MergedPolicy) {
    info!(
        event = "policy.resolved",
        target = %target.display(),
        level = %policy.level,
        gates = policy.gates.len(),
        active = policy.active_gates().len(),
        sources = policy.sources.len(),
        exclude_patterns = policy.exclude_patterns.len(),
    );
}

pub fn emit_gate_file(result: &GenerateResult, dry_run: bool) {
    tracing::debug!(
        event = "gate.file",
        gate_id = %result.gate_id,
        kind = ?result.kind,
        path = %result.path.display(),
        reason = result.reason.as_deref().unwrap_or(""),
        dry_run,
    );
}

pub fn emit_sequence_generated(generation: &SequenceGeneration, dry_run: bool) {
    info!(
        event = "sequence.generated",
        sequence = %generation.sequence.display(),
        results = generation.results.len(),
        warnings = generation.warnings.len(),
        dry_run,
    );
}

pub fn emit_apply_finished(root: &Path, summary: &GenerateSummary, duration_ms: u64) {
    info!(
        event = "apply.finished",
        root = %root.display(),
        total_sequences = summary.total_sequences,
        sequences_updated = summary.sequences_updated,
        files_created = summary.files_created,
        files_skipped = summary.files_skipped,
        files_existing = summary.files_existing,
        warnings = summary.warnings.len(),
        duration_ms,
    );
}

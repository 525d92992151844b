//! Lifecycle events reach the tracing subscriber.

use std::fs;
use std::path::Path;

use festgate_core::obs::{emit_apply_finished, SequenceSpan};
use festgate_core::{
    ApplyOptions, GateApplier, GatesConfig, GenerateSummary, HierarchicalLoader, LoadOptions,
    PolicyRegistry,
};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn policy_resolution_emits_event() {
    let dir = tempfile::tempdir().unwrap();
    let registry = PolicyRegistry::builtin();
    let config = GatesConfig::isolated();
    HierarchicalLoader::new(&registry, &config)
        .load_for_festival(dir.path(), &LoadOptions::default(), &CancellationToken::new())
        .unwrap();
    assert!(logs_contain("policy.resolved"));
}

#[traced_test]
#[test]
fn apply_emits_sequence_and_finish_events() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("002_IMPLEMENT/01_api")).unwrap();
    let registry = PolicyRegistry::builtin();
    let config = GatesConfig::isolated();
    GateApplier::new(&registry, &config)
        .apply(
            dir.path(),
            &ApplyOptions::default(),
            &CancellationToken::new(),
        )
        .unwrap();
    assert!(logs_contain("sequence.generated"));
    assert!(logs_contain("apply.finished"));
}

#[traced_test]
#[test]
fn sequence_span_enter_and_finish_event() {
    let _span = SequenceSpan::enter("002_IMPLEMENT", "01_api");
    emit_apply_finished(Path::new("/festival"), &GenerateSummary::default(), 3);
    assert!(logs_contain("apply.finished"));
}

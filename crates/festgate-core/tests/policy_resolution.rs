//! Hierarchical policy resolution over on-disk festival trees.

use std::fs;
use std::path::Path;

use festgate_core::{
    GatesConfig, HierarchicalLoader, LoadOptions, MergedPolicy, PolicyOrigin, PolicyRegistry,
    SourceLevel,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn festival(gates: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let tasks: String = gates.iter().map(|g| format!("    - id: {g}\n")).collect();
    write(dir.path(), "fest.yaml", &format!("quality_gates:\n  tasks:\n{tasks}"));
    fs::create_dir_all(dir.path().join("002_IMPLEMENT/01_api")).unwrap();
    dir
}

fn sequence_policy(root: &Path, opts: &LoadOptions) -> MergedPolicy {
    let registry = PolicyRegistry::builtin();
    let config = GatesConfig::isolated();
    HierarchicalLoader::new(&registry, &config)
        .load_for_sequence(
            root,
            Path::new("002_IMPLEMENT/01_api"),
            opts,
            &CancellationToken::new(),
        )
        .unwrap()
}

fn ids(policy: &MergedPolicy) -> Vec<&str> {
    policy.gates.iter().map(|g| g.id.as_str()).collect()
}

#[test]
fn sequence_append_lands_after_inherited_gates() {
    let dir = festival(&["testing", "review", "iterate"]);
    write(
        dir.path(),
        "002_IMPLEMENT/01_api/.fest.gates.yml",
        "append:\n  - id: security_audit\n    template: gates/security_audit\n",
    );

    let policy = sequence_policy(dir.path(), &LoadOptions::default());
    assert_eq!(
        ids(&policy),
        vec!["testing", "review", "iterate", "security_audit"]
    );
    let audit = policy.gate("security_audit").unwrap();
    assert_eq!(audit.source_level(), Some(SourceLevel::Sequence));
    assert_eq!(policy.level, SourceLevel::Sequence);
}

#[test]
fn phase_reset_with_remove_of_discarded_gate_yields_nothing() {
    let dir = festival(&["testing", "review"]);
    write(
        dir.path(),
        "002_IMPLEMENT/.fest.gates.yml",
        "inherit: false\nremove: [testing]\n",
    );

    let registry = PolicyRegistry::builtin();
    let config = GatesConfig::isolated();
    let policy = HierarchicalLoader::new(&registry, &config)
        .load_for_phase(
            dir.path(),
            Path::new("002_IMPLEMENT"),
            &LoadOptions::default(),
            &CancellationToken::new(),
        )
        .unwrap();
    assert!(policy.gates.is_empty());
    assert!(policy.warnings.is_empty());
}

#[test]
fn reset_chain_drops_every_ancestor_gate() {
    let dir = festival(&["testing", "review"]);
    write(
        dir.path(),
        "002_IMPLEMENT/.fest.gates.yml",
        "append:\n  - id: lint\n",
    );
    write(
        dir.path(),
        "002_IMPLEMENT/01_api/.fest.gates.yml",
        "inherit: false\nappend:\n  - id: smoke\n",
    );

    let policy = sequence_policy(dir.path(), &LoadOptions::default());
    assert_eq!(ids(&policy), vec!["smoke"]);
    assert!(policy
        .gates
        .iter()
        .all(|g| g.source_level() == Some(SourceLevel::Sequence)));
}

#[test]
fn exclude_patterns_are_a_union_of_every_level() {
    let dir = festival(&["testing"]);
    write(
        dir.path(),
        "fest.yaml",
        "quality_gates:\n  tasks:\n    - id: testing\nexcluded_patterns: [\"*_docs\"]\n",
    );
    write(
        dir.path(),
        "002_IMPLEMENT/.fest.gates.yml",
        "exclude_patterns: [\"*_spike\", \"*_docs\"]\n",
    );
    write(
        dir.path(),
        "002_IMPLEMENT/01_api/.fest.gates.yaml",
        "exclude_patterns: [\"wip_*\"]\n",
    );

    let policy = sequence_policy(dir.path(), &LoadOptions::default());
    assert_eq!(policy.exclude_patterns, vec!["*_docs", "*_spike", "wip_*"]);
    assert_eq!(
        policy.exclude_sources["*_docs"].level,
        SourceLevel::Festival
    );
    assert_eq!(policy.exclude_sources["wip_*"].level, SourceLevel::Sequence);
}

#[test]
fn remove_keeps_tombstone_with_original_source() {
    let dir = festival(&["testing", "review"]);
    write(
        dir.path(),
        "002_IMPLEMENT/01_api/.fest.gates.yml",
        "remove: [review]\n",
    );

    let policy = sequence_policy(dir.path(), &LoadOptions::default());
    assert_eq!(ids(&policy), vec!["testing", "review"]);
    let review = policy.gate("review").unwrap();
    assert!(review.removed);
    assert_eq!(review.source_level(), Some(SourceLevel::Festival));
    assert_eq!(policy.active_gates().len(), 1);
}

#[test]
fn malformed_override_is_treated_as_absent() {
    let dir = festival(&["testing", "review"]);
    write(
        dir.path(),
        "002_IMPLEMENT/.fest.gates.yml",
        "append: [unclosed",
    );

    let policy = sequence_policy(dir.path(), &LoadOptions::default());
    assert_eq!(ids(&policy), vec!["testing", "review"]);
    assert_eq!(policy.warnings.len(), 1);
}

#[test]
fn missing_fest_yaml_falls_back_to_builtin_default() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("002_IMPLEMENT/01_api")).unwrap();

    let policy = sequence_policy(dir.path(), &LoadOptions::default());
    assert_eq!(
        ids(&policy),
        vec!["testing_and_verify", "code_review", "review_results_iterate"]
    );
    assert!(!policy.fest_yaml_enabled);
}

#[test]
fn named_policy_layers_shadow_builtins() {
    let dir = festival(&["testing"]);
    let user = tempfile::tempdir().unwrap();
    write(
        user.path(),
        "gates/policies/strict.yml",
        "description: team strict\ntasks:\n  - id: testing\n  - id: fuzzing\n",
    );
    write(
        dir.path(),
        ".festival/gates/policies/light.yaml",
        "name: light\ntasks:\n  - id: smoke\n",
    );

    let config = GatesConfig::isolated().with_user_config_dir(user.path());
    let registry =
        PolicyRegistry::load(&config, Some(dir.path()), &CancellationToken::new()).unwrap();

    let strict = registry.get_policy("strict").unwrap();
    assert_eq!(strict.origin, PolicyOrigin::User);
    assert_eq!(strict.tasks.len(), 2);
    assert_eq!(
        registry.get_policy("light").unwrap().origin,
        PolicyOrigin::Festival
    );
    assert_eq!(registry.get_policy("none").unwrap().origin, PolicyOrigin::Builtin);

    let policy = HierarchicalLoader::new(&registry, &config)
        .load_for_festival(
            dir.path(),
            &LoadOptions::with_policy("light"),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(ids(&policy), vec!["smoke"]);
}

#[test]
fn sequence_outside_festival_is_not_found() {
    let dir = festival(&["testing"]);
    let registry = PolicyRegistry::builtin();
    let config = GatesConfig::isolated();
    let err = HierarchicalLoader::new(&registry, &config)
        .load_for_sequence(
            dir.path(),
            Path::new("002_IMPLEMENT"),
            &LoadOptions::default(),
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), festgate_core::ErrorKind::NotFound);
}

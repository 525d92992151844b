//! festgate - quality-gate policies for festival trees
//!
//! ## Commands
//!
//! - `show`: Print the resolved gate policy of a festival, phase, or sequence
//! - `apply`: Generate gate task files into every eligible sequence
//! - `policies`: List or inspect named policies
//! - `validate`: Check every gate configuration document

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Level};

use festgate_core::discovery::SkipReason;
use festgate_core::metrics::METRICS;
use festgate_core::policy::{IssueSeverity, NamedPolicy};
use festgate_core::{
    validate_festival, ApplyOptions, ApplyReport, GateApplier, GateState, GatesConfig,
    GenerateKind, GenerateOptions, HierarchicalLoader, LoadOptions, MergedPolicy, PolicyInfo,
    PolicyRegistry, ValidationReport,
};

#[derive(Parser)]
#[command(name = "festgate")]
#[command(author = "Stevedores Org")]
#[command(version = festgate_core::VERSION)]
#[command(about = "Hierarchical quality-gate policies for festivals", long_about = None)]
struct Cli {
    /// Festival root directory
    #[arg(short, long, global = true, default_value = ".", env = "FESTGATE_FESTIVAL")]
    festival: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved gate policy
    Show {
        /// Phase directory name
        #[arg(long)]
        phase: Option<String>,

        /// Sequence directory name (relative to --phase, or to the festival)
        #[arg(long)]
        sequence: Option<String>,

        /// Start from this named policy instead of fest.yaml
        #[arg(long)]
        policy: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Generate gate task files into eligible sequences
    Apply {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Overwrite gate files that were edited by hand
        #[arg(long)]
        force: bool,

        /// Start from this named policy instead of fest.yaml
        #[arg(long)]
        policy: Option<String>,

        /// Only this phase
        #[arg(long)]
        phase: Option<String>,

        /// Only this sequence
        #[arg(long)]
        sequence: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Named policy operations
    Policies {
        #[command(subcommand)]
        action: PoliciesAction,
    },

    /// Validate gate configuration documents
    Validate {
        /// Validate against this named policy instead of fest.yaml
        #[arg(long)]
        policy: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PoliciesAction {
    /// List available named policies
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one named policy
    Show {
        name: String,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    festgate_core::telemetry::init_tracing(cli.json_logs, level);

    let root = cli.festival;
    let output = match cli.command {
        Commands::Show {
            phase,
            sequence,
            policy,
            json,
        } => {
            run_blocking(move |cancel| cmd_show(&root, phase, sequence, policy, json, &cancel))
                .await?
        }
        Commands::Apply {
            dry_run,
            force,
            policy,
            phase,
            sequence,
            json,
        } => {
            let opts = ApplyOptions {
                generate: GenerateOptions { dry_run, force },
                policy,
                phase,
                sequence,
            };
            let output = run_blocking(move |cancel| cmd_apply(&root, &opts, json, &cancel)).await;
            METRICS.flush();
            output?
        }
        Commands::Policies { action } => match action {
            PoliciesAction::List { json } => {
                run_blocking(move |cancel| cmd_policies_list(&root, json, &cancel)).await?
            }
            PoliciesAction::Show { name, json } => {
                run_blocking(move |cancel| cmd_policies_show(&root, &name, json, &cancel)).await?
            }
        },
        Commands::Validate { policy, json } => {
            run_blocking(move |cancel| cmd_validate(&root, policy, json, &cancel)).await?
        }
    };

    print!("{}", output);
    Ok(())
}

/// Run `f` on the blocking pool, cancelling its token on Ctrl-C.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(CancellationToken) -> Result<T> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling");
            signal_token.cancel();
        }
    });

    let result = tokio::task::spawn_blocking(move || f(cancel))
        .await
        .context("Engine task failed")?;
    watcher.abort();
    result
}

fn load_registry(root: &Path, cancel: &CancellationToken) -> Result<(GatesConfig, PolicyRegistry)> {
    let config = GatesConfig::from_env();
    let registry =
        PolicyRegistry::load(&config, Some(root), cancel).context("Failed to load named policies")?;
    Ok((config, registry))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    let mut out = serde_json::to_string_pretty(value)?;
    out.push('\n');
    Ok(out)
}

fn cmd_show(
    root: &Path,
    phase: Option<String>,
    sequence: Option<String>,
    policy: Option<String>,
    json: bool,
    cancel: &CancellationToken,
) -> Result<String> {
    let (config, registry) = load_registry(root, cancel)?;
    let loader = HierarchicalLoader::new(&registry, &config);
    let opts = LoadOptions { policy };

    let (target, merged) = match (phase, sequence) {
        (Some(phase), Some(sequence)) => {
            let target = Path::new(&phase).join(sequence);
            let merged = loader.load_for_sequence(root, &target, &opts, cancel);
            (target, merged)
        }
        (None, Some(sequence)) => {
            let target = PathBuf::from(sequence);
            let merged = loader.load_for_sequence(root, &target, &opts, cancel);
            (target, merged)
        }
        (Some(phase), None) => {
            let target = PathBuf::from(phase);
            let merged = loader.load_for_phase(root, &target, &opts, cancel);
            (target, merged)
        }
        (None, None) => (
            PathBuf::from("."),
            loader.load_for_festival(root, &opts, cancel),
        ),
    };
    let merged =
        merged.with_context(|| format!("Failed to resolve policy for {}", target.display()))?;

    if json {
        to_json(&merged)
    } else {
        Ok(render_policy(&merged))
    }
}

fn render_policy(policy: &MergedPolicy) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Level: {}", policy.level);
    let _ = writeln!(out, "Sources:");
    for source in &policy.sources {
        let _ = writeln!(out, "  - {}", source);
    }
    if policy.gates.is_empty() {
        let _ = writeln!(out, "Gates: none");
    } else {
        let _ = writeln!(out, "Gates:");
        for gate in &policy.gates {
            let state = match gate.state() {
                GateState::Active => "active",
                GateState::Disabled => "disabled",
                GateState::Removed => "removed",
            };
            let origin = gate
                .source_level()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = write!(out, "  {:<8} {:<24} [{}]", state, gate.id, origin);
            if let Some(by) = &gate.removed_by {
                let _ = write!(out, " removed by {}", by.level);
            }
            out.push('\n');
        }
    }
    if !policy.exclude_patterns.is_empty() {
        let _ = writeln!(out, "Exclude patterns: {}", policy.exclude_patterns.join(", "));
    }
    for warning in &policy.warnings {
        let _ = writeln!(out, "warning: {}", warning);
    }
    out
}

fn cmd_apply(
    root: &Path,
    opts: &ApplyOptions,
    json: bool,
    cancel: &CancellationToken,
) -> Result<String> {
    let (config, registry) = load_registry(root, cancel)?;
    let report = GateApplier::new(&registry, &config)
        .apply(root, opts, cancel)
        .with_context(|| format!("Failed to apply gates to {}", root.display()))?;

    if json {
        to_json(&report)
    } else {
        Ok(render_apply(&report, opts.generate.dry_run))
    }
}

fn render_apply(report: &ApplyReport, dry_run: bool) -> String {
    let mut out = String::new();
    if dry_run {
        let _ = writeln!(out, "Dry run: no files written");
    }
    for generation in &report.sequences {
        for result in &generation.results {
            let kind = match result.kind {
                GenerateKind::Create => "create",
                GenerateKind::Skip => "skip",
                GenerateKind::Exists => "exists",
            };
            let path = result.path.strip_prefix(&report.root).unwrap_or(&result.path);
            let _ = write!(out, "  {:<6} {}", kind, path.display());
            if let Some(reason) = &result.reason {
                let _ = write!(out, " ({})", reason);
            }
            out.push('\n');
        }
    }
    for skipped in &report.skipped {
        let reason = match &skipped.reason {
            SkipReason::NonImplementationPhase { marker } => {
                format!("non-implementation phase ({marker})")
            }
            SkipReason::Excluded { pattern } => format!("excluded by {pattern}"),
            SkipReason::UnresolvedPhaseType => "phase type unresolved".to_string(),
        };
        let _ = writeln!(out, "  skipped {}: {}", skipped.name, reason);
    }

    let s = &report.summary;
    let _ = writeln!(
        out,
        "Sequences: {} ({} updated)",
        s.total_sequences, s.sequences_updated
    );
    let _ = writeln!(
        out,
        "Files: {} created, {} skipped, {} existing",
        s.files_created, s.files_skipped, s.files_existing
    );
    for warning in &s.warnings {
        let _ = writeln!(out, "warning: {}", warning);
    }
    out
}

fn cmd_policies_list(root: &Path, json: bool, cancel: &CancellationToken) -> Result<String> {
    let (_, registry) = load_registry(root, cancel)?;
    let infos = registry.list_info();
    if json {
        to_json(&infos)
    } else {
        Ok(render_policy_list(&infos))
    }
}

fn render_policy_list(infos: &[PolicyInfo]) -> String {
    let mut out = String::new();
    for info in infos {
        let _ = writeln!(
            out,
            "{:<12} {:<9} {:>2} gates  {}",
            info.name,
            format!("{:?}", info.origin).to_lowercase(),
            info.task_count,
            info.description
        );
    }
    out
}

fn cmd_policies_show(
    root: &Path,
    name: &str,
    json: bool,
    cancel: &CancellationToken,
) -> Result<String> {
    let (_, registry) = load_registry(root, cancel)?;
    let policy = registry
        .get_policy(name)
        .with_context(|| format!("Unknown policy '{}'", name))?;
    if json {
        to_json(&policy)
    } else {
        Ok(render_named_policy(&policy))
    }
}

fn render_named_policy(policy: &NamedPolicy) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Policy: {}", policy.name);
    let _ = writeln!(out, "Source: {}", policy.source);
    if !policy.description.is_empty() {
        let _ = writeln!(out, "Description: {}", policy.description);
    }
    for (idx, task) in policy.tasks.iter().enumerate() {
        let _ = writeln!(out, "  {}. {} ({})", idx + 1, task.id, task.template);
    }
    if !policy.exclude_patterns.is_empty() {
        let _ = writeln!(out, "Exclude patterns: {}", policy.exclude_patterns.join(", "));
    }
    out
}

fn cmd_validate(
    root: &Path,
    policy: Option<String>,
    json: bool,
    cancel: &CancellationToken,
) -> Result<String> {
    let (config, registry) = load_registry(root, cancel)?;
    let report = validate_festival(root, &registry, &config, &LoadOptions { policy }, cancel)
        .with_context(|| format!("Failed to validate {}", root.display()))?;

    if json {
        return to_json(&report);
    }
    let out = render_validation(&report);
    if !report.is_ok() {
        eprint!("{}", out);
        bail!("validation failed with {} error(s)", report.errors().count());
    }
    Ok(out)
}

fn render_validation(report: &ValidationReport) -> String {
    let mut out = String::new();
    for issue in &report.issues {
        let severity = match issue.severity {
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
        };
        let _ = writeln!(out, "{}: {}: {}", severity, issue.path.display(), issue.message);
    }
    let _ = writeln!(
        out,
        "Checked {} override file(s): {} error(s), {} warning(s)",
        report.overrides_checked,
        report.errors().count(),
        report.warnings().count()
    );
    out
}

//! festgate core library
//!
//! Resolves quality-gate policies over a festival → phase → sequence
//! hierarchy and materializes the resolved gates as task files.

pub mod apply;
pub mod config;
pub mod discovery;
pub mod error;
pub mod frontmatter;
pub mod generate;
pub mod metrics;
pub mod obs;
pub mod policy;
pub mod telemetry;

pub use apply::{ApplyOptions, ApplyReport, GateApplier};
pub use config::GatesConfig;
pub use discovery::{
    DefaultPhaseTypeResolver, DiscoveryReport, PhaseTypeResolver, SequenceDiscovery, SequenceInfo,
    SkipReason, SkippedEntry,
};
pub use error::{ErrorKind, GateError, Result};
pub use generate::{
    BuiltinRenderer, GenerateKind, GenerateOptions, GenerateResult, GenerateSummary,
    RenderContext, SequenceGeneration, TaskGenerator, TemplateRenderer,
};
pub use policy::{
    validate_festival, ConfigMerger, GateState, GateTask, GateTaskSpec, HierarchicalLoader,
    LoadOptions, MergedPolicy, NamedPolicy, PolicyInfo, PolicyOrigin, PolicyRegistry,
    PolicySource, SourceLevel, ValidationReport,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

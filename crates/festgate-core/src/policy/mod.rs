//! Gate policies: the data model, on-disk documents, the named-policy
//! registry, hierarchical merging, and validation.

pub mod documents;
pub mod merge;
pub mod model;
pub mod registry;
pub mod validate;

pub use documents::{
    load_festival_config, load_override_file, load_policy_document, FestivalConfig, OverrideFile,
    PolicyDocument, QualityGatesSection, OVERRIDE_VERSION,
};
pub use merge::{ConfigMerger, HierarchicalLoader, LoadOptions, MergeStep};
pub use model::{
    GateState, GateTask, GateTaskSpec, MergedPolicy, PolicySource, SourceLevel,
};
pub use registry::{
    builtin_policies, NamedPolicy, PolicyInfo, PolicyOrigin, PolicyRegistry, DEFAULT_POLICY,
};
pub use validate::{validate_festival, ConfigIssue, IssueSeverity, ValidationReport};

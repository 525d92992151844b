//! Gate task file generation.

mod generator;
mod render;

pub use generator::{
    content_digest, gate_slug, plan_placements, GatePlacement, GenerateKind, GenerateOptions,
    GenerateResult, GenerateSummary, SequenceGeneration, TaskGenerator, REASON_MODIFIED,
};
pub use render::{BuiltinRenderer, RenderContext, TemplateRenderer, GATE_FEST_TYPE};

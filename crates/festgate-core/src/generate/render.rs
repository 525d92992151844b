//! Gate task file rendering.
//!
//! The generator decides which gate goes where; a [`TemplateRenderer`]
//! decides what the file says. Output must be deterministic for a given gate
//! and context, otherwise re-runs would never reach `exists`.

use serde::Serialize;

use crate::error::Result;
use crate::policy::GateTask;

/// Frontmatter value marking a generated gate file.
pub const GATE_FEST_TYPE: &str = "gate";

/// Where a gate is being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderContext<'a> {
    pub sequence_name: &'a str,
    pub phase_name: &'a str,
    /// Task number the file will carry.
    pub task_number: u32,
}

pub trait TemplateRenderer {
    fn render(&self, gate: &GateTask, ctx: &RenderContext<'_>) -> Result<String>;
}

impl<T: TemplateRenderer + ?Sized> TemplateRenderer for &T {
    fn render(&self, gate: &GateTask, ctx: &RenderContext<'_>) -> Result<String> {
        (**self).render(gate, ctx)
    }
}

#[derive(Serialize)]
struct GateFrontmatter<'a> {
    fest_type: &'a str,
    fest_gate_id: &'a str,
    fest_template: &'a str,
    fest_sequence: &'a str,
}

/// Markdown renderer with canned checklists for the well-known gates.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinRenderer;

impl BuiltinRenderer {
    fn checklist(template: &str) -> &'static [&'static str] {
        let key = template.rsplit('/').next().unwrap_or(template);
        match key {
            "testing_and_verify" | "testing" => &[
                "Run the full test suite and record the results",
                "Add tests for behavior introduced in this sequence",
                "Verify edge cases and error paths by hand",
            ],
            "code_review" | "review" => &[
                "Review every change made in this sequence",
                "Check naming, error handling, and documentation",
                "Record findings as follow-up items",
            ],
            "review_results_iterate" | "iterate" => &[
                "Address each finding from the review",
                "Re-run tests after every fix",
                "Confirm no findings remain open",
            ],
            "security_audit" => &[
                "Review input validation and trust boundaries",
                "Check secrets handling and dependency advisories",
            ],
            "performance_review" => &[
                "Measure hot paths against the sequence goals",
                "Record regressions with reproduction steps",
            ],
            _ => &["Complete the gate requirements for this sequence"],
        }
    }
}

impl TemplateRenderer for BuiltinRenderer {
    fn render(&self, gate: &GateTask, ctx: &RenderContext<'_>) -> Result<String> {
        let frontmatter = GateFrontmatter {
            fest_type: GATE_FEST_TYPE,
            fest_gate_id: &gate.id,
            fest_template: &gate.template,
            fest_sequence: ctx.sequence_name,
        };
        let yaml = serde_yaml::to_string(&frontmatter)
            .map_err(|e| crate::error::GateError::InvalidGate(format!("{}: {}", gate.id, e)))?;

        let mut out = String::new();
        out.push_str("---\n");
        out.push_str(&yaml);
        out.push_str("---\n\n");
        out.push_str(&format!("# Task {:02}: {}\n\n", ctx.task_number, gate.name));
        out.push_str(&format!(
            "Quality gate for sequence `{}` in phase `{}`.\n\n",
            ctx.sequence_name, ctx.phase_name
        ));
        out.push_str("## Checklist\n\n");
        for item in Self::checklist(&gate.template) {
            out.push_str(&format!("- [ ] {}\n", item));
        }
        Ok(out)
    }
}

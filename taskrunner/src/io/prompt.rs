//! Agent prompt rendering.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

const AGENT_TEMPLATE: &str = include_str!("prompts/agent.md");

/// Item fields exposed to the template.
#[derive(Debug, Clone, Serialize)]
struct ItemContext<'a> {
    id: &'a str,
    description: &'a str,
    body: &'a str,
}

/// Everything the act stage hands to the agent.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub item_id: &'a str,
    pub description: &'a str,
    pub body: &'a str,
    /// Rendered constraint appendix, possibly empty.
    pub constraints: &'a str,
    /// Verification feedback from the previous attempt, possibly empty.
    pub feedback: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Render the agent prompt for one act invocation.
pub fn render_agent_prompt(input: &PromptInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("agent", AGENT_TEMPLATE)
        .context("load agent template")?;
    let template = env.get_template("agent").context("get agent template")?;
    let body = dedent(input.body);
    let rendered = template
        .render(context! {
            item => ItemContext {
                id: input.item_id,
                description: input.description,
                body: body.trim(),
            },
            constraints => input.constraints.trim(),
            feedback => input.feedback.trim(),
            attempt => input.attempt,
            max_attempts => input.max_attempts,
        })
        .context("render agent prompt")?;
    Ok(rendered)
}

/// Strip the indentation shared by every non-blank line.
fn dedent(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    text.lines()
        .map(|line| line.get(indent..).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs<'a>(feedback: &'a str, attempt: u32) -> PromptInputs<'a> {
        PromptInputs {
            item_id: "IMPL-0001-0001",
            description: "[IMPL-0001-0001] Build the parser",
            body: "  **Hard constraints:**\n  - no unsafe",
            constraints: "## System constraints\n- keep layout",
            feedback,
            attempt,
            max_attempts: 3,
        }
    }

    #[test]
    fn first_attempt_has_no_feedback_section() {
        let prompt = render_agent_prompt(&inputs("", 1)).expect("render");
        assert!(prompt.starts_with("# Task IMPL-0001-0001"));
        assert!(prompt.contains("**Hard constraints:**\n- no unsafe"));
        assert!(prompt.contains("## System constraints"));
        assert!(!prompt.contains("Validation Feedback"));
        assert!(!prompt.contains("## Attempt"));
    }

    #[test]
    fn retry_carries_feedback_after_constraints() {
        let prompt = render_agent_prompt(&inputs("## TEST FAILED\nboom", 2)).expect("render");
        let constraints = prompt.find("## System constraints").expect("constraints");
        let feedback = prompt.find("# Validation Feedback").expect("feedback");
        assert!(constraints < feedback);
        assert!(prompt.contains("attempt 2 of 3"));
        assert!(prompt.contains("boom"));
    }

    #[test]
    fn dedent_keeps_relative_indentation() {
        assert_eq!(dedent("    a\n      b\n\n    c"), "a\n  b\n\nc");
    }
}

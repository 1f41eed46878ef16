//! The prompt-driven stages of the NL2SQL pipeline.
//!
//! Each agent wraps one kind of completion call (or, for the executor, the
//! data engine). Agents hold no per-request state and can be shared.

pub mod prompts;

pub mod intent;
pub use intent::IntentClassifier;

pub mod planning;
pub use planning::{format_for_prompt, parse_plan, PlanParseError, PlanningAgent};

pub mod builder;
pub use builder::{SqlBuilderAgent, SqlContext};

pub mod validator;
pub use validator::{SqlValidatorAgent, ValidationError};

pub mod executor;
pub use executor::{ExecError, SqlExecutorAgent};

pub mod explainer;
pub use explainer::{ResultExplainer, EXPLAIN_FALLBACK};

/// Cut the JSON object out of a model reply that may carry fences or chatter.
pub(crate) fn json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::json_object;

    #[test]
    fn finds_object_inside_fence() {
        assert_eq!(json_object("```json\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
        assert_eq!(json_object("no json here"), None);
        assert_eq!(json_object("} backwards {"), None);
    }
}

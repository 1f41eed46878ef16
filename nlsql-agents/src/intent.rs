use std::sync::Arc;

use nlsql_infer::CompletionEngine;
use nlsql_types::{CompletionRequest, Intent, IntentDecision};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{json_object, prompts};

pub const OFF_TOPIC_FOLLOW_UP: &str =
    "I can help with your database; what would you like to analyze?";

const DATA_TOKENS: [&str; 17] = [
    "show", "list", "count", "top", "total", "revenue", "sales", "orders", "customers", "table",
    "column", "metric", "trend", "average", "sum", "min", "max",
];

#[derive(Deserialize)]
struct RawIntent {
    intent: Intent,
    #[serde(default)]
    follow_up: String,
}

/// Decides whether a message should trigger SQL at all.
pub struct IntentClassifier {
    llm: Arc<dyn CompletionEngine>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn CompletionEngine>) -> Self {
        Self { llm }
    }

    /// Never fails: an unusable reply counts as a data query, which the
    /// heuristic backstop may still downgrade.
    pub async fn classify(&self, question: &str) -> IntentDecision {
        let req = CompletionRequest::new(prompts::INTENT_SYSTEM, prompts::intent_user(question))
            .with_temperature(0.0);
        let parsed = match self.llm.complete(req).await {
            Ok(raw) => parse_intent(&raw),
            Err(e) => {
                debug!("intent call failed: {e}");
                None
            }
        };
        let mut decision = parsed.unwrap_or(IntentDecision {
            intent: Intent::DataQuery,
            follow_up: String::new(),
        });

        if decision.intent == Intent::DataQuery && looks_like_non_data(question) {
            info!("downgrading data_query intent for non-analytic message");
            decision.intent = Intent::Other;
            if decision.follow_up.is_empty() {
                decision.follow_up = OFF_TOPIC_FOLLOW_UP.into();
            }
        }
        decision
    }
}

pub fn parse_intent(raw: &str) -> Option<IntentDecision> {
    let body = json_object(raw)?;
    let parsed: RawIntent = serde_json::from_str(body).ok()?;
    Some(IntentDecision {
        intent: parsed.intent,
        follow_up: parsed.follow_up.trim().to_string(),
    })
}

/// Short or data-free messages should not reach SQL generation.
pub fn looks_like_non_data(question: &str) -> bool {
    let q = question.trim().to_lowercase();
    if q.chars().count() <= 20 && !q.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    !DATA_TOKENS.iter().any(|t| q.contains(t))
}

use std::sync::Arc;

use nlsql_infer::{CompletionEngine, LlmError};
use nlsql_types::CompletionRequest;
use tracing::debug;

use crate::prompts;

/// Grounding shared by every build call of one request.
#[derive(Clone, Copy, Debug)]
pub struct SqlContext<'a> {
    pub schema_context: &'a str,
    pub plan_context: &'a str,
    pub catalog: &'a str,
    pub schema_name: &'a str,
    pub database: &'a str,
}

/// Renders Trino SQL for a question. Output is raw model text; the validator
/// is responsible for checking it.
pub struct SqlBuilderAgent {
    llm: Arc<dyn CompletionEngine>,
}

impl SqlBuilderAgent {
    pub fn new(llm: Arc<dyn CompletionEngine>) -> Self {
        Self { llm }
    }

    pub async fn build(&self, question: &str, ctx: &SqlContext<'_>) -> Result<String, LlmError> {
        let req = CompletionRequest::new(
            prompts::builder_system(ctx),
            prompts::builder_user(question, ctx),
        )
        .with_temperature(0.0);
        let sql = self.llm.complete(req).await?;
        debug!(sql = %sql.trim(), "builder output");
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlsql_infer::ScriptedCompletionEngine;

    #[tokio::test]
    async fn one_call_per_build_with_zero_temperature() {
        let llm = Arc::new(ScriptedCompletionEngine::with_replies(["SELECT 1"]));
        let builder = SqlBuilderAgent::new(llm.clone());
        let ctx = SqlContext {
            schema_context: "## Table: customers",
            plan_context: "plan_type: single",
            catalog: "hive",
            schema_name: "sales",
            database: "hive.sales",
        };
        assert_eq!(builder.build("count rows", &ctx).await.unwrap(), "SELECT 1");

        let reqs = llm.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].temperature, Some(0.0));
        assert!(reqs[0].turns[0].content.contains("count rows"));
    }
}

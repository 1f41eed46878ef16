use std::sync::Arc;

use nlsql_infer::CompletionEngine;
use nlsql_types::{CompletionRequest, QueryResult, Row};
use tracing::warn;

use crate::prompts;

pub const EXPLAIN_FALLBACK: &str =
    "I found the data, but had trouble explaining it. Please check the table below.";

/// Turns a result set into a short plain-English summary.
pub struct ResultExplainer {
    llm: Arc<dyn CompletionEngine>,
    max_rows_to_show: usize,
}

impl ResultExplainer {
    pub fn new(llm: Arc<dyn CompletionEngine>) -> Self {
        Self::with_max_rows(llm, 10)
    }

    pub fn with_max_rows(llm: Arc<dyn CompletionEngine>, max_rows_to_show: usize) -> Self {
        Self {
            llm,
            max_rows_to_show,
        }
    }

    /// Never fails; on any problem the fixed fallback sentence is returned.
    pub async fn explain(&self, question: &str, sql: &str, result: &QueryResult) -> String {
        let rows = summarize_rows(&result.rows, self.max_rows_to_show);
        let req = CompletionRequest::new(
            prompts::EXPLAIN_SYSTEM,
            prompts::explain_user(question, sql, &rows),
        )
        .with_temperature(0.3);

        match self.llm.complete(req).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("explanation came back empty");
                EXPLAIN_FALLBACK.into()
            }
            Err(e) => {
                warn!("explanation failed: {e}");
                EXPLAIN_FALLBACK.into()
            }
        }
    }
}

/// At most `max_rows` rows, numbered, for the explanation prompt.
pub fn summarize_rows(rows: &[Row], max_rows: usize) -> String {
    let row_text = |row: &Row| serde_json::to_string(row).unwrap_or_default();
    match rows {
        [] => "No rows returned".to_string(),
        [only] => format!("1 row:\n{}", row_text(only)),
        _ => {
            let shown = &rows[..rows.len().min(max_rows)];
            let mut out = format!("{} rows (showing first {}):\n", rows.len(), shown.len());
            for (i, row) in shown.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, row_text(row)));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlsql_infer::ScriptedCompletionEngine;
    use serde_json::json;

    fn numbers(n: usize) -> QueryResult {
        QueryResult::from_positional(
            vec!["n".into()],
            (0..n).map(|i| vec![json!(i)]).collect(),
        )
    }

    #[test]
    fn summary_is_bounded() {
        let result = numbers(25);
        let text = summarize_rows(&result.rows, 10);
        assert!(text.starts_with("25 rows (showing first 10):"));
        assert!(text.contains("10. {\"n\":9}"));
        assert!(!text.contains("11. "));
        assert_eq!(summarize_rows(&[], 10), "No rows returned");
        assert_eq!(summarize_rows(&numbers(1).rows, 10), "1 row:\n{\"n\":0}");
    }

    #[tokio::test]
    async fn explanation_is_trimmed() {
        let llm = Arc::new(ScriptedCompletionEngine::with_replies(["  Two customers.  \n"]));
        let text = ResultExplainer::new(llm.clone())
            .explain("q", "SELECT 1", &numbers(2))
            .await;
        assert_eq!(text, "Two customers.");
        assert_eq!(llm.requests()[0].temperature, Some(0.3));
    }

    #[tokio::test]
    async fn failure_returns_fixed_sentence() {
        let llm = Arc::new(ScriptedCompletionEngine::new());
        llm.push_failure("quota");
        let text = ResultExplainer::new(llm).explain("q", "SELECT 1", &numbers(3)).await;
        assert_eq!(text, EXPLAIN_FALLBACK);
    }
}

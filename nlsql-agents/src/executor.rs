use std::sync::Arc;

use nlsql_policy::{check_read_only, strip_trailing_terminator, PolicyDecision};
use nlsql_store::{DataEngine, DataError};
use nlsql_types::QueryResult;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Unsafe SQL detected (non-read-only): {keyword}")]
    Unsafe { keyword: String },
    #[error(transparent)]
    Engine(#[from] DataError),
}

/// Runs validated SQL behind a read-only gate of its own.
pub struct SqlExecutorAgent {
    engine: Arc<dyn DataEngine>,
}

impl SqlExecutorAgent {
    pub fn new(engine: Arc<dyn DataEngine>) -> Self {
        Self { engine }
    }

    pub async fn execute(&self, sql: &str) -> Result<QueryResult, ExecError> {
        if let PolicyDecision::Deny(keyword) = check_read_only(sql) {
            error!(%keyword, "refusing to execute mutating statement");
            return Err(ExecError::Unsafe { keyword });
        }
        let sql = strip_trailing_terminator(sql);
        let result = self.engine.execute(sql).await?;
        info!(rows = result.row_count(), columns = result.columns.len(), "statement executed");
        Ok(result)
    }

    pub async fn close(&self) {
        self.engine.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlsql_store::InMemoryDataEngine;
    use serde_json::json;

    #[tokio::test]
    async fn mutating_statements_never_reach_the_engine() {
        let engine = Arc::new(InMemoryDataEngine::new());
        let exec = SqlExecutorAgent::new(engine.clone());
        for sql in [
            "DROP TABLE customers",
            "delete from orders",
            "WITH x AS (SELECT 1) INSERT INTO t SELECT * FROM x",
            "create or replace view v as select 1",
        ] {
            let err = exec.execute(sql).await.unwrap_err();
            assert!(matches!(err, ExecError::Unsafe { .. }), "{sql}");
        }
        assert!(engine.executed().await.is_empty());
    }

    #[tokio::test]
    async fn trailing_semicolon_is_stripped_before_execution() {
        let result = QueryResult::from_positional(vec!["n".into()], vec![vec![json!(1)]]);
        let engine = Arc::new(InMemoryDataEngine::new().with_result("SELECT 1 AS n", result));
        let exec = SqlExecutorAgent::new(engine.clone());
        let out = exec.execute("SELECT 1 AS n;").await.unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(engine.executed().await, vec!["SELECT 1 AS n"]);
    }

    #[tokio::test]
    async fn engine_errors_propagate() {
        let engine = Arc::new(InMemoryDataEngine::new().with_failure("SELECT x FROM t", "COLUMN_NOT_FOUND"));
        let err = SqlExecutorAgent::new(engine).execute("SELECT x FROM t").await.unwrap_err();
        assert!(matches!(err, ExecError::Engine(_)));
        assert!(err.to_string().contains("COLUMN_NOT_FOUND"));
    }
}

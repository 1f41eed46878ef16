use std::sync::Arc;

use nlsql_infer::LlmError;
use nlsql_policy::{detect_issues, sanitize, DialectIssue};
use thiserror::Error;
use tracing::{error, warn};

use crate::builder::{SqlBuilderAgent, SqlContext};
use crate::prompts;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("generated SQL contains non-Trino constructs: {}", join_issues(.issues))]
    NonTrino { issues: Vec<DialectIssue>, sql: String },
    #[error("repair call failed: {0}")]
    Repair(#[from] LlmError),
}

fn join_issues(issues: &[DialectIssue]) -> String {
    issues.iter().map(|i| i.as_str()).collect::<Vec<_>>().join(", ")
}

/// Normalizes generated SQL and, when Trino-incompatible constructs remain,
/// asks the builder for a bounded number of rewrites.
pub struct SqlValidatorAgent {
    builder: Arc<SqlBuilderAgent>,
    max_repairs: u32,
}

impl SqlValidatorAgent {
    pub fn new(builder: Arc<SqlBuilderAgent>) -> Self {
        Self::with_max_repairs(builder, 1)
    }

    pub fn with_max_repairs(builder: Arc<SqlBuilderAgent>, max_repairs: u32) -> Self {
        Self {
            builder,
            max_repairs,
        }
    }

    pub async fn validate(
        &self,
        sql: &str,
        question: &str,
        ctx: &SqlContext<'_>,
    ) -> Result<String, ValidationError> {
        let mut current = sanitize(sql);
        let mut issues = detect_issues(&current);
        let mut repairs = 0;

        while !issues.is_empty() {
            if repairs == self.max_repairs {
                error!(issues = %join_issues(&issues), "SQL still non-Trino after {repairs} repair(s)");
                return Err(ValidationError::NonTrino {
                    issues,
                    sql: current,
                });
            }
            repairs += 1;
            warn!(issues = %join_issues(&issues), attempt = repairs, "non-Trino constructs detected, asking for a rewrite");

            let retry_question = prompts::repair_question(question, &issues);
            let retry = self.builder.build(&retry_question, ctx).await?;
            current = sanitize(&retry);
            issues = detect_issues(&current);
        }

        Ok(current)
    }
}

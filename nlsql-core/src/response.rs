use std::fmt;

use nlsql_agents::{ExecError, ValidationError};
use nlsql_infer::LlmError;
use nlsql_types::{QueryResult, SqlTask};
use serde::Serialize;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    Intent,
    Planning,
    Generation,
    Validation,
    Execution,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::Intent => "intent",
            Stage::Planning => "planning",
            Stage::Generation => "generation",
            Stage::Validation => "validation",
            Stage::Execution => "execution",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request-fatal failure. Intent and planning degrade instead of failing,
/// so only input, generation, validation and execution appear here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No question provided")]
    MissingQuestion,
    #[error("Failed to generate SQL query: {source}")]
    Generation {
        step_id: Option<String>,
        #[source]
        source: LlmError,
    },
    #[error("Failed to validate SQL query: {source}")]
    Validation {
        step_id: Option<String>,
        #[source]
        source: ValidationError,
    },
    #[error("Failed to execute query: {source}")]
    Execution {
        step_id: Option<String>,
        sql: String,
        #[source]
        source: ExecError,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::MissingQuestion => Stage::Input,
            PipelineError::Generation { .. } => Stage::Generation,
            PipelineError::Validation { .. } => Stage::Validation,
            PipelineError::Execution { .. } => Stage::Execution,
        }
    }

    /// Status an HTTP host should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            PipelineError::MissingQuestion => 400,
            _ => 500,
        }
    }

    /// The offending SQL, when the failure happened after generation.
    pub fn sql(&self) -> Option<&str> {
        match self {
            PipelineError::Validation {
                source: ValidationError::NonTrino { sql, .. },
                ..
            } => Some(sql.as_str()),
            PipelineError::Execution { sql, .. } => Some(sql.as_str()),
            _ => None,
        }
    }

    pub fn step_id(&self) -> Option<&str> {
        match self {
            PipelineError::MissingQuestion => None,
            PipelineError::Generation { step_id, .. }
            | PipelineError::Validation { step_id, .. }
            | PipelineError::Execution { step_id, .. } => step_id.as_deref(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
    Clarification,
}

/// Outcome of one `multi_query` step: the validated task plus what running it produced.
#[derive(Clone, Debug, Serialize)]
pub struct StepOutcome {
    #[serde(flatten)]
    pub task: SqlTask,
    pub explanation: String,
    pub table: String,
    pub row_count: usize,
    #[serde(skip)]
    pub result: QueryResult,
}

/// The envelope a host serializes for one question.
#[derive(Clone, Debug, Serialize)]
pub struct QueryResponse {
    pub status: ResponseStatus,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepOutcome>,
    pub explanation: String,
    pub table: String,
    pub row_count: usize,
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip)]
    pub result: Option<QueryResult>,
    #[serde(skip)]
    pub http_status: u16,
}

impl QueryResponse {
    pub(crate) fn blank(question: &str, status: ResponseStatus) -> Self {
        Self {
            status,
            question: question.to_string(),
            sql: None,
            steps: Vec::new(),
            explanation: String::new(),
            table: String::new(),
            row_count: 0,
            conversation_id: None,
            error: None,
            stage: None,
            failed_step: None,
            result: None,
            http_status: 200,
        }
    }

    pub(crate) fn clarification(question: &str, follow_up: &str) -> Self {
        let mut resp = Self::blank(question, ResponseStatus::Clarification);
        resp.explanation = follow_up.to_string();
        resp
    }

    /// Error envelope; `completed` keeps the steps that finished before the failure.
    pub(crate) fn failure(question: &str, err: &PipelineError, completed: Vec<StepOutcome>) -> Self {
        let mut resp = Self::blank(question, ResponseStatus::Error);
        resp.error = Some(err.to_string());
        resp.stage = Some(err.stage());
        resp.sql = err.sql().map(str::to_string);
        resp.failed_step = err.step_id().map(str::to_string);
        resp.row_count = completed.iter().map(|s| s.row_count).sum();
        resp.steps = completed;
        resp.http_status = err.http_status();
        resp
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

use std::collections::HashSet;
use std::sync::Arc;

use nlsql_infer::CompletionEngine;
use nlsql_types::{CompletionRequest, Plan, PlanStep, PlanType};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{json_object, prompts};

const DEFAULT_FINAL_INSTRUCTION: &str = "Produce the final answer from the steps.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanParseError {
    #[error("no JSON object in planner output")]
    NoJson,
    #[error("planner JSON does not match the plan schema: {0}")]
    Schema(String),
    #[error("plan has no steps")]
    NoSteps,
    #[error("step {index} has an empty id or objective")]
    BlankStep { index: usize },
    #[error("duplicate step id {0}")]
    DuplicateStep(String),
}

#[derive(Deserialize)]
struct RawPlan {
    plan_type: PlanType,
    steps: Vec<RawStep>,
    #[serde(default)]
    final_instruction: Option<String>,
}

#[derive(Deserialize)]
struct RawStep {
    id: String,
    objective: String,
    #[serde(default)]
    tables: Vec<String>,
}

/// Strictly parse planner output into a [`Plan`].
pub fn parse_plan(raw: &str) -> Result<Plan, PlanParseError> {
    let body = json_object(raw).ok_or(PlanParseError::NoJson)?;
    let parsed: RawPlan =
        serde_json::from_str(body).map_err(|e| PlanParseError::Schema(e.to_string()))?;

    if parsed.steps.is_empty() {
        return Err(PlanParseError::NoSteps);
    }

    let mut ids = HashSet::new();
    let mut steps = Vec::with_capacity(parsed.steps.len());
    for (index, step) in parsed.steps.into_iter().enumerate() {
        let id = step.id.trim().to_string();
        let objective = step.objective.trim().to_string();
        if id.is_empty() || objective.is_empty() {
            return Err(PlanParseError::BlankStep { index });
        }
        if !ids.insert(id.clone()) {
            return Err(PlanParseError::DuplicateStep(id));
        }
        steps.push(PlanStep {
            id,
            objective,
            tables: step
                .tables
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        });
    }

    let final_instruction = parsed
        .final_instruction
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_FINAL_INSTRUCTION.into());

    Ok(Plan {
        plan_type: parsed.plan_type,
        steps,
        final_instruction,
    })
}

/// Render a plan for the SQL builder prompt.
pub fn format_for_prompt(plan: &Plan) -> String {
    let mut lines = vec![format!("plan_type: {}", plan.plan_type.as_str())];
    for step in &plan.steps {
        let table_info = if step.tables.is_empty() {
            String::new()
        } else {
            format!(" tables: {}", step.tables.join(", "))
        };
        lines.push(format!("{}: {}{}", step.id, step.objective, table_info));
    }
    lines.push(format!("final_instruction: {}", plan.final_instruction));
    lines.join("\n")
}

/// Decides between a single query, one query with CTEs, or several queries.
pub struct PlanningAgent {
    llm: Arc<dyn CompletionEngine>,
}

impl PlanningAgent {
    pub fn new(llm: Arc<dyn CompletionEngine>) -> Self {
        Self { llm }
    }

    /// Never fails; any transport or parse problem yields [`Plan::fallback`].
    pub async fn plan(
        &self,
        question: &str,
        schema_context: &str,
        catalog: &str,
        schema_name: &str,
        database: &str,
    ) -> Plan {
        let req = CompletionRequest::new(
            prompts::PLANNING_SYSTEM,
            prompts::planning_user(question, schema_context, catalog, schema_name, database),
        )
        .with_temperature(0.0);

        let plan = match self.llm.complete(req).await {
            Ok(raw) => parse_plan(&raw).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match plan {
            Ok(plan) => {
                info!(plan_type = plan.plan_type.as_str(), steps = plan.steps.len(), "plan ready");
                plan
            }
            Err(reason) => {
                warn!("planner output unusable, using single-step plan: {reason}");
                Plan::fallback(question)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlsql_infer::ScriptedCompletionEngine;

    async fn plan_from(reply: &str) -> Plan {
        let llm = Arc::new(ScriptedCompletionEngine::with_replies([reply]));
        PlanningAgent::new(llm)
            .plan("How many orders last month?", "ctx", "hive", "sales", "hive.sales")
            .await
    }

    #[tokio::test]
    async fn unparseable_reply_falls_back_to_single_step() {
        let plan = plan_from("I think you need one query.").await;
        assert_eq!(plan.plan_type, PlanType::Single);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].objective, "How many orders last month?");
    }

    #[tokio::test]
    async fn transport_failure_falls_back() {
        let llm = Arc::new(ScriptedCompletionEngine::new());
        llm.push_failure("timeout");
        let plan = PlanningAgent::new(llm).plan("q", "ctx", "c", "s", "c.s").await;
        assert_eq!(plan, Plan::fallback("q"));
    }

    #[tokio::test]
    async fn valid_multi_query_plan_is_kept() {
        let plan = plan_from(
            r#"{"plan_type": "multi_query",
                "steps": [{"id": "q1", "objective": "orders per month", "tables": ["orders"]},
                          {"id": "q2", "objective": "new customers per month"}],
                "final_instruction": "report both"}"#,
        )
        .await;
        assert_eq!(plan.plan_type, PlanType::MultiQuery);
        assert_eq!(plan.steps[0].tables, vec!["orders"]);
        assert_eq!(plan.final_instruction, "report both");
    }

    #[test]
    fn schema_violations_are_rejected() {
        assert_eq!(parse_plan("nothing"), Err(PlanParseError::NoJson));
        assert!(matches!(
            parse_plan(r#"{"plan_type": "parallel", "steps": []}"#),
            Err(PlanParseError::Schema(_))
        ));
        assert!(matches!(
            parse_plan(r#"{"steps": [{"id": "q1", "objective": "x"}]}"#),
            Err(PlanParseError::Schema(_))
        ));
        assert_eq!(
            parse_plan(r#"{"plan_type": "single", "steps": []}"#),
            Err(PlanParseError::NoSteps)
        );
        assert_eq!(
            parse_plan(r#"{"plan_type": "single", "steps": [{"id": " ", "objective": "x"}]}"#),
            Err(PlanParseError::BlankStep { index: 0 })
        );
        assert_eq!(
            parse_plan(
                r#"{"plan_type": "multi_cte", "steps": [{"id": "q1", "objective": "a"}, {"id": "q1", "objective": "b"}]}"#
            ),
            Err(PlanParseError::DuplicateStep("q1".into()))
        );
    }

    #[test]
    fn missing_final_instruction_gets_default() {
        let plan = parse_plan(r#"{"plan_type": "single", "steps": [{"id": "q1", "objective": "x"}]}"#)
            .unwrap();
        assert_eq!(plan.final_instruction, DEFAULT_FINAL_INSTRUCTION);
    }

    #[test]
    fn prompt_format_lists_steps_and_tables() {
        let plan = Plan {
            plan_type: PlanType::MultiCte,
            steps: vec![
                PlanStep {
                    id: "q1".into(),
                    objective: "revenue by customer".into(),
                    tables: vec!["orders".into(), "customers".into()],
                },
                PlanStep {
                    id: "q2".into(),
                    objective: "rank".into(),
                    tables: Vec::new(),
                },
            ],
            final_instruction: "join q1 and q2".into(),
        };
        assert_eq!(
            format_for_prompt(&plan),
            "plan_type: multi_cte\nq1: revenue by customer tables: orders, customers\nq2: rank\nfinal_instruction: join q1 and q2"
        );
    }
}

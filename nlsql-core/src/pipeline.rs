use std::sync::Arc;

use nlsql_agents::{
    format_for_prompt, intent::OFF_TOPIC_FOLLOW_UP, ExecError, IntentClassifier, PlanningAgent,
    ResultExplainer, SqlBuilderAgent, SqlContext, SqlExecutorAgent, SqlValidatorAgent,
};
use nlsql_history::{ConversationStore, HistoryError};
use nlsql_infer::CompletionEngine;
use nlsql_schema::{Blacklist, SchemaContext, SchemaContextBuilder};
use nlsql_store::DataEngine;
use nlsql_types::{
    ConversationRecord, Intent, PlanStep, PlanType, QueryResult, Role, SchemaDocument, SqlTask,
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::render::{escape_html, render_html_table};
use crate::response::{PipelineError, QueryResponse, ResponseStatus, Stage, StepOutcome};

/// Everything a request needs: the engines, the agents and the schema
/// context, which is built once here and read-only afterwards.
///
/// Share it behind an `Arc`; `ask` takes `&self` and keeps no per-request state.
pub struct Nl2SqlPipeline {
    settings: PipelineConfig,
    schema: SchemaContext,
    history: Arc<dyn ConversationStore>,
    intent: Option<IntentClassifier>,
    planner: PlanningAgent,
    builder: Arc<SqlBuilderAgent>,
    validator: SqlValidatorAgent,
    executor: SqlExecutorAgent,
    explainer: ResultExplainer,
}

struct Executed {
    sql: String,
    result: QueryResult,
    explanation: String,
}

impl Nl2SqlPipeline {
    pub async fn new(
        llm: Arc<dyn CompletionEngine>,
        engine: Arc<dyn DataEngine>,
        history: Arc<dyn ConversationStore>,
        static_doc: SchemaDocument,
        blacklist: Blacklist,
        settings: PipelineConfig,
    ) -> Self {
        let schema = SchemaContextBuilder::new(engine.clone(), static_doc, blacklist)
            .build(&settings.catalog, &settings.schema)
            .await;
        Self::with_schema(llm, engine, history, schema, settings)
    }

    /// Assemble around an already built schema context.
    pub fn with_schema(
        llm: Arc<dyn CompletionEngine>,
        engine: Arc<dyn DataEngine>,
        history: Arc<dyn ConversationStore>,
        schema: SchemaContext,
        settings: PipelineConfig,
    ) -> Self {
        let builder = Arc::new(SqlBuilderAgent::new(llm.clone()));
        info!(
            tables = schema.document.tables.len(),
            live = schema.live,
            history = history.backend(),
            "pipeline ready for {}.{}",
            settings.catalog,
            settings.schema
        );
        Self {
            intent: settings
                .classify_intent
                .then(|| IntentClassifier::new(llm.clone())),
            planner: PlanningAgent::new(llm.clone()),
            validator: SqlValidatorAgent::with_max_repairs(builder.clone(), settings.max_repairs),
            builder,
            executor: SqlExecutorAgent::new(engine),
            explainer: ResultExplainer::with_max_rows(llm, settings.max_rows_to_show),
            history,
            schema,
            settings,
        }
    }

    pub fn schema_context(&self) -> &SchemaContext {
        &self.schema
    }

    pub fn settings(&self) -> &PipelineConfig {
        &self.settings
    }

    /// Answer one question. Failures come back as an error envelope, never as `Err`.
    pub async fn ask(&self, question: &str, conversation_id: Option<&str>) -> QueryResponse {
        let question = question.trim();
        if question.is_empty() {
            let err = PipelineError::MissingQuestion;
            warn!("{err}");
            return QueryResponse::failure(question, &err, Vec::new());
        }
        info!("processing question: {question}");

        let conversation_id = self.open_conversation(conversation_id, question).await;
        let mut resp = self.respond(question).await;
        resp.conversation_id = conversation_id;
        if let Some(id) = resp.conversation_id.as_deref() {
            self.log_answer(id, &resp).await;
        }
        resp
    }

    /// Health check through the same read-only gate as every query.
    pub async fn check(&self) -> Result<QueryResult, ExecError> {
        self.executor.execute("SELECT 1").await
    }

    pub async fn conversation(&self, id: &str) -> Result<Option<ConversationRecord>, HistoryError> {
        self.history.get(id).await
    }

    pub async fn close(&self) {
        self.executor.close().await;
    }

    async fn respond(&self, question: &str) -> QueryResponse {
        if let Some(classifier) = &self.intent {
            let decision = classifier.classify(question).await;
            if decision.intent != Intent::DataQuery {
                info!(stage = %Stage::Intent, intent = ?decision.intent, "no SQL for this message");
                let follow_up = if decision.follow_up.is_empty() {
                    OFF_TOPIC_FOLLOW_UP
                } else {
                    decision.follow_up.as_str()
                };
                return QueryResponse::clarification(question, follow_up);
            }
        }

        let plan = self
            .planner
            .plan(
                question,
                &self.schema.text,
                &self.settings.catalog,
                &self.settings.schema,
                &self.schema.document.database,
            )
            .await;
        let plan_context = format_for_prompt(&plan);
        info!(stage = %Stage::Planning, plan_type = plan.plan_type.as_str(), steps = plan.steps.len(), "plan chosen");

        let outcome = match plan.plan_type {
            PlanType::MultiQuery => self.run_steps(question, &plan.steps, &plan_context).await,
            PlanType::Single | PlanType::MultiCte => self
                .run(None, question, &plan_context)
                .await
                .map(|done| single_response(question, done))
                .map_err(|e| (e, Vec::new())),
        };

        match outcome {
            Ok(resp) => resp,
            Err((err, completed)) => {
                error!(stage = %err.stage(), step = ?err.step_id(), "{err}");
                QueryResponse::failure(question, &err, completed)
            }
        }
    }

    async fn run_steps(
        &self,
        question: &str,
        steps: &[PlanStep],
        plan_context: &str,
    ) -> Result<QueryResponse, (PipelineError, Vec<StepOutcome>)> {
        let mut completed = Vec::with_capacity(steps.len());
        for step in steps {
            let step_question = format!(
                "{}\n\nThis is step {} of the larger question: {question}",
                step.objective, step.id
            );
            let step_context = format!("{plan_context}\ncurrent_step: {}", step.id);
            match self.run(Some(&step.id), &step_question, &step_context).await {
                Ok(done) => {
                    info!(step = %step.id, rows = done.result.row_count(), "step finished");
                    completed.push(StepOutcome {
                        task: SqlTask {
                            id: step.id.clone(),
                            objective: step.objective.clone(),
                            sql: done.sql,
                        },
                        table: render_html_table(&done.result),
                        row_count: done.result.row_count(),
                        explanation: done.explanation,
                        result: done.result,
                    });
                }
                Err(e) => return Err((e, completed)),
            }
        }
        Ok(multi_response(question, completed))
    }

    /// Build, validate, execute and explain one statement.
    async fn run(
        &self,
        step_id: Option<&str>,
        question: &str,
        plan_context: &str,
    ) -> Result<Executed, PipelineError> {
        let step = step_id.map(str::to_string);
        let ctx = SqlContext {
            schema_context: &self.schema.text,
            plan_context,
            catalog: &self.settings.catalog,
            schema_name: &self.settings.schema,
            database: &self.schema.document.database,
        };

        let raw = self
            .builder
            .build(question, &ctx)
            .await
            .map_err(|source| PipelineError::Generation {
                step_id: step.clone(),
                source,
            })?;
        let sql = self
            .validator
            .validate(&raw, question, &ctx)
            .await
            .map_err(|source| PipelineError::Validation {
                step_id: step.clone(),
                source,
            })?;
        info!(stage = %Stage::Validation, "generated SQL: {sql}");

        let result = self
            .executor
            .execute(&sql)
            .await
            .map_err(|source| PipelineError::Execution {
                step_id: step,
                sql: sql.clone(),
                source,
            })?;
        info!(stage = %Stage::Execution, rows = result.row_count(), "query executed");

        let explanation = self.explainer.explain(question, &sql, &result).await;
        Ok(Executed {
            sql,
            result,
            explanation,
        })
    }

    /// Resolve the conversation for this request and record the user message.
    /// History problems never fail the request.
    async fn open_conversation(&self, requested: Option<&str>, question: &str) -> Option<String> {
        let id = match requested.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => match self.history.create(None).await {
                Ok(id) => id,
                Err(e) => {
                    warn!("could not start conversation: {e}");
                    return None;
                }
            },
        };
        if let Err(e) = self.history.append(&id, Role::User, question, json!({})).await {
            warn!(conversation = %id, "could not record question: {e}");
        }
        Some(id)
    }

    async fn log_answer(&self, id: &str, resp: &QueryResponse) {
        let content = resp.error.as_deref().unwrap_or(&resp.explanation);
        if let Err(e) = self
            .history
            .append(id, Role::Assistant, content, answer_metadata(resp))
            .await
        {
            warn!(conversation = %id, "could not record answer: {e}");
        }
    }
}

fn single_response(question: &str, done: Executed) -> QueryResponse {
    let mut resp = QueryResponse::blank(question, ResponseStatus::Success);
    resp.table = render_html_table(&done.result);
    resp.row_count = done.result.row_count();
    resp.sql = Some(done.sql);
    resp.explanation = done.explanation;
    resp.result = Some(done.result);
    resp
}

fn multi_response(question: &str, steps: Vec<StepOutcome>) -> QueryResponse {
    let mut resp = QueryResponse::blank(question, ResponseStatus::Success);
    resp.explanation = steps
        .iter()
        .map(|s| format!("{}: {}", s.task.id, s.explanation))
        .collect::<Vec<_>>()
        .join("\n\n");
    resp.table = steps
        .iter()
        .map(|s| format!("<h4>{}: {}</h4>\n{}", escape_html(&s.task.id), escape_html(&s.task.objective), s.table))
        .collect::<Vec<_>>()
        .join("\n");
    resp.row_count = steps.iter().map(|s| s.row_count).sum();
    resp.steps = steps;
    resp
}

fn answer_metadata(resp: &QueryResponse) -> Value {
    let mut meta = json!({
        "status": resp.status,
        "row_count": resp.row_count,
    });
    if let Some(sql) = &resp.sql {
        meta["sql"] = json!(sql);
    }
    if !resp.steps.is_empty() {
        meta["steps"] = resp
            .steps
            .iter()
            .map(|s| json!({"id": s.task.id, "sql": s.task.sql, "row_count": s.row_count}))
            .collect();
    }
    if let Some(stage) = resp.stage {
        meta["stage"] = json!(stage);
    }
    if let Some(step) = &resp.failed_step {
        meta["failed_step"] = json!(step);
    }
    meta
}

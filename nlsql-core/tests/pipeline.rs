use std::sync::Arc;

use nlsql_core::{Nl2SqlPipeline, PipelineConfig, ResponseStatus, Stage};
use nlsql_history::{ConversationStore, FileConversationStore, InMemoryConversationStore};
use nlsql_infer::ScriptedCompletionEngine;
use nlsql_schema::Blacklist;
use nlsql_store::InMemoryDataEngine;
use nlsql_types::{LiveColumn, QueryResult, Role, SchemaDocument, TableDoc};
use serde_json::json;

const DATA_QUERY: &str = r#"{"intent": "data_query", "follow_up": ""}"#;
const SINGLE_PLAN: &str = r#"{"plan_type": "single",
    "steps": [{"id": "q1", "objective": "list all customers", "tables": ["customers"]}],
    "final_instruction": "list all customers"}"#;
const CUSTOMERS_SQL: &str = "SELECT customer_id, name FROM hive.sales.customers";

fn col(name: &str, ty: &str) -> LiveColumn {
    LiveColumn {
        name: name.into(),
        data_type: ty.into(),
        comment: String::new(),
    }
}

fn customers() -> QueryResult {
    QueryResult::from_positional(
        vec!["customer_id".into(), "name".into()],
        vec![vec![json!(1), json!("Acme")], vec![json!(2), json!("Globex")]],
    )
}

fn warehouse() -> InMemoryDataEngine {
    InMemoryDataEngine::new()
        .with_table(
            "hive",
            "sales",
            "customers",
            vec![col("customer_id", "bigint"), col("name", "varchar")],
        )
        .with_table(
            "hive",
            "sales",
            "orders",
            vec![col("order_id", "bigint"), col("customer_id", "bigint")],
        )
}

fn settings(classify_intent: bool) -> PipelineConfig {
    PipelineConfig {
        catalog: "hive".into(),
        schema: "sales".into(),
        classify_intent,
        ..PipelineConfig::default()
    }
}

async fn pipeline(
    llm: &Arc<ScriptedCompletionEngine>,
    engine: &Arc<InMemoryDataEngine>,
    classify_intent: bool,
) -> Nl2SqlPipeline {
    Nl2SqlPipeline::new(
        llm.clone(),
        engine.clone(),
        Arc::new(InMemoryConversationStore::new()),
        SchemaDocument::default(),
        Blacklist::default(),
        settings(classify_intent),
    )
    .await
}

#[tokio::test]
async fn show_me_all_customers_end_to_end() {
    let llm = Arc::new(ScriptedCompletionEngine::with_replies([
        DATA_QUERY.to_string(),
        SINGLE_PLAN.to_string(),
        format!("```sql\n{CUSTOMERS_SQL}\n```"),
        "  There are two customers: Acme and Globex.  ".to_string(),
    ]));
    let engine = Arc::new(warehouse().with_result(CUSTOMERS_SQL, customers()));
    let nl = pipeline(&llm, &engine, true).await;

    let resp = nl.ask("Show me all customers", None).await;

    assert_eq!(resp.status, ResponseStatus::Success);
    assert_eq!(resp.sql.as_deref(), Some(CUSTOMERS_SQL));
    assert_eq!(resp.row_count, 2);
    assert_eq!(resp.explanation, "There are two customers: Acme and Globex.");
    assert!(resp.table.contains("<td>Globex</td>"));
    assert_eq!(resp.http_status, 200);
    assert_eq!(llm.call_count(), 4);
    assert_eq!(engine.executed().await, vec![CUSTOMERS_SQL.to_string()]);

    // the builder saw the live schema
    let build_req = &llm.requests()[2];
    assert!(build_req.turns[0].content.contains("## Table: customers"));
    assert!(build_req.turns[0].content.contains("customer_id (bigint)"));

    let body = serde_json::to_value(&resp).unwrap();
    assert_eq!(body["status"], "success");
    assert!(body.get("steps").is_none());
    assert!(body.get("error").is_none());

    let id = resp.conversation_id.clone().unwrap();
    let record = nl.conversation(&id).await.unwrap().unwrap();
    assert_eq!(record.messages.len(), 2);
    assert_eq!(record.messages[0].role, Role::User);
    assert_eq!(record.messages[1].metadata["sql"], CUSTOMERS_SQL);
    assert_eq!(record.messages[1].metadata["row_count"], 2);
}

#[tokio::test]
async fn now_is_rewritten_without_a_repair() {
    let llm = Arc::new(ScriptedCompletionEngine::with_replies([
        "I would run one query.",
        "SELECT NOW()",
        "It is currently noon.",
    ]));
    let now = QueryResult::from_positional(
        vec!["_col0".into()],
        vec![vec![json!("2024-05-01 12:00:00.000 UTC")]],
    );
    let engine = Arc::new(warehouse().with_result("SELECT current_timestamp", now));
    let nl = pipeline(&llm, &engine, false).await;

    let resp = nl.ask("What is the current time on the server?", None).await;

    assert!(resp.is_success());
    assert_eq!(resp.sql.as_deref(), Some("SELECT current_timestamp"));
    // plan, build, explain: no repair call
    assert_eq!(llm.call_count(), 3);
}

#[tokio::test]
async fn drop_table_never_reaches_the_engine() {
    let llm = Arc::new(ScriptedCompletionEngine::with_replies([
        SINGLE_PLAN,
        "DROP TABLE customers",
        "DROP TABLE customers;",
    ]));
    let engine = Arc::new(warehouse());
    let nl = pipeline(&llm, &engine, false).await;

    let resp = nl.ask("Delete the customers table", None).await;

    assert_eq!(resp.status, ResponseStatus::Error);
    assert_eq!(resp.stage, Some(Stage::Validation));
    assert_eq!(resp.http_status, 500);
    assert!(resp.error.as_deref().unwrap().contains("ddl"));
    assert!(resp.sql.as_deref().unwrap().starts_with("DROP TABLE customers"));
    assert!(engine.executed().await.is_empty());
}

#[tokio::test]
async fn multi_query_stops_at_the_failing_step() {
    let llm = Arc::new(ScriptedCompletionEngine::with_replies([
        r#"{"plan_type": "multi_query",
            "steps": [{"id": "q1", "objective": "count orders"},
                      {"id": "q2", "objective": "list returns"},
                      {"id": "q3", "objective": "count customers"}],
            "final_instruction": "report each figure"}"#,
        "SELECT count(*) AS n FROM hive.sales.orders",
        "There are 5 orders.",
        "SELECT * FROM hive.sales.returns",
    ]));
    let engine = Arc::new(
        warehouse()
            .with_result(
                "SELECT count(*) AS n FROM hive.sales.orders",
                QueryResult::from_positional(vec!["n".into()], vec![vec![json!(5)]]),
            )
            .with_failure(
                "SELECT * FROM hive.sales.returns",
                "Table 'hive.sales.returns' does not exist",
            ),
    );
    let nl = pipeline(&llm, &engine, false).await;

    let resp = nl
        .ask("How many orders and returns and customers do we have?", None)
        .await;

    assert_eq!(resp.status, ResponseStatus::Error);
    assert_eq!(resp.stage, Some(Stage::Execution));
    assert_eq!(resp.failed_step.as_deref(), Some("q2"));
    assert_eq!(resp.sql.as_deref(), Some("SELECT * FROM hive.sales.returns"));
    assert!(resp.error.as_deref().unwrap().contains("does not exist"));

    assert_eq!(resp.steps.len(), 1);
    assert_eq!(resp.steps[0].task.id, "q1");
    assert_eq!(resp.steps[0].task.sql, "SELECT count(*) AS n FROM hive.sales.orders");
    assert_eq!(resp.steps[0].row_count, 1);
    // q3 was never built
    assert_eq!(llm.call_count(), 4);
    assert_eq!(engine.executed().await.len(), 2);

    let body = serde_json::to_value(&resp).unwrap();
    assert_eq!(body["failed_step"], "q2");
    assert_eq!(body["steps"].as_array().unwrap().len(), 1);
    assert_eq!(body["steps"][0]["id"], "q1");
    assert_eq!(body["steps"][0]["sql"], "SELECT count(*) AS n FROM hive.sales.orders");
}

#[tokio::test]
async fn multi_query_success_reports_every_step() {
    let llm = Arc::new(ScriptedCompletionEngine::with_replies([
        r#"{"plan_type": "multi_query",
            "steps": [{"id": "q1", "objective": "count orders"},
                      {"id": "q2", "objective": "list customers"}],
            "final_instruction": "report both"}"#,
        "SELECT count(*) AS n FROM hive.sales.orders",
        "There are 5 orders.",
        CUSTOMERS_SQL,
        "Two customers.",
    ]));
    let engine = Arc::new(
        warehouse()
            .with_result(
                "SELECT count(*) AS n FROM hive.sales.orders",
                QueryResult::from_positional(vec!["n".into()], vec![vec![json!(5)]]),
            )
            .with_result(CUSTOMERS_SQL, customers()),
    );
    let nl = pipeline(&llm, &engine, false).await;

    let resp = nl.ask("Count orders and list customers", None).await;

    assert!(resp.is_success());
    assert!(resp.sql.is_none());
    assert_eq!(resp.steps.len(), 2);
    assert_eq!(resp.row_count, 3);
    assert_eq!(resp.explanation, "q1: There are 5 orders.\n\nq2: Two customers.");

    // each step is built with a step-scoped question and plan context
    let q2_build = &llm.requests()[3];
    assert!(q2_build.turns[0].content.contains("current_step: q2"));
    assert!(q2_build.turns[0].content.contains("list customers"));
}

#[tokio::test]
async fn greeting_gets_a_follow_up_instead_of_sql() {
    let llm = Arc::new(ScriptedCompletionEngine::with_replies([
        r#"{"intent": "chitchat", "follow_up": ""}"#,
    ]));
    let engine = Arc::new(warehouse());
    let nl = pipeline(&llm, &engine, true).await;

    let resp = nl.ask("hi", None).await;

    assert_eq!(resp.status, ResponseStatus::Clarification);
    assert_eq!(
        resp.explanation,
        "I can help with your database; what would you like to analyze?"
    );
    assert!(resp.sql.is_none());
    assert_eq!(llm.call_count(), 1);
    assert!(engine.executed().await.is_empty());
}

#[tokio::test]
async fn blank_question_is_rejected_with_400() {
    let llm = Arc::new(ScriptedCompletionEngine::new());
    let engine = Arc::new(warehouse());
    let nl = pipeline(&llm, &engine, true).await;

    let resp = nl.ask("   ", None).await;

    assert_eq!(resp.status, ResponseStatus::Error);
    assert_eq!(resp.stage, Some(Stage::Input));
    assert_eq!(resp.http_status, 400);
    assert!(resp.conversation_id.is_none());
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn schema_context_honours_blacklist_and_static_docs() {
    let static_doc = SchemaDocument {
        tables: vec![TableDoc {
            name: "customers".into(),
            description: "One row per customer".into(),
            columns: Vec::new(),
        }],
        ..SchemaDocument::default()
    };
    let nl = Nl2SqlPipeline::new(
        Arc::new(ScriptedCompletionEngine::new()),
        Arc::new(warehouse()),
        Arc::new(InMemoryConversationStore::new()),
        static_doc,
        Blacklist::new([("HIVE", "Sales", "Orders")]),
        settings(false),
    )
    .await;

    let ctx = nl.schema_context();
    assert!(ctx.live);
    assert_eq!(ctx.document.database, "hive.sales");
    assert!(ctx.document.table("orders").is_none());
    let customers = ctx.document.table("customers").unwrap();
    assert_eq!(customers.description, "One row per customer");
    assert_eq!(customers.columns.len(), 2);
    assert!(!ctx.text.contains("orders"));
}

#[tokio::test]
async fn unreachable_catalog_degrades_to_static_schema() {
    let static_doc = SchemaDocument {
        tables: vec![TableDoc {
            name: "customers".into(),
            description: "One row per customer".into(),
            columns: Vec::new(),
        }],
        ..SchemaDocument::default()
    };
    let nl = Nl2SqlPipeline::new(
        Arc::new(ScriptedCompletionEngine::new()),
        Arc::new(InMemoryDataEngine::new().with_catalog_down()),
        Arc::new(InMemoryConversationStore::new()),
        static_doc,
        Blacklist::default(),
        settings(false),
    )
    .await;

    assert!(!nl.schema_context().live);
    assert_eq!(nl.schema_context().document.table_names(), vec!["customers"]);
}

#[tokio::test]
async fn conversation_continues_across_requests_in_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileConversationStore::open(dir.path()).unwrap());
    let llm = Arc::new(ScriptedCompletionEngine::with_replies([
        SINGLE_PLAN,
        CUSTOMERS_SQL,
        "Two customers.",
        SINGLE_PLAN,
        CUSTOMERS_SQL,
        "Still two customers.",
    ]));
    let engine = Arc::new(warehouse().with_result(CUSTOMERS_SQL, customers()));
    let nl = Nl2SqlPipeline::new(
        llm.clone(),
        engine.clone(),
        store.clone(),
        SchemaDocument::default(),
        Blacklist::default(),
        settings(false),
    )
    .await;

    let first = nl.ask("Show me all customers", None).await;
    let id = first.conversation_id.clone().unwrap();
    let second = nl.ask("Show me all customers again", Some(&id)).await;
    assert_eq!(second.conversation_id.as_deref(), Some(id.as_str()));

    let record = store.get(&id).await.unwrap().unwrap();
    assert_eq!(record.messages.len(), 4);
    assert_eq!(record.messages[3].content, "Still two customers.");
    assert_eq!(record.messages[3].metadata["status"], "success");
}

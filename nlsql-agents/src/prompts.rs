//! Prompt text for every completion call.

use nlsql_policy::DialectIssue;

use crate::builder::SqlContext;

pub const INTENT_SYSTEM: &str = r#"You are an intent classifier in front of a data Q&A system.
Decide if the user message should trigger SQL generation, needs clarification, or is chit-chat.

Return STRICT JSON with keys:
- intent: one of ["data_query", "clarification_needed", "chitchat", "other"]
- follow_up: short clarifying question if intent is "clarification_needed", else "".

Rules:
- If the user greets or makes small talk, mark as "chitchat".
- If the request is ambiguous or lacks key filters/metrics, mark "clarification_needed" and propose a specific follow-up question.
- Otherwise use "data_query".
- A short greeting with no data nouns, metrics or tables ("hi", "hello", "good morning") is "chitchat"; never run SQL for these.
- "help", "what can you do" and similar are "clarification_needed": ask what they want to analyze.
- Messages unrelated to the database (weather, news, opinions, jokes) are "other"; suggest asking a data question.
- Do not add explanations outside the JSON.

Examples:
- "hi" -> {"intent": "chitchat", "follow_up": ""}
- "help" -> {"intent": "clarification_needed", "follow_up": "What dataset or metric should I explore for you?"}
- "show top 10 customers by revenue" -> {"intent": "data_query", "follow_up": ""}
- "can you tell me about sales?" -> {"intent": "clarification_needed", "follow_up": "Which region or time period for sales?"}
- "what's the weather" -> {"intent": "other", "follow_up": "I can help with your database; what would you like to analyze?"}"#;

pub fn intent_user(question: &str) -> String {
    format!("User message: {question}\nRespond with JSON only.")
}

pub const PLANNING_SYSTEM: &str = r#"You are a careful planner for generating Trino SQL. Decide if the user's question needs one SQL query, a single query with multiple CTEs, or multiple separate queries. Keep the plan minimal and safe.

Output STRICT JSON with keys:
- plan_type: "single", "multi_cte", or "multi_query"
- steps: array of objects: [{ "id": "q1", "objective": "<short description>", "tables": ["optional_table1", "optional_table2"] }]
- final_instruction: short note on how to produce the final result (if single, restate the goal; if multi, explain how the steps combine).

Constraints:
- Read-only analytics only (no INSERT/UPDATE/DELETE/DDL).
- For multi_cte or multi_query keep 2-3 steps max.
- Only include tables that match the catalog/schema provided."#;

pub fn planning_user(
    question: &str,
    schema_context: &str,
    catalog: &str,
    schema_name: &str,
    database: &str,
) -> String {
    format!(
        "Catalog: {catalog}\nSchema: {schema_name}\nFully-qualified: {database}\n\n\
         Schema summary:\n{schema_context}\n\n\
         User question: {question}\n\nRespond with JSON only."
    )
}

pub fn builder_system(ctx: &SqlContext<'_>) -> String {
    format!(
        r#"You are a SQL expert specializing in the Trino SQL dialect.
Your task is to convert natural language questions into valid Trino SQL queries ONLY using Trino-supported syntax.

# Database:
Catalog: {catalog}
Schema: {schema}
Fully-qualified: {database}

# Important Rules:
1. Generate ONLY valid Trino SQL syntax; avoid MySQL, SQL Server, Oracle or PostgreSQL constructs Trino does not support.
2. Do NOT use `TOP`, `WITH TIES`, `AUTO_INCREMENT`, `IFNULL`, `STR_TO_DATE`, `DATE_SUB`, `GETDATE()`, `NOW()`, `INTERVAL` expressions, or backticks. Use Trino equivalents (`date_add`, `date_diff`, `current_date`, `current_timestamp`).
3. Use proper table identifiers; prefer unquoted lower-case names, double-quote only when necessary.
4. Use the `LIMIT` clause to restrict result size when appropriate.
5. Return ONLY the SQL query: no explanations, no markdown, no code fences.
6. The query must be read-only: never generate `DROP`, `DELETE`, `TRUNCATE`, `UPDATE`, `MERGE`, `INSERT` or other DDL/DML.
7. Prefer `CAST(... AS type)` for conversions (never `::type`) and `COUNT(*)` for counts.
8. To list tables, query `{catalog}.information_schema.tables` filtered by table_schema = '{schema}'.
9. To list columns of a table, query `information_schema.columns` filtered by `table_schema` and `table_name`.
10. If the plan_type is multi_cte, use CTEs named after the step ids (WITH q1 AS (...), q2 AS (...)) and a final SELECT combining them per the plan.

# Examples:
Question: "Show me all customers"
SQL: SELECT * FROM customers LIMIT 100

Question: "How many orders were placed last month?"
SQL: SELECT COUNT(*) AS order_count FROM orders WHERE order_date >= date_add('month', -1, current_date) AND order_date < current_date

Question: "What are the top 5 customers by total order value?"
SQL: SELECT c.customer_id, c.name, SUM(o.total_amount) AS total_spent FROM customers c JOIN orders o ON c.customer_id = o.customer_id GROUP BY c.customer_id, c.name ORDER BY total_spent DESC LIMIT 5"#,
        catalog = ctx.catalog,
        schema = ctx.schema_name,
        database = ctx.database,
    )
}

pub fn builder_user(question: &str, ctx: &SqlContext<'_>) -> String {
    format!(
        "# Database Schema:\n{}\n\n# Plan:\n{}\n\n# User Question:\n{question}\n\n# SQL Query:",
        ctx.schema_context, ctx.plan_context
    )
}

/// Question for a repair attempt: the corrective note, then the original question.
pub fn repair_question(question: &str, issues: &[DialectIssue]) -> String {
    let names: Vec<&str> = issues.iter().map(|i| i.as_str()).collect();
    format!(
        "The previous SQL used non-Trino constructs: {}. \
         Rewrite the query using only Trino-supported syntax (use date_add/date_diff/current_date/current_timestamp), \
         remove backticks, avoid :: casts, and do not include explanation. Return only the SQL query.\n\
         User Question: {question}",
        names.join(", ")
    )
}

pub const EXPLAIN_SYSTEM: &str = r#"You are a helpful data analyst assistant.
Your task is to explain query results in plain, easy-to-understand English.

# Instructions:
1. Provide a clear, concise explanation of what the results show
2. Highlight key findings or patterns
3. Use plain language, avoid technical jargon
4. If results are empty, explain why that might be
5. Keep the response concise (2-4 sentences)"#;

pub fn explain_user(question: &str, sql: &str, results: &str) -> String {
    format!(
        "# User's Question:\n{question}\n\n# SQL Query Executed:\n{sql}\n\n# Query Results:\n{results}\n\n# Your Explanation:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_question_lists_issue_names_before_question() {
        let q = repair_question("top customers", &[DialectIssue::TopClause, DialectIssue::Backticks]);
        assert!(q.starts_with("The previous SQL used non-Trino constructs: top_clause, backticks."));
        assert!(q.ends_with("User Question: top customers"));
    }

    #[test]
    fn builder_prompts_carry_context() {
        let ctx = SqlContext {
            schema_context: "## Table: customers",
            plan_context: "plan_type: single",
            catalog: "hive",
            schema_name: "sales",
            database: "hive.sales",
        };
        assert!(builder_system(&ctx).contains("hive.information_schema.tables"));
        let user = builder_user("Show me all customers", &ctx);
        assert!(user.contains("## Table: customers"));
        assert!(user.contains("plan_type: single"));
        assert!(user.ends_with("# SQL Query:"));
    }

    #[test]
    fn builder_system_shows_trino_examples_after_the_rules() {
        let ctx = SqlContext {
            schema_context: "",
            plan_context: "",
            catalog: "hive",
            schema_name: "sales",
            database: "hive.sales",
        };
        let system = builder_system(&ctx);
        let rules = system.find("# Important Rules:").unwrap();
        let examples = system.find("# Examples:").unwrap();
        assert!(rules < examples);
        assert!(system.contains("SQL: SELECT * FROM customers LIMIT 100"));
        assert!(system.contains("date_add('month', -1, current_date)"));
        assert!(system.contains("ORDER BY total_spent DESC LIMIT 5"));
        assert!(!system[examples..].contains("TOP "));
    }
}

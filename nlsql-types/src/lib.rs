use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One column of a described table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDoc {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDoc {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<ColumnDoc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub description: String,
}

/// Table/column metadata handed to the model as grounding context.
///
/// `database` is the fully-qualified `catalog.schema` the tables live in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub tables: Vec<TableDoc>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl SchemaDocument {
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableDoc> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// Live column description as reported by the data engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Single,
    MultiCte,
    MultiQuery,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Single => "single",
            PlanType::MultiCte => "multi_cte",
            PlanType::MultiQuery => "multi_query",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub objective: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<String>,
}

/// Execution plan for one question. `steps` is never empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_type: PlanType,
    pub steps: Vec<PlanStep>,
    pub final_instruction: String,
}

impl Plan {
    /// Single-step plan used whenever the planner output cannot be trusted.
    pub fn fallback(question: &str) -> Self {
        Self {
            plan_type: PlanType::Single,
            steps: vec![PlanStep {
                id: "q1".into(),
                objective: question.to_string(),
                tables: Vec::new(),
            }],
            final_instruction: "Answer the question in one query".into(),
        }
    }
}

/// One independently built statement of a `multi_query` plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlTask {
    pub id: String,
    pub objective: String,
    pub sql: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    DataQuery,
    ClarificationNeeded,
    Chitchat,
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentDecision {
    pub intent: Intent,
    #[serde(default)]
    pub follow_up: String,
}

/// Column name to value. Names are unique per result, see `QueryResult::from_positional`.
pub type Row = serde_json::Map<String, Value>;

/// Fully materialized result set. Column order is authoritative.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// Zip positional rows with column names.
    ///
    /// A repeated name (`SELECT a.id, b.id ...`) gets a `_2`, `_3` suffix so
    /// no value is lost when rows are keyed by column.
    pub fn from_positional(columns: Vec<String>, data: Vec<Vec<Value>>) -> Self {
        let columns = unique_names(columns);
        let rows = data
            .into_iter()
            .map(|values| {
                columns
                    .iter()
                    .cloned()
                    .zip(values)
                    .collect::<Row>()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one row in column order; missing cells come back as null.
    pub fn values(&self, row: &Row) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Single completion request handed to the text-completion service.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub turns: Vec<ChatTurn>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            turns: vec![ChatTurn::user(user)],
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub topic: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
}

fn unique_names(columns: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    columns
        .into_iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut n = 1;
            while !seen.insert(candidate.clone()) {
                n += 1;
                candidate = format!("{name}_{n}");
            }
            candidate
        })
        .collect()
}

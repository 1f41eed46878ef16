use std::collections::HashMap;

use async_trait::async_trait;
use nlsql_types::{LiveColumn, QueryResult};
use tokio::sync::Mutex;

use crate::{DataEngine, DataError};

/// In-memory data engine with a fixed catalog and canned statement results.
///
/// It does not parse SQL: statements are matched after whitespace
/// normalization. Every executed statement is logged, which lets callers
/// check that a statement never reached the engine.
#[derive(Default)]
pub struct InMemoryDataEngine {
    tables: HashMap<(String, String), Vec<(String, Vec<LiveColumn>)>>,
    results: HashMap<String, Result<QueryResult, String>>,
    catalog_down: bool,
    broken: Vec<(String, String, String)>,
    executed: Mutex<Vec<String>>,
}

impl InMemoryDataEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(
        mut self,
        catalog: &str,
        schema: &str,
        table: &str,
        columns: Vec<LiveColumn>,
    ) -> Self {
        self.tables
            .entry((catalog.to_lowercase(), schema.to_lowercase()))
            .or_default()
            .push((table.to_string(), columns));
        self
    }

    pub fn with_result(mut self, sql: &str, result: QueryResult) -> Self {
        self.results.insert(statement_key(sql), Ok(result));
        self
    }

    pub fn with_failure(mut self, sql: &str, message: &str) -> Self {
        self.results.insert(statement_key(sql), Err(message.to_string()));
        self
    }

    /// A table that is listed but cannot be described, like a view over a dropped table.
    pub fn with_broken_table(mut self, catalog: &str, schema: &str, table: &str) -> Self {
        self = self.with_table(catalog, schema, table, Vec::new());
        self.broken.push((
            catalog.to_lowercase(),
            schema.to_lowercase(),
            table.to_lowercase(),
        ));
        self
    }

    /// Make every catalog call fail, as when the warehouse is unreachable.
    pub fn with_catalog_down(mut self) -> Self {
        self.catalog_down = true;
        self
    }

    pub async fn executed(&self) -> Vec<String> {
        self.executed.lock().await.clone()
    }
}

fn statement_key(sql: &str) -> String {
    sql.trim()
        .trim_end_matches(';')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl DataEngine for InMemoryDataEngine {
    async fn execute(&self, sql: &str) -> Result<QueryResult, DataError> {
        let key = statement_key(sql);
        self.executed.lock().await.push(key.clone());
        match self.results.get(&key) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(DataError::new(message.clone())),
            None => Err(DataError::new(format!("no canned result for: {key}"))),
        }
    }

    async fn list_tables(&self, catalog: &str, schema: &str) -> Result<Vec<String>, DataError> {
        if self.catalog_down {
            return Err(DataError::new("catalog unavailable"));
        }
        Ok(self
            .tables
            .get(&(catalog.to_lowercase(), schema.to_lowercase()))
            .map(|ts| ts.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default())
    }

    async fn describe_columns(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<LiveColumn>, DataError> {
        if self.catalog_down {
            return Err(DataError::new("catalog unavailable"));
        }
        let key = (catalog.to_lowercase(), schema.to_lowercase(), table.to_lowercase());
        if self.broken.contains(&key) {
            return Err(DataError::new(format!(
                "cannot describe {catalog}.{schema}.{table}: view is stale"
            )));
        }
        self.tables
            .get(&(catalog.to_lowercase(), schema.to_lowercase()))
            .and_then(|ts| ts.iter().find(|(name, _)| name.eq_ignore_ascii_case(table)))
            .map(|(_, cols)| cols.clone())
            .ok_or_else(|| DataError::new(format!("table not found: {catalog}.{schema}.{table}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn matches_statements_modulo_whitespace() {
        let result = QueryResult::from_positional(vec!["n".into()], vec![vec![json!(1)]]);
        let engine = InMemoryDataEngine::new().with_result("SELECT  1 AS n", result.clone());

        assert_eq!(engine.execute("SELECT 1\nAS n;").await.unwrap(), result);
        assert!(engine.execute("SELECT 2").await.is_err());
        assert_eq!(engine.executed().await, vec!["SELECT 1 AS n", "SELECT 2"]);
    }

    #[tokio::test]
    async fn catalog_lookups_are_case_insensitive() {
        let engine = InMemoryDataEngine::new().with_table(
            "Hive",
            "Sales",
            "orders",
            vec![LiveColumn {
                name: "id".into(),
                data_type: "bigint".into(),
                comment: String::new(),
            }],
        );
        assert_eq!(engine.list_tables("hive", "sales").await.unwrap(), vec!["orders"]);
        assert_eq!(engine.describe_columns("hive", "sales", "ORDERS").await.unwrap().len(), 1);
        assert!(engine.describe_columns("hive", "sales", "missing").await.is_err());
    }
}

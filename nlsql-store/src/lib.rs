use async_trait::async_trait;
use nlsql_types::{LiveColumn, QueryResult};
use thiserror::Error;

pub mod trino;
pub use trino::{
    describe_sql, quote_ident, sample_sql, show_schemas_sql, show_tables_sql, TrinoConfig,
    TrinoEngine,
};

pub mod memory;
pub use memory::InMemoryDataEngine;

#[derive(Debug, Error)]
#[error("data engine error: {message}")]
pub struct DataError {
    pub message: String,
}

impl DataError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Connection to the warehouse: every structured read goes through this trait.
///
/// Implementations must be safe to share between concurrent requests.
#[async_trait]
pub trait DataEngine: Send + Sync {
    /// Run one statement and materialize every row.
    async fn execute(&self, sql: &str) -> Result<QueryResult, DataError>;

    /// Table names in `catalog.schema`.
    async fn list_tables(&self, catalog: &str, schema: &str) -> Result<Vec<String>, DataError>;

    /// Column name/type/comment for one table.
    async fn describe_columns(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<LiveColumn>, DataError>;

    /// Release the underlying connection. Later calls may reconnect.
    async fn close(&self) {}
}

use std::time::Duration;

use async_trait::async_trait;
use nlsql_types::{LiveColumn, QueryResult};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{DataEngine, DataError};

/// Statuses the Trino protocol asks clients to retry.
const RETRYABLE: [u16; 3] = [502, 503, 504];
const MAX_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TrinoConfig {
    pub host: String,
    pub port: u16,
    pub http_scheme: String,
    pub user: String,
    pub password: Option<String>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub source: String,
    pub verify_tls: bool,
    pub timeout_secs: u64,
}

impl Default for TrinoConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
            http_scheme: "http".into(),
            user: "nlsql".into(),
            password: None,
            catalog: None,
            schema: None,
            source: "nlsql".into(),
            verify_tls: true,
            timeout_secs: 120,
        }
    }
}

impl TrinoConfig {
    pub fn statement_url(&self) -> String {
        format!("{}://{}:{}/v1/statement", self.http_scheme, self.host, self.port)
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    next_uri: Option<String>,
    #[serde(default)]
    columns: Option<Vec<ColumnInfo>>,
    #[serde(default)]
    data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    error: Option<QueryFailure>,
}

#[derive(Deserialize, Debug)]
struct ColumnInfo {
    name: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct QueryFailure {
    message: String,
    #[serde(default)]
    error_name: Option<String>,
}

/// Trino client speaking the REST statement protocol.
///
/// The HTTP client is built on first use and shared (it pools connections
/// internally, so concurrent requests are fine). `close` drops it.
pub struct TrinoEngine {
    cfg: TrinoConfig,
    client: RwLock<Option<reqwest::Client>>,
}

impl TrinoEngine {
    pub fn new(cfg: TrinoConfig) -> Self {
        Self {
            cfg,
            client: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &TrinoConfig {
        &self.cfg
    }

    async fn connection(&self) -> Result<reqwest::Client, DataError> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(client.clone());
        }
        let mut slot = self.client.write().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.cfg.timeout_secs))
            .danger_accept_invalid_certs(!self.cfg.verify_tls)
            .build()
            .map_err(|e| DataError::new(format!("failed to connect to Trino: {e}")))?;
        info!(host = %self.cfg.host, port = self.cfg.port, "connected to Trino");
        *slot = Some(client.clone());
        Ok(client)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut req = req
            .header("X-Trino-User", &self.cfg.user)
            .header("X-Trino-Source", &self.cfg.source);
        if let Some(catalog) = &self.cfg.catalog {
            req = req.header("X-Trino-Catalog", catalog);
        }
        if let Some(schema) = &self.cfg.schema {
            req = req.header("X-Trino-Schema", schema);
        }
        if let Some(password) = &self.cfg.password {
            req = req.basic_auth(&self.cfg.user, Some(password));
        }
        req
    }

    async fn send(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<StatementResponse, DataError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let resp = self
                .authorize(build())
                .send()
                .await
                .map_err(|e| DataError::new(format!("trino request error: {e}")))?;
            let status = resp.status();
            if RETRYABLE.contains(&status.as_u16()) && attempt < MAX_ATTEMPTS {
                warn!(%status, attempt, "trino busy, retrying");
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                continue;
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(DataError::new(format!("trino status: {status} {body}")));
            }
            return resp
                .json::<StatementResponse>()
                .await
                .map_err(|e| DataError::new(format!("trino parse error: {e}")));
        }
    }

    /// Catalog names visible to the configured user.
    pub async fn list_catalogs(&self) -> Result<Vec<String>, DataError> {
        let result = self.execute(SHOW_CATALOGS).await?;
        Ok(string_column(&result, "Catalog"))
    }

    pub async fn list_schemas(&self, catalog: &str) -> Result<Vec<String>, DataError> {
        let result = self.execute(&show_schemas_sql(catalog)).await?;
        Ok(string_column(&result, "Schema"))
    }

    /// First `limit` rows of a table, to show the model what values look like.
    pub async fn sample_rows(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
        limit: usize,
    ) -> Result<QueryResult, DataError> {
        self.execute(&sample_sql(catalog, schema, table, limit)).await
    }
}

#[async_trait]
impl DataEngine for TrinoEngine {
    async fn execute(&self, sql: &str) -> Result<QueryResult, DataError> {
        let client = self.connection().await?;
        let url = self.cfg.statement_url();
        let body = sql.to_string();

        let mut page = self
            .send(|| client.post(&url).body(body.clone()))
            .await?;
        debug!(query_id = %page.id, "trino query submitted");

        let mut columns: Option<Vec<String>> = None;
        let mut data: Vec<Vec<Value>> = Vec::new();
        loop {
            if let Some(err) = page.error.take() {
                let name = err.error_name.unwrap_or_default();
                return Err(DataError::new(format!("{name}: {}", err.message)));
            }
            if columns.is_none() {
                if let Some(cols) = page.columns.take() {
                    columns = Some(cols.into_iter().map(|c| c.name).collect());
                }
            }
            if let Some(rows) = page.data.take() {
                data.extend(rows);
            }
            let Some(next) = page.next_uri.take() else { break; };
            page = self.send(|| client.get(&next)).await?;
        }

        let result = QueryResult::from_positional(columns.unwrap_or_default(), data);
        info!(rows = result.row_count(), "query executed");
        Ok(result)
    }

    async fn list_tables(&self, catalog: &str, schema: &str) -> Result<Vec<String>, DataError> {
        let result = self.execute(&show_tables_sql(catalog, schema)).await?;
        Ok(string_column(&result, "Table"))
    }

    async fn describe_columns(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<LiveColumn>, DataError> {
        let result = self.execute(&describe_sql(catalog, schema, table)).await?;
        Ok(result
            .rows
            .iter()
            .map(|row| LiveColumn {
                name: cell_text(row.get("Column")),
                data_type: cell_text(row.get("Type")),
                comment: cell_text(row.get("Comment")),
            })
            .collect())
    }

    async fn close(&self) {
        if self.client.write().await.take().is_some() {
            info!("Trino connection closed");
        }
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

const SHOW_CATALOGS: &str = "SHOW CATALOGS";

fn qualified(catalog: &str, schema: &str, table: &str) -> String {
    format!("{}.{}.{}", quote_ident(catalog), quote_ident(schema), quote_ident(table))
}

pub fn show_schemas_sql(catalog: &str) -> String {
    format!("SHOW SCHEMAS FROM {}", quote_ident(catalog))
}

pub fn show_tables_sql(catalog: &str, schema: &str) -> String {
    format!("SHOW TABLES FROM {}.{}", quote_ident(catalog), quote_ident(schema))
}

pub fn describe_sql(catalog: &str, schema: &str, table: &str) -> String {
    format!("DESCRIBE {}", qualified(catalog, schema, table))
}

/// A zero limit still asks for one row.
pub fn sample_sql(catalog: &str, schema: &str, table: &str, limit: usize) -> String {
    format!("SELECT * FROM {} LIMIT {}", qualified(catalog, schema, table), limit.max(1))
}

fn cell_text(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn string_column(result: &QueryResult, column: &str) -> Vec<String> {
    result
        .rows
        .iter()
        .map(|row| cell_text(row.get(column)))
        .filter(|s| !s.is_empty())
        .collect()
}

use std::{fs, path::Path, path::PathBuf, time::Duration};

use nlsql_infer::ChatApiFlavor;
use nlsql_store::TrinoConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {message}")]
    Io { path: String, message: String },
    #[error("invalid config {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub trino: TrinoConfig,
    pub schema: SchemaConfig,
    pub pipeline: PipelineConfig,
    pub history: HistoryConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Set for Azure OpenAI deployments; `model` is then the deployment name.
    pub api_version: Option<String>,
    /// Use the null engine instead of a remote service.
    pub stub: bool,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key: None,
            api_version: None,
            stub: false,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    pub fn flavor(&self) -> ChatApiFlavor {
        match &self.api_version {
            Some(v) if !v.is_empty() => ChatApiFlavor::Azure {
                api_version: v.clone(),
            },
            _ => ChatApiFlavor::OpenAi,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub static_file: PathBuf,
    pub blacklist_file: PathBuf,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            static_file: PathBuf::from("schema.yaml"),
            blacklist_file: PathBuf::from("blacklist.yaml"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub catalog: String,
    pub schema: String,
    pub max_repairs: u32,
    pub max_rows_to_show: usize,
    pub classify_intent: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog: "hive".into(),
            schema: "default".into(),
            max_repairs: 1,
            max_rows_to_show: 10,
            classify_intent: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    #[default]
    Memory,
    File,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub backend: HistoryBackend,
    pub dir: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: HistoryBackend::Memory,
            dir: PathBuf::from("./conversations"),
        }
    }
}

impl AppConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// File (if any), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::from_path(p)?,
            None => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Apply `KEY=value` overrides from `lookup`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("LLM_API_VERSION") {
            self.llm.api_version = Some(v);
        }
        if let Some(v) = get("LLM_STUB") {
            self.llm.stub = v == "1" || v.to_lowercase() == "true";
        }

        if let Some(v) = get("TRINO_HOST") {
            self.trino.host = v;
        }
        if let Some(v) = get("TRINO_PORT") {
            self.trino.port = v.parse().map_err(|_| ConfigError::Env {
                key: "TRINO_PORT",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("TRINO_USER") {
            self.trino.user = v;
        }
        if let Some(v) = get("TRINO_PASSWORD") {
            self.trino.password = Some(v);
        }
        if let Some(v) = get("TRINO_HTTP_SCHEME") {
            self.trino.http_scheme = v;
        }
        if let Some(v) = get("TRINO_CATALOG") {
            self.pipeline.catalog = v;
        }
        if let Some(v) = get("TRINO_SCHEMA") {
            self.pipeline.schema = v;
        }

        if let Some(v) = get("NLSQL_SCHEMA_FILE") {
            self.schema.static_file = PathBuf::from(v);
        }
        if let Some(v) = get("NLSQL_BLACKLIST_FILE") {
            self.schema.blacklist_file = PathBuf::from(v);
        }
        if let Some(v) = get("NLSQL_HISTORY_DIR") {
            self.history.backend = HistoryBackend::File;
            self.history.dir = PathBuf::from(v);
        }

        // the session defaults follow the pipeline target unless set explicitly
        if self.trino.catalog.is_none() {
            self.trino.catalog = Some(self.pipeline.catalog.clone());
        }
        if self.trino.schema.is_none() {
            self.trino.schema = Some(self.pipeline.schema.clone());
        }
        Ok(())
    }
}

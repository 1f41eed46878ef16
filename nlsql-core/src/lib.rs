//! The NL2SQL pipeline: schema context, intent, plan, build, validate,
//! execute and explain, wired around explicitly passed engines.

pub mod config;
pub use config::{AppConfig, ConfigError, HistoryBackend, HistoryConfig, LlmConfig, PipelineConfig, SchemaConfig};

pub mod render;
pub use render::{render_html_table, render_text_table};

pub mod response;
pub use response::{PipelineError, QueryResponse, ResponseStatus, Stage, StepOutcome};

pub mod pipeline;
pub use pipeline::Nl2SqlPipeline;

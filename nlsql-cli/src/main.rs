use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use nlsql_core::{
    render_text_table, AppConfig, HistoryBackend, Nl2SqlPipeline, QueryResponse, ResponseStatus,
};
use nlsql_history::{ConversationStore, FileConversationStore, InMemoryConversationStore};
use nlsql_infer::{CompletionEngine, HttpChatEngine, NullCompletionEngine};
use nlsql_schema::{load_static, table_key, Blacklist};
use nlsql_store::{DataEngine, TrinoEngine};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlsql", about = "Ask questions of a Trino warehouse in plain English")]
struct Cli {
    /// YAML config file; environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(flatten)]
    Pipeline(PipelineCommand),
    #[command(flatten)]
    Warehouse(WarehouseCommand),
}

#[derive(Subcommand)]
enum PipelineCommand {
    /// Answer one question.
    Ask {
        question: String,
        #[arg(long)]
        conversation_id: Option<String>,
        /// Print the response envelope as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the schema context handed to the model.
    Schema,
    /// Run `SELECT 1` against the warehouse.
    Check,
    /// Print a stored conversation.
    Conversation { id: String },
}

/// Browse the warehouse directly, without loading the schema context.
#[derive(Subcommand)]
enum WarehouseCommand {
    /// List catalogs visible to the configured user.
    Catalogs,
    /// List schemas in a catalog.
    Schemas { catalog: String },
    /// Print the first rows of a table.
    Sample {
        catalog: String,
        schema: String,
        table: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
}

fn completion_engine(cfg: &AppConfig) -> anyhow::Result<Arc<dyn CompletionEngine>> {
    if cfg.llm.stub {
        info!("LLM_STUB set, using the null completion engine");
        return Ok(Arc::new(NullCompletionEngine));
    }
    let engine = HttpChatEngine::new(
        cfg.llm.base_url.clone(),
        cfg.llm.model.clone(),
        cfg.llm.api_key.clone(),
        cfg.llm.flavor(),
        cfg.llm.timeout(),
    )?;
    Ok(Arc::new(engine))
}

fn conversation_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ConversationStore>> {
    let store: Arc<dyn ConversationStore> = match cfg.history.backend {
        HistoryBackend::Memory => Arc::new(InMemoryConversationStore::new()),
        HistoryBackend::File => Arc::new(FileConversationStore::open(&cfg.history.dir)?),
    };
    info!(backend = store.backend(), "conversation store selected");
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = AppConfig::load(cli.config.as_deref())?;

    let trino = Arc::new(TrinoEngine::new(cfg.trino.clone()));
    let blacklist = Blacklist::from_path(&cfg.schema.blacklist_file)?;

    let command = match cli.command {
        Command::Warehouse(command) => {
            let outcome = browse(&trino, &blacklist, command).await;
            trino.close().await;
            return outcome;
        }
        Command::Pipeline(command) => command,
    };

    let engine: Arc<dyn DataEngine> = trino;
    let static_doc = load_static(&cfg.schema.static_file)?;
    info!(
        static_tables = static_doc.tables.len(),
        blacklisted = blacklist.len(),
        "schema sources loaded"
    );

    let pipeline = Nl2SqlPipeline::new(
        completion_engine(&cfg)?,
        engine,
        conversation_store(&cfg)?,
        static_doc,
        blacklist,
        cfg.pipeline.clone(),
    )
    .await;

    let outcome = run(&pipeline, command).await;
    pipeline.close().await;
    outcome
}

async fn run(pipeline: &Nl2SqlPipeline, command: PipelineCommand) -> anyhow::Result<()> {
    match command {
        PipelineCommand::Ask {
            question,
            conversation_id,
            json,
        } => {
            let resp = pipeline.ask(&question, conversation_id.as_deref()).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
                ensure_answered(&resp)?;
            } else {
                match resp.status {
                    ResponseStatus::Success => {
                        if let Some(sql) = &resp.sql {
                            println!("SQL:\n{sql}\n");
                        }
                        if let Some(result) = &resp.result {
                            println!("{}\n", render_text_table(result));
                        }
                        for step in &resp.steps {
                            let task = &step.task;
                            println!("[{}] {}\nSQL:\n{}\n", task.id, task.objective, task.sql);
                            println!("{}\n", render_text_table(&step.result));
                        }
                        println!("{}", resp.explanation);
                    }
                    ResponseStatus::Clarification => println!("{}", resp.explanation),
                    ResponseStatus::Error => {
                        if let Some(sql) = &resp.sql {
                            eprintln!("SQL:\n{sql}\n");
                        }
                        ensure_answered(&resp)?;
                    }
                }
                if let Some(id) = &resp.conversation_id {
                    eprintln!("conversation: {id}");
                }
            }
        }
        PipelineCommand::Schema => {
            let ctx = pipeline.schema_context();
            if !ctx.live {
                eprintln!("(live catalog unreachable, static schema only)");
            }
            println!("{}", ctx.text);
        }
        PipelineCommand::Check => {
            pipeline.check().await?;
            println!("warehouse ok");
        }
        PipelineCommand::Conversation { id } => match pipeline.conversation(&id).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => anyhow::bail!("conversation {id} not found"),
        },
    }
    Ok(())
}

/// An error envelope fails the process, printed as JSON or not.
fn ensure_answered(resp: &QueryResponse) -> anyhow::Result<()> {
    if resp.status == ResponseStatus::Error {
        anyhow::bail!(resp.error.clone().unwrap_or_default());
    }
    Ok(())
}

async fn browse(
    trino: &TrinoEngine,
    blacklist: &Blacklist,
    command: WarehouseCommand,
) -> anyhow::Result<()> {
    match command {
        WarehouseCommand::Catalogs => {
            for catalog in trino.list_catalogs().await? {
                println!("{catalog}");
            }
        }
        WarehouseCommand::Schemas { catalog } => {
            for schema in trino.list_schemas(&catalog).await? {
                println!("{schema}");
            }
        }
        WarehouseCommand::Sample {
            catalog,
            schema,
            table,
            limit,
        } => {
            if blacklist.contains(&table_key(&table, &catalog, &schema)) {
                anyhow::bail!("{catalog}.{schema}.{table} is blacklisted");
            }
            let result = trino.sample_rows(&catalog, &schema, &table, limit).await?;
            println!("{}", render_text_table(&result));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlsql_core::PipelineConfig;
    use nlsql_history::InMemoryConversationStore;
    use nlsql_infer::ScriptedCompletionEngine;
    use nlsql_store::InMemoryDataEngine;
    use nlsql_types::SchemaDocument;

    async fn pipeline(replies: &[&str]) -> Nl2SqlPipeline {
        Nl2SqlPipeline::new(
            Arc::new(ScriptedCompletionEngine::with_replies(replies.iter().copied())),
            Arc::new(InMemoryDataEngine::new()),
            Arc::new(InMemoryConversationStore::new()),
            SchemaDocument::default(),
            Blacklist::default(),
            PipelineConfig::default(),
        )
        .await
    }

    #[tokio::test]
    async fn error_envelope_fails_the_command() {
        let nl = pipeline(&[]).await;
        let resp = nl.ask("   ", None).await;
        assert_eq!(resp.status, ResponseStatus::Error);

        let err = ensure_answered(&resp).unwrap_err();
        assert_eq!(err.to_string(), resp.error.unwrap());
    }

    #[tokio::test]
    async fn clarification_is_a_normal_exit() {
        let nl = pipeline(&[r#"{"intent": "chitchat", "follow_up": ""}"#]).await;
        let resp = nl.ask("hi", None).await;
        assert_eq!(resp.status, ResponseStatus::Clarification);
        assert!(ensure_answered(&resp).is_ok());
    }
}

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use nlsql_store::DataEngine;
use nlsql_types::{ColumnDoc, LiveColumn, SchemaDocument, TableDoc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("io error reading {path}: {message}")]
    Io { path: String, message: String },
    #[error("parse error in {path}: {message}")]
    Parse { path: String, message: String },
}

/// Load the hand-authored schema document. A missing file is an empty document.
pub fn load_static(path: impl AsRef<Path>) -> Result<SchemaDocument, SchemaError> {
    let path = path.as_ref();
    let Some(text) = read_optional(path)? else {
        info!(path = %path.display(), "no static schema document, starting empty");
        return Ok(SchemaDocument::default());
    };
    serde_yaml::from_str(&text).map_err(|e| SchemaError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn read_optional(path: &Path) -> Result<Option<String>, SchemaError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SchemaError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
    }
}

/// Lower-cased `(catalog, schema, table)` identity of a table.
pub type TableKey = (String, String, String);

#[derive(Deserialize)]
#[serde(untagged)]
enum BlacklistEntry {
    Dotted(String),
    Triple {
        catalog: String,
        schema: String,
        table: String,
    },
}

#[derive(Deserialize, Default)]
struct BlacklistFile {
    #[serde(default)]
    tables: Vec<BlacklistEntry>,
}

/// Tables excluded from discovery whatever their source.
#[derive(Clone, Debug, Default)]
pub struct Blacklist {
    entries: HashSet<TableKey>,
}

impl Blacklist {
    pub fn new<I, S>(triples: I) -> Self
    where
        I: IntoIterator<Item = (S, S, S)>,
        S: AsRef<str>,
    {
        let entries = triples
            .into_iter()
            .map(|(c, s, t)| {
                (
                    c.as_ref().to_lowercase(),
                    s.as_ref().to_lowercase(),
                    t.as_ref().to_lowercase(),
                )
            })
            .collect();
        Self { entries }
    }

    /// Load `tables:` entries, each either `catalog.schema.table` or a mapping.
    /// A missing file is an empty blacklist.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let Some(text) = read_optional(path)? else {
            return Ok(Self::default());
        };
        let file: BlacklistFile = serde_yaml::from_str(&text).map_err(|e| SchemaError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut triples = Vec::with_capacity(file.tables.len());
        for entry in file.tables {
            match entry {
                BlacklistEntry::Triple { catalog, schema, table } => {
                    triples.push((catalog, schema, table))
                }
                BlacklistEntry::Dotted(s) => {
                    let parts: Vec<&str> = s.split('.').collect();
                    if let [c, sc, t] = parts.as_slice() {
                        triples.push((c.to_string(), sc.to_string(), t.to_string()));
                    } else {
                        warn!(entry = %s, "ignoring blacklist entry that is not catalog.schema.table");
                    }
                }
            }
        }
        Ok(Self::new(triples))
    }

    pub fn contains(&self, key: &TableKey) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Identity of a possibly-qualified table name inside `catalog.schema`.
pub fn table_key(name: &str, catalog: &str, schema: &str) -> TableKey {
    let parts: Vec<&str> = name.split('.').collect();
    let (c, s, t) = match parts.as_slice() {
        [c, s, t] => (*c, *s, *t),
        [s, t] => (catalog, *s, *t),
        _ => (catalog, schema, name),
    };
    (c.to_lowercase(), s.to_lowercase(), t.to_lowercase())
}

/// One live table with its described columns.
#[derive(Clone, Debug)]
pub struct LiveTable {
    pub name: String,
    pub columns: Vec<LiveColumn>,
}

/// Merge the static document with the live catalog.
///
/// - live column types override static types
/// - static descriptions win when non-empty, else the live comment
/// - tables are unique by lower-cased identity; blacklisted ones are dropped
pub fn merge(
    static_doc: &SchemaDocument,
    live: &[LiveTable],
    catalog: &str,
    schema: &str,
    blacklist: &Blacklist,
) -> SchemaDocument {
    let mut seen: HashSet<TableKey> = HashSet::new();
    let mut tables = Vec::new();

    let live_for = |key: &TableKey| {
        live.iter()
            .find(|t| &table_key(&t.name, catalog, schema) == key)
    };

    for table in &static_doc.tables {
        let key = table_key(&table.name, catalog, schema);
        if blacklist.contains(&key) || !seen.insert(key.clone()) {
            continue;
        }
        let merged = match live_for(&key) {
            Some(lt) => overlay(table, lt),
            None => table.clone(),
        };
        tables.push(merged);
    }

    for lt in live {
        let key = table_key(&lt.name, catalog, schema);
        if blacklist.contains(&key) || !seen.insert(key) {
            continue;
        }
        tables.push(TableDoc {
            name: lt.name.clone(),
            description: format!("Table: {}", lt.name),
            columns: lt.columns.iter().map(column_from_live).collect(),
        });
    }

    let database = if static_doc.database.is_empty() {
        format!("{catalog}.{schema}")
    } else {
        static_doc.database.clone()
    };

    SchemaDocument {
        database,
        tables,
        relationships: static_doc.relationships.clone(),
    }
}

fn column_from_live(col: &LiveColumn) -> ColumnDoc {
    ColumnDoc {
        name: col.name.clone(),
        data_type: col.data_type.clone(),
        description: col.comment.clone(),
    }
}

fn overlay(table: &TableDoc, live: &LiveTable) -> TableDoc {
    let mut columns: Vec<ColumnDoc> = table
        .columns
        .iter()
        .map(|col| match live.columns.iter().find(|l| l.name.eq_ignore_ascii_case(&col.name)) {
            Some(l) => ColumnDoc {
                name: col.name.clone(),
                data_type: l.data_type.clone(),
                description: if col.description.is_empty() {
                    l.comment.clone()
                } else {
                    col.description.clone()
                },
            },
            None => col.clone(),
        })
        .collect();

    for l in &live.columns {
        if !table.columns.iter().any(|c| c.name.eq_ignore_ascii_case(&l.name)) {
            columns.push(column_from_live(l));
        }
    }

    TableDoc {
        name: table.name.clone(),
        description: if table.description.is_empty() {
            format!("Table: {}", table.name)
        } else {
            table.description.clone()
        },
        columns,
    }
}

/// Flatten a schema document into the text block given to the model.
pub fn render_context(doc: &SchemaDocument) -> String {
    let mut out = Vec::new();
    out.push(format!("# Database: {}\n", doc.database));

    for table in &doc.tables {
        out.push(format!("\n## Table: {}", table.name));
        out.push(format!("Description: {}", table.description));
        out.push("\nColumns:".to_string());
        for col in &table.columns {
            out.push(format!("  - {} ({}): {}", col.name, col.data_type, col.description));
        }
    }

    if !doc.relationships.is_empty() {
        out.push("\n## Relationships:".to_string());
        for rel in &doc.relationships {
            out.push(format!("  - {} → {}: {}", rel.from, rel.to, rel.description));
        }
    }

    out.join("\n")
}

/// Merged schema document plus its rendered text.
#[derive(Clone, Debug)]
pub struct SchemaContext {
    pub document: SchemaDocument,
    pub text: String,
    /// False when the live catalog could not be reached.
    pub live: bool,
}

impl SchemaContext {
    pub fn new(document: SchemaDocument, live: bool) -> Self {
        let text = render_context(&document);
        Self { document, text, live }
    }
}

/// Builds the schema context from the static document and the live catalog.
pub struct SchemaContextBuilder {
    engine: Arc<dyn DataEngine>,
    static_doc: SchemaDocument,
    blacklist: Blacklist,
}

impl SchemaContextBuilder {
    pub fn new(engine: Arc<dyn DataEngine>, static_doc: SchemaDocument, blacklist: Blacklist) -> Self {
        Self {
            engine,
            static_doc,
            blacklist,
        }
    }

    /// Never fails: an unreachable engine degrades to the static document.
    pub async fn build(&self, catalog: &str, schema: &str) -> SchemaContext {
        match self.fetch_live(catalog, schema).await {
            Ok(live) => {
                let doc = merge(&self.static_doc, &live, catalog, schema, &self.blacklist);
                info!(
                    tables = doc.tables.len(),
                    live_tables = live.len(),
                    "schema context built from {catalog}.{schema}"
                );
                SchemaContext::new(doc, true)
            }
            Err(e) => {
                warn!("live schema fetch failed, using static document only: {e}");
                let doc = merge(&self.static_doc, &[], catalog, schema, &self.blacklist);
                SchemaContext::new(doc, false)
            }
        }
    }

    async fn fetch_live(
        &self,
        catalog: &str,
        schema: &str,
    ) -> Result<Vec<LiveTable>, nlsql_store::DataError> {
        let names = self.engine.list_tables(catalog, schema).await?;
        let mut live = Vec::with_capacity(names.len());
        let mut seen = HashSet::new();
        for name in names {
            let key = table_key(&name, catalog, schema);
            if self.blacklist.contains(&key) || !seen.insert(key) {
                continue;
            }
            // one unreadable table (broken view, missing grant) only loses its columns
            let columns = match self.engine.describe_columns(catalog, schema, &name).await {
                Ok(columns) => columns,
                Err(e) => {
                    warn!(table = %name, "describe failed, listing table without columns: {e}");
                    Vec::new()
                }
            };
            live.push(LiveTable { name, columns });
        }
        Ok(live)
    }
}

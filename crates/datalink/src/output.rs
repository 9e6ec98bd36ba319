//! Stdout rendering for command results.
//!
//! Every command result is built once as a JSON record and then rendered in
//! the selected format, so the three formats never disagree on content.

use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use datalink_session::{ActorDirectory, LinkEvent};
use serde_json::{json, Map, Value};

pub const LINK_EVENT_SCHEMA: &str = "urn:datalink:cli:link-event:v1";
pub const ACTORS_SCHEMA: &str = "urn:datalink:cli:actors:v1";
pub const NOTIFY_RESULT_SCHEMA: &str = "urn:datalink:cli:notify-result:v1";

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

/// Record field and its table heading.
type Column = (&'static str, &'static str);

const EVENT_COLUMNS: &[Column] = &[("event", "EVENT"), ("detail", "DETAIL")];

const ACTOR_COLUMNS: &[Column] = &[
    ("name", "ACTOR"),
    ("type", "TYPE"),
    ("link_id", "LINK ID"),
    ("aliases", "ALIASES"),
    ("bones", "BONES"),
    ("shape_keys", "SHAPE KEYS"),
];

const NOTIFY_COLUMNS: &[Column] = &[
    ("application", "PEER APPLICATION"),
    ("peer", "ADDRESS"),
    ("message", "MESSAGE"),
];

/// Writes command results to stdout in one format.
#[derive(Debug, Clone, Copy)]
pub struct Emitter {
    format: OutputFormat,
}

impl Emitter {
    /// Use `format`, or JSON when stdout is not a terminal.
    pub fn new(format: Option<OutputFormat>) -> Self {
        let format = format.unwrap_or_else(|| {
            if std::io::stdout().is_terminal() {
                OutputFormat::Table
            } else {
                OutputFormat::Json
            }
        });
        Self { format }
    }

    pub fn event(&self, event: &LinkEvent) {
        let record = json!({
            "event": event.kind(),
            "detail": event.detail(),
            "timestamp": unix_seconds(),
        });
        self.print(self.single(LINK_EVENT_SCHEMA, EVENT_COLUMNS, record));
    }

    pub fn actors(&self, directory: &ActorDirectory) {
        let records = actor_records(directory);
        self.print(self.collection(ACTORS_SCHEMA, "actors", ACTOR_COLUMNS, records));
    }

    pub fn notify_result(&self, application: &str, peer: &str, message: &str) {
        let record = json!({
            "application": application,
            "peer": peer,
            "message": message,
        });
        self.print(self.single(NOTIFY_RESULT_SCHEMA, NOTIFY_COLUMNS, record));
    }

    fn print(&self, rendered: String) {
        if !rendered.is_empty() {
            println!("{rendered}");
        }
    }

    fn single(&self, schema: &str, columns: &[Column], record: Value) -> String {
        match self.format {
            OutputFormat::Json => with_schema(schema, record).to_string(),
            OutputFormat::Table => table(columns, std::slice::from_ref(&record)),
            OutputFormat::Pretty => pairs(columns, &record),
        }
    }

    fn collection(&self, schema: &str, key: &str, columns: &[Column], records: Vec<Value>) -> String {
        match self.format {
            OutputFormat::Json => json!({ "schema_id": schema, key: records }).to_string(),
            OutputFormat::Table if records.is_empty() => String::new(),
            OutputFormat::Table => table(columns, &records),
            OutputFormat::Pretty => records
                .iter()
                .map(|record| pairs(columns, record))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

fn actor_records(directory: &ActorDirectory) -> Vec<Value> {
    directory
        .iter()
        .map(|a| {
            json!({
                "name": a.name,
                "type": a.kind.as_str(),
                "link_id": a.link_id,
                "aliases": a.aliases,
                "bones": a.bones.len(),
                "shape_keys": a.expressions.len() + a.visemes.len(),
            })
        })
        .collect()
}

fn with_schema(schema: &str, record: Value) -> Value {
    let mut out = Map::new();
    out.insert("schema_id".to_string(), Value::from(schema));
    if let Value::Object(fields) = record {
        out.extend(fields);
    }
    Value::Object(out)
}

fn table(columns: &[Column], records: &[Value]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(columns.iter().map(|(_, heading)| *heading));
    for record in records {
        table.add_row(columns.iter().map(|(field, _)| cell(&record[*field], ", ")));
    }
    table.to_string()
}

/// `key=value` pairs on one line.
fn pairs(columns: &[Column], record: &Value) -> String {
    columns
        .iter()
        .map(|(field, _)| format!("{field}={}", cell(&record[*field], ",")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn cell(value: &Value, separator: &str) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| cell(item, separator))
            .collect::<Vec<_>>()
            .join(separator),
        other => other.to_string(),
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

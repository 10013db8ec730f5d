//! Classification of opaque task result payloads.
//!
//! Workers store whatever they like in `Task::result`: step progress records,
//! raw embedding vectors, or free text. [`classify`] maps that text onto a
//! small set of shapes and [`ResultPanel`] decides how each shape is shown.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::{Task, TaskStatus};

/// Characters kept when previewing an embedding literal without parsing it.
pub const EMBEDDING_LITERAL_PREVIEW_CHARS: usize = 100;

/// Leading values shown when previewing a parsed embedding.
pub const EMBEDDING_PREVIEW_VALUES: usize = 5;

/// Characters kept when previewing plain text.
pub const TEXT_PREVIEW_CHARS: usize = 200;

/// Marker appended to truncated previews.
pub const TRUNCATION_MARKER: &str = "...";

/// Keys of a step record that get dedicated treatment.
pub const RECOGNIZED_STEP_KEYS: [&str; 10] = [
    "step",
    "current_step",
    "total_steps",
    "message",
    "details",
    "video_id",
    "video_title",
    "channel_name",
    "processed",
    "total",
];

/// Shape of a task result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultKind {
    /// A keyed progress/summary record.
    StepInfo(StepInfo),
    /// A numeric vector, too large to show in full.
    EmbeddingPreview {
        preview: String,
        /// Vector length; unknown when the fast textual check short-circuited parsing.
        dimensions: Option<usize>,
    },
    /// Anything that is not structured.
    PlainText {
        text: String,
        preview: String,
        truncated: bool,
    },
    /// No result at all.
    Unknown,
}

/// A step record reported by pipeline workers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    pub step: Option<String>,
    pub current_step: Option<u64>,
    pub total_steps: Option<u64>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub video_id: Option<String>,
    pub video_title: Option<String>,
    pub channel_name: Option<String>,
    pub processed: Option<u64>,
    pub total: Option<u64>,
    /// Every key of the record, recognized or not.
    pub fields: Map<String, Value>,
}

impl StepInfo {
    fn from_record(fields: Map<String, Value>) -> Self {
        Self {
            step: text_field(&fields, "step"),
            current_step: counter_field(&fields, "current_step"),
            total_steps: counter_field(&fields, "total_steps"),
            message: text_field(&fields, "message"),
            details: text_field(&fields, "details"),
            video_id: text_field(&fields, "video_id"),
            video_title: text_field(&fields, "video_title"),
            channel_name: text_field(&fields, "channel_name"),
            processed: counter_field(&fields, "processed"),
            total: counter_field(&fields, "total"),
            fields,
        }
    }

    /// Keys without dedicated treatment, in key order.
    pub fn extra_fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields
            .iter()
            .filter(|(key, _)| !RECOGNIZED_STEP_KEYS.contains(&key.as_str()))
    }

    /// `processed / total` in 0.0..=1.0 when both counters are present.
    pub fn progress_fraction(&self) -> Option<f64> {
        match (self.processed, self.total) {
            (Some(processed), Some(total)) if total > 0 => {
                Some((processed as f64 / total as f64).min(1.0))
            }
            _ => None,
        }
    }
}

/// Classify a raw task result.
///
/// The embedding literal check runs before any JSON parse: embeddings are
/// large and parsing them only to learn they are numbers is wasted work.
pub fn classify(raw: Option<&str>) -> ResultKind {
    let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return ResultKind::Unknown;
    };

    if embedding_literal().is_match(text) {
        let (preview, _) = truncate_chars(text, EMBEDDING_LITERAL_PREVIEW_CHARS);
        return ResultKind::EmbeddingPreview {
            preview,
            dimensions: None,
        };
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(values)) if values.first().is_some_and(Value::is_number) => {
            ResultKind::EmbeddingPreview {
                preview: vector_preview(&values),
                dimensions: Some(values.len()),
            }
        }
        Ok(Value::Object(fields)) => ResultKind::StepInfo(StepInfo::from_record(fields)),
        _ => plain_text(text),
    }
}

fn embedding_literal() -> &'static Regex {
    static EMBEDDING_LITERAL: OnceLock<Regex> = OnceLock::new();
    EMBEDDING_LITERAL.get_or_init(|| Regex::new(r"^[\[{]-?[0-9]+\.[0-9]+,").expect("valid regex"))
}

fn plain_text(text: &str) -> ResultKind {
    let (preview, truncated) = truncate_chars(text, TEXT_PREVIEW_CHARS);
    ResultKind::PlainText {
        text: text.to_string(),
        preview,
        truncated,
    }
}

fn vector_preview(values: &[Value]) -> String {
    let head: Vec<String> = values
        .iter()
        .take(EMBEDDING_PREVIEW_VALUES)
        .map(|v| match v.as_f64() {
            Some(n) => format!("{:.4}", n),
            None => v.to_string(),
        })
        .collect();
    let more = if values.len() > EMBEDDING_PREVIEW_VALUES {
        format!(", {}", TRUNCATION_MARKER)
    } else {
        String::new()
    };
    format!("[{}{}] ({} values)", head.join(", "), more, values.len())
}

/// Cut `text` to `limit` characters, appending the marker when anything was cut.
fn truncate_chars(text: &str, limit: usize) -> (String, bool) {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => (format!("{}{}", &text[..idx], TRUNCATION_MARKER), true),
        None => (text.to_string(), false),
    }
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn counter_field(fields: &Map<String, Value>, key: &str) -> Option<u64> {
    let value = fields.get(key)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// How a classified result is presented for a task in a given status.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPanel {
    /// Live step panel; `progress` is set when processed/total counters exist.
    InProgress {
        info: StepInfo,
        progress: Option<f64>,
    },
    /// Finished step record: its message plus every unrecognized scalar field.
    CompletedSummary {
        message: Option<String>,
        entries: Vec<(String, String)>,
    },
    /// Collapsed by default; the front end offers expand and copy.
    Embedding { preview: String, collapsed: bool },
    /// Truncated text with a show-more toggle when `expandable`.
    Text {
        preview: String,
        full: String,
        expandable: bool,
    },
    /// Nothing to show.
    Hidden,
}

impl ResultPanel {
    /// Build the panel for a task's current result.
    pub fn for_task(task: &Task) -> Self {
        Self::new(task.status, classify(task.result.as_deref()))
    }

    pub fn new(status: TaskStatus, kind: ResultKind) -> Self {
        match kind {
            ResultKind::StepInfo(info) => match status {
                TaskStatus::Running => {
                    let progress = info.progress_fraction();
                    Self::InProgress { info, progress }
                }
                TaskStatus::Completed => {
                    let entries = info
                        .extra_fields()
                        .filter_map(|(key, value)| scalar_text(value).map(|v| (key.clone(), v)))
                        .collect();
                    Self::CompletedSummary {
                        message: info.message,
                        entries,
                    }
                }
                TaskStatus::Pending | TaskStatus::Failed => Self::InProgress {
                    info,
                    progress: None,
                },
            },
            ResultKind::EmbeddingPreview { preview, .. } => Self::Embedding {
                preview,
                collapsed: true,
            },
            ResultKind::PlainText {
                text,
                preview,
                truncated,
            } => Self::Text {
                preview,
                full: text,
                expandable: truncated,
            },
            ResultKind::Unknown => Self::Hidden,
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

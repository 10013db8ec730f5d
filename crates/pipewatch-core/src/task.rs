//! Pipeline task types as exposed by the backend API.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{TaskId, TaskStatus};

/// Task type that ingests a channel and runs the full transcribe/chunk/embed pipeline.
pub const TASK_TYPE_PIPELINE: &str = "pipeline";

/// Task type that embeds a single question.
pub const TASK_TYPE_EMBED_QUESTION: &str = "embed_question";

/// A background task tracked by the backend scheduler.
///
/// The client never mutates tasks; it only reads them and asks the backend
/// to create or delete them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Kind of work, e.g. `pipeline` or `embed_question`.
    pub task_type: String,

    /// Current task status.
    pub status: TaskStatus,

    /// Percent complete, meaningful only while running.
    #[serde(default)]
    pub progress: u32,

    /// Opaque result payload, interpreted by [`crate::classify`].
    #[serde(default)]
    pub result: Option<String>,

    /// Failure reason; present when the task failed.
    #[serde(default)]
    pub error_message: Option<String>,

    /// When the task was created.
    #[serde(deserialize_with = "timestamp::required")]
    pub created_at: DateTime<Utc>,

    /// When a worker picked the task up.
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state.
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Returns true unless the task is still running.
    pub fn is_deletable(&self) -> bool {
        self.status.is_deletable()
    }

    /// Progress clamped to 0..=100.
    pub fn progress_percent(&self) -> u32 {
        self.progress.min(100)
    }

    /// Wall-clock run time, if the task has started.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.completed_at.unwrap_or(now) - started)
    }
}

/// Filter applied when listing tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Only return tasks with this status.
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    /// Filter on a single status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
        }
    }

    /// Returns true if the task passes this filter.
    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |status| task.status == status)
    }
}

/// One page of the task list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    /// Tasks on this page, newest first.
    pub items: Vec<Task>,
    /// Number of tasks matching the filter across all pages.
    pub total: u64,
    /// Number of pages for the page size used in the request.
    #[serde(default)]
    pub total_pages: u32,
}

impl TaskPage {
    /// Build a page from an unpaginated task list.
    ///
    /// `page` is 1-based; a page past the end yields no items but keeps the totals.
    pub fn paginate(tasks: Vec<Task>, filter: &TaskFilter, page: u32, page_size: u32) -> Self {
        let page_size = page_size.max(1);
        let matching: Vec<Task> = tasks.into_iter().filter(|t| filter.matches(t)).collect();
        let total = matching.len() as u64;
        let skip = (page.max(1) - 1) as usize * page_size as usize;
        let items = matching
            .into_iter()
            .skip(skip)
            .take(page_size as usize)
            .collect();

        Self {
            items,
            total,
            total_pages: total_pages(total, page_size),
        }
    }

    /// Returns true if there are no tasks on this page.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Number of pages needed for `total` items, `ceil(total / page_size)`.
pub fn total_pages(total: u64, page_size: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));
    total.div_ceil(page_size) as u32
}

/// Parameters for creating a task.
///
/// Mirrors the backend's task request body; unset fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
    /// Channel to ingest, required for `pipeline` tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_url: Option<String>,

    /// Maximum number of videos to ingest (backend accepts 1..=100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_videos: Option<u32>,

    /// Whether to download media before transcription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<bool>,

    /// Question text, for `embed_question` tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_to_embed: Option<String>,
}

impl TaskParams {
    /// Parameters for a channel pipeline run.
    pub fn pipeline(channel_url: impl Into<String>) -> Self {
        Self {
            channel_url: Some(channel_url.into()),
            ..Self::default()
        }
    }

    /// Parameters for embedding a single question.
    pub fn embed_question(question: impl Into<String>) -> Self {
        Self {
            question_to_embed: Some(question.into()),
            ..Self::default()
        }
    }

    /// Builder method to cap the number of videos.
    pub fn with_max_videos(mut self, max_videos: u32) -> Self {
        self.max_videos = Some(max_videos);
        self
    }

    /// Builder method to toggle media download.
    pub fn with_download(mut self, download: bool) -> Self {
        self.download = Some(download);
        self
    }
}

/// Backend acknowledgement for a created task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedTask {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

/// Aggregate counters reported by the pipeline stats endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_channels: u64,
    pub total_videos: u64,
    pub videos_downloaded: u64,
    pub videos_transcribed: u64,
    pub total_chunks: u64,
    pub chunks_embedded: u64,
}

impl PipelineStats {
    /// Fraction of chunks that already have an embedding, 0.0 when there are none.
    pub fn embedded_ratio(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.chunks_embedded as f64 / self.total_chunks as f64
    }
}

/// Lenient timestamp decoding.
///
/// The backend emits RFC 3339 for timezone-aware columns and bare
/// `YYYY-MM-DDTHH:MM:SS[.f]` for naive ones; naive values are read as UTC.
pub(crate) mod timestamp {
    use super::*;

    pub(crate) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub(crate) fn required<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    pub(crate) fn optional<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw))),
        }
    }
}

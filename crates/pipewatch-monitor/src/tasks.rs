//! Task list state and the background poll loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pipewatch_client::{ClientError, PipelineApi};
use pipewatch_core::{CreatedTask, Task, TaskFilter, TaskId, TaskPage, TaskParams, TaskStatus};

use crate::event::{TaskListCommand, TaskListUpdate};

/// Tasks per page unless configured otherwise.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// What the list is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskQuery {
    pub filter: TaskFilter,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            filter: TaskFilter::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Result of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The task is running; nothing was sent to the backend.
    Blocked,
}

/// Holds the loading flag up until the request finishes or is abandoned.
struct Loading<'a>(&'a mut bool);

impl<'a> Loading<'a> {
    fn start(flag: &'a mut bool) -> Self {
        *flag = true;
        Self(flag)
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        *self.0 = false;
    }
}

/// Paginated, filterable view over the backend task list.
///
/// The backend is authoritative: every mutation is followed by a re-fetch
/// rather than a local edit of the cached page.
pub struct TaskListController<A: ?Sized> {
    api: Arc<A>,
    query: TaskQuery,
    current: Option<TaskPage>,
    in_flight: bool,
    last_error: Option<String>,
}

impl<A: PipelineApi + ?Sized> TaskListController<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self::with_query(api, TaskQuery::default())
    }

    pub fn with_query(api: Arc<A>, query: TaskQuery) -> Self {
        Self {
            api,
            query: TaskQuery {
                page: query.page.max(1),
                page_size: query.page_size.max(1),
                ..query
            },
            current: None,
            in_flight: false,
            last_error: None,
        }
    }

    pub fn query(&self) -> &TaskQuery {
        &self.query
    }

    /// Last page fetched, if any.
    pub fn current(&self) -> Option<&TaskPage> {
        self.current.as_ref()
    }

    /// True while a list request is outstanding.
    pub fn is_loading(&self) -> bool {
        self.in_flight
    }

    /// Message of the last failed request, cleared by the next successful list.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Re-fetch the current page.
    ///
    /// A page past the end (e.g. after the last task of the last page was
    /// deleted) is clamped to the last page and fetched again.
    pub async fn refresh(&mut self) -> Result<&TaskPage, ClientError> {
        let mut page = self.fetch().await?;

        if page.total_pages == 0 {
            self.query.page = 1;
        } else if self.query.page > page.total_pages {
            debug!(
                page = self.query.page,
                total_pages = page.total_pages,
                "Page out of range, clamping"
            );
            self.query.page = page.total_pages;
            page = self.fetch().await?;
        }

        Ok(self.current.insert(page))
    }

    async fn fetch(&mut self) -> Result<TaskPage, ClientError> {
        let TaskQuery {
            filter,
            page,
            page_size,
        } = self.query;

        let result = {
            let _loading = Loading::start(&mut self.in_flight);
            self.api.list_tasks(&filter, page, page_size).await
        };

        match &result {
            Ok(tasks) => {
                debug!(
                    status = ?filter.status,
                    page,
                    count = tasks.items.len(),
                    total = tasks.total,
                    "Fetched tasks"
                );
                self.last_error = None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch tasks");
                self.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// Show only tasks with `status`, or all tasks. Resets to page 1.
    pub async fn set_filter(&mut self, status: Option<TaskStatus>) -> Result<&TaskPage, ClientError> {
        self.query.filter = TaskFilter { status };
        self.query.page = 1;
        self.refresh().await
    }

    /// Jump to `page`, keeping the filter.
    pub async fn set_page(&mut self, page: u32) -> Result<&TaskPage, ClientError> {
        self.query.page = page.max(1);
        self.refresh().await
    }

    /// Change the page size. Resets to page 1.
    pub async fn set_page_size(&mut self, page_size: u32) -> Result<&TaskPage, ClientError> {
        self.query.page_size = page_size.max(1);
        self.query.page = 1;
        self.refresh().await
    }

    /// Delete `task` unless it is running.
    pub async fn delete(&mut self, task: &Task) -> Result<DeleteOutcome, ClientError> {
        self.delete_by_id(&task.id, task.status).await
    }

    /// Delete the task `id`, last seen with `status`.
    ///
    /// A failed re-fetch afterwards is recorded in [`last_error`](Self::last_error);
    /// the delete itself still succeeded.
    pub async fn delete_by_id(
        &mut self,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<DeleteOutcome, ClientError> {
        if !status.is_deletable() {
            info!(task_id = %id, "Refusing to delete running task");
            return Ok(DeleteOutcome::Blocked);
        }

        self.api.delete_task(id).await?;
        info!(task_id = %id, "Deleted task");

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Refresh after delete failed");
        }
        Ok(DeleteOutcome::Deleted)
    }

    /// Create a task and refresh the list.
    pub async fn create(
        &mut self,
        task_type: &str,
        params: &TaskParams,
    ) -> Result<CreatedTask, ClientError> {
        let created = self.api.create_task(task_type, params).await?;
        info!(task_id = %created.task_id, task_type = %task_type, "Created task");

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Refresh after create failed");
        }
        Ok(created)
    }

    /// Poll the list every `poll_interval` and apply commands until cancelled
    /// or the command channel closes.
    ///
    /// Each tick fetches with the query current at that moment. Any command
    /// re-arms the timer.
    pub async fn run(
        mut self,
        poll_interval: Duration,
        mut commands: mpsc::Receiver<TaskListCommand>,
        updates: mpsc::Sender<TaskListUpdate>,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = poll_interval.as_secs(),
            "Starting task list polling"
        );

        'poll: loop {
            let batch = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Task list polling cancelled");
                    break 'poll;
                }

                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("Command channel closed");
                        break 'poll;
                    };
                    let (cmd, follow) = coalesce(cmd, &mut commands);
                    let mut batch = self.apply(cmd).await;
                    if let Some(next) = follow {
                        batch.extend(self.apply(next).await);
                    }
                    interval.reset();
                    batch
                }

                _ = interval.tick() => {
                    debug!(page = self.query.page, "Poll tick");
                    self.apply(TaskListCommand::Refresh).await
                }
            };

            for update in batch {
                if updates.send(update).await.is_err() {
                    debug!("Update receiver dropped");
                    break 'poll;
                }
            }
        }

        info!("Task list polling stopped");
    }

    async fn apply(&mut self, cmd: TaskListCommand) -> Vec<TaskListUpdate> {
        debug!(command = ?cmd, "Applying task list command");

        let listed = match cmd {
            TaskListCommand::Refresh => self.refresh().await.map(|_| ()),
            TaskListCommand::SetFilter(status) => self.set_filter(status).await.map(|_| ()),
            TaskListCommand::SetPage(page) => self.set_page(page).await.map(|_| ()),
            TaskListCommand::SetPageSize(size) => self.set_page_size(size).await.map(|_| ()),
            TaskListCommand::Delete { id, status } => {
                return match self.delete_by_id(&id, status).await {
                    Ok(DeleteOutcome::Deleted) => vec![TaskListUpdate::Deleted(id), self.snapshot()],
                    Ok(DeleteOutcome::Blocked) => vec![TaskListUpdate::Blocked(id)],
                    Err(e) => vec![TaskListUpdate::Error(e.to_string())],
                };
            }
            TaskListCommand::Create { task_type, params } => {
                return match self.create(&task_type, &params).await {
                    Ok(created) => vec![TaskListUpdate::Created(created), self.snapshot()],
                    Err(e) => vec![TaskListUpdate::Error(e.to_string())],
                };
            }
        };

        match listed {
            Ok(()) => vec![self.snapshot()],
            Err(e) => vec![TaskListUpdate::Error(e.to_string())],
        }
    }

    /// The current page, or the error that prevented loading it.
    fn snapshot(&self) -> TaskListUpdate {
        if let Some(err) = &self.last_error {
            return TaskListUpdate::Error(err.clone());
        }
        match &self.current {
            Some(tasks) => TaskListUpdate::Page {
                filter: self.query.filter,
                page: self.query.page,
                tasks: tasks.clone(),
            },
            None => TaskListUpdate::Error("no task page loaded".to_string()),
        }
    }
}

/// Collapse a run of queued `Refresh` commands into one.
///
/// Returns the command to apply and the first other command found behind it.
fn coalesce(
    first: TaskListCommand,
    commands: &mut mpsc::Receiver<TaskListCommand>,
) -> (TaskListCommand, Option<TaskListCommand>) {
    if first != TaskListCommand::Refresh {
        return (first, None);
    }

    let mut skipped = 0usize;
    while let Ok(next) = commands.try_recv() {
        if next != TaskListCommand::Refresh {
            debug!(skipped, "Coalesced refresh commands");
            return (first, Some(next));
        }
        skipped += 1;
    }
    if skipped > 0 {
        debug!(skipped, "Coalesced refresh commands");
    }
    (first, None)
}

//! The pipeline API boundary.

use async_trait::async_trait;

use pipewatch_core::{CreatedTask, PipelineStats, Task, TaskFilter, TaskId, TaskPage, TaskParams};

use crate::error::ClientError;

/// Operations the backend task scheduler exposes over HTTP.
///
/// The server is authoritative for every rule, including refusing to delete
/// a task it still considers running.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// List tasks matching `filter`; `page` is 1-based.
    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page: u32,
        page_size: u32,
    ) -> Result<TaskPage, ClientError>;

    /// Fetch a single task.
    async fn get_task(&self, id: &TaskId) -> Result<Task, ClientError>;

    /// Submit a new task.
    async fn create_task(
        &self,
        task_type: &str,
        params: &TaskParams,
    ) -> Result<CreatedTask, ClientError>;

    /// Delete a task.
    async fn delete_task(&self, id: &TaskId) -> Result<(), ClientError>;

    /// Aggregate pipeline counters.
    async fn stats(&self) -> Result<PipelineStats, ClientError>;
}

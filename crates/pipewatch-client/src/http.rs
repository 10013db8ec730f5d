//! HTTP client for the pipeline REST endpoints and push stream.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pipewatch_core::{
    total_pages, CreatedTask, PipelineStats, Task, TaskFilter, TaskId, TaskPage, TaskParams,
};

use crate::api::PipelineApi;
use crate::channel::{ChannelConnector, FrameStream, StreamEndpoint};
use crate::error::ClientError;
use crate::sse::decode_frames;

/// Route prefix of the pipeline endpoints.
pub const PIPELINE_PREFIX: &str = "/api/v1/pipeline";

/// Path of the push stream, relative to the pipeline prefix.
pub const EVENTS_PATH: &str = "/events";

/// HTTP client for the pipeline API.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client for a backend at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            inner: reqwest::Client::new(),
            base_url: base_url.to_string(),
        })
    }

    /// Backend base URL, without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, PIPELINE_PREFIX, path)
    }

    fn list_request(
        &self,
        filter: &TaskFilter,
        page: u32,
        page_size: u32,
    ) -> Result<reqwest::Request, ClientError> {
        let query = list_query(filter, page, page_size);
        Ok(self.inner.get(self.url("/tasks")).query(&query).build()?)
    }

    /// Get JSON from a pipeline endpoint.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        debug!(url = %url, "GET request");

        let response = self.inner.get(&url).send().await?;
        let response = check_status(response, path).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }
}

/// Pass successful responses through, map the rest to errors.
async fn check_status(
    response: reqwest::Response,
    path: &str,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(path.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        path: path.to_string(),
        body,
    })
}

/// List endpoint payload: paginated, or a bare array from backends that only
/// support a result limit.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListResponse {
    Page(TaskPage),
    Flat(Vec<Task>),
}

/// Query parameters for a list request.
///
/// `limit` serves backends that ignore `page`/`page_size` and return the
/// newest `limit` rows as a bare array. It asks for one row past the
/// requested page so the caller can tell whether a next page exists.
pub(crate) fn list_query(
    filter: &TaskFilter,
    page: u32,
    page_size: u32,
) -> Vec<(&'static str, String)> {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let limit = u64::from(page) * u64::from(page_size) + 1;

    let mut query = vec![
        ("page", page.to_string()),
        ("page_size", page_size.to_string()),
        ("limit", limit.to_string()),
    ];
    if let Some(status) = filter.status {
        query.push(("status", status.as_str().to_string()));
    }
    query
}

/// Decode a list response into the requested page.
///
/// For bare-array responses `total` counts only the rows received, so it is
/// a lower bound: exact on the last page, at least one page ahead otherwise.
pub(crate) fn decode_task_list(
    body: &str,
    filter: &TaskFilter,
    page: u32,
    page_size: u32,
) -> Result<TaskPage, ClientError> {
    match serde_json::from_str::<ListResponse>(body)? {
        ListResponse::Page(mut task_page) => {
            if task_page.total_pages == 0 && task_page.total > 0 {
                task_page.total_pages = total_pages(task_page.total, page_size);
            }
            Ok(task_page)
        }
        ListResponse::Flat(tasks) => Ok(TaskPage::paginate(tasks, filter, page, page_size)),
    }
}

#[derive(Serialize)]
struct CreateTaskBody<'a> {
    task_type: &'a str,
    #[serde(flatten)]
    params: &'a TaskParams,
}

#[async_trait]
impl PipelineApi for HttpClient {
    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page: u32,
        page_size: u32,
    ) -> Result<TaskPage, ClientError> {
        let path = "/tasks";
        let request = self.list_request(filter, page, page_size)?;
        debug!(url = %request.url(), "Listing tasks");

        let response = self.inner.execute(request).await?;
        let body = check_status(response, path).await?.text().await?;
        decode_task_list(&body, filter, page, page_size)
    }

    async fn get_task(&self, id: &TaskId) -> Result<Task, ClientError> {
        self.get_json(&format!("/tasks/{}", id)).await
    }

    async fn create_task(
        &self,
        task_type: &str,
        params: &TaskParams,
    ) -> Result<CreatedTask, ClientError> {
        let path = "/tasks";
        let url = self.url(path);
        debug!(url = %url, task_type = %task_type, "Creating task");

        let body = CreateTaskBody { task_type, params };
        let response = self.inner.post(&url).json(&body).send().await?;
        check_status(response, path)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), ClientError> {
        let path = format!("/tasks/{}", id);
        let url = self.url(&path);
        debug!(url = %url, "Deleting task");

        let response = self.inner.delete(&url).send().await?;
        check_status(response, &path).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<PipelineStats, ClientError> {
        self.get_json("/stats").await
    }
}

impl StreamEndpoint for HttpClient {
    fn stream_url(&self) -> String {
        self.url(EVENTS_PATH)
    }
}

#[async_trait]
impl ChannelConnector for HttpClient {
    async fn open(&self, url: &str) -> Result<FrameStream, ClientError> {
        debug!(url = %url, "Opening push stream");

        let response = self
            .inner
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let response = check_status(response, url).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        check_event_stream(url, content_type)?;

        // A body that breaks mid-stream is a transport failure of the push
        // channel, not of a request.
        let body = response
            .bytes_stream()
            .map_err(|e| ClientError::Stream(e.to_string()));
        Ok(decode_frames(body))
    }
}

/// Refuse responses that are not an event stream, such as an HTML error page
/// served with status 200 by a proxy.
fn check_event_stream(url: &str, content_type: Option<&str>) -> Result<(), ClientError> {
    match content_type {
        Some(value) if value.trim_start().starts_with("text/event-stream") => Ok(()),
        Some(value) => Err(ClientError::Stream(format!(
            "{} answered with content type {}",
            url, value
        ))),
        None => Err(ClientError::Stream(format!(
            "{} answered without a content type",
            url
        ))),
    }
}

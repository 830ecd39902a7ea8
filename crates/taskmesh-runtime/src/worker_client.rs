//! WorkerClient - the dispatch transport port.
//!
//! The dispatcher talks to workers through this trait so the orchestration
//! logic can be exercised without a network; production uses the reqwest
//! implementation against the worker's `/execute` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use taskmesh_core::{SubTask, WorkItem};

/// Body of the `POST /execute` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub task_id: String,
    pub subtask: SubTask,
    #[serde(default)]
    pub upstream_context: Value,
}

impl From<WorkItem> for ExecuteRequest {
    fn from(item: WorkItem) -> Self {
        Self {
            task_id: item.task_id,
            subtask: item.subtask,
            upstream_context: item.upstream_context,
        }
    }
}

/// Outcome of a dispatch attempt that reached the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReply {
    /// The worker accepted the subtask and will report via the result queue.
    Accepted { worker_id: String },
    /// The worker is occupied (HTTP 503).
    Busy,
}

/// Transport failures; all of them re-enqueue the work item.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("worker request failed: {0}")]
    Http(String),
    #[error("worker returned unexpected status {0}")]
    UnexpectedStatus(u16),
}

#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn execute(
        &self,
        endpoint: &str,
        request: &ExecuteRequest,
    ) -> Result<DispatchReply, DispatchError>;
}

#[derive(Debug, Deserialize)]
struct ExecuteReplyBody {
    #[allow(dead_code)]
    status: String,
    worker_id: String,
}

/// HTTP implementation with the dispatch timeout baked into the client.
pub struct HttpWorkerClient {
    client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(dispatch_timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(dispatch_timeout)
            .build()
            .map_err(|e| DispatchError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn execute(
        &self,
        endpoint: &str,
        request: &ExecuteRequest,
    ) -> Result<DispatchReply, DispatchError> {
        let url = format!("{}/execute", endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))?;

        match response.status().as_u16() {
            200 => {
                let body: ExecuteReplyBody = response
                    .json()
                    .await
                    .map_err(|e| DispatchError::Http(e.to_string()))?;
                Ok(DispatchReply::Accepted {
                    worker_id: body.worker_id,
                })
            }
            503 => Ok(DispatchReply::Busy),
            other => Err(DispatchError::UnexpectedStatus(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmesh_core::Capability;

    #[test]
    fn test_execute_request_from_work_item() {
        let item = WorkItem::new(
            "task_a",
            SubTask::new("collect the data set", vec![Capability::WebScraping]),
            serde_json::json!({"sub_dep": {"rows": 3}}),
        );
        let request = ExecuteRequest::from(item.clone());
        assert_eq!(request.task_id, "task_a");
        assert_eq!(request.subtask.id, item.subtask.id);
        assert_eq!(request.upstream_context["sub_dep"]["rows"], 3);
    }
}

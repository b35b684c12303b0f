//! Long-running server-side operations (import, export, quantity calculation)
//! and polling them until they finish.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::*;
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::error::{missing_field, ApiErrorKind, Error};

/// Status of an operation as reported by the server.
///
/// Labels other than the known ones are kept verbatim; only `Ready` and `Failed`
/// end polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationStatus {
    Pending,
    Running,
    Ready,
    Failed,
    Other(String),
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Ready | OperationStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            OperationStatus::Pending => "Pending",
            OperationStatus::Running => "Running",
            OperationStatus::Ready => "Ready",
            OperationStatus::Failed => "Failed",
            OperationStatus::Other(label) => label,
        }
    }
}

impl From<String> for OperationStatus {
    fn from(label: String) -> Self {
        match label.as_str() {
            "Pending" => OperationStatus::Pending,
            "Running" => OperationStatus::Running,
            "Ready" => OperationStatus::Ready,
            "Failed" => OperationStatus::Failed,
            _ => OperationStatus::Other(label),
        }
    }
}

impl From<OperationStatus> for String {
    fn from(status: OperationStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    pub id: String,
    pub status: OperationStatus,
}

/// Wire shape of an operation; both fields are required.
#[derive(Debug, Deserialize)]
pub(crate) struct OperationBody {
    id: Option<String>,
    status: Option<OperationStatus>,
}

impl OperationBody {
    pub(crate) fn into_operation(self) -> Result<Operation, Error> {
        Ok(Operation {
            id: self.id.ok_or_else(|| missing_field("id"))?,
            status: self.status.ok_or_else(|| missing_field("status"))?,
        })
    }
}

/// Anything that can look up an operation by id.
#[async_trait]
pub trait OperationSource: Send + Sync {
    async fn fetch_operation(&self, operation_id: &str) -> Result<Operation, Error>;
}

#[async_trait]
impl OperationSource for ApiClient {
    async fn fetch_operation(&self, operation_id: &str) -> Result<Operation, Error> {
        self.get_operation(operation_id).await
    }
}

impl ApiClient {
    pub async fn get_operation(&self, operation_id: &str) -> Result<Operation, Error> {
        let body: OperationBody = self.get(&format!("operations/{operation_id}")).await?;
        body.into_operation()
    }

    /// Poll `operation_id` until it is `Ready` or `Failed`.
    ///
    /// See [`await_terminal`] for the waiting rules.
    pub async fn await_operation(
        &self,
        operation_id: &str,
        poll_interval: Duration,
        deadline: Option<Duration>,
    ) -> Result<Operation, Error> {
        await_terminal(self, operation_id, poll_interval, deadline).await
    }
}

/// Fetch the operation, sleeping `poll_interval` between non-terminal replies.
///
/// Fetch errors are returned immediately without retrying. With `deadline ==
/// None` this waits as long as the server keeps reporting a non-terminal status.
pub async fn await_terminal<S>(
    source: &S,
    operation_id: &str,
    poll_interval: Duration,
    deadline: Option<Duration>,
) -> Result<Operation, Error>
where
    S: OperationSource + ?Sized,
{
    let polling = poll_until_terminal(source, operation_id, poll_interval);

    match deadline {
        None => polling.await,
        Some(limit) => tokio::time::timeout(limit, polling).await.map_err(|_| {
            warn!("Operation {operation_id} did not finish within {limit:?}");
            Error {
                source: Some(format!("operation {operation_id} still running").into()),
                error_kind: ApiErrorKind::Timeout,
            }
        })?,
    }
}

async fn poll_until_terminal<S>(
    source: &S,
    operation_id: &str,
    poll_interval: Duration,
) -> Result<Operation, Error>
where
    S: OperationSource + ?Sized,
{
    loop {
        let operation = source.fetch_operation(operation_id).await?;
        info!("Operation {} status: {}", operation.id, operation.status);
        if operation.status.is_terminal() {
            return Ok(operation);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

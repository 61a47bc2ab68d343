use pkg_constants::sync::{OPERATION_POLL_INTERVAL_SECS, OPERATION_POLL_TIMEOUT_SECS};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ServiceDiscoveryApi;
use crate::sdk::{Operation, OperationStatus};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(OPERATION_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(OPERATION_POLL_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("operation {op_id} failed: {reason}")]
    Failed { op_id: String, reason: String },
    #[error("timed out waiting for operation {op_id}")]
    TimedOut { op_id: String },
    #[error("polling operation {op_id} cancelled")]
    Cancelled { op_id: String },
    #[error("polling operation {op_id}: {message}")]
    Query { op_id: String, message: String },
}

/// Query `op_id` every `interval` until it reaches a terminal status.
async fn poll_operation(
    api: &ServiceDiscoveryApi,
    op_id: &str,
    config: &PollerConfig,
    cancel: &CancellationToken,
) -> Result<Operation, PollError> {
    let polling = async {
        loop {
            let op = api
                .get_operation(op_id)
                .await
                .map_err(|e| PollError::Query {
                    op_id: op_id.to_string(),
                    message: format!("{:#}", e),
                })?;
            match op.status {
                OperationStatus::Success => return Ok(op),
                OperationStatus::Fail => {
                    return Err(PollError::Failed {
                        op_id: op_id.to_string(),
                        reason: op
                            .error_message
                            .unwrap_or_else(|| "no reason given".to_string()),
                    });
                }
                OperationStatus::Submitted | OperationStatus::Pending => {
                    debug!("Operation {} is {:?}", op_id, op.status);
                }
            }
            tokio::time::sleep(config.interval).await;
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PollError::Cancelled { op_id: op_id.to_string() }),
        res = tokio::time::timeout(config.timeout, polling) => {
            res.unwrap_or_else(|_| Err(PollError::TimedOut { op_id: op_id.to_string() }))
        }
    }
}

/// Fans out asynchronous registry mutations and joins them.
///
/// Each [`submit`](Self::submit) runs its provider call and the following
/// poll on its own task; [`await_all`](Self::await_all) returns once every
/// task has finished.
pub struct OperationPoller {
    api: Arc<ServiceDiscoveryApi>,
    config: PollerConfig,
    cancel: CancellationToken,
    tasks: JoinSet<anyhow::Result<()>>,
}

impl OperationPoller {
    pub fn new(api: Arc<ServiceDiscoveryApi>, config: PollerConfig, cancel: CancellationToken) -> Self {
        Self {
            api,
            config,
            cancel,
            tasks: JoinSet::new(),
        }
    }

    /// Start `provider` (which issues the mutation and yields its operation
    /// id) and then poll that operation, without blocking the caller.
    pub fn submit<F>(&mut self, provider: F)
    where
        F: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let api = self.api.clone();
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let op_id = provider.await?;
            poll_operation(&api, &op_id, &config, &cancel).await?;
            Ok(())
        });
    }

    /// Poll a single operation inline.
    pub async fn poll(&self, op_id: &str) -> Result<Operation, PollError> {
        poll_operation(&self.api, op_id, &self.config, &self.cancel).await
    }

    /// Wait for every submitted operation. The error, if any, names every
    /// failed operation.
    pub async fn await_all(mut self) -> anyhow::Result<()> {
        let mut failures = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(format!("{:#}", e)),
                Err(e) => failures.push(format!("operation task aborted: {}", e)),
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        anyhow::bail!(
            "{} operation(s) failed: {}",
            failures.len(),
            failures.join("; ")
        )
    }
}

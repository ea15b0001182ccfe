// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scanner workflow starter.
//!
//! On service start, launches the singleton scavenger workflows that
//! are enabled by configuration. Each start is retried indefinitely
//! with exponential backoff; a workflow that is already running counts
//! as success. The task-queue scanner additionally requires a SQL
//! store, matching where orphaned task-queue rows can accumulate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info};

use tidemark_common::backoff::{retry, ExponentialRetryPolicy};
use tidemark_persistence::StoreKind;

const TASK_QUEUE_SCANNER_WORKFLOW_TYPE: &str = "tq-scanner";
const HISTORY_SCANNER_WORKFLOW_TYPE: &str = "history-scanner";
const EXECUTIONS_SCANNER_WORKFLOW_TYPE: &str = "executions-scanner";

const START_WORKFLOW_TIMEOUT: Duration = Duration::from_secs(300);

/// Which scanners run, and against what store.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Launch the executions scavenger.
    pub executions_scanner_enabled: bool,
    /// Launch the history scavenger.
    pub history_scanner_enabled: bool,
    /// Launch the task-queue scavenger (SQL stores only).
    pub task_queue_scanner_enabled: bool,
    /// Kind of the configured store.
    pub store_kind: StoreKind,
}

/// Options for starting one singleton workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartWorkflowOptions {
    /// Singleton workflow id.
    pub workflow_id: String,
    /// Task queue the workflow's worker polls.
    pub task_queue: String,
    /// Cron schedule driving periodic runs.
    pub cron_schedule: String,
}

/// Errors from starting a system workflow.
#[derive(Debug, thiserror::Error)]
pub enum StartWorkflowError {
    /// The singleton is already running; treated as success.
    #[error("workflow execution already started: {0}")]
    AlreadyStarted(String),

    /// Any other failure; retried.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Client for launching workflows on the system namespace.
#[async_trait]
pub trait SystemWorkflowClient: Send + Sync {
    /// Start a workflow of `workflow_type` with the given options.
    async fn start_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow_type: &str,
    ) -> Result<(), StartWorkflowError>;
}

/// Background sub-system that keeps the scavenger workflows running.
pub struct Scanner {
    config: ScannerConfig,
    client: Arc<dyn SystemWorkflowClient>,
    starters: Vec<JoinHandle<()>>,
}

impl Scanner {
    /// Create a scanner.
    pub fn new(config: ScannerConfig, client: Arc<dyn SystemWorkflowClient>) -> Self {
        Self {
            config,
            client,
            starters: Vec::new(),
        }
    }

    /// Launch the enabled scanner workflows in the background.
    pub fn start(&mut self) {
        if self.config.executions_scanner_enabled {
            self.spawn_starter(
                EXECUTIONS_SCANNER_WORKFLOW_TYPE,
                StartWorkflowOptions {
                    workflow_id: "sys-executions-scanner".to_string(),
                    task_queue: "sys-executions-scanner-taskqueue".to_string(),
                    cron_schedule: "0 */4 * * *".to_string(),
                },
            );
        }

        if self.config.task_queue_scanner_enabled && self.config.store_kind == StoreKind::Sql {
            self.spawn_starter(
                TASK_QUEUE_SCANNER_WORKFLOW_TYPE,
                StartWorkflowOptions {
                    workflow_id: "sys-tq-scanner".to_string(),
                    task_queue: "sys-tq-scanner-taskqueue".to_string(),
                    cron_schedule: "0 */12 * * *".to_string(),
                },
            );
        }

        if self.config.history_scanner_enabled {
            self.spawn_starter(
                HISTORY_SCANNER_WORKFLOW_TYPE,
                StartWorkflowOptions {
                    workflow_id: "sys-history-scanner".to_string(),
                    task_queue: "sys-history-scanner-taskqueue".to_string(),
                    cron_schedule: "0 8 * * *".to_string(),
                },
            );
        }
    }

    /// Wait for all starters to finish.
    pub async fn stop(self) {
        for starter in self.starters {
            if let Err(err) = starter.await {
                error!(error = %err, "scanner starter task failed");
            }
        }
    }

    fn spawn_starter(&mut self, workflow_type: &'static str, options: StartWorkflowOptions) {
        let client = self.client.clone();
        self.starters.push(tokio::spawn(async move {
            start_workflow_with_retry(client.as_ref(), options, workflow_type).await;
        }));
    }
}

/// Retry a singleton start until it (effectively) succeeds: 1s initial
/// backoff, 1min cap, no expiration.
async fn start_workflow_with_retry(
    client: &dyn SystemWorkflowClient,
    options: StartWorkflowOptions,
    workflow_type: &str,
) {
    let policy = ExponentialRetryPolicy::new(Duration::from_secs(1))
        .with_maximum_interval(Duration::from_secs(60))
        .without_expiration();

    let result = retry(
        &policy,
        || start_workflow(client, options.clone(), workflow_type),
        |err| !matches!(err, StartWorkflowError::AlreadyStarted(_)),
    )
    .await;

    match result {
        Ok(()) | Err(StartWorkflowError::AlreadyStarted(_)) => {
            info!(workflow_type, "scanner workflow running");
        }
        Err(err) => {
            // Unreachable with a never-expiring policy, but a starter
            // must not bring the worker down either way.
            error!(workflow_type, error = %err, "unable to start scanner workflow");
        }
    }
}

/// One start attempt under the 5-minute deadline.
async fn start_workflow(
    client: &dyn SystemWorkflowClient,
    options: StartWorkflowOptions,
    workflow_type: &str,
) -> Result<(), StartWorkflowError> {
    let workflow_id = options.workflow_id.clone();
    let attempt = tokio::time::timeout(
        START_WORKFLOW_TIMEOUT,
        client.start_workflow(options, workflow_type),
    )
    .await;

    match attempt {
        Ok(Ok(())) => {
            info!(workflow_type, workflow_id, "scanner workflow started");
            Ok(())
        }
        Ok(Err(StartWorkflowError::AlreadyStarted(id))) => {
            Err(StartWorkflowError::AlreadyStarted(id))
        }
        Ok(Err(err)) => {
            error!(workflow_type, error = %err, "error starting scanner workflow");
            Err(err)
        }
        Err(elapsed) => {
            error!(workflow_type, "scanner workflow start timed out");
            Err(StartWorkflowError::Other(anyhow::Error::new(elapsed)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<String>>,
        failures_before_success: Mutex<usize>,
        already_started: bool,
    }

    #[async_trait]
    impl SystemWorkflowClient for RecordingClient {
        async fn start_workflow(
            &self,
            options: StartWorkflowOptions,
            workflow_type: &str,
        ) -> Result<(), StartWorkflowError> {
            self.calls
                .lock()
                .unwrap()
                .push(workflow_type.to_string());
            if self.already_started {
                return Err(StartWorkflowError::AlreadyStarted(options.workflow_id));
            }
            let mut failures = self.failures_before_success.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(StartWorkflowError::Other(anyhow::anyhow!(
                    "persistence unavailable"
                )));
            }
            Ok(())
        }
    }

    fn all_enabled(store_kind: StoreKind) -> ScannerConfig {
        ScannerConfig {
            executions_scanner_enabled: true,
            history_scanner_enabled: true,
            task_queue_scanner_enabled: true,
            store_kind,
        }
    }

    #[tokio::test]
    async fn starts_all_scanners_on_sql_store() {
        let client = Arc::new(RecordingClient::default());
        let mut scanner = Scanner::new(all_enabled(StoreKind::Sql), client.clone());
        scanner.start();
        scanner.stop().await;

        let mut calls = client.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec!["executions-scanner", "history-scanner", "tq-scanner"]
        );
    }

    #[tokio::test]
    async fn task_queue_scanner_requires_sql_store() {
        let client = Arc::new(RecordingClient::default());
        let mut scanner = Scanner::new(all_enabled(StoreKind::Cassandra), client.clone());
        scanner.start();
        scanner.stop().await;

        let calls = client.calls.lock().unwrap().clone();
        assert!(!calls.iter().any(|wf| wf == "tq-scanner"));
        assert_eq!(calls.len(), 2);
    }

    #[tokio::test]
    async fn disabled_scanners_do_not_start() {
        let client = Arc::new(RecordingClient::default());
        let config = ScannerConfig {
            executions_scanner_enabled: false,
            history_scanner_enabled: false,
            task_queue_scanner_enabled: false,
            store_kind: StoreKind::Sql,
        };
        let mut scanner = Scanner::new(config, client.clone());
        scanner.start();
        scanner.stop().await;

        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn already_started_is_swallowed() {
        let client = Arc::new(RecordingClient {
            already_started: true,
            ..RecordingClient::default()
        });
        let config = ScannerConfig {
            executions_scanner_enabled: true,
            history_scanner_enabled: false,
            task_queue_scanner_enabled: false,
            store_kind: StoreKind::Cassandra,
        };
        let mut scanner = Scanner::new(config, client.clone());
        scanner.start();
        scanner.stop().await;

        // One attempt, no retries: already-started is success.
        assert_eq!(client.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_start_failures_are_retried() {
        let client = Arc::new(RecordingClient {
            failures_before_success: Mutex::new(2),
            ..RecordingClient::default()
        });
        let config = ScannerConfig {
            executions_scanner_enabled: true,
            history_scanner_enabled: false,
            task_queue_scanner_enabled: false,
            store_kind: StoreKind::Cassandra,
        };
        let mut scanner = Scanner::new(config, client.clone());
        scanner.start();
        scanner.stop().await;

        assert_eq!(client.calls.lock().unwrap().len(), 3);
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shard context.
//!
//! A shard owns a contiguous set of executions and their queues. The
//! context carries what every component on the shard needs: the cluster
//! failover version, the immediate-queue task id cursor, configuration,
//! the time source, and handles to the store and registry boundaries.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::to_vec;
use tracing::debug;

use tidemark_common::clock::Clock;
use tidemark_persistence::{
    AppendHistoryNodesRequest, DataBlob, ExecutionStore, ReplicationTask, StoreError, TaskKey,
    UpdateWorkflowExecutionRequest,
};

use crate::config::HistoryConfig;
use crate::error::HistoryError;
use crate::metrics::HistoryMetrics;
use crate::namespace::NamespaceRegistry;
use crate::workflow::MutableState;

/// Per-shard runtime context.
pub struct ShardContext {
    shard_id: i32,
    current_cluster: String,
    config: Arc<HistoryConfig>,
    clock: Arc<dyn Clock>,
    metrics: Arc<HistoryMetrics>,
    executions: Arc<dyn ExecutionStore>,
    namespaces: Arc<dyn NamespaceRegistry>,
    /// Next unallocated immediate task id; doubles as the exclusive high
    /// read watermark.
    next_task_id: AtomicI64,
    /// Current cluster failover version.
    failover_version: AtomicI64,
}

impl ShardContext {
    /// Create a shard context.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shard_id: i32,
        current_cluster: impl Into<String>,
        config: Arc<HistoryConfig>,
        clock: Arc<dyn Clock>,
        metrics: Arc<HistoryMetrics>,
        executions: Arc<dyn ExecutionStore>,
        namespaces: Arc<dyn NamespaceRegistry>,
        initial_failover_version: i64,
        initial_task_id: i64,
    ) -> Self {
        Self {
            shard_id,
            current_cluster: current_cluster.into(),
            config,
            clock,
            metrics,
            executions,
            namespaces,
            next_task_id: AtomicI64::new(initial_task_id),
            failover_version: AtomicI64::new(initial_failover_version),
        }
    }

    /// This shard's id.
    pub fn shard_id(&self) -> i32 {
        self.shard_id
    }

    /// Name of the cluster this shard is active on.
    pub fn current_cluster_name(&self) -> &str {
        &self.current_cluster
    }

    /// Service configuration.
    pub fn config(&self) -> &Arc<HistoryConfig> {
        &self.config
    }

    /// Shard time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Shard metrics.
    pub fn metrics(&self) -> &Arc<HistoryMetrics> {
        &self.metrics
    }

    /// The execution store boundary.
    pub fn execution_store(&self) -> &Arc<dyn ExecutionStore> {
        &self.executions
    }

    /// The namespace registry boundary.
    pub fn namespace_registry(&self) -> &Arc<dyn NamespaceRegistry> {
        &self.namespaces
    }

    /// The cluster failover version mutations are currently written at.
    pub fn current_version(&self) -> i64 {
        self.failover_version.load(Ordering::Acquire)
    }

    /// Adopt a new failover version after cluster metadata changes.
    pub fn set_current_version(&self, version: i64) {
        self.failover_version.store(version, Ordering::Release);
    }

    /// Allocate one immediate task id.
    pub fn allocate_task_id(&self) -> i64 {
        self.next_task_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Exclusive upper bound on task ids that are safely persisted and
    /// visible to queue readers.
    pub fn immediate_queue_exclusive_high_read_watermark(&self) -> TaskKey {
        TaskKey(self.next_task_id.load(Ordering::Acquire))
    }

    /// Commit one execution's open transaction: serialize its event
    /// batches, assign shard-monotonic ids to the generated replication
    /// tasks, and write everything atomically.
    ///
    /// Returns the committed replication tasks so the caller can notify
    /// the replication ack manager.
    pub async fn commit_workflow_mutation(
        &self,
        mutable_state: &mut MutableState,
    ) -> Result<Vec<ReplicationTask>, HistoryError> {
        let mut mutation = mutable_state.close_transaction();

        let branch_token = mutation
            .record
            .execution_info
            .version_histories
            .current()
            .map(|history| history.branch_token.clone())
            .ok_or_else(|| HistoryError::Internal("execution has no history branch".to_string()))?;

        let mut history_nodes = Vec::with_capacity(mutation.history_batches.len());
        for batch in &mutation.history_batches {
            let first_event_id = batch.first().map(|e| e.event_id).unwrap_or_default();
            let data = to_vec(batch)
                .map_err(|err| HistoryError::Store(StoreError::Serialization(err.to_string())))?;
            history_nodes.push(AppendHistoryNodesRequest {
                shard_id: self.shard_id,
                branch_token: branch_token.clone(),
                first_event_id,
                events: DataBlob::json(data),
            });
        }

        for task in &mut mutation.replication_tasks {
            task.set_task_id(self.allocate_task_id());
        }
        let replication_tasks = mutation.replication_tasks.clone();

        self.executions
            .update_workflow_execution(UpdateWorkflowExecutionRequest {
                shard_id: self.shard_id,
                mutable_state: mutation.record,
                history_nodes,
                transfer_tasks: mutation.transfer_tasks,
                replication_tasks: mutation.replication_tasks,
            })
            .await?;

        debug!(
            shard_id = self.shard_id,
            replication_tasks = replication_tasks.len(),
            "workflow mutation committed"
        );
        Ok(replication_tasks)
    }
}

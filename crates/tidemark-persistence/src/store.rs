// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The execution store contract.
//!
//! Every call is expected to honor the deadline on the calling task; a
//! cancelled caller simply drops the future. Implementations must make
//! [`ExecutionStore::update_workflow_execution`] atomic: events, queue
//! tasks and the execution-info diff commit together or not at all.

use async_trait::async_trait;
use bytes::Bytes;

use crate::records::{DataBlob, WorkflowMutableStateRecord};
use crate::tasks::{ReplicationTask, TaskCategory, TaskKey, TransferTask};

/// Errors surfaced by the execution store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store is temporarily unavailable; the caller may retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A row could not be encoded or decoded.
    #[error("serialization: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether a retry against the store may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Page request over a shard's task queue.
#[derive(Debug, Clone, PartialEq)]
pub struct GetHistoryTasksRequest {
    /// Shard whose queue is read.
    pub shard_id: i32,
    /// Queue category.
    pub category: TaskCategory,
    /// Lowest task key to return, inclusive.
    pub inclusive_min_task_key: TaskKey,
    /// Upper bound, exclusive.
    pub exclusive_max_task_key: TaskKey,
    /// Maximum tasks per page.
    pub batch_size: usize,
    /// Continuation token from the previous page, if any.
    pub next_page_token: Option<Bytes>,
}

/// One page of a shard's task queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetHistoryTasksResponse {
    /// Tasks in key order.
    pub tasks: Vec<ReplicationTask>,
    /// Token for the next page; `None` when the range is exhausted.
    pub next_page_token: Option<Bytes>,
}

/// Point lookup of one execution's mutable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetWorkflowExecutionRequest {
    /// Shard owning the execution.
    pub shard_id: i32,
    /// Namespace id.
    pub namespace_id: String,
    /// Workflow id.
    pub workflow_id: String,
    /// Run id.
    pub run_id: String,
}

/// Range read of raw (serialized) history event batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRawHistoryBranchRequest {
    /// Opaque branch locator.
    pub branch_token: Bytes,
    /// First event id, inclusive.
    pub first_event_id: i64,
    /// End of the range, exclusive.
    pub next_event_id: i64,
}

/// Append of one serialized event batch to a history branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendHistoryNodesRequest {
    /// Shard owning the execution.
    pub shard_id: i32,
    /// Opaque branch locator.
    pub branch_token: Bytes,
    /// First event id contained in `events`.
    pub first_event_id: i64,
    /// Serialized event batch.
    pub events: DataBlob,
}

/// Transactional update of one execution.
///
/// History nodes listed here are appended in the same transaction as the
/// mutable-state diff and the generated queue tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateWorkflowExecutionRequest {
    /// Shard owning the execution.
    pub shard_id: i32,
    /// The full post-mutation state.
    pub mutable_state: WorkflowMutableStateRecord,
    /// Event batches to append, in order.
    pub history_nodes: Vec<AppendHistoryNodesRequest>,
    /// Transfer/timer tasks generated by the mutation.
    pub transfer_tasks: Vec<TransferTask>,
    /// Replication tasks generated by the mutation, ids already assigned.
    pub replication_tasks: Vec<ReplicationTask>,
}

/// The storage boundary consumed by the history service.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Read one page of a shard queue.
    async fn get_history_tasks(
        &self,
        request: GetHistoryTasksRequest,
    ) -> Result<GetHistoryTasksResponse, StoreError>;

    /// Load an execution's mutable state.
    async fn get_workflow_execution(
        &self,
        request: GetWorkflowExecutionRequest,
    ) -> Result<WorkflowMutableStateRecord, StoreError>;

    /// Read raw serialized event batches from a history branch.
    async fn read_raw_history_branch(
        &self,
        request: ReadRawHistoryBranchRequest,
    ) -> Result<Vec<DataBlob>, StoreError>;

    /// Append one serialized event batch to a branch.
    async fn append_history_nodes(
        &self,
        request: AppendHistoryNodesRequest,
    ) -> Result<(), StoreError>;

    /// Atomically commit a mutation: state diff, events and queue tasks.
    async fn update_workflow_execution(
        &self,
        request: UpdateWorkflowExecutionRequest,
    ) -> Result<(), StoreError>;
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable record types.
//!
//! These mirror what the storage driver persists for one workflow
//! execution. The history service wraps them in richer in-memory types;
//! the records themselves stay plain data.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A serialized payload together with its encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBlob {
    /// Encoding of `data`, e.g. `"json"`.
    pub encoding: String,
    /// The serialized bytes.
    pub data: Bytes,
}

impl DataBlob {
    /// Wrap already-serialized JSON bytes.
    pub fn json(data: impl Into<Bytes>) -> Self {
        Self {
            encoding: "json".to_string(),
            data: data.into(),
        }
    }
}

/// Lifecycle state of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    /// Created but no workflow task scheduled yet.
    Created,
    /// Actively making progress.
    Running,
    /// Reached a terminal event.
    Completed,
    /// Terminated by operator or policy.
    Terminated,
    /// Received replicated events for a closed or superseded run.
    Zombie,
}

/// Externally visible status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    /// Still open.
    Running,
    /// Closed successfully.
    Completed,
    /// Closed with failure.
    Failed,
    /// Closed by termination.
    Terminated,
}

/// Execution-scoped info persisted with every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfoRecord {
    /// Namespace the execution belongs to.
    pub namespace_id: String,
    /// Workflow id chosen by the caller.
    pub workflow_id: String,
    /// The normal (non-sticky) task queue bound at start.
    pub task_queue: String,
    /// Sticky queue binding, if a worker claimed affinity.
    pub sticky_task_queue: Option<String>,
    /// Default start-to-close budget for workflow tasks.
    pub default_workflow_task_timeout: Duration,
    /// Failover version at which the pending workflow task was scheduled.
    pub workflow_task_version: i64,
    /// Scheduled event id of the pending workflow task, or the empty id.
    pub workflow_task_scheduled_event_id: i64,
    /// Started event id of the pending workflow task, or the empty id.
    pub workflow_task_started_event_id: i64,
    /// Poll request that started the pending workflow task.
    pub workflow_task_request_id: Uuid,
    /// Start-to-close budget of the pending workflow task.
    pub workflow_task_timeout: Duration,
    /// Attempt count of the pending workflow task.
    pub workflow_task_attempt: i32,
    /// When the pending workflow task was scheduled.
    pub workflow_task_scheduled_time: Option<DateTime<Utc>>,
    /// When the pending workflow task was started.
    pub workflow_task_started_time: Option<DateTime<Utc>>,
    /// Original schedule instant, preserved across heartbeat reschedules.
    pub workflow_task_original_scheduled_time: Option<DateTime<Utc>>,
    /// Started event id of the last completed workflow task.
    pub last_workflow_task_started_event_id: i64,
    /// Version histories of the execution's history branches.
    pub version_histories: VersionHistoriesRecord,
    /// Failover version of the last durable write.
    pub last_write_version: i64,
    /// Binary checksums recorded at workflow task completions.
    pub reset_point_checksums: Vec<String>,
}

/// Run-scoped execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStateRecord {
    /// Run id of this execution.
    pub run_id: String,
    /// Request id that created the run.
    pub create_request_id: Uuid,
    /// Lifecycle state.
    pub state: WorkflowState,
    /// Externally visible status.
    pub status: WorkflowStatus,
}

/// One activity's persisted state, keyed by its scheduled event id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInfoRecord {
    /// Failover version of the activity state.
    pub version: i64,
    /// Scheduled event id identifying the activity.
    pub scheduled_event_id: i64,
    /// When the activity was scheduled.
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Started event id, or the empty id while pending.
    pub started_event_id: i64,
    /// When the activity attempt started.
    pub started_time: Option<DateTime<Utc>>,
    /// Last heartbeat instant.
    pub last_heartbeat_time: Option<DateTime<Utc>>,
    /// Details carried by the last heartbeat.
    pub heartbeat_details: Option<Bytes>,
    /// Attempt count, 1-based.
    pub attempt: i32,
    /// Message of the last retryable failure.
    pub last_failure: Option<String>,
    /// Identity of the last worker that processed the activity.
    pub last_worker_identity: String,
}

/// An item of a version history: events up to and including `event_id`
/// were written at `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistoryItemRecord {
    /// Highest event id written at `version`.
    pub event_id: i64,
    /// Failover version.
    pub version: i64,
}

/// One history branch and its version lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistoryRecord {
    /// Opaque token locating the branch in the history store.
    pub branch_token: Bytes,
    /// Version lineage, ordered by event id.
    pub items: Vec<VersionHistoryItemRecord>,
}

/// All branches of an execution plus the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistoriesRecord {
    /// Index of the current branch in `histories`.
    pub current_index: usize,
    /// All known branches.
    pub histories: Vec<VersionHistoryRecord>,
}

impl VersionHistoriesRecord {
    /// The current branch, if any exists.
    pub fn current(&self) -> Option<&VersionHistoryRecord> {
        self.histories.get(self.current_index)
    }
}

/// The full persisted mutable state of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMutableStateRecord {
    /// Execution-scoped info.
    pub execution_info: ExecutionInfoRecord,
    /// Run-scoped state.
    pub execution_state: ExecutionStateRecord,
    /// Next event id to be assigned on this execution's history.
    pub next_event_id: i64,
    /// Activity table keyed by scheduled event id.
    pub activity_infos: HashMap<i64, ActivityInfoRecord>,
}

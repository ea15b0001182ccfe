// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue task records.
//!
//! Tasks are durably written alongside history events in the same
//! transaction and consumed by per-shard queue processors. Replication
//! tasks carry shard-monotonic ids; the replication ack manager streams
//! them to peer clusters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowKey {
    /// Namespace the execution belongs to.
    pub namespace_id: String,
    /// Workflow id chosen by the caller.
    pub workflow_id: String,
    /// Run id of this execution chain link.
    pub run_id: String,
}

impl WorkflowKey {
    /// Build a key from its parts.
    pub fn new(
        namespace_id: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace_id: namespace_id.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// Categories of shard queue tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskCategory {
    /// Tasks dispatched to matching / timers on this cluster.
    Transfer,
    /// Tasks streamed to peer clusters.
    Replication,
}

/// An immediate (id-ordered) task key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey(pub i64);

impl TaskKey {
    /// The key immediately before this one.
    pub fn prev(self) -> TaskKey {
        TaskKey(self.0 - 1)
    }
}

/// A task on the replication queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplicationTask {
    /// Replicate a history branch range to peers.
    HistoryReplication(HistoryReplicationTask),
    /// Synchronise a single activity's state to peers.
    SyncActivity(SyncActivityTask),
}

/// Replicates the history events `[first_event_id, next_event_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryReplicationTask {
    /// Execution the events belong to.
    pub workflow_key: WorkflowKey,
    /// Shard-monotonic task id.
    pub task_id: i64,
    /// When the task became visible to the queue.
    pub visibility_timestamp: DateTime<Utc>,
    /// First event id of the range, inclusive.
    pub first_event_id: i64,
    /// End of the range, exclusive.
    pub next_event_id: i64,
    /// Failover version of the events.
    pub version: i64,
}

/// Synchronises the state of one activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncActivityTask {
    /// Execution the activity belongs to.
    pub workflow_key: WorkflowKey,
    /// Shard-monotonic task id.
    pub task_id: i64,
    /// When the task became visible to the queue.
    pub visibility_timestamp: DateTime<Utc>,
    /// Failover version of the activity state.
    pub version: i64,
    /// Scheduled event id identifying the activity.
    pub scheduled_event_id: i64,
}

impl ReplicationTask {
    /// Shard-monotonic task id.
    pub fn task_id(&self) -> i64 {
        match self {
            ReplicationTask::HistoryReplication(task) => task.task_id,
            ReplicationTask::SyncActivity(task) => task.task_id,
        }
    }

    /// When the task became visible to the queue.
    pub fn visibility_timestamp(&self) -> DateTime<Utc> {
        match self {
            ReplicationTask::HistoryReplication(task) => task.visibility_timestamp,
            ReplicationTask::SyncActivity(task) => task.visibility_timestamp,
        }
    }

    /// Namespace of the owning execution.
    pub fn namespace_id(&self) -> &str {
        &self.workflow_key().namespace_id
    }

    /// Identity of the owning execution.
    pub fn workflow_key(&self) -> &WorkflowKey {
        match self {
            ReplicationTask::HistoryReplication(task) => &task.workflow_key,
            ReplicationTask::SyncActivity(task) => &task.workflow_key,
        }
    }

    /// Override the shard-assigned task id.
    pub fn set_task_id(&mut self, task_id: i64) {
        match self {
            ReplicationTask::HistoryReplication(task) => task.task_id = task_id,
            ReplicationTask::SyncActivity(task) => task.task_id = task_id,
        }
    }
}

/// A task on the transfer/timer queues, generated by the mutator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransferTask {
    /// Push a scheduled workflow task to its task queue.
    DispatchWorkflowTask {
        /// Id of the `WorkflowTaskScheduled` event (or reserved id).
        scheduled_event_id: i64,
        /// Destination task queue name.
        task_queue: String,
    },
    /// Fire when a started workflow task exceeds its start-to-close budget.
    WorkflowTaskTimeout {
        /// Id of the scheduled event the timeout guards.
        scheduled_event_id: i64,
        /// When the timeout fires.
        fire_at: DateTime<Utc>,
    },
    /// Schedule the first workflow task after a start backoff elapses.
    DelayedDispatch {
        /// When the first workflow task becomes eligible.
        fire_at: DateTime<Utc>,
    },
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! History event model.
//!
//! Events are immutable once appended. Each carries the failover version
//! it was written at; per-execution event ids are strictly increasing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::TaskQueue;

/// One durable history event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Strictly increasing per-execution id.
    pub event_id: i64,
    /// Wall-clock instant the event was written.
    pub event_time: DateTime<Utc>,
    /// Failover version the event was written at.
    pub version: i64,
    /// Typed payload.
    pub attributes: EventAttributes,
}

impl HistoryEvent {
    /// The event's type tag.
    pub fn event_type(&self) -> EventType {
        match &self.attributes {
            EventAttributes::WorkflowExecutionStarted(_) => EventType::WorkflowExecutionStarted,
            EventAttributes::WorkflowTaskScheduled(_) => EventType::WorkflowTaskScheduled,
            EventAttributes::WorkflowTaskStarted(_) => EventType::WorkflowTaskStarted,
            EventAttributes::WorkflowTaskCompleted(_) => EventType::WorkflowTaskCompleted,
            EventAttributes::WorkflowTaskFailed(_) => EventType::WorkflowTaskFailed,
            EventAttributes::WorkflowTaskTimedOut(_) => EventType::WorkflowTaskTimedOut,
            EventAttributes::WorkflowExecutionSignaled(_) => EventType::WorkflowExecutionSignaled,
        }
    }
}

/// Event type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// The execution started.
    WorkflowExecutionStarted,
    /// A workflow task was scheduled.
    WorkflowTaskScheduled,
    /// A workflow task was handed to a worker.
    WorkflowTaskStarted,
    /// A workflow task completed.
    WorkflowTaskCompleted,
    /// A workflow task failed.
    WorkflowTaskFailed,
    /// A workflow task timed out.
    WorkflowTaskTimedOut,
    /// An external signal was delivered to the execution.
    WorkflowExecutionSignaled,
}

/// Which timeout fired for a workflow task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutKind {
    /// No poller picked the task up in time (sticky queue abandoned).
    ScheduleToStart,
    /// The worker did not finish within the start-to-close budget.
    StartToClose,
}

/// Why a workflow task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowTaskFailedCause {
    /// No specific cause reported.
    Unspecified,
    /// The worker returned an unprocessable command.
    UnhandledCommand,
    /// The task was failed to reset the workflow.
    ResetWorkflow,
    /// The task was failed by a close command during failover.
    FailoverCloseCommand,
}

/// Typed event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventAttributes {
    /// Payload of [`EventType::WorkflowExecutionStarted`].
    WorkflowExecutionStarted(WorkflowExecutionStartedAttributes),
    /// Payload of [`EventType::WorkflowTaskScheduled`].
    WorkflowTaskScheduled(WorkflowTaskScheduledAttributes),
    /// Payload of [`EventType::WorkflowTaskStarted`].
    WorkflowTaskStarted(WorkflowTaskStartedAttributes),
    /// Payload of [`EventType::WorkflowTaskCompleted`].
    WorkflowTaskCompleted(WorkflowTaskCompletedAttributes),
    /// Payload of [`EventType::WorkflowTaskFailed`].
    WorkflowTaskFailed(WorkflowTaskFailedAttributes),
    /// Payload of [`EventType::WorkflowTaskTimedOut`].
    WorkflowTaskTimedOut(WorkflowTaskTimedOutAttributes),
    /// Payload of [`EventType::WorkflowExecutionSignaled`].
    WorkflowExecutionSignaled(WorkflowExecutionSignaledAttributes),
}

/// An external signal was delivered. Signals arriving while a workflow
/// task is in flight are buffered until the next batch boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionSignaledAttributes {
    /// Signal name.
    pub signal_name: String,
    /// Serialized signal payload.
    pub input: Option<bytes::Bytes>,
}

/// Start of the execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionStartedAttributes {
    /// The normal task queue bound to the execution.
    pub task_queue: String,
    /// Default start-to-close budget for workflow tasks.
    pub default_workflow_task_timeout: Duration,
    /// Delay before the first workflow task becomes eligible, if any.
    pub first_workflow_task_backoff: Option<Duration>,
}

/// A workflow task was scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTaskScheduledAttributes {
    /// Queue the task was scheduled on.
    pub task_queue: TaskQueue,
    /// Start-to-close budget for this attempt.
    pub start_to_close_timeout: Duration,
    /// Attempt count, 1-based.
    pub attempt: i32,
}

/// A workflow task was handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTaskStartedAttributes {
    /// Id of the matching scheduled event.
    pub scheduled_event_id: i64,
    /// Identity of the worker that polled the task.
    pub identity: String,
    /// Poll request id.
    pub request_id: Uuid,
}

/// A workflow task completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTaskCompletedAttributes {
    /// Id of the matching scheduled event.
    pub scheduled_event_id: i64,
    /// Id of the matching started event.
    pub started_event_id: i64,
    /// Identity of the completing worker.
    pub identity: String,
    /// Build checksum of the completing worker binary.
    pub binary_checksum: String,
}

/// A workflow task failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTaskFailedAttributes {
    /// Id of the matching scheduled event.
    pub scheduled_event_id: i64,
    /// Id of the matching started event.
    pub started_event_id: i64,
    /// Failure cause.
    pub cause: WorkflowTaskFailedCause,
    /// Failure message, if any.
    pub failure: Option<String>,
    /// Identity of the failing worker.
    pub identity: String,
    /// Build checksum of the failing worker binary.
    pub binary_checksum: String,
    /// Base run id when the failure forks a new run.
    pub base_run_id: String,
    /// New run id when the failure forks a new run.
    pub new_run_id: String,
    /// Version of the fork point.
    pub fork_event_version: i64,
}

/// A workflow task timed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTaskTimedOutAttributes {
    /// Id of the matching scheduled event.
    pub scheduled_event_id: i64,
    /// Id of the matching started event, or the empty id.
    pub started_event_id: i64,
    /// Which timeout fired.
    pub timeout_kind: TimeoutKind,
}

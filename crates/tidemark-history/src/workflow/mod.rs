// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-execution workflow state.
//!
//! [`MutableState`] is the authoritative in-memory state of one
//! execution; [`WorkflowTaskStateMachine`] mutates its current workflow
//! task. Access is serialized by the [`cache::WorkflowCache`]
//! per-execution lock; nothing in this module performs I/O.

pub mod cache;
mod mutable_state;
mod task_state_machine;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use self::mutable_state::{MutableState, WorkflowMutation};
pub use self::task_state_machine::WorkflowTaskStateMachine;

/// Workflow tasks with `attempt` above this are transient: their
/// `Scheduled`/`Started` events are deferred until completion.
pub const WORKFLOW_TASK_RETRY_BACKOFF_MIN_ATTEMPTS: i32 = 3;

/// Initial interval of the transient-task timeout backoff.
pub const WORKFLOW_TASK_RETRY_INITIAL_INTERVAL: Duration = Duration::from_secs(5);

/// A task queue binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueue {
    /// Queue name.
    pub name: String,
    /// Normal or sticky.
    pub kind: TaskQueueKind,
}

/// The two task queue flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskQueueKind {
    /// The execution's declared queue; any worker may poll it.
    Normal,
    /// A worker-affinitised queue; cleared on any failure or timeout.
    Sticky,
}

/// How the pending workflow task relates to durable history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowTaskKind {
    /// `Scheduled` has been written; `Started` follows normally.
    #[default]
    Normal,
    /// Attempt exceeds the retry threshold; events are deferred and only
    /// materialised if the attempt completes.
    Transient,
    /// Scheduled without any durable record until strictly necessary;
    /// same emission rules as transient.
    Speculative,
}

impl WorkflowTaskKind {
    /// Whether `Scheduled`/`Started` events have been deferred.
    pub fn defers_events(self) -> bool {
        !matches!(self, WorkflowTaskKind::Normal)
    }
}

/// The pending workflow task of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTaskInfo {
    /// Failover version the task was scheduled at.
    pub version: i64,
    /// Id of the `WorkflowTaskScheduled` event, or the reserved id for
    /// deferred tasks. The empty id means no pending task.
    pub scheduled_event_id: i64,
    /// Id of the `WorkflowTaskStarted` event; the empty id until start.
    pub started_event_id: i64,
    /// Poll request that started the task; nil until start.
    pub request_id: Uuid,
    /// Start-to-close budget for this attempt.
    pub start_to_close_timeout: Duration,
    /// Attempt count, 1-based. Above one means the previous attempt
    /// failed or timed out.
    pub attempt: i32,
    /// When this attempt was scheduled.
    pub scheduled_time: Option<DateTime<Utc>>,
    /// When this attempt was started.
    pub started_time: Option<DateTime<Utc>>,
    /// Schedule instant of the first task in a heartbeat chain; preserved
    /// across delete/re-schedule cycles.
    pub original_scheduled_time: Option<DateTime<Utc>>,
    /// Queue binding at schedule time.
    pub task_queue: Option<TaskQueue>,
}

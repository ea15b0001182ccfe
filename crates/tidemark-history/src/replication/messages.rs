// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outbound replication payloads.
//!
//! These are the messages handed to peer-cluster pollers. Field layout
//! is part of the cross-cluster contract; changing it breaks mixed
//! version fleets.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tidemark_persistence::{DataBlob, VersionHistoryItemRecord};

/// One batch of replication messages returned to a polling peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationMessages {
    /// Hydrated messages in task id order.
    pub replication_tasks: Vec<ReplicationMessage>,
    /// Highest task id examined, including filtered tasks; the peer's
    /// next inclusive min ack.
    pub last_retrieved_message_id: i64,
    /// Whether more tasks are already known to exist past this batch.
    pub has_more: bool,
}

/// One replication message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationMessage {
    /// Id of the queue task this message was hydrated from.
    pub source_task_id: i64,
    /// Visibility instant of the source task.
    pub visibility_time: DateTime<Utc>,
    /// Typed payload.
    pub attributes: ReplicationMessageAttributes,
}

/// Payload variants of a replication message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReplicationMessageAttributes {
    /// A raw history event batch.
    HistoryBatch(HistoryBatchAttributes),
    /// One activity's state.
    SyncActivity(SyncActivityAttributes),
}

/// A raw history batch for events `[first_event_id, next_event_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryBatchAttributes {
    /// Namespace of the execution.
    pub namespace_id: String,
    /// Workflow id.
    pub workflow_id: String,
    /// Run id.
    pub run_id: String,
    /// First replicated event id, inclusive.
    pub first_event_id: i64,
    /// End of the replicated range, exclusive.
    pub next_event_id: i64,
    /// Failover version of the events.
    pub version: i64,
    /// Version lineage of the branch the events belong to.
    pub version_history_items: Vec<VersionHistoryItemRecord>,
    /// The serialized event batches.
    pub events: Vec<DataBlob>,
}

/// The replicated state of one activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncActivityAttributes {
    /// Namespace of the execution.
    pub namespace_id: String,
    /// Workflow id.
    pub workflow_id: String,
    /// Run id.
    pub run_id: String,
    /// Failover version of the activity state.
    pub version: i64,
    /// Scheduled event id identifying the activity.
    pub scheduled_event_id: i64,
    /// When the activity was scheduled.
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Started event id, or the empty id while pending.
    pub started_event_id: i64,
    /// When the current attempt started.
    pub started_time: Option<DateTime<Utc>>,
    /// Last heartbeat instant.
    pub last_heartbeat_time: Option<DateTime<Utc>>,
    /// Details carried by the last heartbeat.
    pub details: Option<Bytes>,
    /// Attempt count, 1-based.
    pub attempt: i32,
    /// Message of the last retryable failure.
    pub last_failure: Option<String>,
    /// Identity of the last worker that processed the activity.
    pub last_worker_identity: String,
    /// Version lineage item set of the current branch.
    pub version_history_items: Vec<VersionHistoryItemRecord>,
}

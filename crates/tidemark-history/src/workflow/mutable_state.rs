// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authoritative in-memory state of one workflow execution.
//!
//! Owns the execution info, the task-queue binding, the activity table,
//! the version histories and the history builder for the transaction in
//! flight. Single-writer: callers hold the per-execution lock from the
//! workflow cache before touching this type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use tidemark_common::clock::Clock;
use tidemark_persistence::{
    ActivityInfoRecord, ExecutionInfoRecord, ExecutionStateRecord, HistoryReplicationTask,
    ReplicationTask, TransferTask, VersionHistoriesRecord, VersionHistoryItemRecord,
    VersionHistoryRecord, WorkflowKey, WorkflowMutableStateRecord, WorkflowState, WorkflowStatus,
};

use super::{TaskQueue, TaskQueueKind, WorkflowTaskKind};
use crate::config::HistoryConfig;
use crate::error::HistoryError;
use crate::history::{EventAttributes, HistoryBuilder, HistoryEvent};
use crate::metrics::HistoryMetrics;
use crate::{EMPTY_EVENT_ID, EMPTY_VERSION, FIRST_EVENT_ID};

/// Everything one mutation produced, ready for an atomic commit.
#[derive(Debug)]
pub struct WorkflowMutation {
    /// Post-mutation persisted state.
    pub record: WorkflowMutableStateRecord,
    /// Event batches appended by the mutation, in order.
    pub history_batches: Vec<Vec<HistoryEvent>>,
    /// Transfer/timer tasks generated by the mutation.
    pub transfer_tasks: Vec<TransferTask>,
    /// Replication tasks generated by the mutation. Task ids are zero
    /// until the shard assigns them at commit.
    pub replication_tasks: Vec<ReplicationTask>,
}

/// Authoritative state of one workflow execution.
#[derive(Debug)]
pub struct MutableState {
    pub(crate) config: Arc<HistoryConfig>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: Arc<HistoryMetrics>,
    pub(crate) execution_info: ExecutionInfoRecord,
    pub(crate) execution_state: ExecutionStateRecord,
    pub(crate) activity_infos: HashMap<i64, ActivityInfoRecord>,
    pub(crate) hbuilder: HistoryBuilder,
    current_version: i64,
    pub(crate) pending_task_kind: WorkflowTaskKind,
    transfer_tasks: Vec<TransferTask>,
}

impl MutableState {
    /// Create the state of a brand-new execution. No events are written
    /// until [`MutableState::add_workflow_execution_started_event`].
    pub fn new_execution(
        config: Arc<HistoryConfig>,
        clock: Arc<dyn Clock>,
        metrics: Arc<HistoryMetrics>,
        workflow_key: WorkflowKey,
        task_queue: String,
        default_workflow_task_timeout: Duration,
        version: i64,
    ) -> Self {
        let branch_token = Bytes::from(format!("branch:{}", workflow_key.run_id));
        let execution_info = ExecutionInfoRecord {
            namespace_id: workflow_key.namespace_id,
            workflow_id: workflow_key.workflow_id,
            task_queue,
            sticky_task_queue: None,
            default_workflow_task_timeout,
            workflow_task_version: EMPTY_VERSION,
            workflow_task_scheduled_event_id: EMPTY_EVENT_ID,
            workflow_task_started_event_id: EMPTY_EVENT_ID,
            workflow_task_request_id: Uuid::nil(),
            workflow_task_timeout: Duration::ZERO,
            workflow_task_attempt: 1,
            workflow_task_scheduled_time: None,
            workflow_task_started_time: None,
            workflow_task_original_scheduled_time: None,
            last_workflow_task_started_event_id: EMPTY_EVENT_ID,
            version_histories: VersionHistoriesRecord {
                current_index: 0,
                histories: vec![VersionHistoryRecord {
                    branch_token,
                    items: Vec::new(),
                }],
            },
            last_write_version: version,
            reset_point_checksums: Vec::new(),
        };
        let execution_state = ExecutionStateRecord {
            run_id: workflow_key.run_id,
            create_request_id: Uuid::new_v4(),
            state: WorkflowState::Created,
            status: WorkflowStatus::Running,
        };
        Self {
            hbuilder: HistoryBuilder::new(clock.clone(), FIRST_EVENT_ID, version),
            config,
            clock,
            metrics,
            execution_info,
            execution_state,
            activity_infos: HashMap::new(),
            current_version: version,
            pending_task_kind: WorkflowTaskKind::Normal,
            transfer_tasks: Vec::new(),
        }
    }

    /// Rehydrate state from its persisted record.
    pub fn from_record(
        config: Arc<HistoryConfig>,
        clock: Arc<dyn Clock>,
        metrics: Arc<HistoryMetrics>,
        record: WorkflowMutableStateRecord,
    ) -> Self {
        let current_version = record.execution_info.last_write_version;
        // Deferred-event tasks are reconstructed from the attempt count;
        // speculative tasks are by definition absent from storage.
        let pending_task_kind = if record.execution_info.workflow_task_scheduled_event_id
            != EMPTY_EVENT_ID
            && record.execution_info.workflow_task_attempt
                > super::WORKFLOW_TASK_RETRY_BACKOFF_MIN_ATTEMPTS
        {
            WorkflowTaskKind::Transient
        } else {
            WorkflowTaskKind::Normal
        };
        Self {
            hbuilder: HistoryBuilder::new(clock.clone(), record.next_event_id, current_version),
            config,
            clock,
            metrics,
            execution_info: record.execution_info,
            execution_state: record.execution_state,
            activity_infos: record.activity_infos,
            current_version,
            pending_task_kind,
            transfer_tasks: Vec::new(),
        }
    }

    /// Persisted form of the current state.
    pub fn to_record(&self) -> WorkflowMutableStateRecord {
        WorkflowMutableStateRecord {
            execution_info: self.execution_info.clone(),
            execution_state: self.execution_state.clone(),
            next_event_id: self.hbuilder.next_event_id(),
            activity_infos: self.activity_infos.clone(),
        }
    }

    /// Identity of this execution.
    pub fn workflow_key(&self) -> WorkflowKey {
        WorkflowKey::new(
            self.execution_info.namespace_id.clone(),
            self.execution_info.workflow_id.clone(),
            self.execution_state.run_id.clone(),
        )
    }

    /// Id the next appended event will receive.
    pub fn next_event_id(&self) -> i64 {
        self.hbuilder.next_event_id()
    }

    /// The cluster failover version mutations are written at.
    pub fn current_version(&self) -> i64 {
        self.current_version
    }

    /// Update the failover version after cluster metadata changes.
    pub fn set_current_version(&mut self, version: i64) {
        self.current_version = version;
        self.hbuilder.set_version(version);
    }

    /// Failover version of the last durable write.
    pub fn last_write_version(&self) -> i64 {
        self.execution_info.last_write_version
    }

    /// Whether a failover happened since the last durable write.
    pub fn failed_over_since_last_write(&self) -> bool {
        self.current_version != self.execution_info.last_write_version
    }

    /// Current lifecycle state and status.
    pub fn workflow_state_status(&self) -> (WorkflowState, WorkflowStatus) {
        (self.execution_state.state, self.execution_state.status)
    }

    /// Move the execution to a new lifecycle state.
    pub fn update_workflow_state_status(
        &mut self,
        state: WorkflowState,
        status: WorkflowStatus,
    ) -> Result<(), HistoryError> {
        let current = self.execution_state.state;
        let closed = matches!(current, WorkflowState::Completed | WorkflowState::Terminated);
        if closed && state != current {
            return Err(HistoryError::Internal(format!(
                "invalid workflow state transition: {current:?} -> {state:?}"
            )));
        }
        self.execution_state.state = state;
        self.execution_state.status = status;
        Ok(())
    }

    /// Whether the execution can still make progress.
    pub fn is_workflow_execution_running(&self) -> bool {
        matches!(
            self.execution_state.state,
            WorkflowState::Created | WorkflowState::Running
        )
    }

    /// Whether a worker currently holds sticky affinity.
    pub fn is_sticky_task_queue_enabled(&self) -> bool {
        self.execution_info.sticky_task_queue.is_some()
    }

    /// Bind a sticky queue to the execution.
    pub fn set_sticky_task_queue(&mut self, name: impl Into<String>) {
        self.execution_info.sticky_task_queue = Some(name.into());
    }

    /// Drop any sticky binding.
    pub fn clear_stickiness(&mut self) {
        self.execution_info.sticky_task_queue = None;
    }

    /// The queue the next workflow task should go to: sticky if bound,
    /// otherwise the execution's normal queue.
    pub fn task_queue(&self) -> TaskQueue {
        match &self.execution_info.sticky_task_queue {
            Some(name) => TaskQueue {
                name: name.clone(),
                kind: TaskQueueKind::Sticky,
            },
            None => TaskQueue {
                name: self.execution_info.task_queue.clone(),
                kind: TaskQueueKind::Normal,
            },
        }
    }

    /// Whether events are buffered awaiting a batch boundary.
    pub fn has_buffered_events(&self) -> bool {
        self.hbuilder.has_buffered_events()
    }

    /// Buffer an event produced while a workflow task is in flight.
    pub fn buffer_event(&mut self, attributes: EventAttributes) {
        self.hbuilder.buffer_event(attributes);
    }

    /// Write the execution-started event and generate the first workflow
    /// task per the start attributes.
    pub fn add_workflow_execution_started_event(
        &mut self,
        first_workflow_task_backoff: Option<Duration>,
    ) -> Result<HistoryEvent, HistoryError> {
        let event = self.hbuilder.add_workflow_execution_started_event(
            self.execution_info.task_queue.clone(),
            self.execution_info.default_workflow_task_timeout,
            first_workflow_task_backoff,
        );
        self.update_workflow_state_status(WorkflowState::Created, WorkflowStatus::Running)?;
        Ok(event)
    }

    /// Look up an activity by its scheduled event id.
    pub fn activity_info(&self, scheduled_event_id: i64) -> Option<&ActivityInfoRecord> {
        self.activity_infos.get(&scheduled_event_id)
    }

    /// Insert or replace an activity row.
    pub fn put_activity_info(&mut self, info: ActivityInfoRecord) {
        self.activity_infos.insert(info.scheduled_event_id, info);
    }

    /// Version histories of this execution's branches.
    pub fn version_histories(&self) -> &VersionHistoriesRecord {
        &self.execution_info.version_histories
    }

    /// Started event id of the last completed workflow task.
    pub fn last_workflow_task_started_event_id(&self) -> i64 {
        self.execution_info.last_workflow_task_started_event_id
    }

    /// Started event id workers use as the replay boundary; tracks the
    /// last completed workflow task.
    pub fn previous_started_event_id(&self) -> i64 {
        self.execution_info.last_workflow_task_started_event_id
    }

    /// All events appended in the open transaction, in order.
    pub fn history_events(&self) -> Vec<&HistoryEvent> {
        self.hbuilder.events().collect()
    }

    /// Transfer tasks generated in the open transaction.
    pub fn pending_transfer_tasks(&self) -> &[TransferTask] {
        &self.transfer_tasks
    }

    /// Record a worker binary checksum as a reset point, bounded and
    /// deduplicated.
    pub(crate) fn add_binary_checksum(&mut self, checksum: &str) {
        if checksum.is_empty() {
            return;
        }
        let points = &mut self.execution_info.reset_point_checksums;
        if points.iter().any(|existing| existing == checksum) {
            return;
        }
        points.push(checksum.to_string());
        let max = self.config.max_reset_points.max(1);
        if points.len() > max {
            let excess = points.len() - max;
            points.drain(..excess);
        }
    }

    pub(crate) fn generate_workflow_task_dispatch(&mut self, scheduled_event_id: i64) {
        let task_queue = self.task_queue().name;
        self.transfer_tasks.push(TransferTask::DispatchWorkflowTask {
            scheduled_event_id,
            task_queue,
        });
    }

    pub(crate) fn generate_workflow_task_timeout(
        &mut self,
        scheduled_event_id: i64,
        fire_at: DateTime<Utc>,
    ) {
        self.transfer_tasks.push(TransferTask::WorkflowTaskTimeout {
            scheduled_event_id,
            fire_at,
        });
    }

    pub(crate) fn generate_delayed_dispatch(&mut self, fire_at: DateTime<Utc>) {
        self.transfer_tasks
            .push(TransferTask::DelayedDispatch { fire_at });
    }

    pub(crate) fn invalid_action(
        &self,
        action: &'static str,
        scheduled_event_id: i64,
    ) -> HistoryError {
        warn!(
            error_type = "invalid_history_action",
            action,
            scheduled_event_id,
            next_event_id = self.next_event_id(),
            workflow_id = %self.execution_info.workflow_id,
            run_id = %self.execution_state.run_id,
            "invalid workflow task state transition"
        );
        HistoryError::InvalidHistoryAction { action }
    }

    pub(crate) fn emit_workflow_task_attempt_stats(&self, attempt: i32) {
        self.metrics.workflow_task_attempt.record(attempt.max(0) as u64);
        if attempt >= self.config.workflow_task_critical_attempts
            && self.metrics.critical_attempt_warnings.allow(self.clock.now())
        {
            warn!(
                namespace_id = %self.execution_info.namespace_id,
                workflow_id = %self.execution_info.workflow_id,
                run_id = %self.execution_state.run_id,
                attempt,
                "critical attempts processing workflow task"
            );
        }
    }

    fn update_version_history(&mut self, last_event_id: i64, version: i64) {
        let histories = &mut self.execution_info.version_histories;
        let index = histories.current_index;
        let Some(history) = histories.histories.get_mut(index) else {
            return;
        };
        match history.items.last_mut() {
            Some(item) if item.version == version => item.event_id = last_event_id,
            _ => history
                .items
                .push(VersionHistoryItemRecord {
                    event_id: last_event_id,
                    version,
                }),
        }
    }

    /// Close the open transaction: drain event batches and generated
    /// tasks, stamp version bookkeeping, and return everything the shard
    /// needs for one atomic commit.
    pub fn close_transaction(&mut self) -> WorkflowMutation {
        let history_batches = self.hbuilder.drain_batches();
        if let Some(last_event) = history_batches.last().and_then(|batch| batch.last()) {
            self.update_version_history(last_event.event_id, self.current_version);
        }
        if !history_batches.is_empty() {
            self.execution_info.last_write_version = self.current_version;
        }

        let workflow_key = self.workflow_key();
        let replication_tasks = history_batches
            .iter()
            .map(|batch| {
                // Batches are never empty: drain_batches only seals
                // non-empty ones.
                let first = batch.first().map(|e| e.event_id).unwrap_or(EMPTY_EVENT_ID);
                let last = batch.last().map(|e| e.event_id).unwrap_or(EMPTY_EVENT_ID);
                ReplicationTask::HistoryReplication(HistoryReplicationTask {
                    workflow_key: workflow_key.clone(),
                    task_id: 0,
                    visibility_timestamp: self.clock.now(),
                    first_event_id: first,
                    next_event_id: last + 1,
                    version: self.current_version,
                })
            })
            .collect();

        debug!(
            workflow_id = %self.execution_info.workflow_id,
            run_id = %self.execution_state.run_id,
            batches = history_batches.len(),
            next_event_id = self.next_event_id(),
            "workflow transaction closed"
        );

        WorkflowMutation {
            record: self.to_record(),
            history_batches,
            transfer_tasks: std::mem::take(&mut self.transfer_tasks),
            replication_tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tidemark_common::clock::ManualClock;
    use uuid::Uuid;

    use super::*;

    fn state_with_config(config: HistoryConfig) -> MutableState {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let metrics = Arc::new(HistoryMetrics::new(Duration::from_secs(60)));
        MutableState::new_execution(
            Arc::new(config),
            clock,
            metrics,
            WorkflowKey::new("ns-1", "wf-1", "run-1"),
            "orders".to_string(),
            Duration::from_secs(10),
            1,
        )
    }

    fn state() -> MutableState {
        state_with_config(HistoryConfig::default())
    }

    #[test]
    fn binary_checksums_are_deduplicated_and_bounded() {
        let mut ms = state_with_config(HistoryConfig {
            max_reset_points: 2,
            ..HistoryConfig::default()
        });
        ms.add_binary_checksum("a");
        ms.add_binary_checksum("a");
        ms.add_binary_checksum("");
        assert_eq!(ms.execution_info.reset_point_checksums, vec!["a"]);

        ms.add_binary_checksum("b");
        ms.add_binary_checksum("c");
        // Oldest point dropped once the bound is exceeded.
        assert_eq!(ms.execution_info.reset_point_checksums, vec!["b", "c"]);
    }

    #[test]
    fn close_transaction_emits_one_replication_task_per_batch() {
        let mut ms = state();
        ms.add_workflow_execution_started_event(None).unwrap();
        ms.workflow_task()
            .add_workflow_task_scheduled_event(false)
            .unwrap();
        let queue = ms.task_queue();
        ms.workflow_task()
            .add_workflow_task_started_event(2, Uuid::new_v4(), &queue, "worker-1")
            .unwrap();
        ms.workflow_task()
            .add_workflow_task_completed_event(2, 3, "worker-1", "build-abc")
            .unwrap();

        let mutation = ms.close_transaction();
        assert_eq!(mutation.history_batches.len(), 2);
        assert_eq!(mutation.replication_tasks.len(), 2);

        match &mutation.replication_tasks[0] {
            ReplicationTask::HistoryReplication(task) => {
                assert_eq!(task.first_event_id, 1);
                assert_eq!(task.next_event_id, 4);
                assert_eq!(task.version, 1);
            }
            other => panic!("unexpected task: {other:?}"),
        }
        match &mutation.replication_tasks[1] {
            ReplicationTask::HistoryReplication(task) => {
                assert_eq!(task.first_event_id, 4);
                assert_eq!(task.next_event_id, 5);
            }
            other => panic!("unexpected task: {other:?}"),
        }

        assert_eq!(mutation.record.next_event_id, 5);
        assert_eq!(mutation.record.execution_info.last_write_version, 1);
        let items = &mutation.record.execution_info.version_histories.histories[0].items;
        assert_eq!(
            items,
            &vec![VersionHistoryItemRecord {
                event_id: 4,
                version: 1
            }]
        );
    }

    #[test]
    fn close_transaction_generates_dispatch_and_timeout_tasks() {
        let mut ms = state();
        ms.add_workflow_execution_started_event(None).unwrap();
        ms.workflow_task()
            .add_workflow_task_scheduled_event(false)
            .unwrap();
        let queue = ms.task_queue();
        ms.workflow_task()
            .add_workflow_task_started_event(2, Uuid::new_v4(), &queue, "worker-1")
            .unwrap();

        let mutation = ms.close_transaction();
        assert!(matches!(
            mutation.transfer_tasks[0],
            TransferTask::DispatchWorkflowTask {
                scheduled_event_id: 2,
                ..
            }
        ));
        assert!(matches!(
            mutation.transfer_tasks[1],
            TransferTask::WorkflowTaskTimeout {
                scheduled_event_id: 2,
                ..
            }
        ));
    }

    #[test]
    fn closed_execution_rejects_state_transition() {
        let mut ms = state();
        ms.update_workflow_state_status(WorkflowState::Completed, WorkflowStatus::Completed)
            .unwrap();
        let err = ms
            .update_workflow_state_status(WorkflowState::Running, WorkflowStatus::Running)
            .unwrap_err();
        assert!(matches!(err, HistoryError::Internal(_)));
        assert!(!ms.is_workflow_execution_running());
    }
}

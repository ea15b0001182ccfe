// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-transaction history event builder.
//!
//! The builder owns event id allocation for one execution. Events are
//! collected into batches; a batch boundary is forced after every
//! `WorkflowTaskStarted` so completion-side events land in their own
//! batch. Buffered events hold no id until they are flushed into the
//! current batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tidemark_common::clock::Clock;
use uuid::Uuid;

use super::event::{
    EventAttributes, HistoryEvent, TimeoutKind, WorkflowExecutionStartedAttributes,
    WorkflowTaskCompletedAttributes, WorkflowTaskFailedAttributes, WorkflowTaskFailedCause,
    WorkflowTaskScheduledAttributes, WorkflowTaskStartedAttributes,
    WorkflowTaskTimedOutAttributes,
};
use crate::workflow::TaskQueue;

/// Builds the history of one execution, one transaction at a time.
#[derive(Debug)]
pub struct HistoryBuilder {
    clock: Arc<dyn Clock>,
    next_event_id: i64,
    version: i64,
    current_batch: Vec<HistoryEvent>,
    finished_batches: Vec<Vec<HistoryEvent>>,
    buffered: Vec<(DateTime<Utc>, EventAttributes)>,
}

impl HistoryBuilder {
    /// Create a builder that will assign ids starting at `next_event_id`
    /// and stamp events with `version`.
    pub fn new(clock: Arc<dyn Clock>, next_event_id: i64, version: i64) -> Self {
        Self {
            clock,
            next_event_id,
            version,
            current_batch: Vec::new(),
            finished_batches: Vec::new(),
            buffered: Vec::new(),
        }
    }

    /// The id the next appended event will receive.
    pub fn next_event_id(&self) -> i64 {
        self.next_event_id
    }

    /// Stamp subsequent events with `version`.
    pub fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn append(&mut self, event_time: DateTime<Utc>, attributes: EventAttributes) -> HistoryEvent {
        let event = HistoryEvent {
            event_id: self.next_event_id,
            event_time,
            version: self.version,
            attributes,
        };
        self.next_event_id += 1;
        self.current_batch.push(event.clone());
        event
    }

    /// Append the execution-started event.
    pub fn add_workflow_execution_started_event(
        &mut self,
        task_queue: String,
        default_workflow_task_timeout: Duration,
        first_workflow_task_backoff: Option<Duration>,
    ) -> HistoryEvent {
        let now = self.clock.now();
        self.append(
            now,
            EventAttributes::WorkflowExecutionStarted(WorkflowExecutionStartedAttributes {
                task_queue,
                default_workflow_task_timeout,
                first_workflow_task_backoff,
            }),
        )
    }

    /// Append a `WorkflowTaskScheduled` event.
    pub fn add_workflow_task_scheduled_event(
        &mut self,
        task_queue: TaskQueue,
        start_to_close_timeout: Duration,
        attempt: i32,
        scheduled_time: DateTime<Utc>,
    ) -> HistoryEvent {
        self.append(
            scheduled_time,
            EventAttributes::WorkflowTaskScheduled(WorkflowTaskScheduledAttributes {
                task_queue,
                start_to_close_timeout,
                attempt,
            }),
        )
    }

    /// Append a `WorkflowTaskStarted` event.
    pub fn add_workflow_task_started_event(
        &mut self,
        scheduled_event_id: i64,
        request_id: Uuid,
        identity: &str,
        started_time: DateTime<Utc>,
    ) -> HistoryEvent {
        self.append(
            started_time,
            EventAttributes::WorkflowTaskStarted(WorkflowTaskStartedAttributes {
                scheduled_event_id,
                identity: identity.to_string(),
                request_id,
            }),
        )
    }

    /// Append a `WorkflowTaskCompleted` event.
    pub fn add_workflow_task_completed_event(
        &mut self,
        scheduled_event_id: i64,
        started_event_id: i64,
        identity: &str,
        binary_checksum: &str,
    ) -> HistoryEvent {
        let now = self.clock.now();
        self.append(
            now,
            EventAttributes::WorkflowTaskCompleted(WorkflowTaskCompletedAttributes {
                scheduled_event_id,
                started_event_id,
                identity: identity.to_string(),
                binary_checksum: binary_checksum.to_string(),
            }),
        )
    }

    /// Append a `WorkflowTaskFailed` event.
    #[allow(clippy::too_many_arguments)]
    pub fn add_workflow_task_failed_event(
        &mut self,
        scheduled_event_id: i64,
        started_event_id: i64,
        cause: WorkflowTaskFailedCause,
        failure: Option<String>,
        identity: &str,
        binary_checksum: &str,
        base_run_id: &str,
        new_run_id: &str,
        fork_event_version: i64,
    ) -> HistoryEvent {
        let now = self.clock.now();
        self.append(
            now,
            EventAttributes::WorkflowTaskFailed(WorkflowTaskFailedAttributes {
                scheduled_event_id,
                started_event_id,
                cause,
                failure,
                identity: identity.to_string(),
                binary_checksum: binary_checksum.to_string(),
                base_run_id: base_run_id.to_string(),
                new_run_id: new_run_id.to_string(),
                fork_event_version,
            }),
        )
    }

    /// Append a `WorkflowTaskTimedOut` event.
    pub fn add_workflow_task_timed_out_event(
        &mut self,
        scheduled_event_id: i64,
        started_event_id: i64,
        timeout_kind: TimeoutKind,
    ) -> HistoryEvent {
        let now = self.clock.now();
        self.append(
            now,
            EventAttributes::WorkflowTaskTimedOut(WorkflowTaskTimedOutAttributes {
                scheduled_event_id,
                started_event_id,
                timeout_kind,
            }),
        )
    }

    /// Hold an event aside without assigning it an id.
    pub fn buffer_event(&mut self, attributes: EventAttributes) {
        self.buffered.push((self.clock.now(), attributes));
    }

    /// Whether any events are buffered.
    pub fn has_buffered_events(&self) -> bool {
        !self.buffered.is_empty()
    }

    /// Assign ids to all buffered events and move them into the current
    /// batch, in buffer order.
    pub fn flush_buffer_to_current_batch(&mut self) {
        let buffered = std::mem::take(&mut self.buffered);
        for (event_time, attributes) in buffered {
            self.append(event_time, attributes);
        }
    }

    /// Seal the current batch and start a new one.
    pub fn flush_and_create_new_batch(&mut self) {
        if !self.current_batch.is_empty() {
            self.finished_batches
                .push(std::mem::take(&mut self.current_batch));
        }
    }

    /// Seal and take all batches accumulated in this transaction.
    pub fn drain_batches(&mut self) -> Vec<Vec<HistoryEvent>> {
        self.flush_and_create_new_batch();
        std::mem::take(&mut self.finished_batches)
    }

    /// All events appended so far, in order. Buffered events are excluded.
    pub fn events(&self) -> impl Iterator<Item = &HistoryEvent> {
        self.finished_batches
            .iter()
            .flatten()
            .chain(self.current_batch.iter())
    }
}

#[cfg(test)]
mod tests {
    use tidemark_common::clock::SystemClock;

    use super::*;
    use crate::workflow::TaskQueueKind;

    fn builder() -> HistoryBuilder {
        HistoryBuilder::new(Arc::new(SystemClock), 1, 1)
    }

    fn queue() -> TaskQueue {
        TaskQueue {
            name: "queue".to_string(),
            kind: TaskQueueKind::Normal,
        }
    }

    #[test]
    fn event_ids_are_strictly_increasing() {
        let mut builder = builder();
        let started = builder.add_workflow_execution_started_event(
            "queue".to_string(),
            Duration::from_secs(10),
            None,
        );
        let scheduled = builder.add_workflow_task_scheduled_event(
            queue(),
            Duration::from_secs(10),
            1,
            Utc::now(),
        );
        assert_eq!(started.event_id, 1);
        assert_eq!(scheduled.event_id, 2);
        assert_eq!(builder.next_event_id(), 3);
    }

    #[test]
    fn buffered_events_get_ids_at_flush() {
        let mut builder = builder();
        builder.buffer_event(EventAttributes::WorkflowExecutionStarted(
            WorkflowExecutionStartedAttributes {
                task_queue: "queue".to_string(),
                default_workflow_task_timeout: Duration::from_secs(10),
                first_workflow_task_backoff: None,
            },
        ));
        assert!(builder.has_buffered_events());
        assert_eq!(builder.next_event_id(), 1);

        builder.flush_buffer_to_current_batch();
        assert!(!builder.has_buffered_events());
        assert_eq!(builder.next_event_id(), 2);
        assert_eq!(builder.events().count(), 1);
    }

    #[test]
    fn batches_split_at_flush_boundaries() {
        let mut builder = builder();
        builder.add_workflow_execution_started_event(
            "queue".to_string(),
            Duration::from_secs(10),
            None,
        );
        builder.flush_and_create_new_batch();
        builder.add_workflow_task_scheduled_event(queue(), Duration::from_secs(10), 1, Utc::now());

        let batches = builder.drain_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].event_id, 1);
        assert_eq!(batches[1][0].event_id, 2);
    }

    #[test]
    fn drain_resets_but_keeps_allocating_forward() {
        let mut builder = builder();
        builder.add_workflow_execution_started_event(
            "queue".to_string(),
            Duration::from_secs(10),
            None,
        );
        let first = builder.drain_batches();
        assert_eq!(first.len(), 1);
        assert!(builder.drain_batches().is_empty());

        let scheduled = builder.add_workflow_task_scheduled_event(
            queue(),
            Duration::from_secs(10),
            1,
            Utc::now(),
        );
        assert_eq!(scheduled.event_id, 2);
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The workflow task state machine.
//!
//! All transitions of the current workflow task happen here: schedule,
//! start, complete, fail, time out, plus the `replicate_*` entry points a
//! standby cluster drives from the replicated event stream.
//!
//! The machine distinguishes three kinds of pending task. A `Normal`
//! task has its `Scheduled` event written when scheduled. `Transient`
//! (attempt above the retry threshold) and `Speculative` tasks reserve an
//! event id without writing anything; their `Scheduled`/`Started` events
//! are only materialised retroactively when the attempt completes, so a
//! failing workflow does not grow its history on every retry.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use tidemark_common::backoff::ExponentialRetryPolicy;
use tidemark_common::clock::Clock;
use tidemark_persistence::{WorkflowState, WorkflowStatus};

use super::mutable_state::MutableState;
use super::{
    TaskQueue, WorkflowTaskInfo, WorkflowTaskKind, WORKFLOW_TASK_RETRY_BACKOFF_MIN_ATTEMPTS,
    WORKFLOW_TASK_RETRY_INITIAL_INTERVAL,
};
use crate::error::HistoryError;
use crate::history::{
    EventAttributes, HistoryEvent, TimeoutKind, WorkflowTaskFailedCause,
    WorkflowTaskScheduledAttributes, WorkflowTaskStartedAttributes,
};
use crate::{EMPTY_EVENT_ID, EMPTY_VERSION};

fn deadline(at: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    at + chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::zero())
}

impl MutableState {
    /// Whether the pending workflow task is transient, i.e. its attempt
    /// count is above the retry threshold.
    pub fn is_transient_workflow_task(&self) -> bool {
        self.execution_info.workflow_task_attempt > WORKFLOW_TASK_RETRY_BACKOFF_MIN_ATTEMPTS
    }

    /// Kind of the pending workflow task.
    pub fn pending_workflow_task_kind(&self) -> WorkflowTaskKind {
        self.pending_task_kind
    }

    /// The state machine over this execution's current workflow task.
    pub fn workflow_task(&mut self) -> WorkflowTaskStateMachine<'_> {
        WorkflowTaskStateMachine { ms: self }
    }
}

/// Mutator of the current workflow task. Obtained from
/// [`MutableState::workflow_task`]; the borrow keeps it single-writer.
#[derive(Debug)]
pub struct WorkflowTaskStateMachine<'a> {
    ms: &'a mut MutableState,
}

impl WorkflowTaskStateMachine<'_> {
    // ------------------------------------------------------------------
    // Schedule
    // ------------------------------------------------------------------

    /// Schedule a workflow task, stamping a fresh original-schedule time.
    pub fn add_workflow_task_scheduled_event(
        &mut self,
        bypass_task_generation: bool,
    ) -> Result<WorkflowTaskInfo, HistoryError> {
        let now = self.ms.clock.now();
        self.schedule(bypass_task_generation, Some(now), false)
    }

    /// Schedule a workflow task during workflow task heartbeat, keeping
    /// the heartbeat chain's original schedule instant.
    pub fn add_workflow_task_scheduled_event_as_heartbeat(
        &mut self,
        bypass_task_generation: bool,
        original_scheduled_time: Option<DateTime<Utc>>,
    ) -> Result<WorkflowTaskInfo, HistoryError> {
        self.schedule(bypass_task_generation, original_scheduled_time, false)
    }

    /// Schedule a speculative workflow task: nothing is written to
    /// history unless the task is later converted or completes.
    pub fn add_speculative_workflow_task_scheduled_event(
        &mut self,
        bypass_task_generation: bool,
    ) -> Result<WorkflowTaskInfo, HistoryError> {
        let now = self.ms.clock.now();
        self.schedule(bypass_task_generation, Some(now), true)
    }

    fn schedule(
        &mut self,
        bypass_task_generation: bool,
        original_scheduled_time: Option<DateTime<Utc>>,
        speculative: bool,
    ) -> Result<WorkflowTaskInfo, HistoryError> {
        const ACTION: &str = "add-workflowtask-scheduled-event";
        if self.has_pending_workflow_task() {
            let pending = self.ms.execution_info.workflow_task_scheduled_event_id;
            return Err(self.ms.invalid_action(ACTION, pending));
        }

        // A durable WorkflowTaskScheduled event is written unless the
        // task defers its events (transient or speculative).
        let mut create_scheduled_event = !self.ms.is_transient_workflow_task() && !speculative;

        // New events mean state has advanced: a deferred task can no
        // longer reserve the next event id, so reset the attempt and
        // write events normally.
        if self.ms.has_buffered_events() {
            self.ms.execution_info.workflow_task_attempt = 1;
            create_scheduled_event = true;
            self.ms.hbuilder.flush_buffer_to_current_batch();
        }

        // A failover mid-transient invalidates the deferral as well.
        if !create_scheduled_event && self.ms.failed_over_since_last_write() {
            self.ms.execution_info.workflow_task_attempt = 1;
            create_scheduled_event = true;
        }

        let scheduled_time = self.ms.clock.now();
        let attempt = self.ms.execution_info.workflow_task_attempt;
        let task_queue = self.ms.task_queue();
        let start_to_close_timeout = self.start_to_close_timeout(
            self.ms.execution_info.default_workflow_task_timeout,
            attempt,
        );

        let scheduled_event_id = if create_scheduled_event {
            self.ms
                .hbuilder
                .add_workflow_task_scheduled_event(
                    task_queue.clone(),
                    start_to_close_timeout,
                    attempt,
                    scheduled_time,
                )
                .event_id
        } else {
            // Reserve the id without writing; the event is materialised
            // later if this attempt completes.
            self.ms.next_event_id()
        };

        let version = self.ms.current_version();
        let task = self.replicate_workflow_task_scheduled_event(
            version,
            scheduled_event_id,
            task_queue,
            start_to_close_timeout,
            attempt,
            Some(scheduled_time),
            original_scheduled_time,
        )?;

        self.ms.pending_task_kind = if create_scheduled_event {
            WorkflowTaskKind::Normal
        } else if self.ms.is_transient_workflow_task() {
            WorkflowTaskKind::Transient
        } else {
            WorkflowTaskKind::Speculative
        };

        if !bypass_task_generation {
            self.ms.generate_workflow_task_dispatch(scheduled_event_id);
        }

        Ok(task)
    }

    /// Schedule the first workflow task after execution start, honoring a
    /// first-task backoff from the start event.
    pub fn add_first_workflow_task_scheduled(
        &mut self,
        start_event: &HistoryEvent,
    ) -> Result<(), HistoryError> {
        let backoff = match &start_event.attributes {
            EventAttributes::WorkflowExecutionStarted(attrs) => attrs.first_workflow_task_backoff,
            _ => {
                return Err(HistoryError::Internal(
                    "expected a workflow execution started event".to_string(),
                ))
            }
        };

        match backoff {
            Some(delay) if !delay.is_zero() => {
                self.ms
                    .generate_delayed_dispatch(deadline(start_event.event_time, delay));
                Ok(())
            }
            _ => self.add_workflow_task_scheduled_event(false).map(|_| ()),
        }
    }

    // ------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------

    /// Hand the pending workflow task to a worker.
    pub fn add_workflow_task_started_event(
        &mut self,
        scheduled_event_id: i64,
        request_id: Uuid,
        task_queue: &TaskQueue,
        identity: &str,
    ) -> Result<(Option<HistoryEvent>, WorkflowTaskInfo), HistoryError> {
        const ACTION: &str = "add-workflowtask-started-event";
        let Some(mut task) = self.get_workflow_task_info(scheduled_event_id) else {
            return Err(self.ms.invalid_action(ACTION, scheduled_event_id));
        };
        if task.started_event_id != EMPTY_EVENT_ID {
            return Err(self.ms.invalid_action(ACTION, scheduled_event_id));
        }

        let mut scheduled_event_id = task.scheduled_event_id;
        let mut started_event_id = scheduled_event_id + 1;
        let start_time = self.ms.clock.now();
        let mut scheduled_event_created = !self.ms.pending_task_kind.defers_events();

        // If events arrived since a deferred task reserved its id, or a
        // failover happened in between, the deferral is void: promote to
        // a normal task and write the Scheduled event now.
        if !scheduled_event_created
            && (task.scheduled_event_id != self.ms.next_event_id()
                || task.version != self.ms.current_version())
        {
            task.attempt = 1;
            scheduled_event_created = true;
            self.ms.pending_task_kind = WorkflowTaskKind::Normal;
            let scheduled_event = self.ms.hbuilder.add_workflow_task_scheduled_event(
                task_queue.clone(),
                task.start_to_close_timeout,
                task.attempt,
                start_time,
            );
            scheduled_event_id = scheduled_event.event_id;
        }

        // Started is only written when Scheduled was (or just got) written.
        let mut started_event = None;
        if scheduled_event_created {
            let event = self.ms.hbuilder.add_workflow_task_started_event(
                scheduled_event_id,
                request_id,
                identity,
                start_time,
            );
            // Events after Started belong to the completion batch.
            self.ms.hbuilder.flush_and_create_new_batch();
            started_event_id = event.event_id;
            started_event = Some(event);
        }

        let version = self.ms.current_version();
        let task = self.replicate_workflow_task_started_event(
            Some(task),
            version,
            scheduled_event_id,
            started_event_id,
            request_id,
            start_time,
        )?;

        self.ms.emit_workflow_task_attempt_stats(task.attempt);
        self.ms.generate_workflow_task_timeout(
            scheduled_event_id,
            deadline(start_time, task.start_to_close_timeout),
        );

        Ok((started_event, task))
    }

    // ------------------------------------------------------------------
    // Complete
    // ------------------------------------------------------------------

    /// Complete the in-flight workflow task. For a deferred task the
    /// `Scheduled` and `Started` events are written retroactively, with
    /// the recorded times, in the same transaction as `Completed`.
    pub fn add_workflow_task_completed_event(
        &mut self,
        scheduled_event_id: i64,
        started_event_id: i64,
        identity: &str,
        binary_checksum: &str,
    ) -> Result<HistoryEvent, HistoryError> {
        const ACTION: &str = "add-workflowtask-completed-event";
        let Some(task) = self.get_workflow_task_info(scheduled_event_id) else {
            return Err(self.ms.invalid_action(ACTION, scheduled_event_id));
        };
        if task.started_event_id != started_event_id {
            return Err(self.ms.invalid_action(ACTION, scheduled_event_id));
        }

        // Capture before delete: delete resets the pending-task kind.
        let events_created = !self.ms.pending_task_kind.defers_events();
        self.delete_workflow_task();

        let mut started_event_id = started_event_id;
        if !events_created {
            let scheduled_time = task.scheduled_time.unwrap_or_else(|| self.ms.clock.now());
            let started_time = task.started_time.unwrap_or_else(|| self.ms.clock.now());
            let task_queue = self.ms.task_queue();
            let scheduled_event = self.ms.hbuilder.add_workflow_task_scheduled_event(
                task_queue,
                task.start_to_close_timeout,
                task.attempt,
                scheduled_time,
            );
            let started = self.ms.hbuilder.add_workflow_task_started_event(
                scheduled_event.event_id,
                task.request_id,
                identity,
                started_time,
            );
            self.ms.hbuilder.flush_and_create_new_batch();
            started_event_id = started.event_id;
        }

        let event = self.ms.hbuilder.add_workflow_task_completed_event(
            scheduled_event_id,
            started_event_id,
            identity,
            binary_checksum,
        );
        self.after_workflow_task_completed(&event);
        Ok(event)
    }

    // ------------------------------------------------------------------
    // Fail / time out
    // ------------------------------------------------------------------

    /// Fail the in-flight workflow task.
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
    ) -> Result<Option<HistoryEvent>, HistoryError> {
        const ACTION: &str = "add-workflowtask-failed-event";
        let Some(task) = self.get_workflow_task_info(scheduled_event_id) else {
            return Err(self.ms.invalid_action(ACTION, scheduled_event_id));
        };
        if task.started_event_id != started_event_id {
            return Err(self.ms.invalid_action(ACTION, scheduled_event_id));
        }

        // A deferred task leaves no trace of the failed attempt.
        let mut event = None;
        if !self.ms.pending_task_kind.defers_events() {
            event = Some(self.ms.hbuilder.add_workflow_task_failed_event(
                scheduled_event_id,
                started_event_id,
                cause,
                failure,
                identity,
                binary_checksum,
                base_run_id,
                new_run_id,
                fork_event_version,
            ));
        }

        self.replicate_workflow_task_failed_event()?;

        // Resets discard retry accounting entirely.
        if matches!(
            cause,
            WorkflowTaskFailedCause::ResetWorkflow | WorkflowTaskFailedCause::FailoverCloseCommand
        ) {
            self.ms.execution_info.workflow_task_attempt = 1;
        }
        Ok(event)
    }

    /// Time out the in-flight workflow task (start-to-close).
    pub fn add_workflow_task_timed_out_event(
        &mut self,
        scheduled_event_id: i64,
        started_event_id: i64,
    ) -> Result<Option<HistoryEvent>, HistoryError> {
        const ACTION: &str = "add-workflowtask-timedout-event";
        let Some(task) = self.get_workflow_task_info(scheduled_event_id) else {
            return Err(self.ms.invalid_action(ACTION, scheduled_event_id));
        };
        if task.started_event_id != started_event_id {
            return Err(self.ms.invalid_action(ACTION, scheduled_event_id));
        }

        let mut event = None;
        if !self.ms.pending_task_kind.defers_events() {
            event = Some(self.ms.hbuilder.add_workflow_task_timed_out_event(
                scheduled_event_id,
                started_event_id,
                TimeoutKind::StartToClose,
            ));
        }

        self.replicate_workflow_task_timed_out_event(TimeoutKind::StartToClose)?;
        Ok(event)
    }

    /// Time out a scheduled-but-unstarted workflow task because no
    /// poller picked it up from its sticky queue.
    pub fn add_workflow_task_schedule_to_start_timeout_event(
        &mut self,
        scheduled_event_id: i64,
    ) -> Result<HistoryEvent, HistoryError> {
        const ACTION: &str = "add-workflowtask-schedule-to-start-timeout-event";
        if self.ms.execution_info.workflow_task_scheduled_event_id != scheduled_event_id
            || self.ms.execution_info.workflow_task_started_event_id > 0
        {
            return Err(self.ms.invalid_action(ACTION, scheduled_event_id));
        }

        self.ms.clear_stickiness();

        let event = self.ms.hbuilder.add_workflow_task_timed_out_event(
            scheduled_event_id,
            EMPTY_EVENT_ID,
            TimeoutKind::ScheduleToStart,
        );
        self.replicate_workflow_task_timed_out_event(TimeoutKind::ScheduleToStart)?;
        Ok(event)
    }

    /// Reset the pending task after a failure. Clears stickiness; the
    /// attempt is only incremented when the failure happened on the
    /// normal queue (a sticky failure retries non-sticky first).
    pub fn fail_workflow_task(&mut self, increment_attempt: bool) {
        let increment_attempt = increment_attempt && !self.ms.is_sticky_task_queue_enabled();
        self.ms.clear_stickiness();

        let mut failed = WorkflowTaskInfo {
            version: EMPTY_VERSION,
            scheduled_event_id: EMPTY_EVENT_ID,
            started_event_id: EMPTY_EVENT_ID,
            request_id: Uuid::nil(),
            start_to_close_timeout: Duration::ZERO,
            attempt: 1,
            scheduled_time: None,
            started_time: None,
            original_scheduled_time: None,
            task_queue: None,
        };
        if increment_attempt {
            failed.attempt = self.ms.execution_info.workflow_task_attempt + 1;
            failed.scheduled_time = Some(self.ms.clock.now());
        }
        self.update_workflow_task(&failed);
        self.ms.pending_task_kind = WorkflowTaskKind::Normal;
    }

    /// Clear the pending task on completion. The original schedule time
    /// survives so a heartbeat re-schedule continues the original instant.
    pub fn delete_workflow_task(&mut self) {
        let reset = WorkflowTaskInfo {
            version: EMPTY_VERSION,
            scheduled_event_id: EMPTY_EVENT_ID,
            started_event_id: EMPTY_EVENT_ID,
            request_id: Uuid::nil(),
            start_to_close_timeout: Duration::ZERO,
            attempt: 1,
            scheduled_time: None,
            started_time: None,
            original_scheduled_time: self
                .ms
                .execution_info
                .workflow_task_original_scheduled_time,
            task_queue: None,
        };
        self.update_workflow_task(&reset);
        self.ms.pending_task_kind = WorkflowTaskKind::Normal;
    }

    // ------------------------------------------------------------------
    // Standby (replication) entry points
    // ------------------------------------------------------------------

    /// Apply a replicated `WorkflowTaskScheduled` event.
    #[allow(clippy::too_many_arguments)]
    pub fn replicate_workflow_task_scheduled_event(
        &mut self,
        version: i64,
        scheduled_event_id: i64,
        task_queue: TaskQueue,
        start_to_close_timeout: Duration,
        attempt: i32,
        scheduled_time: Option<DateTime<Utc>>,
        original_scheduled_time: Option<DateTime<Utc>>,
    ) -> Result<WorkflowTaskInfo, HistoryError> {
        // A scheduled workflow task moves the workflow to running, except
        // for zombie runs which must stay inert.
        let (state, _) = self.ms.workflow_state_status();
        if state != WorkflowState::Zombie {
            self.ms
                .update_workflow_state_status(WorkflowState::Running, WorkflowStatus::Running)?;
        }

        let task = WorkflowTaskInfo {
            version,
            scheduled_event_id,
            started_event_id: EMPTY_EVENT_ID,
            request_id: Uuid::nil(),
            start_to_close_timeout,
            attempt,
            scheduled_time,
            started_time: None,
            original_scheduled_time,
            task_queue: Some(task_queue),
        };
        self.update_workflow_task(&task);
        self.ms.pending_task_kind = WorkflowTaskKind::Normal;
        Ok(task)
    }

    /// Synthesize a transient workflow task on the standby side after a
    /// replicated fail/timeout bumped the attempt count.
    ///
    /// The reserved id is a placeholder taken from the next event id and
    /// is never emitted to history: either a later replicated
    /// `Scheduled`/`Started` event overwrites it, or the started-event
    /// path corrects it and converts the task to normal.
    pub fn replicate_transient_workflow_task_scheduled(
        &mut self,
    ) -> Result<Option<WorkflowTaskInfo>, HistoryError> {
        if self.has_pending_workflow_task() || !self.ms.is_transient_workflow_task() {
            return Ok(None);
        }

        let task = WorkflowTaskInfo {
            version: self.ms.current_version(),
            scheduled_event_id: self.ms.next_event_id(),
            started_event_id: EMPTY_EVENT_ID,
            request_id: Uuid::nil(),
            start_to_close_timeout: self.ms.execution_info.default_workflow_task_timeout,
            attempt: self.ms.execution_info.workflow_task_attempt,
            scheduled_time: Some(self.ms.clock.now()),
            started_time: None,
            original_scheduled_time: None,
            // Fail/timeout cleared stickiness, so this is always the
            // normal queue.
            task_queue: Some(self.ms.task_queue()),
        };
        self.update_workflow_task(&task);
        self.ms.pending_task_kind = WorkflowTaskKind::Transient;
        Ok(Some(task))
    }

    /// Apply a replicated `WorkflowTaskStarted` event.
    ///
    /// With `task == None` (standby replay) the task is looked up by its
    /// scheduled event id; a task this side considered transient is
    /// forcibly reset to attempt 1 so timeouts treat it as normal.
    pub fn replicate_workflow_task_started_event(
        &mut self,
        task: Option<WorkflowTaskInfo>,
        version: i64,
        scheduled_event_id: i64,
        started_event_id: i64,
        request_id: Uuid,
        started_time: DateTime<Utc>,
    ) -> Result<WorkflowTaskInfo, HistoryError> {
        let task = match task {
            Some(task) => task,
            None => {
                let Some(mut task) = self.get_workflow_task_info(scheduled_event_id) else {
                    return Err(HistoryError::Internal(format!(
                        "unable to find workflow task: {scheduled_event_id}"
                    )));
                };
                // The active side replicates Scheduled/Started and the
                // completion batch separately; if only the first batch
                // arrived, the local attempt count may still claim the
                // task is transient. Reset so it times out or completes
                // as a normal task.
                task.attempt = 1;
                self.ms.pending_task_kind = WorkflowTaskKind::Normal;
                task
            }
        };

        let task = WorkflowTaskInfo {
            version,
            scheduled_event_id,
            started_event_id,
            request_id,
            start_to_close_timeout: task.start_to_close_timeout,
            attempt: task.attempt,
            scheduled_time: task.scheduled_time,
            started_time: Some(started_time),
            original_scheduled_time: task.original_scheduled_time,
            task_queue: task.task_queue,
        };
        self.update_workflow_task(&task);
        Ok(task)
    }

    /// Apply a replicated `WorkflowTaskCompleted` event.
    pub fn replicate_workflow_task_completed_event(
        &mut self,
        event: &HistoryEvent,
    ) -> Result<(), HistoryError> {
        self.delete_workflow_task();
        self.after_workflow_task_completed(event);
        Ok(())
    }

    /// Apply a replicated `WorkflowTaskFailed` event.
    pub fn replicate_workflow_task_failed_event(&mut self) -> Result<(), HistoryError> {
        self.fail_workflow_task(true);
        Ok(())
    }

    /// Apply a replicated `WorkflowTaskTimedOut` event.
    pub fn replicate_workflow_task_timed_out_event(
        &mut self,
        timeout_kind: TimeoutKind,
    ) -> Result<(), HistoryError> {
        // A sticky schedule-to-start timeout does not count as an
        // attempt; clearing stickiness alone may unblock the task.
        let increment_attempt = timeout_kind != TimeoutKind::ScheduleToStart;
        self.fail_workflow_task(increment_attempt);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Whether a workflow task is pending (scheduled or in flight).
    pub fn has_pending_workflow_task(&self) -> bool {
        self.ms.execution_info.workflow_task_scheduled_event_id != EMPTY_EVENT_ID
    }

    /// The pending workflow task, if any.
    pub fn get_pending_workflow_task(&self) -> Option<WorkflowTaskInfo> {
        if !self.has_pending_workflow_task() {
            return None;
        }
        Some(self.current_workflow_task_info())
    }

    /// Whether a workflow task is in flight (scheduled and started).
    pub fn has_in_flight_workflow_task(&self) -> bool {
        self.has_pending_workflow_task()
            && self.ms.execution_info.workflow_task_started_event_id != EMPTY_EVENT_ID
    }

    /// The in-flight workflow task, if any.
    pub fn get_in_flight_workflow_task(&self) -> Option<WorkflowTaskInfo> {
        if !self.has_in_flight_workflow_task() {
            return None;
        }
        Some(self.current_workflow_task_info())
    }

    /// Whether the execution has ever processed a workflow task or has
    /// one pending.
    pub fn has_processed_or_pending_workflow_task(&self) -> bool {
        self.has_pending_workflow_task()
            || self.ms.execution_info.last_workflow_task_started_event_id != EMPTY_EVENT_ID
    }

    /// The pending workflow task if its scheduled event id matches.
    pub fn get_workflow_task_info(&self, scheduled_event_id: i64) -> Option<WorkflowTaskInfo> {
        let task = self.current_workflow_task_info();
        if task.scheduled_event_id == EMPTY_EVENT_ID
            || task.scheduled_event_id != scheduled_event_id
        {
            return None;
        }
        Some(task)
    }

    /// The not-yet-written `Scheduled`/`Started` events of an in-flight
    /// deferred task, so pollers can be shown a linear history. Never
    /// appended to the durable branch.
    pub fn transient_task_history_suffix(&self, identity: &str) -> Option<Vec<HistoryEvent>> {
        if !self.ms.pending_task_kind.defers_events() {
            return None;
        }
        let task = self.current_workflow_task_info();
        if task.scheduled_event_id == EMPTY_EVENT_ID || task.started_event_id == EMPTY_EVENT_ID {
            return None;
        }

        let version = self.ms.current_version();
        let scheduled = HistoryEvent {
            event_id: task.scheduled_event_id,
            event_time: task.scheduled_time.unwrap_or_else(|| self.ms.clock.now()),
            version,
            attributes: EventAttributes::WorkflowTaskScheduled(WorkflowTaskScheduledAttributes {
                task_queue: self.ms.task_queue(),
                start_to_close_timeout: task.start_to_close_timeout,
                attempt: task.attempt,
            }),
        };
        let started = HistoryEvent {
            event_id: task.started_event_id,
            event_time: task.started_time.unwrap_or_else(|| self.ms.clock.now()),
            version,
            attributes: EventAttributes::WorkflowTaskStarted(WorkflowTaskStartedAttributes {
                scheduled_event_id: task.scheduled_event_id,
                identity: identity.to_string(),
                request_id: task.request_id,
            }),
        };
        Some(vec![scheduled, started])
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn current_workflow_task_info(&self) -> WorkflowTaskInfo {
        let info = &self.ms.execution_info;
        WorkflowTaskInfo {
            version: info.workflow_task_version,
            scheduled_event_id: info.workflow_task_scheduled_event_id,
            started_event_id: info.workflow_task_started_event_id,
            request_id: info.workflow_task_request_id,
            start_to_close_timeout: info.workflow_task_timeout,
            attempt: info.workflow_task_attempt,
            scheduled_time: info.workflow_task_scheduled_time,
            started_time: info.workflow_task_started_time,
            original_scheduled_time: info.workflow_task_original_scheduled_time,
            task_queue: Some(self.ms.task_queue()),
        }
    }

    fn update_workflow_task(&mut self, task: &WorkflowTaskInfo) {
        let info = &mut self.ms.execution_info;
        info.workflow_task_version = task.version;
        info.workflow_task_scheduled_event_id = task.scheduled_event_id;
        info.workflow_task_started_event_id = task.started_event_id;
        info.workflow_task_request_id = task.request_id;
        info.workflow_task_timeout = task.start_to_close_timeout;
        info.workflow_task_attempt = task.attempt;
        info.workflow_task_scheduled_time = task.scheduled_time;
        info.workflow_task_started_time = task.started_time;
        info.workflow_task_original_scheduled_time = task.original_scheduled_time;
        // The task queue binding stays as-is; stickiness is managed
        // separately.

        debug!(
            scheduled_event_id = task.scheduled_event_id,
            started_event_id = task.started_event_id,
            request_id = %task.request_id,
            attempt = task.attempt,
            "workflow task updated"
        );
    }

    fn after_workflow_task_completed(&mut self, event: &HistoryEvent) {
        if let EventAttributes::WorkflowTaskCompleted(attrs) = &event.attributes {
            self.ms.execution_info.last_workflow_task_started_event_id = attrs.started_event_id;
            let checksum = attrs.binary_checksum.clone();
            self.ms.add_binary_checksum(&checksum);
        }
    }

    /// Start-to-close budget for an attempt. Transient attempts get the
    /// default plus an exponential backoff with a 5s initial interval,
    /// capped at the configured maximum, with no expiration.
    fn start_to_close_timeout(&self, default_timeout: Duration, attempt: i32) -> Duration {
        if attempt <= WORKFLOW_TASK_RETRY_BACKOFF_MIN_ATTEMPTS {
            return default_timeout;
        }
        let policy = ExponentialRetryPolicy::new(WORKFLOW_TASK_RETRY_INITIAL_INTERVAL)
            .with_maximum_interval(self.ms.config.workflow_task_retry_max_interval)
            .without_expiration();
        default_timeout + policy.delay_for((attempt - WORKFLOW_TASK_RETRY_BACKOFF_MIN_ATTEMPTS) as u32)
    }
}

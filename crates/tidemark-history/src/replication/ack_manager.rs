// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-shard outbound replication stream.
//!
//! The ack manager reads replication tasks from the shard queue,
//! hydrates them against live mutable state, filters them by the polling
//! cluster's namespace eligibility, and returns ordered batches together
//! with the ack watermark the poller should advance to.
//!
//! Error policy per batch: a failure before anything was hydrated
//! propagates (the poller retries); a failure later returns the prefix
//! already hydrated with a truthful `last_retrieved_message_id`; a
//! missing workflow or activity is simply skipped, which acks the task.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use tidemark_common::clock::Clock;
use tidemark_persistence::{
    GetHistoryTasksRequest, HistoryReplicationTask, ReadRawHistoryBranchRequest, ReplicationTask,
    StoreError, SyncActivityTask, TaskCategory, TaskKey,
};

use super::messages::{
    HistoryBatchAttributes, ReplicationMessage, ReplicationMessageAttributes, ReplicationMessages,
    SyncActivityAttributes,
};
use crate::error::HistoryError;
use crate::namespace::RegistryError;
use crate::shard::ShardContext;
use crate::workflow::cache::{CallerType, WorkflowCache};

#[derive(Debug, Default)]
struct AckState {
    /// Highest task id observed via notifications. `None` until the
    /// first notification after shard load.
    max_task_id: Option<i64>,
    /// Highest visibility timestamp observed via notifications,
    /// independent of which task carried it.
    max_visibility_time: Option<DateTime<Utc>>,
    /// Until when the cached `max_task_id` is trusted as the read upper
    /// bound. Falling back to the shard watermark past this instant
    /// keeps peers from starving when no notifications arrive.
    sanity_check_time: Option<DateTime<Utc>>,
}

/// Outbound replication task stream of one shard.
pub struct AckManager {
    shard: Arc<ShardContext>,
    workflow_cache: Arc<WorkflowCache>,
    state: Mutex<AckState>,
}

impl AckManager {
    /// Create the ack manager for a shard.
    pub fn new(shard: Arc<ShardContext>, workflow_cache: Arc<WorkflowCache>) -> Self {
        Self {
            shard,
            workflow_cache,
            state: Mutex::new(AckState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, AckState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record freshly committed replication tasks. Monotonic: the cached
    /// maxima never decrease.
    pub fn notify_new_tasks(&self, tasks: &[ReplicationTask]) {
        if tasks.is_empty() {
            return;
        }
        let mut batch_max_id = i64::MIN;
        let mut batch_max_visibility: Option<DateTime<Utc>> = None;
        for task in tasks {
            batch_max_id = batch_max_id.max(task.task_id());
            let visibility = task.visibility_timestamp();
            batch_max_visibility = Some(match batch_max_visibility {
                Some(current) => current.max(visibility),
                None => visibility,
            });
        }

        let mut state = self.state();
        state.max_task_id = Some(match state.max_task_id {
            Some(current) => current.max(batch_max_id),
            None => batch_max_id,
        });
        if let Some(batch_visibility) = batch_max_visibility {
            state.max_visibility_time = Some(match state.max_visibility_time {
                Some(current) => current.max(batch_visibility),
                None => batch_visibility,
            });
        }
    }

    /// Highest observed task id and visibility timestamp. The two maxima
    /// are taken independently: the returned timestamp is not necessarily
    /// the visibility time of the max-id task.
    pub fn get_max_task_info(&self) -> (i64, DateTime<Utc>) {
        let state = self.state();
        let max_task_id = state.max_task_id.unwrap_or_else(|| {
            self.shard
                .immediate_queue_exclusive_high_read_watermark()
                .prev()
                .0
        });
        let max_visibility_time = state
            .max_visibility_time
            .unwrap_or_else(|| self.shard.clock().now());
        (max_task_id, max_visibility_time)
    }

    /// Fetch the next batch of replication messages for `poll_cluster`,
    /// starting after the poller's inclusive min ack.
    pub async fn get_tasks(
        &self,
        poll_cluster: &str,
        query_message_id: i64,
    ) -> Result<ReplicationMessages, HistoryError> {
        let (min_task_id, max_task_id) = self.task_ids_range(query_message_id);
        let (replication_tasks, last_retrieved_message_id) = self
            .fetch_tasks(poll_cluster, min_task_id, max_task_id)
            .await?;
        Ok(ReplicationMessages {
            has_more: last_retrieved_message_id < max_task_id,
            replication_tasks,
            last_retrieved_message_id,
        })
    }

    /// Select the `(min, max]`-style id range for one poll.
    ///
    /// The default upper bound is the shard watermark minus one (never
    /// read past the active mutator). While the sanity-check window is
    /// fresh, the cached notification maximum clamps the bound further
    /// down to avoid over-scanning; once the window expires the
    /// watermark is used and the window restarts.
    fn task_ids_range(&self, last_read_task_id: i64) -> (i64, i64) {
        let min_task_id = last_read_task_id;
        let mut max_task_id = self
            .shard
            .immediate_queue_exclusive_high_read_watermark()
            .prev()
            .0;

        let mut state = self.state();
        let now = self.shard.clock().now();
        let expired = match state.sanity_check_time {
            None => true,
            Some(at) => at <= now,
        };
        if expired {
            let interval = self.shard.config().replication_sanity_check_interval;
            state.sanity_check_time = Some(
                now + chrono::Duration::from_std(interval)
                    .unwrap_or_else(|_| chrono::Duration::zero()),
            );
        } else if let Some(cached) = state.max_task_id {
            if cached < max_task_id {
                max_task_id = cached;
            }
        }
        state.max_task_id = Some(max_task_id);
        (min_task_id, max_task_id)
    }

    /// Read `(min, max]` from the replication queue and hydrate. Returns
    /// the messages plus the highest task id examined (including
    /// filtered tasks).
    async fn fetch_tasks(
        &self,
        poll_cluster: &str,
        min_task_id: i64,
        max_task_id: i64,
    ) -> Result<(Vec<ReplicationMessage>, i64), HistoryError> {
        if min_task_id > max_task_id {
            return Err(HistoryError::Store(StoreError::Unavailable(format!(
                "replication task range inverted: ({min_task_id}, {max_task_id}]"
            ))));
        }

        let batch_size = self.shard.config().replication_task_batch_size;
        let max_skip = self.shard.config().replication_max_skip_task_count;

        let mut messages: Vec<ReplicationMessage> = Vec::with_capacity(batch_size);
        // With no tasks at all, everything up to the bound is implicitly
        // acked.
        let mut last_task_id = max_task_id;
        let mut skipped = 0usize;

        let mut pending: VecDeque<ReplicationTask> = VecDeque::new();
        let mut page_token = None;
        let mut exhausted = false;

        loop {
            if messages.len() >= batch_size || skipped > max_skip {
                break;
            }

            let task = match pending.pop_front() {
                Some(task) => task,
                None => {
                    if exhausted {
                        break;
                    }
                    let page = match self
                        .shard
                        .execution_store()
                        .get_history_tasks(GetHistoryTasksRequest {
                            shard_id: self.shard.shard_id(),
                            category: TaskCategory::Replication,
                            inclusive_min_task_key: TaskKey(min_task_id + 1),
                            exclusive_max_task_key: TaskKey(max_task_id + 1),
                            batch_size,
                            next_page_token: page_token.take(),
                        })
                        .await
                    {
                        Ok(page) => page,
                        Err(err) => {
                            return self.swallow_partial_results(messages, err.into());
                        }
                    };
                    page_token = page.next_page_token;
                    exhausted = page_token.is_none();
                    pending.extend(page.tasks);
                    continue;
                }
            };

            // Progress is reported even for tasks that produce no
            // message, so the poller's ack cursor always advances.
            last_task_id = task.task_id();

            match self
                .shard
                .namespace_registry()
                .get_namespace_by_id(task.namespace_id())
                .await
            {
                Ok(entry) => {
                    if !entry.is_replicated_to(poll_cluster) {
                        skipped += 1;
                        self.shard.metrics().replication_tasks_skipped.increment();
                        continue;
                    }
                }
                Err(RegistryError::NotFound(_)) => {
                    skipped += 1;
                    self.shard.metrics().replication_tasks_skipped.increment();
                    continue;
                }
                Err(err) => {
                    return self.swallow_partial_results(messages, err.into());
                }
            }

            match self.to_replication_message(&task).await {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {
                    skipped += 1;
                    self.shard.metrics().replication_tasks_skipped.increment();
                }
                Err(err) => {
                    return self.swallow_partial_results(messages, err);
                }
            }
        }

        Ok((messages, last_task_id))
    }

    /// On mid-batch failure, return the prefix already hydrated; with an
    /// empty prefix the error propagates and the poller retries.
    fn swallow_partial_results(
        &self,
        messages: Vec<ReplicationMessage>,
        err: HistoryError,
    ) -> Result<(Vec<ReplicationMessage>, i64), HistoryError> {
        warn!(
            shard_id = self.shard.shard_id(),
            error = %err,
            hydrated = messages.len(),
            "replication task batch interrupted"
        );
        match messages.last() {
            None => Err(err),
            Some(last) => {
                let last_task_id = last.source_task_id;
                self.shard.metrics().replication_partial_batches.increment();
                Ok((messages, last_task_id))
            }
        }
    }

    async fn to_replication_message(
        &self,
        task: &ReplicationTask,
    ) -> Result<Option<ReplicationMessage>, HistoryError> {
        match task {
            ReplicationTask::SyncActivity(task) => self.generate_sync_activity_message(task).await,
            ReplicationTask::HistoryReplication(task) => {
                self.generate_history_message(task).await
            }
        }
    }

    /// Hydrate a sync-activity task. Emits nothing when the workflow is
    /// gone, closed, or the activity no longer exists.
    async fn generate_sync_activity_message(
        &self,
        task: &SyncActivityTask,
    ) -> Result<Option<ReplicationMessage>, HistoryError> {
        let mut context = self
            .workflow_cache
            .get_or_create(&task.workflow_key, CallerType::Task)
            .await;
        let mutable_state = match context
            .load_mutable_state(
                self.shard.execution_store().as_ref(),
                self.shard.shard_id(),
                self.shard.config().clone(),
                self.shard.clock().clone(),
                self.shard.metrics().clone(),
            )
            .await
        {
            Ok(mutable_state) => mutable_state,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if !mutable_state.is_workflow_execution_running() {
            return Ok(None);
        }
        let Some(activity) = mutable_state.activity_info(task.scheduled_event_id) else {
            return Ok(None);
        };

        let version_history_items = mutable_state
            .version_histories()
            .current()
            .map(|history| history.items.clone())
            .unwrap_or_default();

        Ok(Some(ReplicationMessage {
            source_task_id: task.task_id,
            visibility_time: task.visibility_timestamp,
            attributes: ReplicationMessageAttributes::SyncActivity(SyncActivityAttributes {
                namespace_id: task.workflow_key.namespace_id.clone(),
                workflow_id: task.workflow_key.workflow_id.clone(),
                run_id: task.workflow_key.run_id.clone(),
                version: activity.version,
                scheduled_event_id: activity.scheduled_event_id,
                scheduled_time: activity.scheduled_time,
                started_event_id: activity.started_event_id,
                started_time: activity.started_time,
                last_heartbeat_time: activity.last_heartbeat_time,
                details: activity.heartbeat_details.clone(),
                attempt: activity.attempt,
                last_failure: activity.last_failure.clone(),
                last_worker_identity: activity.last_worker_identity.clone(),
                version_history_items,
            }),
        }))
    }

    /// Hydrate a history-replication task by reading the raw branch
    /// range `[first_event_id, next_event_id)`.
    async fn generate_history_message(
        &self,
        task: &HistoryReplicationTask,
    ) -> Result<Option<ReplicationMessage>, HistoryError> {
        let (branch_token, version_history_items) = {
            let mut context = self
                .workflow_cache
                .get_or_create(&task.workflow_key, CallerType::Task)
                .await;
            let mutable_state = match context
                .load_mutable_state(
                    self.shard.execution_store().as_ref(),
                    self.shard.shard_id(),
                    self.shard.config().clone(),
                    self.shard.clock().clone(),
                    self.shard.metrics().clone(),
                )
                .await
            {
                Ok(mutable_state) => mutable_state,
                Err(StoreError::NotFound(_)) => return Ok(None),
                Err(err) => return Err(err.into()),
            };
            match mutable_state.version_histories().current() {
                Some(history) => (history.branch_token.clone(), history.items.clone()),
                None => return Ok(None),
            }
            // The context lock is released before the branch read; raw
            // history is immutable once written.
        };

        let events = match self
            .shard
            .execution_store()
            .read_raw_history_branch(ReadRawHistoryBranchRequest {
                branch_token,
                first_event_id: task.first_event_id,
                next_event_id: task.next_event_id,
            })
            .await
        {
            Ok(blobs) => blobs,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        debug!(
            task_id = task.task_id,
            first_event_id = task.first_event_id,
            next_event_id = task.next_event_id,
            blobs = events.len(),
            "hydrated history replication task"
        );

        Ok(Some(ReplicationMessage {
            source_task_id: task.task_id,
            visibility_time: task.visibility_timestamp,
            attributes: ReplicationMessageAttributes::HistoryBatch(HistoryBatchAttributes {
                namespace_id: task.workflow_key.namespace_id.clone(),
                workflow_id: task.workflow_key.workflow_id.clone(),
                run_id: task.workflow_key.run_id.clone(),
                first_event_id: task.first_event_id,
                next_event_id: task.next_event_id,
                version: task.version,
                version_history_items,
                events,
            }),
        }))
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end flow across the history core: mutate an execution through
//! the workflow task state machine, commit atomically through the shard,
//! and stream the resulting replication tasks to a peer cluster.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use tidemark_common::clock::{Clock, ManualClock};
use tidemark_history::config::HistoryConfig;
use tidemark_history::history::HistoryEvent;
use tidemark_history::metrics::HistoryMetrics;
use tidemark_history::namespace::{NamespaceEntry, StaticNamespaceRegistry};
use tidemark_history::replication::{AckManager, ReplicationMessageAttributes};
use tidemark_history::shard::ShardContext;
use tidemark_history::workflow::cache::WorkflowCache;
use tidemark_history::workflow::MutableState;
use tidemark_persistence::{InMemoryExecutionStore, WorkflowKey};

const CLUSTER_EAST: &str = "east";
const CLUSTER_WEST: &str = "west";
const NAMESPACE: &str = "ns-orders";

struct TestCluster {
    shard: Arc<ShardContext>,
    ack_manager: AckManager,
    clock: Arc<ManualClock>,
}

impl TestCluster {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let store: Arc<InMemoryExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let registry = Arc::new(StaticNamespaceRegistry::new([NamespaceEntry {
            id: NAMESPACE.to_string(),
            name: "orders".to_string(),
            is_global: true,
            replication_clusters: vec![CLUSTER_EAST.to_string(), CLUSTER_WEST.to_string()],
        }]));
        let shard = Arc::new(ShardContext::new(
            1,
            CLUSTER_EAST,
            Arc::new(HistoryConfig::default()),
            clock.clone(),
            Arc::new(HistoryMetrics::new(Duration::from_secs(60))),
            store,
            registry,
            1,
            1,
        ));
        let ack_manager = AckManager::new(shard.clone(), Arc::new(WorkflowCache::new()));
        Self {
            shard,
            ack_manager,
            clock,
        }
    }

    fn new_execution(&self, run_id: &str) -> MutableState {
        MutableState::new_execution(
            self.shard.config().clone(),
            self.clock.clone(),
            self.shard.metrics().clone(),
            WorkflowKey::new(NAMESPACE, "order-wf", run_id),
            "orders".to_string(),
            Duration::from_secs(10),
            self.shard.current_version(),
        )
    }
}

#[tokio::test]
async fn committed_mutations_are_streamed_to_peers() {
    let cluster = TestCluster::new();
    let mut ms = cluster.new_execution("run-1");

    // Run one full workflow task round.
    let start_event = ms.add_workflow_execution_started_event(None).unwrap();
    ms.workflow_task()
        .add_first_workflow_task_scheduled(&start_event)
        .unwrap();
    let task = ms.workflow_task().get_pending_workflow_task().unwrap();
    let queue = ms.task_queue();
    ms.workflow_task()
        .add_workflow_task_started_event(
            task.scheduled_event_id,
            Uuid::new_v4(),
            &queue,
            "worker-1",
        )
        .unwrap();
    ms.workflow_task()
        .add_workflow_task_completed_event(
            task.scheduled_event_id,
            task.scheduled_event_id + 1,
            "worker-1",
            "build-abc",
        )
        .unwrap();

    let committed = cluster
        .shard
        .commit_workflow_mutation(&mut ms)
        .await
        .unwrap();
    assert_eq!(committed.len(), 2);
    cluster.ack_manager.notify_new_tasks(&committed);

    let (max_task_id, _) = cluster.ack_manager.get_max_task_info();
    assert_eq!(
        max_task_id,
        committed.iter().map(|t| t.task_id()).max().unwrap()
    );

    // A peer drains the stream.
    let messages = cluster.ack_manager.get_tasks(CLUSTER_WEST, 0).await.unwrap();
    assert_eq!(messages.replication_tasks.len(), 2);
    assert!(!messages.has_more);

    // The replicated batches decode to exactly the committed events,
    // in order, with contiguous ids.
    let mut replicated: Vec<HistoryEvent> = Vec::new();
    for message in &messages.replication_tasks {
        match &message.attributes {
            ReplicationMessageAttributes::HistoryBatch(batch) => {
                for blob in &batch.events {
                    let events: Vec<HistoryEvent> = serde_json::from_slice(&blob.data).unwrap();
                    replicated.extend(events);
                }
            }
            other => panic!("unexpected attributes: {other:?}"),
        }
    }
    let ids: Vec<i64> = replicated.iter().map(|e| e.event_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    // Acking past the stream yields an empty batch at the watermark.
    let next = cluster
        .ack_manager
        .get_tasks(CLUSTER_WEST, messages.last_retrieved_message_id)
        .await
        .unwrap();
    assert!(next.replication_tasks.is_empty());
    assert!(!next.has_more);
}

#[tokio::test]
async fn standby_replay_reproduces_active_side_state() {
    let active = TestCluster::new();
    let mut active_ms = active.new_execution("run-replay");

    let start_event = active_ms.add_workflow_execution_started_event(None).unwrap();
    active_ms
        .workflow_task()
        .add_first_workflow_task_scheduled(&start_event)
        .unwrap();
    let task = active_ms.workflow_task().get_pending_workflow_task().unwrap();
    let queue = active_ms.task_queue();
    let request_id = Uuid::new_v4();
    active_ms
        .workflow_task()
        .add_workflow_task_started_event(task.scheduled_event_id, request_id, &queue, "worker-1")
        .unwrap();
    let completed = active_ms
        .workflow_task()
        .add_workflow_task_completed_event(
            task.scheduled_event_id,
            task.scheduled_event_id + 1,
            "worker-1",
            "build-abc",
        )
        .unwrap();

    // Drive a standby copy from the same transitions.
    let standby = TestCluster::new();
    let mut standby_ms = standby.new_execution("run-replay");
    standby_ms.add_workflow_execution_started_event(None).unwrap();
    standby_ms
        .workflow_task()
        .replicate_workflow_task_scheduled_event(
            task.version,
            task.scheduled_event_id,
            task.task_queue.clone().unwrap(),
            task.start_to_close_timeout,
            task.attempt,
            task.scheduled_time,
            task.original_scheduled_time,
        )
        .unwrap();
    standby_ms
        .workflow_task()
        .replicate_workflow_task_started_event(
            None,
            task.version,
            task.scheduled_event_id,
            task.scheduled_event_id + 1,
            request_id,
            standby.clock.now(),
        )
        .unwrap();
    standby_ms
        .workflow_task()
        .replicate_workflow_task_completed_event(&completed)
        .unwrap();

    assert!(!standby_ms.workflow_task().has_pending_workflow_task());
    assert_eq!(
        standby_ms.last_workflow_task_started_event_id(),
        active_ms.last_workflow_task_started_event_id()
    );
}

#[tokio::test]
async fn stream_survives_interleaved_executions() {
    let cluster = TestCluster::new();

    for run in ["run-a", "run-b", "run-c"] {
        let mut ms = cluster.new_execution(run);
        let start_event = ms.add_workflow_execution_started_event(None).unwrap();
        ms.workflow_task()
            .add_first_workflow_task_scheduled(&start_event)
            .unwrap();
        let committed = cluster.shard.commit_workflow_mutation(&mut ms).await.unwrap();
        cluster.ack_manager.notify_new_tasks(&committed);
    }

    let messages = cluster.ack_manager.get_tasks(CLUSTER_WEST, 0).await.unwrap();
    assert_eq!(messages.replication_tasks.len(), 3);

    // Task ids are shard-monotonic across executions.
    let ids: Vec<i64> = messages
        .replication_tasks
        .iter()
        .map(|message| message.source_task_id)
        .collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
}

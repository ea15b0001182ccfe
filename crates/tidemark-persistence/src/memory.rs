// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory execution store.
//!
//! Backs tests and local development. Single-process only; honors the
//! same atomicity contract as a real driver by taking the write lock for
//! the whole update.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::records::{DataBlob, WorkflowMutableStateRecord};
use crate::store::{
    AppendHistoryNodesRequest, ExecutionStore, GetHistoryTasksRequest, GetHistoryTasksResponse,
    GetWorkflowExecutionRequest, ReadRawHistoryBranchRequest, StoreError,
    UpdateWorkflowExecutionRequest,
};
use crate::tasks::{ReplicationTask, TaskCategory, TransferTask};

type ExecutionKey = (String, String, String);

#[derive(Default)]
struct Inner {
    executions: HashMap<ExecutionKey, WorkflowMutableStateRecord>,
    branches: HashMap<Bytes, Vec<(i64, DataBlob)>>,
    replication_queues: HashMap<i32, BTreeMap<i64, ReplicationTask>>,
    transfer_queues: HashMap<i32, Vec<TransferTask>>,
}

/// An [`ExecutionStore`] kept entirely in process memory.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    inner: RwLock<Inner>,
}

impl InMemoryExecutionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an execution record directly. Test seeding helper.
    pub async fn put_workflow_execution(&self, record: WorkflowMutableStateRecord) {
        let key = execution_key(&record);
        self.inner.write().await.executions.insert(key, record);
    }

    /// Append replication tasks to a shard queue directly. Test seeding helper.
    pub async fn put_replication_tasks(&self, shard_id: i32, tasks: Vec<ReplicationTask>) {
        let mut inner = self.inner.write().await;
        let queue = inner.replication_queues.entry(shard_id).or_default();
        for task in tasks {
            queue.insert(task.task_id(), task);
        }
    }

    /// Transfer tasks accumulated for a shard. Test inspection helper.
    pub async fn transfer_tasks(&self, shard_id: i32) -> Vec<TransferTask> {
        self.inner
            .read()
            .await
            .transfer_queues
            .get(&shard_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn execution_key(record: &WorkflowMutableStateRecord) -> ExecutionKey {
    (
        record.execution_info.namespace_id.clone(),
        record.execution_info.workflow_id.clone(),
        record.execution_state.run_id.clone(),
    )
}

fn encode_page_token(next_task_id: i64) -> Bytes {
    Bytes::copy_from_slice(&next_task_id.to_be_bytes())
}

fn decode_page_token(token: &Bytes) -> Result<i64, StoreError> {
    let raw: [u8; 8] = token
        .as_ref()
        .try_into()
        .map_err(|_| StoreError::Serialization("malformed page token".to_string()))?;
    Ok(i64::from_be_bytes(raw))
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn get_history_tasks(
        &self,
        request: GetHistoryTasksRequest,
    ) -> Result<GetHistoryTasksResponse, StoreError> {
        if request.category != TaskCategory::Replication {
            return Ok(GetHistoryTasksResponse::default());
        }

        let start = match &request.next_page_token {
            Some(token) => decode_page_token(token)?,
            None => request.inclusive_min_task_key.0,
        };

        let inner = self.inner.read().await;
        let Some(queue) = inner.replication_queues.get(&request.shard_id) else {
            return Ok(GetHistoryTasksResponse::default());
        };

        let mut tasks = Vec::with_capacity(request.batch_size);
        let mut more_after = None;
        for (&task_id, task) in queue.range(start..request.exclusive_max_task_key.0) {
            if tasks.len() == request.batch_size {
                more_after = Some(task_id);
                break;
            }
            tasks.push(task.clone());
        }

        let next_page_token = more_after.map(encode_page_token);
        Ok(GetHistoryTasksResponse {
            tasks,
            next_page_token,
        })
    }

    async fn get_workflow_execution(
        &self,
        request: GetWorkflowExecutionRequest,
    ) -> Result<WorkflowMutableStateRecord, StoreError> {
        let key = (
            request.namespace_id.clone(),
            request.workflow_id.clone(),
            request.run_id.clone(),
        );
        self.inner
            .read()
            .await
            .executions
            .get(&key)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "workflow execution {}/{}/{}",
                    request.namespace_id, request.workflow_id, request.run_id
                ))
            })
    }

    async fn read_raw_history_branch(
        &self,
        request: ReadRawHistoryBranchRequest,
    ) -> Result<Vec<DataBlob>, StoreError> {
        let inner = self.inner.read().await;
        let nodes = inner
            .branches
            .get(&request.branch_token)
            .ok_or_else(|| StoreError::NotFound("history branch".to_string()))?;

        Ok(nodes
            .iter()
            .filter(|(first_event_id, _)| {
                *first_event_id >= request.first_event_id
                    && *first_event_id < request.next_event_id
            })
            .map(|(_, blob)| blob.clone())
            .collect())
    }

    async fn append_history_nodes(
        &self,
        request: AppendHistoryNodesRequest,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let nodes = inner.branches.entry(request.branch_token).or_default();
        let at = nodes.partition_point(|(first, _)| *first < request.first_event_id);
        nodes.insert(at, (request.first_event_id, request.events));
        Ok(())
    }

    async fn update_workflow_execution(
        &self,
        request: UpdateWorkflowExecutionRequest,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        for node in request.history_nodes {
            let nodes = inner.branches.entry(node.branch_token).or_default();
            let at = nodes.partition_point(|(first, _)| *first < node.first_event_id);
            nodes.insert(at, (node.first_event_id, node.events));
        }

        let replication_queue = inner
            .replication_queues
            .entry(request.shard_id)
            .or_default();
        for task in request.replication_tasks {
            replication_queue.insert(task.task_id(), task);
        }

        inner
            .transfer_queues
            .entry(request.shard_id)
            .or_default()
            .extend(request.transfer_tasks);

        let key = execution_key(&request.mutable_state);
        inner.executions.insert(key, request.mutable_state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::tasks::{HistoryReplicationTask, TaskKey, WorkflowKey};

    fn replication_task(task_id: i64) -> ReplicationTask {
        ReplicationTask::HistoryReplication(HistoryReplicationTask {
            workflow_key: WorkflowKey::new("ns", "wf", "run"),
            task_id,
            visibility_timestamp: Utc::now(),
            first_event_id: 1,
            next_event_id: 2,
            version: 1,
        })
    }

    #[tokio::test]
    async fn history_tasks_page_and_resume() {
        let store = InMemoryExecutionStore::new();
        store
            .put_replication_tasks(1, (1..=5).map(replication_task).collect())
            .await;

        let request = GetHistoryTasksRequest {
            shard_id: 1,
            category: TaskCategory::Replication,
            inclusive_min_task_key: TaskKey(1),
            exclusive_max_task_key: TaskKey(6),
            batch_size: 2,
            next_page_token: None,
        };

        let first_page = store.get_history_tasks(request.clone()).await.unwrap();
        assert_eq!(
            first_page.tasks.iter().map(|t| t.task_id()).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(first_page.next_page_token.is_some());

        let second_page = store
            .get_history_tasks(GetHistoryTasksRequest {
                next_page_token: first_page.next_page_token,
                ..request.clone()
            })
            .await
            .unwrap();
        assert_eq!(
            second_page
                .tasks
                .iter()
                .map(|t| t.task_id())
                .collect::<Vec<_>>(),
            vec![3, 4]
        );

        let last_page = store
            .get_history_tasks(GetHistoryTasksRequest {
                next_page_token: second_page.next_page_token,
                ..request
            })
            .await
            .unwrap();
        assert_eq!(
            last_page.tasks.iter().map(|t| t.task_id()).collect::<Vec<_>>(),
            vec![5]
        );
        assert!(last_page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn range_bounds_are_respected() {
        let store = InMemoryExecutionStore::new();
        store
            .put_replication_tasks(1, (1..=10).map(replication_task).collect())
            .await;

        let page = store
            .get_history_tasks(GetHistoryTasksRequest {
                shard_id: 1,
                category: TaskCategory::Replication,
                inclusive_min_task_key: TaskKey(3),
                exclusive_max_task_key: TaskKey(7),
                batch_size: 100,
                next_page_token: None,
            })
            .await
            .unwrap();
        assert_eq!(
            page.tasks.iter().map(|t| t.task_id()).collect::<Vec<_>>(),
            vec![3, 4, 5, 6]
        );
    }

    #[tokio::test]
    async fn missing_execution_is_not_found() {
        let store = InMemoryExecutionStore::new();
        let err = store
            .get_workflow_execution(GetWorkflowExecutionRequest {
                shard_id: 1,
                namespace_id: "ns".to_string(),
                workflow_id: "wf".to_string(),
                run_id: "run".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn raw_branch_read_filters_by_range() {
        let store = InMemoryExecutionStore::new();
        let branch = Bytes::from_static(b"branch-1");
        for first_event_id in [1_i64, 4, 9] {
            store
                .append_history_nodes(AppendHistoryNodesRequest {
                    shard_id: 1,
                    branch_token: branch.clone(),
                    first_event_id,
                    events: DataBlob::json(format!("[{first_event_id}]")),
                })
                .await
                .unwrap();
        }

        let blobs = store
            .read_raw_history_branch(ReadRawHistoryBranchRequest {
                branch_token: branch,
                first_event_id: 2,
                next_event_id: 9,
            })
            .await
            .unwrap();
        assert_eq!(blobs, vec![DataBlob::json("[4]")]);
    }
}

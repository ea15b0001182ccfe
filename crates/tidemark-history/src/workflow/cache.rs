// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-execution workflow cache.
//!
//! The cache is the locking boundary of the history service: every
//! mutation and every replication hydration acquires the execution's
//! context lock before touching mutable state. The state machine itself
//! assumes single-writer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use tidemark_common::clock::Clock;
use tidemark_persistence::{
    ExecutionStore, GetWorkflowExecutionRequest, StoreError, WorkflowKey,
};

use super::mutable_state::MutableState;
use crate::config::HistoryConfig;
use crate::metrics::HistoryMetrics;

/// Who is asking for the execution lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerType {
    /// A foreground RPC handler.
    Api,
    /// A background queue processor.
    Task,
}

/// One cached execution: its mutable state, loaded lazily.
#[derive(Debug)]
pub struct WorkflowContext {
    key: WorkflowKey,
    mutable_state: Option<MutableState>,
}

impl WorkflowContext {
    /// Identity of the execution this context guards.
    pub fn workflow_key(&self) -> &WorkflowKey {
        &self.key
    }

    /// The cached mutable state, loading it from the store on first use.
    pub async fn load_mutable_state(
        &mut self,
        store: &dyn ExecutionStore,
        shard_id: i32,
        config: Arc<HistoryConfig>,
        clock: Arc<dyn Clock>,
        metrics: Arc<HistoryMetrics>,
    ) -> Result<&mut MutableState, StoreError> {
        if self.mutable_state.is_none() {
            let record = store
                .get_workflow_execution(GetWorkflowExecutionRequest {
                    shard_id,
                    namespace_id: self.key.namespace_id.clone(),
                    workflow_id: self.key.workflow_id.clone(),
                    run_id: self.key.run_id.clone(),
                })
                .await?;
            self.mutable_state = Some(MutableState::from_record(config, clock, metrics, record));
        }
        // Freshly populated above when it was absent.
        Ok(self.mutable_state.as_mut().expect("mutable state loaded"))
    }

    /// Install mutable state directly, replacing any cached copy.
    pub fn set_mutable_state(&mut self, mutable_state: MutableState) {
        self.mutable_state = Some(mutable_state);
    }

    /// Drop the cached state so the next access reloads from the store.
    pub fn invalidate(&mut self) {
        self.mutable_state = None;
    }
}

/// Maps executions to their lock-guarded contexts.
///
/// The per-execution `tokio::sync::Mutex` serializes all mutations of
/// one execution; lock acquisition order across executions is the
/// caller's concern (shard queue processors take one at a time).
#[derive(Default)]
pub struct WorkflowCache {
    contexts: Mutex<HashMap<WorkflowKey, Arc<Mutex<WorkflowContext>>>>,
}

impl WorkflowCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the context lock for an execution, creating the context
    /// if this is the first access.
    pub async fn get_or_create(
        &self,
        key: &WorkflowKey,
        caller_type: CallerType,
    ) -> OwnedMutexGuard<WorkflowContext> {
        let context = {
            let mut contexts = self.contexts.lock().await;
            contexts
                .entry(key.clone())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(WorkflowContext {
                        key: key.clone(),
                        mutable_state: None,
                    }))
                })
                .clone()
        };
        debug!(
            namespace_id = %key.namespace_id,
            workflow_id = %key.workflow_id,
            run_id = %key.run_id,
            ?caller_type,
            "acquiring workflow context"
        );
        context.lock_owned().await
    }

    /// Drop an execution's context entirely (e.g. after deletion).
    pub async fn evict(&self, key: &WorkflowKey) {
        self.contexts.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_serializes_access() {
        let cache = Arc::new(WorkflowCache::new());
        let key = WorkflowKey::new("ns", "wf", "run");

        let guard = cache.get_or_create(&key, CallerType::Api).await;

        let contended = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = cache.get_or_create(&key, CallerType::Task).await;
            })
        };

        // The second acquirer cannot finish while the lock is held.
        tokio::task::yield_now().await;
        assert!(!contended.is_finished());

        drop(guard);
        contended.await.unwrap();
    }

    #[tokio::test]
    async fn evicted_context_is_recreated() {
        let cache = WorkflowCache::new();
        let key = WorkflowKey::new("ns", "wf", "run");
        {
            let guard = cache.get_or_create(&key, CallerType::Api).await;
            assert_eq!(guard.workflow_key(), &key);
        }
        cache.evict(&key).await;
        let guard = cache.get_or_create(&key, CallerType::Api).await;
        assert_eq!(guard.workflow_key(), &key);
    }
}

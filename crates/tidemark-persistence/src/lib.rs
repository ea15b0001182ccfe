// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence contract for tidemark.
//!
//! This crate defines the storage boundary the history service consumes:
//! record types mirroring what the driver persists, the [`ExecutionStore`]
//! trait, an in-memory backend for tests and development, and the
//! storage-driver connection configuration (including TLS material
//! validation).
//!
//! The real driver (SQL or Cassandra) lives outside this repository; only
//! its contract is modelled here.

pub mod config;
pub mod memory;
pub mod records;
pub mod store;
pub mod tasks;
pub mod tls;

pub use self::config::{StoreConfig, StoreKind};
pub use self::memory::InMemoryExecutionStore;
pub use self::records::{
    ActivityInfoRecord, DataBlob, ExecutionInfoRecord, ExecutionStateRecord,
    VersionHistoriesRecord, VersionHistoryItemRecord, VersionHistoryRecord,
    WorkflowMutableStateRecord, WorkflowState, WorkflowStatus,
};
pub use self::store::{
    AppendHistoryNodesRequest, ExecutionStore, GetHistoryTasksRequest, GetHistoryTasksResponse,
    GetWorkflowExecutionRequest, ReadRawHistoryBranchRequest, StoreError,
    UpdateWorkflowExecutionRequest,
};
pub use self::tasks::{
    HistoryReplicationTask, ReplicationTask, SyncActivityTask, TaskCategory, TaskKey, TransferTask,
    WorkflowKey,
};
pub use self::tls::{TlsError, TlsOptions};

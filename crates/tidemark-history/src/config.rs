// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tunable knobs of the history service.
//!
//! These are plain values; wiring them to a live config source is the
//! embedding process's concern.

use std::time::Duration;

/// History service configuration.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Replication tasks fetched per storage page and returned per poll.
    pub replication_task_batch_size: usize,
    /// Upper bound on filtered-out tasks examined per poll, so a poll over
    /// a fully-filtered range still terminates and reports progress.
    pub replication_max_skip_task_count: usize,
    /// How long the cached replication high watermark is trusted before
    /// falling back to the shard's queue watermark.
    pub replication_sanity_check_interval: Duration,
    /// Ceiling for the per-attempt backoff added to the workflow task
    /// start-to-close timeout once a task is transient.
    pub workflow_task_retry_max_interval: Duration,
    /// Attempt count at which a throttled warning is logged.
    pub workflow_task_critical_attempts: i32,
    /// Minimum interval between critical-attempt warnings.
    pub workflow_task_critical_attempts_log_interval: Duration,
    /// Maximum binary-checksum reset points kept per execution.
    pub max_reset_points: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            replication_task_batch_size: 25,
            replication_max_skip_task_count: 250,
            replication_sanity_check_interval: Duration::from_secs(30),
            workflow_task_retry_max_interval: Duration::from_secs(600),
            workflow_task_critical_attempts: 10,
            workflow_task_critical_attempts_log_interval: Duration::from_secs(60),
            max_reset_points: 20,
        }
    }
}

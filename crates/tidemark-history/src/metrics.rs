// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process metrics of the history core.

use std::time::Duration;

use tidemark_common::metrics::{Counter, Histogram};
use tidemark_common::throttle::Throttle;

/// Counters and histograms updated on mutation paths.
#[derive(Debug)]
pub struct HistoryMetrics {
    /// Distribution of workflow task attempt counts at start.
    pub workflow_task_attempt: Histogram,
    /// Replication tasks dropped by the namespace filter.
    pub replication_tasks_skipped: Counter,
    /// Replication polls that returned a partial prefix after a failure.
    pub replication_partial_batches: Counter,
    pub(crate) critical_attempt_warnings: Throttle,
}

impl HistoryMetrics {
    /// Create metrics with the intervals from the service configuration.
    pub fn for_config(config: &crate::config::HistoryConfig) -> Self {
        Self::new(config.workflow_task_critical_attempts_log_interval)
    }

    /// Create metrics with the given warn throttle interval.
    pub fn new(critical_attempts_log_interval: Duration) -> Self {
        Self {
            workflow_task_attempt: Histogram::new(vec![1, 2, 3, 5, 10, 25, 100]),
            replication_tasks_skipped: Counter::new(),
            replication_partial_batches: Counter::new(),
            critical_attempt_warnings: Throttle::new(critical_attempts_log_interval),
        }
    }
}

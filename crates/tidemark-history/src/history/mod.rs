// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! History events and the per-transaction event builder.

mod builder;
mod event;

pub use self::builder::HistoryBuilder;
pub use self::event::{
    EventAttributes, EventType, HistoryEvent, TimeoutKind, WorkflowExecutionSignaledAttributes,
    WorkflowExecutionStartedAttributes, WorkflowTaskCompletedAttributes,
    WorkflowTaskFailedAttributes, WorkflowTaskFailedCause, WorkflowTaskScheduledAttributes,
    WorkflowTaskStartedAttributes, WorkflowTaskTimedOutAttributes,
};

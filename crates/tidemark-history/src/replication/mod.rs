// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outbound replication to peer clusters.

mod ack_manager;
mod messages;

pub use self::ack_manager::AckManager;
pub use self::messages::{
    HistoryBatchAttributes, ReplicationMessage, ReplicationMessageAttributes, ReplicationMessages,
    SyncActivityAttributes,
};

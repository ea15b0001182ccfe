// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background maintenance workers.
//!
//! Currently only the scanner: a starter for the singleton system
//! workflows that sweep persistence for orphaned history branches, task
//! queue entries and execution rows. The scavenging itself runs as
//! ordinary workflows on the system namespace; this crate only makes
//! sure they exist.

pub mod scanner;

pub use self::scanner::{
    Scanner, ScannerConfig, StartWorkflowError, StartWorkflowOptions, SystemWorkflowClient,
};

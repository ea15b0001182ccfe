// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared runtime utilities for tidemark services.
//!
//! Everything in this crate is deliberately small and dependency-light:
//! a time source abstraction so state machines stay deterministic under
//! test, the exponential retry policy used by task scheduling and the
//! background scanner, a rate gate for repeated warnings, and in-process
//! metrics counters.

#![deny(missing_docs)]

/// Exponential retry policy and an async retry helper.
pub mod backoff;

/// Injectable wall-clock time source.
pub mod clock;

/// Lock-free in-process counters and histograms.
pub mod metrics;

/// Minimum-interval gate for repeated log statements.
pub mod throttle;

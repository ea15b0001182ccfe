// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Namespace registry boundary.
//!
//! The registry is versioned, read-mostly metadata shared by all shards.
//! Lookups may fetch from a remote source, hence the async trait; the
//! static implementation backs tests and single-cluster deployments.

use std::collections::HashMap;

use async_trait::async_trait;

/// Errors surfaced by the namespace registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The namespace does not exist.
    #[error("namespace not found: {0}")]
    NotFound(String),

    /// The registry could not be reached.
    #[error("namespace registry unavailable: {0}")]
    Unavailable(String),
}

impl RegistryError {
    /// Whether a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::Unavailable(_))
    }
}

/// One namespace's replication-relevant metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceEntry {
    /// Namespace id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether the namespace is registered across clusters.
    pub is_global: bool,
    /// Clusters the namespace is replicated to.
    pub replication_clusters: Vec<String>,
}

impl NamespaceEntry {
    /// Clusters that should receive this namespace's replication tasks.
    pub fn replication_targets(&self) -> &[String] {
        &self.replication_clusters
    }

    /// Whether `cluster` should receive this namespace's replication tasks.
    pub fn is_replicated_to(&self, cluster: &str) -> bool {
        self.is_global && self.replication_clusters.iter().any(|c| c == cluster)
    }
}

/// Read access to namespace metadata.
#[async_trait]
pub trait NamespaceRegistry: Send + Sync {
    /// Look up a namespace by id.
    async fn get_namespace_by_id(&self, id: &str) -> Result<NamespaceEntry, RegistryError>;
}

/// A fixed in-memory registry.
#[derive(Debug, Default)]
pub struct StaticNamespaceRegistry {
    entries: HashMap<String, NamespaceEntry>,
}

impl StaticNamespaceRegistry {
    /// Build a registry from a fixed set of entries.
    pub fn new(entries: impl IntoIterator<Item = NamespaceEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.id.clone(), entry))
                .collect(),
        }
    }
}

#[async_trait]
impl NamespaceRegistry for StaticNamespaceRegistry {
    async fn get_namespace_by_id(&self, id: &str) -> Result<NamespaceEntry, RegistryError> {
        self.entries
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }
}

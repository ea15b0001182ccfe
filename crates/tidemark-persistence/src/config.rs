// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage driver connection configuration.

use serde::{Deserialize, Serialize};

use crate::tls::{TlsError, TlsOptions};

/// Kind of backing store configured for the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// A SQL database.
    Sql,
    /// A Cassandra-compatible cluster.
    Cassandra,
}

/// Connection settings for the storage driver.
///
/// The driver itself lives outside this workspace; validating its
/// configuration (notably the TLS materials) happens here so a broken
/// deployment fails before serving traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Which driver family the cluster uses.
    pub kind: StoreKind,
    /// Contact points, `host:port`.
    pub hosts: Vec<String>,
    /// Database or keyspace name.
    pub database: String,
    /// TLS settings for the connection.
    #[serde(default)]
    pub tls: TlsOptions,
}

impl StoreConfig {
    /// Validate the configuration, building the TLS client config if enabled.
    pub fn validate(&self) -> Result<(), TlsError> {
        self.tls.client_config().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_lowercase() {
        assert_eq!(serde_json::to_string(&StoreKind::Sql).unwrap(), "\"sql\"");
        assert_eq!(
            serde_json::from_str::<StoreKind>("\"cassandra\"").unwrap(),
            StoreKind::Cassandra
        );
    }

    #[test]
    fn validate_surfaces_tls_errors() {
        let config = StoreConfig {
            kind: StoreKind::Cassandra,
            hosts: vec!["127.0.0.1:9042".to_string()],
            database: "tidemark".to_string(),
            tls: TlsOptions {
                enabled: true,
                ca_data: "this isn't base64".to_string(),
                ..TlsOptions::default()
            },
        };
        assert!(config.validate().is_err());
    }
}

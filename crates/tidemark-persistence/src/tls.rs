// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TLS material handling for the storage driver connection.
//!
//! Each material (CA certificate, client certificate, client key) can be
//! supplied inline as base64-encoded PEM (`*_data`) or as a file path
//! (`*_file`), never both. Validation happens at construction so a
//! misconfigured driver fails before it starts.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};

/// TLS settings for the storage driver connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsOptions {
    /// Whether TLS is enabled at all.
    pub enabled: bool,
    /// CA certificate, base64-encoded PEM.
    pub ca_data: String,
    /// CA certificate file path.
    pub ca_file: String,
    /// Client certificate, base64-encoded PEM.
    pub cert_data: String,
    /// Client certificate file path.
    pub cert_file: String,
    /// Client private key, base64-encoded PEM.
    pub key_data: String,
    /// Client private key file path.
    pub key_file: String,
    /// Whether to verify the server hostname.
    pub enable_host_verification: bool,
    /// Server name override for verification.
    pub server_name: String,
}

/// TLS configuration errors. All of these are fatal at construction.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// Inline data and a file path were given for the same material.
    #[error("Cannot specify both {0}Data and {0}File properties")]
    ConflictingSource(&'static str),

    /// Inline data was not valid base64; carries the decoder's position.
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    /// The decoded CA bytes contained no PEM certificate block.
    #[error("failed to load decoded CA Cert as PEM")]
    InvalidCaPem,

    /// Certificate and key did not form a usable X.509 pair.
    #[error("unable to generate x509 key pair: {0}")]
    KeyPair(String),

    /// A material file could not be read.
    #[error("failed to read {0} file: {1}")]
    Io(&'static str, std::io::Error),
}

impl TlsOptions {
    /// Build the rustls client configuration these options describe.
    ///
    /// Returns `Ok(None)` when TLS is disabled.
    pub fn client_config(&self) -> Result<Option<ClientConfig>, TlsError> {
        if !self.enabled {
            return Ok(None);
        }

        let ca_pem = load_material(&self.ca_data, &self.ca_file, "ca")?;
        let cert_pem = load_material(&self.cert_data, &self.cert_file, "cert")?;
        let key_pem = load_material(&self.key_data, &self.key_file, "key")?;

        let mut roots = RootCertStore::empty();
        if let Some(pem) = ca_pem {
            let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_slice())
                .collect::<Result<_, _>>()
                .map_err(|_| TlsError::InvalidCaPem)?;
            if certs.is_empty() {
                return Err(TlsError::InvalidCaPem);
            }
            for cert in certs {
                roots.add(cert).map_err(|_| TlsError::InvalidCaPem)?;
            }
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);
        let config = match (cert_pem, key_pem) {
            (None, None) => builder.with_no_client_auth(),
            (cert_pem, key_pem) => {
                let cert_pem = cert_pem.unwrap_or_default();
                let chain: Vec<CertificateDer<'static>> =
                    rustls_pemfile::certs(&mut cert_pem.as_slice())
                        .collect::<Result<_, _>>()
                        .map_err(|err| TlsError::KeyPair(err.to_string()))?;
                if chain.is_empty() {
                    return Err(TlsError::KeyPair(
                        "failed to find any PEM data in certificate input".to_string(),
                    ));
                }

                let key_pem = key_pem.unwrap_or_default();
                let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
                    .map_err(|err| TlsError::KeyPair(err.to_string()))?
                    .ok_or_else(|| {
                        TlsError::KeyPair("failed to find any PEM data in key input".to_string())
                    })?;

                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|err| TlsError::KeyPair(err.to_string()))?
            }
        };

        Ok(Some(config))
    }
}

/// Resolve one material to raw PEM bytes, from inline base64 or a file.
fn load_material(
    data: &str,
    file: &str,
    name: &'static str,
) -> Result<Option<Vec<u8>>, TlsError> {
    if !data.is_empty() && !file.is_empty() {
        return Err(TlsError::ConflictingSource(name));
    }
    if !data.is_empty() {
        return Ok(Some(BASE64.decode(data)?));
    }
    if !file.is_empty() {
        return Ok(Some(
            std::fs::read(file).map_err(|err| TlsError::Io(name, err))?,
        ));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use base64::DecodeError;

    use super::*;

    fn generated() -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap()
    }

    fn ca_base64() -> String {
        BASE64.encode(generated().cert.pem())
    }

    #[test]
    fn disabled_yields_no_config() {
        let options = TlsOptions::default();
        assert!(options.client_config().unwrap().is_none());
    }

    #[test]
    fn enabled_without_materials_yields_plain_config() {
        let options = TlsOptions {
            enabled: true,
            ..TlsOptions::default()
        };
        assert!(options.client_config().unwrap().is_some());
    }

    #[test]
    fn ca_data_bad_base64_reports_corrupt_position() {
        let options = TlsOptions {
            enabled: true,
            ca_data: "this isn't base64".to_string(),
            ..TlsOptions::default()
        };
        let err = options.client_config().unwrap_err();
        assert!(matches!(
            err,
            TlsError::Base64(DecodeError::InvalidByte(4, _))
        ));
    }

    #[test]
    fn ca_data_bad_pem_is_rejected() {
        let options = TlsOptions {
            enabled: true,
            ca_data: BASE64.encode("this isn't a PEM cert"),
            ..TlsOptions::default()
        };
        let err = options.client_config().unwrap_err();
        assert_eq!(err.to_string(), "failed to load decoded CA Cert as PEM");
    }

    #[test]
    fn ca_data_good_pem_is_accepted() {
        let options = TlsOptions {
            enabled: true,
            ca_data: ca_base64(),
            ..TlsOptions::default()
        };
        assert!(options.client_config().unwrap().is_some());
    }

    #[test]
    fn ca_data_and_file_conflict() {
        let options = TlsOptions {
            enabled: true,
            ca_data: ca_base64(),
            ca_file: "/a/b/c".to_string(),
            ..TlsOptions::default()
        };
        let err = options.client_config().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot specify both caData and caFile properties"
        );
    }

    #[test]
    fn cert_data_and_file_conflict() {
        let options = TlsOptions {
            enabled: true,
            cert_data: ca_base64(),
            cert_file: "/a/b/c".to_string(),
            ..TlsOptions::default()
        };
        let err = options.client_config().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot specify both certData and certFile properties"
        );
    }

    #[test]
    fn key_data_and_file_conflict() {
        let options = TlsOptions {
            enabled: true,
            key_data: ca_base64(),
            key_file: "/a/b/c".to_string(),
            ..TlsOptions::default()
        };
        let err = options.client_config().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot specify both keyData and keyFile properties"
        );
    }

    #[test]
    fn cert_without_key_fails_pair_validation() {
        let options = TlsOptions {
            enabled: true,
            cert_data: ca_base64(),
            ..TlsOptions::default()
        };
        let err = options.client_config().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unable to generate x509 key pair: failed to find any PEM data in key input"
        );
    }

    #[test]
    fn key_without_cert_fails_pair_validation() {
        let options = TlsOptions {
            enabled: true,
            key_data: ca_base64(),
            ..TlsOptions::default()
        };
        let err = options.client_config().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unable to generate x509 key pair: failed to find any PEM data in certificate input"
        );
    }

    #[test]
    fn matching_cert_and_key_are_accepted() {
        let pair = generated();
        let options = TlsOptions {
            enabled: true,
            ca_data: ca_base64(),
            cert_data: BASE64.encode(pair.cert.pem()),
            key_data: BASE64.encode(pair.key_pair.serialize_pem()),
            ..TlsOptions::default()
        };
        assert!(options.client_config().unwrap().is_some());
    }

    #[test]
    fn cert_with_bad_base64_key_reports_corrupt_position() {
        let options = TlsOptions {
            enabled: true,
            cert_data: ca_base64(),
            key_data: "this ain't base64".to_string(),
            ..TlsOptions::default()
        };
        let err = options.client_config().unwrap_err();
        assert!(matches!(
            err,
            TlsError::Base64(DecodeError::InvalidByte(4, _))
        ));
    }
}

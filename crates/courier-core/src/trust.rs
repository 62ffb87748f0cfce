//! Trust store installation (certificate pinning).
//!
//! Certificate bytes come from an external [`CertificateSource`]. Loading and
//! installing them is best effort: any failure is logged and the client keeps
//! the platform roots.

use reqwest::{Certificate, ClientBuilder};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::{CourierError, Result};

const PEM_MARKER: &[u8] = b"-----BEGIN CERTIFICATE-----";

/// Supplies trust-store bytes (PEM bundle or a single DER certificate).
pub trait CertificateSource: Send + Sync {
    /// Load the bytes. `Ok(None)` means nothing is configured.
    fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Certificates read from a file. A missing file counts as absent.
#[derive(Debug, Clone)]
pub struct FileCertificates {
    path: PathBuf,
}

impl FileCertificates {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CertificateSource for FileCertificates {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CourierError::io_with_path(e, &self.path)),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Certificates already in memory, e.g. bundled with the application.
#[derive(Debug, Clone)]
pub struct InlineCertificates(pub Vec<u8>);

impl CertificateSource for InlineCertificates {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        if self.0.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.0.clone()))
        }
    }

    fn describe(&self) -> String {
        format!("inline ({} bytes)", self.0.len())
    }
}

/// What happened to the trust store at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustStatus {
    /// No source configured, or the source had nothing.
    NotConfigured,
    Installed { certificates: usize },
    /// Loading or installing failed; the client runs without pinning.
    Skipped { reason: String },
}

/// Parse a PEM bundle or a single DER certificate.
pub fn parse_certificates(bytes: &[u8]) -> Result<Vec<Certificate>> {
    if bytes.is_empty() {
        return Err(CourierError::Certificate {
            message: "certificate data is empty".to_string(),
        });
    }

    let is_pem = bytes.windows(PEM_MARKER.len()).any(|w| w == PEM_MARKER);
    let certificates = if is_pem {
        Certificate::from_pem_bundle(bytes).map_err(|e| CourierError::Certificate {
            message: format!("invalid PEM bundle: {}", e),
        })?
    } else {
        vec![Certificate::from_der(bytes).map_err(|e| CourierError::Certificate {
            message: format!("invalid DER certificate: {}", e),
        })?]
    };

    if certificates.is_empty() {
        return Err(CourierError::Certificate {
            message: "no certificates found".to_string(),
        });
    }
    Ok(certificates)
}

/// Add the source's certificates to `builder`.
///
/// Never fails: problems are logged and reported through [`TrustStatus`].
pub fn install_trust_store(
    mut builder: ClientBuilder,
    source: Option<&dyn CertificateSource>,
) -> (ClientBuilder, TrustStatus) {
    let Some(source) = source else {
        return (builder, TrustStatus::NotConfigured);
    };

    let bytes = match source.load() {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            info!("No trust store found at {}", source.describe());
            return (builder, TrustStatus::NotConfigured);
        }
        Err(e) => {
            warn!("Failed to load trust store from {}: {}", source.describe(), e);
            return (
                builder,
                TrustStatus::Skipped {
                    reason: e.to_string(),
                },
            );
        }
    };

    match parse_certificates(&bytes) {
        Ok(certificates) => {
            let count = certificates.len();
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
            info!("Installed {} pinned certificate(s) from {}", count, source.describe());
            (builder, TrustStatus::Installed { certificates: count })
        }
        Err(e) => {
            warn!(
                "Ignoring trust store from {}, continuing without pinning: {}",
                source.describe(),
                e
            );
            (
                builder,
                TrustStatus::Skipped {
                    reason: e.to_string(),
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_source_is_not_configured() {
        let (_builder, status) = install_trust_store(reqwest::Client::builder(), None);
        assert_eq!(status, TrustStatus::NotConfigured);
    }

    #[test]
    fn test_missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileCertificates::new(dir.path().join("missing.pem"));
        assert!(source.load().unwrap().is_none());

        let (_builder, status) = install_trust_store(reqwest::Client::builder(), Some(&source));
        assert_eq!(status, TrustStatus::NotConfigured);
    }

    #[test]
    fn test_empty_inline_is_absent() {
        let source = InlineCertificates(Vec::new());
        let (_builder, status) = install_trust_store(reqwest::Client::builder(), Some(&source));
        assert_eq!(status, TrustStatus::NotConfigured);
    }

    #[test]
    fn test_garbage_is_skipped_not_fatal() {
        let source = InlineCertificates(b"definitely not a certificate".to_vec());
        let (builder, status) = install_trust_store(reqwest::Client::builder(), Some(&source));
        assert!(matches!(status, TrustStatus::Skipped { .. }));
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(
            parse_certificates(&[]),
            Err(CourierError::Certificate { .. })
        ));
    }
}

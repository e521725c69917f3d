//! Holder for the currently pinned daemon certificate.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use super::anchor::TrustAnchor;
use crate::error::{AgentError, Result};

/// Holds at most one [`TrustAnchor`].
///
/// A load parses the file completely before swapping, so readers observe
/// either the old anchor or the new one and a failed load changes nothing.
#[derive(Debug, Default)]
pub struct CertificateStore {
    anchor: RwLock<Option<Arc<TrustAnchor>>>,
}

impl CertificateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the certificate at `path` and makes it the current anchor.
    ///
    /// # Errors
    ///
    /// - `AgentError::CertFileMissing` if the file cannot be read
    /// - `AgentError::CertParse` if it is not exactly one certificate
    pub fn load(&self, path: &Path) -> Result<Arc<TrustAnchor>> {
        let bytes = std::fs::read(path).map_err(|e| {
            warn!("Failed to read daemon certificate {:?}: {}", path, e);
            AgentError::CertFileMissing(format!("{}: {}", path.display(), e))
        })?;

        let anchor = match TrustAnchor::from_pem_or_der(&bytes) {
            Ok(anchor) => Arc::new(anchor),
            Err(e) => {
                warn!("Rejected daemon certificate {:?}: {}", path, e);
                return Err(e);
            }
        };

        *self.anchor.write().unwrap_or_else(PoisonError::into_inner) = Some(anchor.clone());

        info!(
            subject = %anchor.subject(),
            fingerprint = %anchor.fingerprint(),
            "Loaded daemon certificate"
        );
        Ok(anchor)
    }

    /// Loads the configured certificate path.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::CertFileMissing` if no path is configured.
    pub fn load_configured(&self, path: Option<&Path>) -> Result<Arc<TrustAnchor>> {
        let path = path.ok_or_else(|| {
            AgentError::CertFileMissing("no certificate path configured".to_string())
        })?;
        self.load(path)
    }

    /// Returns the current anchor, if one has been loaded.
    pub fn current_anchor(&self) -> Option<Arc<TrustAnchor>> {
        self.anchor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

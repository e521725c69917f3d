//! Post-handshake verification of the presented chain against the pinned key.
//!
//! Runs after rustls has accepted the handshake. Every certificate the daemon
//! presented must carry a signature made by the pinned public key; a failure
//! here is a security incident, not a connectivity problem.

use rustls::pki_types::CertificateDer;
use x509_parser::prelude::*;

use crate::error::{AgentError, Result};
use crate::trust::TrustAnchor;

/// Verifies every presented certificate against the anchor's public key.
///
/// # Errors
///
/// Returns `AgentError::ChainVerification` if the chain is empty, a
/// certificate does not parse, or any signature does not verify.
pub fn verify_chain(presented: &[CertificateDer<'_>], anchor: &TrustAnchor) -> Result<()> {
    if presented.is_empty() {
        return Err(AgentError::ChainVerification(
            "daemon presented no certificates".to_string(),
        ));
    }

    let (_, pinned_key) = SubjectPublicKeyInfo::from_der(anchor.public_key_der()).map_err(|e| {
        AgentError::ChainVerification(format!("pinned public key unreadable: {:?}", e))
    })?;

    for (index, der) in presented.iter().enumerate() {
        let (_, cert) = X509Certificate::from_der(der.as_ref()).map_err(|e| {
            AgentError::ChainVerification(format!("certificate #{} unreadable: {:?}", index, e))
        })?;

        cert.verify_signature(Some(&pinned_key)).map_err(|e| {
            AgentError::ChainVerification(format!(
                "certificate #{} ({}) is not signed by the pinned key: {}",
                index,
                cert.subject(),
                e
            ))
        })?;
    }

    Ok(())
}

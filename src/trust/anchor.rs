//! The pinned daemon certificate and its derived public key.
//!
//! # Security
//!
//! - Input is limited to 16KB
//! - Exactly one certificate is accepted; bundles are rejected
//! - The public key is always taken from the parsed certificate

use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

use crate::error::{AgentError, Result};

/// Maximum certificate file size (16KB is generous for a single cert)
pub const MAX_CERT_SIZE: usize = 16 * 1024;

const PEM_CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// The sole root of trust for a polling session.
///
/// Only constructible from certificate bytes, so the public key can never
/// disagree with the certificate it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    certificate: CertificateDer<'static>,
    public_key_der: Vec<u8>,
    subject: String,
    fingerprint: String,
}

impl TrustAnchor {
    /// Parses a single certificate in PEM or DER form.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::CertParse` if the input is not exactly one X.509
    /// certificate.
    pub fn from_pem_or_der(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_CERT_SIZE {
            return Err(AgentError::CertParse(format!(
                "certificate too large: {} bytes (max {MAX_CERT_SIZE})",
                bytes.len()
            )));
        }

        if looks_like_pem(bytes) {
            Self::from_der(single_pem_certificate(bytes)?)
        } else {
            Self::from_der(bytes.to_vec())
        }
    }

    /// Parses a single DER-encoded certificate.
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let (public_key_der, subject) = {
            let (rest, cert) = X509Certificate::from_der(&der)
                .map_err(|e| AgentError::CertParse(format!("{:?}", e)))?;
            if !rest.is_empty() {
                return Err(AgentError::CertParse(format!(
                    "{} trailing bytes after certificate",
                    rest.len()
                )));
            }
            (cert.public_key().raw.to_vec(), cert.subject().to_string())
        };

        let fingerprint = fingerprint_of(&der);

        Ok(Self {
            certificate: CertificateDer::from(der),
            public_key_der,
            subject,
            fingerprint,
        })
    }

    /// DER certificate, as handed to the TLS root store.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// SubjectPublicKeyInfo (DER) of the pinned certificate.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    /// Certificate subject in RFC 4514 form.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// SHA-256 of the certificate DER, colon-separated uppercase hex.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..].starts_with(b"-----BEGIN")
}

fn single_pem_certificate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut blocks = Vec::new();
    for pem in Pem::iter_from_buffer(bytes) {
        let pem = pem.map_err(|e| AgentError::CertParse(format!("invalid PEM: {}", e)))?;
        blocks.push(pem);
    }

    match blocks.len() {
        0 => Err(AgentError::CertParse("no PEM block found".to_string())),
        1 => {
            let pem = blocks.remove(0);
            if pem.label != PEM_CERTIFICATE_LABEL {
                return Err(AgentError::CertParse(format!(
                    "expected a CERTIFICATE block, found {}",
                    pem.label
                )));
            }
            Ok(pem.contents)
        }
        n => Err(AgentError::CertParse(format!(
            "expected exactly one certificate, found {} PEM blocks",
            n
        ))),
    }
}

fn fingerprint_of(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::self_signed;

    #[test]
    fn test_parse_pem() {
        let cert = self_signed("daemon.local");
        let anchor = TrustAnchor::from_pem_or_der(cert.pem.as_bytes()).unwrap();

        assert_eq!(anchor.certificate().as_ref(), cert.der.as_ref());
        assert!(anchor.subject().contains("btlock test daemon"));
    }

    #[test]
    fn test_parse_der() {
        let cert = self_signed("daemon.local");
        let anchor = TrustAnchor::from_pem_or_der(cert.der.as_ref()).unwrap();
        assert_eq!(anchor.certificate().as_ref(), cert.der.as_ref());
    }

    #[test]
    fn test_public_key_is_derived_from_certificate() {
        let cert = self_signed("daemon.local");
        let anchor = TrustAnchor::from_pem_or_der(cert.pem.as_bytes()).unwrap();
        assert_eq!(anchor.public_key_der(), cert.key_pair.public_key_der().as_slice());
    }

    #[test]
    fn test_fingerprint_format() {
        let cert = self_signed("daemon.local");
        let anchor = TrustAnchor::from_pem_or_der(cert.der.as_ref()).unwrap();

        // 32 bytes, two hex chars each, 31 separators
        assert_eq!(anchor.fingerprint().len(), 32 * 2 + 31);
        assert!(anchor
            .fingerprint()
            .chars()
            .all(|c| c == ':' || c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_pem_and_der_yield_same_anchor() {
        let cert = self_signed("daemon.local");
        let from_pem = TrustAnchor::from_pem_or_der(cert.pem.as_bytes()).unwrap();
        let from_der = TrustAnchor::from_pem_or_der(cert.der.as_ref()).unwrap();
        assert_eq!(from_pem, from_der);
    }

    #[test]
    fn test_rejects_garbage() {
        let result = TrustAnchor::from_pem_or_der(b"not a certificate");
        assert!(matches!(result, Err(AgentError::CertParse(_))));
    }

    #[test]
    fn test_rejects_too_large() {
        let result = TrustAnchor::from_pem_or_der(&vec![0u8; MAX_CERT_SIZE + 1]);
        assert!(matches!(result, Err(AgentError::CertParse(_))));
    }

    #[test]
    fn test_rejects_bundle() {
        let first = self_signed("daemon.local");
        let second = self_signed("other.local");
        let bundle = format!("{}{}", first.pem, second.pem);

        let result = TrustAnchor::from_pem_or_der(bundle.as_bytes());
        assert!(matches!(result, Err(AgentError::CertParse(msg)) if msg.contains("exactly one")));
    }

    #[test]
    fn test_rejects_trailing_der_bytes() {
        let cert = self_signed("daemon.local");
        let mut der = cert.der.as_ref().to_vec();
        der.extend_from_slice(&[0x00, 0x01]);

        let result = TrustAnchor::from_pem_or_der(&der);
        assert!(matches!(result, Err(AgentError::CertParse(msg)) if msg.contains("trailing")));
    }

    #[test]
    fn test_rejects_non_certificate_pem() {
        let cert = self_signed("daemon.local");
        let key_pem = cert.key_pair.serialize_pem();

        let result = TrustAnchor::from_pem_or_der(key_pem.as_bytes());
        assert!(matches!(result, Err(AgentError::CertParse(_))));
    }
}

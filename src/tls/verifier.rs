//! Server certificate verifier restricted to the pinned daemon certificate.
//!
//! Uses rustls 0.23+ with a single-entry root store.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::trust::TrustAnchor;

/// Certificate verifier whose only root of trust is the pinned certificate.
///
/// Hostname checking follows the pinned-address rule: the TLS server name
/// must equal the configured daemon address. Once it does, a certificate
/// whose SAN does not list that address is still accepted; every other
/// WebPKI check (chain to the pin, validity period, signatures) applies.
#[derive(Debug)]
pub struct PinnedServerVerifier {
    inner: Arc<WebPkiServerVerifier>,
    pinned_host: String,
}

impl PinnedServerVerifier {
    /// Builds a verifier trusting only `anchor`, pinned to `pinned_host`.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Handshake` if the anchor cannot be used as a
    /// root or the provider rejects the verifier setup.
    pub fn new(
        anchor: &TrustAnchor,
        pinned_host: impl Into<String>,
        provider: Arc<CryptoProvider>,
    ) -> Result<Arc<Self>> {
        let mut roots = RootCertStore::empty();
        roots.add(anchor.certificate().clone()).map_err(|e| {
            AgentError::Handshake(format!("pinned certificate unusable as trust anchor: {}", e))
        })?;

        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| AgentError::Handshake(format!("failed to build verifier: {}", e)))?;

        Ok(Arc::new(Self {
            inner,
            pinned_host: pinned_host.into(),
        }))
    }

    /// Address the server name must match.
    pub fn pinned_host(&self) -> &str {
        &self.pinned_host
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let presented = server_name.to_str();
        if !presented.eq_ignore_ascii_case(&self.pinned_host) {
            warn!(
                "Server name '{}' does not match pinned daemon address '{}'",
                presented, self.pinned_host
            );
            return Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName,
            ));
        }

        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName))
            | Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForNameContext { .. },
            )) => {
                debug!(
                    "Certificate SAN does not list '{}'; accepted by pinned address",
                    presented
                );
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

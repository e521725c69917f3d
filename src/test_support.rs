//! Throw-away certificates for unit tests.

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::CertificateDer;

/// A generated certificate with its key.
pub(crate) struct TestCert {
    pub der: CertificateDer<'static>,
    pub pem: String,
    pub key_pair: KeyPair,
}

/// Generates a self-signed leaf certificate for `name`.
pub(crate) fn self_signed(name: &str) -> TestCert {
    let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
    params
        .distinguished_name
        .push(DnType::CommonName, "btlock test daemon");
    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();

    TestCert {
        der: CertificateDer::from(cert.der().to_vec()),
        pem: cert.pem(),
        key_pair,
    }
}

/// Generates a CA and a leaf for `name` signed by it.
pub(crate) fn ca_and_leaf(name: &str) -> (TestCert, TestCert) {
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "btlock test CA");
    let ca_key = KeyPair::generate().unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let mut leaf_params = CertificateParams::new(vec![name.to_string()]).unwrap();
    leaf_params
        .distinguished_name
        .push(DnType::CommonName, "btlock test daemon");
    let leaf_key = KeyPair::generate().unwrap();
    let leaf_cert = leaf_params
        .signed_by(&leaf_key, &ca_cert, &ca_key)
        .unwrap();

    (
        TestCert {
            der: CertificateDer::from(ca_cert.der().to_vec()),
            pem: ca_cert.pem(),
            key_pair: ca_key,
        },
        TestCert {
            der: CertificateDer::from(leaf_cert.der().to_vec()),
            pem: leaf_cert.pem(),
            key_pair: leaf_key,
        },
    )
}

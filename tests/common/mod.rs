//! Shared helpers for integration tests.
//!
//! - throw-away certificates generated with rcgen
//! - a local TLS daemon stub answering `/checkForAuthToken`

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

// ============================================================================
// Certificates
// ============================================================================

/// A generated certificate with its key.
pub struct TestCert {
    pub der: CertificateDer<'static>,
    pub pem: String,
    pub key_pair: KeyPair,
}

impl TestCert {
    /// Writes the PEM form into `dir` and returns its path.
    pub fn write_pem(&self, dir: &std::path::Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, &self.pem).unwrap();
        path
    }
}

/// Self-signed certificate for `name`.
pub fn self_signed(name: &str) -> TestCert {
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

/// A CA and a leaf for `name` signed by it.
pub fn ca_and_leaf(name: &str) -> (TestCert, TestCert) {
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
    let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

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

// ============================================================================
// Daemon stub
// ============================================================================

/// How the stub answers a request.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// `200 OK` with one `foundBT` header per value
    Verdict(Vec<String>),
    /// Raw bytes written after the request is read
    Raw(String),
    /// Read the request and never answer
    Stall,
}

impl Behavior {
    pub fn verdict(values: &[&str]) -> Self {
        Self::Verdict(values.iter().map(|v| v.to_string()).collect())
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    accepted: AtomicUsize,
    closed: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

/// TLS daemon stub on 127.0.0.1.
pub struct TestDaemon {
    addr: SocketAddr,
    stats: Arc<Stats>,
    task: JoinHandle<()>,
}

impl TestDaemon {
    /// Serves `chain` (leaf first) with the leaf's key.
    pub async fn start(chain: Vec<CertificateDer<'static>>, key: &KeyPair, behavior: Behavior) -> Self {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
        let config = ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(Stats::default());

        let task = tokio::spawn({
            let stats = Arc::clone(&stats);
            async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    stats.accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        acceptor.clone(),
                        tcp,
                        behavior.clone(),
                        Arc::clone(&stats),
                    ));
                }
            }
        });

        Self { addr, stats, task }
    }

    /// Self-signed daemon answering with the given `foundBT` values.
    pub async fn with_verdict(cert: &TestCert, values: &[&str]) -> Self {
        Self::start(
            vec![cert.der.clone()],
            &cert.key_pair,
            Behavior::verdict(values),
        )
        .await
    }

    /// `127.0.0.1:{port}`
    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    /// Connections accepted at TCP level.
    pub fn accepted(&self) -> usize {
        self.stats.accepted.load(Ordering::SeqCst)
    }

    /// Connections the stub saw end.
    pub fn closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    /// Raw request heads received so far.
    pub fn requests(&self) -> Vec<String> {
        self.stats.requests.lock().unwrap().clone()
    }

    /// Waits until `accepted() >= n`.
    pub async fn wait_accepted(&self, n: usize) {
        wait_until(|| self.accepted() >= n).await;
    }

    /// Waits until `closed() >= n`.
    pub async fn wait_closed(&self, n: usize) {
        wait_until(|| self.closed() >= n).await;
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(acceptor: TlsAcceptor, tcp: TcpStream, behavior: Behavior, stats: Arc<Stats>) {
    if let Ok(mut tls) = acceptor.accept(tcp).await {
        let mut head = Vec::new();
        let mut chunk = [0u8; 1024];
        let mut complete = false;
        while !complete {
            match tls.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    head.extend_from_slice(&chunk[..n]);
                    complete = head.windows(4).any(|w| w == b"\r\n\r\n");
                }
            }
        }

        if complete {
            stats
                .requests
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&head).into_owned());

            match behavior {
                Behavior::Verdict(values) => {
                    let mut response = String::from("HTTP/1.1 200 OK\r\n");
                    for value in values {
                        response.push_str(&format!("foundBT: {}\r\n", value));
                    }
                    response.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n");
                    let _ = tls.write_all(response.as_bytes()).await;
                    let _ = tls.shutdown().await;
                }
                Behavior::Raw(raw) => {
                    let _ = tls.write_all(raw.as_bytes()).await;
                    let _ = tls.shutdown().await;
                }
                Behavior::Stall => loop {
                    match tls.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                },
            }
        }
    }

    stats.closed.fetch_add(1, Ordering::SeqCst);
}

/// Polls `condition` for up to five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

//! Pinned daemon certificate handling.
//!
//! - `anchor`: the parsed certificate and its derived public key
//! - `store`: the holder the controller reads the current anchor from

pub mod anchor;
pub mod store;

pub use anchor::{TrustAnchor, MAX_CERT_SIZE};
pub use store::CertificateStore;

//! # snoopd-ca
//!
//! Project-scoped CA generation and on-demand per-hostname leaf certificate
//! issuance, with an in-memory LRU of issued leaves (spec §4.2).

mod issuer;

pub use issuer::{CaMaterial, CertificateAuthority, IssuedLeaf};

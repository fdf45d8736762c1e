//! CA generation and leaf issuance (spec §4.2, §9 "Certificate issuance").

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use snoopd_common::{Result, SnoopdError};
use tracing::{debug, info};

const CA_COMMON_NAME: &str = "snoopd local capture CA";
const SHARD_COUNT: usize = 16;

/// The CA's certificate and key, in DER form, ready to sign leaves or to be
/// persisted to disk.
pub struct CaMaterial {
    pub cert_der: Vec<u8>,
    pub cert_pem: String,
    cert: Certificate,
    key: KeyPair,
}

/// A leaf certificate issued for a single SNI hostname.
#[derive(Clone)]
pub struct IssuedLeaf {
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
}

/// Owns the project CA and a lock-striped LRU of issued leaves.
pub struct CertificateAuthority {
    data_dir: PathBuf,
    ca: CaMaterial,
    shards: Vec<Mutex<LruCache<String, Arc<IssuedLeaf>>>>,
}

impl CertificateAuthority {
    /// Loads the CA from `data_dir` if present, otherwise generates and
    /// persists a new one. `leaf_cache_capacity` bounds the total number of
    /// cached leaves, split evenly across shards.
    pub fn ensure(data_dir: &Path, leaf_cache_capacity: usize) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let key_path = data_dir.join("ca-key.pem");
        let cert_path = data_dir.join("ca.pem");

        let ca = if key_path.exists() && cert_path.exists() {
            load_ca(&key_path, &cert_path)?
        } else {
            let ca = generate_ca()?;
            persist_ca(&ca, &key_path, &cert_path)?;
            info!(path = %cert_path.display(), "generated project CA");
            ca
        };

        let per_shard = (leaf_cache_capacity / SHARD_COUNT).max(1);
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(LruCache::new(std::num::NonZeroUsize::new(per_shard).unwrap())))
            .collect();

        Ok(Self { data_dir: data_dir.to_path_buf(), ca, shards })
    }

    pub fn ca_cert_pem(&self) -> &str {
        &self.ca.cert_pem
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Issues (or returns a cached) leaf certificate for `host`.
    pub fn issue_leaf(&self, host: &str) -> Result<Arc<IssuedLeaf>> {
        let shard = &self.shards[shard_index(host)];
        if let Some(cached) = shard.lock().get(host) {
            debug!(host, "leaf cache hit");
            return Ok(cached.clone());
        }

        let leaf = Arc::new(sign_leaf(&self.ca, host)?);
        shard.lock().put(host.to_string(), leaf.clone());
        debug!(host, "issued new leaf certificate");
        Ok(leaf)
    }
}

fn shard_index(host: &str) -> usize {
    let mut hash: u64 = 14695981039346656037;
    for b in host.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash as usize) % SHARD_COUNT
}

fn generate_ca() -> Result<CaMaterial> {
    let mut params = CertificateParams::new(Vec::new())
        .map_err(|e| SnoopdError::CertIssue(format!("invalid CA params: {e}")))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, CA_COMMON_NAME);
    dn.push(DnType::OrganizationName, "snoopd");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let key = KeyPair::generate().map_err(|e| SnoopdError::CertIssue(format!("key generation failed: {e}")))?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| SnoopdError::CertIssue(format!("CA self-sign failed: {e}")))?;

    Ok(CaMaterial {
        cert_der: cert.der().to_vec(),
        cert_pem: cert.pem(),
        cert,
        key,
    })
}

fn persist_ca(ca: &CaMaterial, key_path: &Path, cert_path: &Path) -> Result<()> {
    write_owner_only(key_path, ca.key.serialize_pem().as_bytes())?;
    write_owner_only(cert_path, ca.cert_pem.as_bytes())?;
    Ok(())
}

fn load_ca(key_path: &Path, cert_path: &Path) -> Result<CaMaterial> {
    let key_pem = std::fs::read_to_string(key_path)?;
    let cert_pem = std::fs::read_to_string(cert_path)?;

    let key = KeyPair::from_pem(&key_pem)
        .map_err(|e| SnoopdError::CertIssue(format!("failed to parse CA key: {e}")))?;

    let mut der_reader = cert_pem.as_bytes();
    let cert_der = rustls_pemfile::certs(&mut der_reader)
        .next()
        .ok_or_else(|| SnoopdError::CertIssue("CA cert file has no PEM block".to_string()))?
        .map_err(|e| SnoopdError::CertIssue(format!("failed to parse CA cert: {e}")))?
        .to_vec();

    let params = CertificateParams::from_ca_cert_pem(&cert_pem)
        .map_err(|e| SnoopdError::CertIssue(format!("failed to re-derive CA params: {e}")))?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| SnoopdError::CertIssue(format!("failed to reconstruct CA signer: {e}")))?;

    Ok(CaMaterial { cert_der, cert_pem, cert, key })
}

fn sign_leaf(ca: &CaMaterial, host: &str) -> Result<IssuedLeaf> {
    let mut params = CertificateParams::new(vec![host.to_string()])
        .map_err(|e| SnoopdError::CertIssue(format!("invalid leaf params for {host}: {e}")))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, host);
    params.distinguished_name = dn;
    params.subject_alt_names = vec![SanType::DnsName(
        host.to_string()
            .try_into()
            .map_err(|_| SnoopdError::CertIssue(format!("invalid SNI hostname: {host}")))?,
    )];

    let leaf_key = KeyPair::generate()
        .map_err(|e| SnoopdError::CertIssue(format!("leaf key generation failed: {e}")))?;
    let cert = params
        .signed_by(&leaf_key, &ca.cert, &ca.key)
        .map_err(|e| SnoopdError::CertIssue(format!("failed to sign leaf for {host}: {e}")))?;

    Ok(IssuedLeaf { cert_der: cert.der().to_vec(), key_der: leaf_key.serialize_der() })
}

#[cfg(unix)]
fn write_owner_only(path: &Path, contents: &[u8]) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generates_and_persists_ca_on_first_use() {
        let dir = tempdir().unwrap();
        let ca = CertificateAuthority::ensure(dir.path(), 512).unwrap();
        assert!(dir.path().join("ca-key.pem").exists());
        assert!(dir.path().join("ca.pem").exists());
        assert!(ca.ca_cert_pem().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn reloads_existing_ca_on_second_call() {
        let dir = tempdir().unwrap();
        let first = CertificateAuthority::ensure(dir.path(), 512).unwrap();
        let second = CertificateAuthority::ensure(dir.path(), 512).unwrap();
        assert_eq!(first.ca_cert_pem(), second.ca_cert_pem());
    }

    #[test]
    fn leaf_issuance_is_cached_per_host() {
        let dir = tempdir().unwrap();
        let ca = CertificateAuthority::ensure(dir.path(), 512).unwrap();
        let a = ca.issue_leaf("example.com").unwrap();
        let b = ca.issue_leaf("example.com").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_hosts_get_different_leaves() {
        let dir = tempdir().unwrap();
        let ca = CertificateAuthority::ensure(dir.path(), 512).unwrap();
        let a = ca.issue_leaf("a.example.com").unwrap();
        let b = ca.issue_leaf("b.example.com").unwrap();
        assert_ne!(a.cert_der, b.cert_der);
    }
}

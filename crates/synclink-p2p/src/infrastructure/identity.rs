//! Node identity: private key, self-signed certificate and digest.
//!
//! A node is identified by its certificate.  There is no CA; the SHA-256 of
//! the certificate DER is the node's digest, and that is what peers compare.
//!
//! On first start no identity exists yet, so [`NodeKey::load_or_generate`]
//! creates an ECDSA P-256 self-signed certificate and stores it as PEM:
//!
//! ```text
//! identity/
//!   cert.pem   (0644)
//!   key.pem    (0600 on Unix)
//! ```
//!
//! Later starts load the same files, so the digest is stable across restarts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use sha2::{Digest, Sha256};
use synclink_core::{NodeDigest, DIGEST_LEN};
use thiserror::Error;
use tracing::info;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Subject alternative name put into generated certificates.
const GENERATED_SAN: &str = "synclink.node";

/// Errors while loading or creating the node identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed PEM data: {0}")]
    Pem(#[source] io::Error),

    #[error("no certificate found in PEM data")]
    MissingCertificate,

    #[error("no private key found in PEM data")]
    MissingPrivateKey,

    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),
}

/// The node's TLS credential and the digest derived from it.
#[derive(Debug)]
pub struct NodeKey {
    certificate: CertificateDer<'static>,
    private_key: PrivateKeyDer<'static>,
    digest: NodeDigest,
}

impl NodeKey {
    /// Parses a PEM certificate and a PEM private key (PKCS#8, PKCS#1 or SEC1).
    ///
    /// Only the first certificate in `cert_pem` is used.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MissingCertificate`] /
    /// [`IdentityError::MissingPrivateKey`] when a section is absent and
    /// [`IdentityError::Pem`] when it cannot be parsed.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, IdentityError> {
        let certificate = rustls_pemfile::certs(&mut &cert_pem[..])
            .next()
            .ok_or(IdentityError::MissingCertificate)?
            .map_err(IdentityError::Pem)?;
        let private_key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(IdentityError::Pem)?
            .ok_or(IdentityError::MissingPrivateKey)?;
        let digest = certificate_digest(&certificate);
        Ok(Self {
            certificate,
            private_key,
            digest,
        })
    }

    /// Generates a fresh self-signed identity, returning it with its PEM
    /// encodings `(cert_pem, key_pem)`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Generate`] if key generation fails.
    pub fn generate() -> Result<(Self, String, String), IdentityError> {
        let certified = rcgen::generate_simple_self_signed(vec![GENERATED_SAN.to_string()])?;
        let cert_pem = certified.cert.pem();
        let key_pem = certified.key_pair.serialize_pem();
        let key = Self::from_pem(cert_pem.as_bytes(), key_pem.as_bytes())?;
        Ok((key, cert_pem, key_pem))
    }

    /// Loads the identity from `cert_path` / `key_path`, generating and
    /// persisting a new one when either file is missing.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] on I/O, parse or generation failure.
    pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<Self, IdentityError> {
        if cert_path.exists() && key_path.exists() {
            let cert_pem = read(cert_path)?;
            let key_pem = read(key_path)?;
            let key = Self::from_pem(&cert_pem, &key_pem)?;
            info!(digest = %key.digest, "loaded node identity from {}", cert_path.display());
            return Ok(key);
        }

        let (key, cert_pem, key_pem) = Self::generate()?;
        write(cert_path, cert_pem.as_bytes(), 0o644)?;
        write(key_path, key_pem.as_bytes(), 0o600)?;
        info!(digest = %key.digest, "generated new node identity at {}", cert_path.display());
        Ok(key)
    }

    pub fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.private_key
    }

    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    pub fn digest(&self) -> NodeDigest {
        self.digest
    }
}

/// SHA-256 of a certificate's DER encoding.
pub fn certificate_digest(cert: &CertificateDer<'_>) -> NodeDigest {
    let hash = Sha256::digest(cert.as_ref());
    let mut bytes = [0u8; DIGEST_LEN];
    bytes.copy_from_slice(&hash);
    NodeDigest::new(bytes)
}

fn read(path: &Path) -> Result<Vec<u8>, IdentityError> {
    fs::read(path).map_err(|source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, data: &[u8], mode: u32) -> Result<(), IdentityError> {
    let io_err = |source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, data).map_err(io_err)?;
    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_err)?;
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

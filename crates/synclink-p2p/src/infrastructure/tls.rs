//! TLS configuration for the listener and for outbound peer links.
//!
//! Peers authenticate each other by certificate digest, not by a CA chain.
//! Both sides therefore accept any well-formed certificate during the
//! handshake and still check the handshake signature against it, so the
//! remote really holds the key for the certificate it presented.  What that
//! certificate *means* (loopback, known peer) is decided after the handshake
//! from its digest.
//!
//! | Side     | Own certificate | Remote certificate                       |
//! |----------|-----------------|------------------------------------------|
//! | server   | always sent     | requested, optional, never chain-checked |
//! | client   | always sent     | required, never chain-checked            |
//!
//! Protocol versions: TLS 1.2 and TLS 1.3.  Nothing older is offered.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, DistinguishedName, ServerConfig, SignatureScheme};
use thiserror::Error;

use super::identity::NodeKey;

static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Server and client configurations built from one node identity.
#[derive(Clone)]
pub struct TlsConfigs {
    pub server: Arc<ServerConfig>,
    pub client: Arc<ClientConfig>,
}

/// Builds both TLS configurations for `key`.
///
/// # Errors
///
/// Returns [`TlsConfigError`] if rustls refuses the key or the protocol set.
pub fn build_tls_configs(key: &NodeKey) -> Result<TlsConfigs, TlsConfigError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    Ok(TlsConfigs {
        server: Arc::new(server_config(key, Arc::clone(&provider))?),
        client: Arc::new(client_config(key, provider)?),
    })
}

/// Listener side: our certificate plus an optional, unchecked client
/// certificate ("query peer").
pub fn server_config(
    key: &NodeKey,
    provider: Arc<CryptoProvider>,
) -> Result<ServerConfig, TlsConfigError> {
    let verifier = Arc::new(QueryPeerCertVerifier::new(Arc::clone(&provider)));
    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(PROTOCOL_VERSIONS)?
        .with_client_cert_verifier(verifier)
        .with_single_cert(vec![key.certificate().clone()], key.private_key().clone_key())?;
    Ok(config)
}

/// Dialing side: presents our certificate and accepts any server
/// certificate whose handshake signature verifies.
pub fn client_config(
    key: &NodeKey,
    provider: Arc<CryptoProvider>,
) -> Result<ClientConfig, TlsConfigError> {
    let verifier = Arc::new(DigestOnlyServerVerifier::new(Arc::clone(&provider)));
    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(PROTOCOL_VERSIONS)?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(vec![key.certificate().clone()], key.private_key().clone_key())?;
    Ok(config)
}

// ── Verifiers ─────────────────────────────────────────────────────────────────

/// Asks the client for a certificate but neither requires nor chain-checks it.
#[derive(Debug)]
pub struct QueryPeerCertVerifier {
    provider: Arc<CryptoProvider>,
}

impl QueryPeerCertVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ClientCertVerifier for QueryPeerCertVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Accepts any server certificate; identity is checked later by digest.
#[derive(Debug)]
pub struct DigestOnlyServerVerifier {
    provider: Arc<CryptoProvider>,
}

impl DigestOnlyServerVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for DigestOnlyServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

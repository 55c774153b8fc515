//! TLS configuration for the relay link and QUIC endpoints
//!
//! The relay ships with a self-signed certificate by default, so the
//! client offers two trust modes: the webpki root store for deployments
//! with real certificates, and certificate-fingerprint pinning for
//! self-signed relays. There is no "accept anything" mode - an unpinned
//! self-signed relay is a configuration error, not a fallback.

use crate::{NetworkError, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme};
use std::sync::Arc;

/// Generate a self-signed server config; returns the config and the
/// certificate DER (whose BLAKE3 hash peers may pin)
pub fn self_signed_server() -> Result<(ServerConfig, Vec<u8>)> {
    let certified = rcgen::generate_simple_self_signed(vec!["tallow-relay".to_string()])
        .map_err(|e| NetworkError::Tls(format!("certificate generation: {}", e)))?;

    let cert_der = certified.cert.der().to_vec();
    let key_der = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![CertificateDer::from(cert_der.clone())],
            key_der.into(),
        )
        .map_err(|e| NetworkError::Tls(format!("server config: {}", e)))?;

    Ok((config, cert_der))
}

/// Client config trusting the webpki root store
pub fn client_webpki() -> ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// Client config pinning a specific certificate by BLAKE3 fingerprint
pub fn client_pinned(fingerprint: [u8; 32]) -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PinnedCertVerifier::new(fingerprint)))
        .with_no_client_auth()
}

/// Fingerprint of a certificate for pinning
pub fn cert_fingerprint(cert_der: &[u8]) -> [u8; 32] {
    tallow_crypto::hash::blake3::hash(cert_der)
}

/// Verifier accepting exactly one certificate, identified by hash
#[derive(Debug)]
struct PinnedCertVerifier {
    fingerprint: [u8; 32],
    provider: rustls::crypto::CryptoProvider,
}

impl PinnedCertVerifier {
    fn new(fingerprint: [u8; 32]) -> Self {
        Self {
            fingerprint,
            provider: rustls::crypto::aws_lc_rs::default_provider(),
        }
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let actual = cert_fingerprint(end_entity.as_ref());
        if tallow_crypto::mem::constant_time_equal(&actual, &self.fingerprint) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "relay certificate does not match pinned fingerprint".into(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_server_builds() {
        let (config, cert) = self_signed_server().unwrap();
        assert!(!cert.is_empty());
        drop(config);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let (_, cert) = self_signed_server().unwrap();
        assert_eq!(cert_fingerprint(&cert), cert_fingerprint(&cert));
    }

    #[test]
    fn test_client_configs_build() {
        let _ = client_webpki();
        let _ = client_pinned([0u8; 32]);
    }
}

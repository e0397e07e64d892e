//! TLS material for the listener and for upstream connections.

use anyhow::Context;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Upstream verifier for `tls_skip_verify`: any certificate chain and name is
/// accepted, but handshake signatures are still checked against the
/// presented certificate.
#[derive(Debug)]
pub struct AcceptAnyCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyCertificate {
    pub fn new() -> Self {
        Self {
            algorithms: rustls::crypto::ring::default_provider().signature_verification_algorithms,
        }
    }
}

impl Default for AcceptAnyCertificate {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerCertVerifier for AcceptAnyCertificate {
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
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

fn open_pem(path: &str, what: &str) -> Result<BufReader<File>, anyhow::Error> {
    let file = File::open(path).with_context(|| format!("Failed to open {what} file '{path}'"))?;
    Ok(BufReader::new(file))
}

/// PEM certificate chain, leaf first.
pub fn read_certificates(path: &str) -> Result<Vec<CertificateDer<'static>>, anyhow::Error> {
    let mut reader = open_pem(path, "certificate")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate file '{path}'"))?;
    if certs.is_empty() {
        anyhow::bail!("No certificates found in certificate file: {path}");
    }
    Ok(certs)
}

/// First PKCS#8, PKCS#1 or SEC1 key in a PEM file.
pub fn read_private_key(path: &str) -> Result<PrivateKeyDer<'static>, anyhow::Error> {
    let mut reader = open_pem(path, "private key")?;
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("Failed to parse private key file '{path}'"))?
        .with_context(|| format!("No private key found in key file: {path}"))
}

/// Acceptor terminating TLS on the proxy listener.
pub fn create_tls_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor, anyhow::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("Listener TLS provider rejected the default protocol versions")?
        .with_no_client_auth()
        .with_single_cert(read_certificates(cert_path)?, read_private_key(key_path)?)
        .context("Failed to build listener TLS configuration")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

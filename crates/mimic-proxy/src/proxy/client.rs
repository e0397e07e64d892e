//! HTTP client creation and configuration.
//!
//! One pooled client is shared by every forwarded request. It speaks HTTP/1.1
//! over plain TCP or TLS depending on the target scheme.

use super::tls::{read_certificates, read_private_key, AcceptAnyCertificate};
use crate::config::UpstreamConfig;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper_rustls::ConfigBuilderExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::client::WantsClientCert;
use rustls::{ClientConfig, ConfigBuilder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Type alias for the HTTP client used by the proxy.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Create the shared upstream client.
pub fn create_http_client(config: &UpstreamConfig) -> Result<HttpClient, anyhow::Error> {
    // Both ring and aws-lc-rs are compiled in; pick one for the process.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut http_connector = HttpConnector::new();
    http_connector.set_connect_timeout(Some(Duration::from_millis(config.connect_timeout_ms)));
    http_connector.set_nodelay(true);
    http_connector.enforce_http(false);

    let builder = if config.tls_skip_verify {
        warn!("TLS certificate verification DISABLED for upstream connections (development/testing only)");
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate::new()))
    } else {
        ClientConfig::builder()
            .with_native_roots()
            .map_err(|e| anyhow::anyhow!("Failed to load native root certificates: {e}"))?
    };
    let tls_config = with_client_identity(builder, config)?;

    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    let client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(90))
        .build(https_connector);

    info!(
        "Upstream client configured (HTTP/1.1): connect_timeout={}ms, request_timeout={}ms",
        config.connect_timeout_ms, config.request_timeout_ms
    );

    Ok(client)
}

fn with_client_identity(
    builder: ConfigBuilder<ClientConfig, WantsClientCert>,
    config: &UpstreamConfig,
) -> Result<ClientConfig, anyhow::Error> {
    match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let certs = read_certificates(cert_path)?;
            let key = read_private_key(key_path)?;
            info!("Presenting client certificate {} to upstreams", cert_path);
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| anyhow::anyhow!("Invalid upstream client certificate: {e}"))
        }
        _ => Ok(builder.with_no_client_auth()),
    }
}

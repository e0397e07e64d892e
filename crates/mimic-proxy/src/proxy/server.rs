//! Listener and accept loop.

use super::convert::{request_from_hyper, response_to_hyper};
use super::diagnostics::diagnostic_response;
use super::handler::Simulator;
use super::loop_guard::LoopGuard;
use super::network::create_reusable_listener;
use super::tls::create_tls_acceptor;
use crate::config::{ListenConfig, MetricsConfig};
use crate::metrics::collect_metrics;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

/// Serves the simulator over HTTP/1.1, optionally behind TLS.
pub struct ProxyServer {
    simulator: Arc<Simulator>,
    guard: Arc<LoopGuard>,
    listen: ListenConfig,
}

impl ProxyServer {
    pub fn new(simulator: Arc<Simulator>, guard: Arc<LoopGuard>, listen: ListenConfig) -> Self {
        Self {
            simulator,
            guard,
            listen,
        }
    }

    /// Bind the configured listen address.
    pub fn bind(&self) -> Result<TcpListener, anyhow::Error> {
        let addr: SocketAddr = format!("{}:{}", self.listen.host, self.listen.port)
            .parse()
            .or_else(|_| format!("[{}]:{}", self.listen.host, self.listen.port).parse())
            .map_err(|e| anyhow::anyhow!("Invalid listen address '{}': {e}", self.listen.host))?;
        let listener = create_reusable_listener(addr)?;
        Ok(listener)
    }

    /// Bind and serve until `shutdown` fires.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<(), anyhow::Error> {
        let listener = self.bind()?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), anyhow::Error> {
        let local_addr = listener.local_addr()?;
        self.guard.register(local_addr);

        let tls_acceptor = match &self.listen.tls {
            Some(tls) => Some(create_tls_acceptor(&tls.cert_path, &tls.key_path)?),
            None => None,
        };
        let protocol = self.listen.protocol();

        info!("Listening on {}://{}", protocol, local_addr);
        info!("Mode: {}", self.simulator.mode());

        loop {
            let (stream, remote_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = shutdown.recv() => {
                    info!("Proxy listener on {} shutting down", local_addr);
                    return Ok(());
                }
            };
            if let Ok(local) = stream.local_addr() {
                self.guard.add_local_ips([local.ip()]);
            }

            let simulator = Arc::clone(&self.simulator);
            let guard = Arc::clone(&self.guard);
            let tls_acceptor = tls_acceptor.clone();

            tokio::spawn(async move {
                match tls_acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            serve_connection(tls_stream, simulator, guard, protocol, remote_addr)
                                .await
                        }
                        Err(err) => error!("TLS handshake failed from {}: {}", remote_addr, err),
                    },
                    None => serve_connection(stream, simulator, guard, protocol, remote_addr).await,
                }
            });
        }
    }
}

async fn serve_connection<I>(
    io: I,
    simulator: Arc<Simulator>,
    guard: Arc<LoopGuard>,
    protocol: &'static str,
    remote_addr: SocketAddr,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let simulator = Arc::clone(&simulator);
        let guard = Arc::clone(&guard);
        async move { handle(req, &simulator, &guard, protocol).await }
    });
    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .await
    {
        debug!("Error serving connection from {}: {}", remote_addr, err);
    }
}

async fn handle(
    req: hyper::Request<Incoming>,
    simulator: &Simulator,
    guard: &LoopGuard,
    protocol: &str,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
    let response = match request_from_hyper(req, protocol, guard).await {
        Ok(request) => simulator.handle_request(request).await,
        Err(e) => diagnostic_response(format!("Unable to read request: {e}")),
    };
    Ok(response_to_hyper(&response))
}

/// Serve Prometheus metrics on `GET /metrics` until `shutdown` fires.
pub async fn run_metrics_server(
    config: MetricsConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), anyhow::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics available on http://{}/metrics", addr);

    loop {
        let (stream, _) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.recv() => return Ok(()),
        };
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            let service = service_fn(|req: hyper::Request<Incoming>| async move {
                let response = if req.uri().path() == "/metrics" {
                    hyper::Response::new(Full::new(Bytes::from(collect_metrics())))
                } else {
                    let mut not_found = hyper::Response::new(Full::new(Bytes::from_static(b"Not Found")));
                    *not_found.status_mut() = hyper::StatusCode::NOT_FOUND;
                    not_found
                };
                Ok::<_, Infallible>(response)
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Metrics connection error: {}", e);
            }
        });
    }
}

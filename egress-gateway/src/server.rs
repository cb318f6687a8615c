//! Gateway listener and per-request relay
//!
//! Each accepted connection runs in its own task. The only state shared
//! between tasks is the immutable [`GatewaySettings`], so requests never
//! observe each other.

use crate::config::{CredentialInjection, GatewaySettings, Upstream};
use crate::error::{GatewayError, Result};
use crate::inject;
use crate::upstream;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type GatewayBody = BoxBody<Bytes, hyper::Error>;

struct RelayState {
    upstream: Upstream,
    injection: CredentialInjection,
    timeout: Duration,
}

/// A bound, not yet serving, gateway
pub struct Gateway {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<RelayState>,
}

impl Gateway {
    /// Bind the listen address. Once this returns the port accepts
    /// connections, so a successful bind is the readiness signal.
    pub async fn bind(settings: GatewaySettings) -> Result<Self> {
        let listener = TcpListener::bind(settings.listen)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: settings.listen,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        match settings.injection.fingerprint() {
            Some(fp) => info!(
                "Gateway on {} -> {} (injecting {}: {})",
                local_addr,
                settings.upstream.authority(),
                crate::config::INJECTION_HEADER,
                fp
            ),
            None => info!(
                "Gateway on {} -> {} (passthrough)",
                local_addr,
                settings.upstream.authority()
            ),
        }

        Ok(Self {
            listener,
            local_addr,
            state: Arc::new(RelayState {
                upstream: settings.upstream,
                injection: settings.injection,
                timeout: settings.timeout,
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve on a background task
    pub fn spawn(self) -> GatewayHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let local_addr = self.local_addr;
        let task = tokio::spawn(self.serve(shutdown_rx));
        GatewayHandle {
            local_addr,
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Accept connections until `shutdown` turns true or its sender drops
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("Accepted connection from {}", peer);
                            tokio::spawn(serve_connection(stream, peer, self.state.clone()));
                        }
                        Err(e) => warn!("Failed to accept connection: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Gateway on {} shutting down", self.local_addr);
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Lifecycle handle for a spawned gateway
pub struct GatewayHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl GatewayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the serve task to end on its own
    pub async fn join(&mut self) -> Result<()> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(GatewayError::Task(e.to_string())),
        }
    }

    /// Stop accepting and wait for the serve task.
    ///
    /// Connections already accepted finish on their own tasks.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.join().await
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, state: Arc<RelayState>) {
    let _ = stream.set_nodelay(true);
    let service = service_fn(move |req| handle(req, state.clone()));

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!("Connection from {} ended with error: {}", peer, e);
    }
}

async fn handle(
    req: Request<Incoming>,
    state: Arc<RelayState>,
) -> std::result::Result<Response<GatewayBody>, Infallible> {
    if req.method() == Method::OPTIONS {
        return Ok(preflight_response());
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match forward(req, &state).await {
        Ok(response) => response,
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                warn!("{} {} failed: {}", method, path, e);
            } else {
                debug!("{} {} rejected: {}", method, path, e);
            }
            error_response(status, &e.to_string())
        }
    };

    debug!("{} {} -> {}", method, path, response.status());
    Ok(response)
}

async fn forward(req: Request<Incoming>, state: &RelayState) -> Result<Response<GatewayBody>> {
    let (mut parts, body) = req.into_parts();
    inject::rewrite_request(&mut parts, &state.upstream, &state.injection)?;
    let req = Request::from_parts(parts, body);

    let response = tokio::time::timeout(state.timeout, upstream::send(&state.upstream, req))
        .await
        .map_err(|_| GatewayError::Timeout(state.timeout))??;

    let (mut parts, body) = response.into_parts();
    inject::strip_response_headers(&mut parts.headers);
    Ok(Response::from_parts(parts, body.boxed()))
}

fn full_body(content: impl Into<Bytes>) -> GatewayBody {
    Full::new(content.into())
        .map_err(|never| match never {})
        .boxed()
}

fn preflight_response() -> Response<GatewayBody> {
    let mut response = Response::new(full_body(Bytes::new()));
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    response
}

fn error_response(status: StatusCode, message: &str) -> Response<GatewayBody> {
    let mut response = Response::new(full_body(format!("{}\n", message)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_headers() {
        let response = preflight_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
        assert!(response
            .headers()
            .get(ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("POST"));
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(StatusCode::BAD_GATEWAY, "connect refused");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }
}

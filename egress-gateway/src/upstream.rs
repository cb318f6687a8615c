//! Single-attempt upstream exchange

use crate::config::Upstream;
use crate::error::{GatewayError, Result};
use hyper::body::{Body, Incoming};
use hyper::client::conn::http1;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Open a fresh connection to `upstream` and send `request` over it.
///
/// Returns once response headers arrive; the body streams afterwards
/// while the connection task keeps running.
pub async fn send<B>(upstream: &Upstream, request: Request<B>) -> Result<Response<Incoming>>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let authority = format!("{}:{}", upstream.host(), upstream.port());
    let stream = TcpStream::connect((upstream.host(), upstream.port()))
        .await
        .map_err(|source| GatewayError::Connect {
            authority: authority.clone(),
            source,
        })?;
    stream.set_nodelay(true)?;

    match upstream.tls() {
        Some(tls) => {
            let server_name = ServerName::try_from(upstream.host().to_string())
                .map_err(|_| GatewayError::Tls(format!("invalid server name {}", upstream.host())))?;
            let tls_stream = TlsConnector::from(tls.clone())
                .connect(server_name, stream)
                .await
                .map_err(|e| GatewayError::Tls(e.to_string()))?;
            exchange(tls_stream, request, authority).await
        }
        None => exchange(stream, request, authority).await,
    }
}

async fn exchange<IO, B>(io: IO, request: Request<B>, authority: String) -> Result<Response<Incoming>>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (mut sender, conn) = http1::handshake(TokioIo::new(io)).await?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Upstream connection to {} ended: {}", authority, e);
        }
    });

    Ok(sender.send_request(request).await?)
}

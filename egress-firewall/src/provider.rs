//! Dynamic provider IP ranges
//!
//! Providers such as GitHub publish their address ranges as a JSON
//! document keyed by category, each value an array of CIDR strings. The
//! fetch is best-effort: callers log failures and carry on.

use crate::error::{FirewallError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Limited};
use hyper::header::{ACCEPT, HOST, USER_AGENT};
use hyper::{Request, Uri};
use hyper_util::rt::TokioIo;
use ipnet::Ipv4Net;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Upper bound on the metadata document
const MAX_METADATA_BYTES: usize = 4 * 1024 * 1024;

/// Source of provider CIDR ranges
#[async_trait]
pub trait RangeSource: Send + Sync {
    async fn fetch(&self, categories: &[String]) -> Result<Vec<Ipv4Net>>;
}

/// Extract IPv4 ranges for the given categories from a metadata document.
///
/// IPv6 and malformed entries are skipped; a missing category contributes
/// nothing. Only a body that is not a JSON object is an error.
pub fn parse_ranges(body: &[u8], categories: &[String]) -> Result<Vec<Ipv4Net>> {
    let doc: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| FirewallError::Fetch(e.to_string()))?;
    let doc = doc
        .as_object()
        .ok_or_else(|| FirewallError::Fetch("metadata is not a JSON object".to_string()))?;

    let mut ranges = Vec::new();
    for category in categories {
        let Some(values) = doc.get(category).and_then(|v| v.as_array()) else {
            debug!("Category {} missing from metadata", category);
            continue;
        };

        for value in values.iter().filter_map(|v| v.as_str()) {
            match value.parse::<Ipv4Net>() {
                Ok(net) => {
                    if !ranges.contains(&net) {
                        ranges.push(net);
                    }
                }
                Err(_) if value.contains(':') => {}
                Err(_) => debug!("Skipping malformed range {:?} in {}", value, category),
            }
        }
    }

    Ok(ranges)
}

/// Fetches the metadata document over HTTP(S)
pub struct HttpRangeSource {
    uri: Uri,
    tls: Arc<ClientConfig>,
    timeout: Duration,
}

impl HttpRangeSource {
    pub fn new(url: &str, tls: Arc<ClientConfig>) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| FirewallError::Fetch(e.to_string()))?;
        if uri.host().is_none() {
            return Err(FirewallError::Fetch(format!("no host in {}", url)));
        }
        Ok(Self {
            uri,
            tls,
            timeout: Duration::from_secs(15),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn get(&self) -> Result<Bytes> {
        let host = self.uri.host().unwrap_or_default().to_string();
        let is_https = self.uri.scheme_str() == Some("https");
        let port = self.uri.port_u16().unwrap_or(if is_https { 443 } else { 80 });
        let path = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let request = Request::builder()
            .uri(path)
            .header(HOST, &host)
            .header(USER_AGENT, concat!("egress-firewall/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "application/json")
            .body(Empty::<Bytes>::new())
            .map_err(|e| FirewallError::Fetch(e.to_string()))?;

        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| FirewallError::Fetch(format!("connect {}:{}: {}", host, port, e)))?;

        let response = if is_https {
            let server_name = ServerName::try_from(host.clone())
                .map_err(|_| FirewallError::Fetch(format!("invalid server name {}", host)))?;
            let tls_stream = TlsConnector::from(self.tls.clone())
                .connect(server_name, stream)
                .await
                .map_err(|e| FirewallError::Fetch(format!("TLS: {}", e)))?;
            send(TokioIo::new(tls_stream), request).await?
        } else {
            send(TokioIo::new(stream), request).await?
        };

        if !response.status().is_success() {
            return Err(FirewallError::Fetch(format!(
                "{} returned {}",
                self.uri,
                response.status()
            )));
        }

        let body = Limited::new(response.into_body(), MAX_METADATA_BYTES)
            .collect()
            .await
            .map_err(|e| FirewallError::Fetch(e.to_string()))?;
        Ok(body.to_bytes())
    }
}

async fn send<T>(
    io: TokioIo<T>,
    request: Request<Empty<Bytes>>,
) -> Result<hyper::Response<hyper::body::Incoming>>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| FirewallError::Fetch(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            warn!("Metadata connection error: {}", e);
        }
    });

    sender
        .send_request(request)
        .await
        .map_err(|e| FirewallError::Fetch(e.to_string()))
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    async fn fetch(&self, categories: &[String]) -> Result<Vec<Ipv4Net>> {
        let body = tokio::time::timeout(self.timeout, self.get())
            .await
            .map_err(|_| FirewallError::Fetch(format!("timed out fetching {}", self.uri)))??;
        parse_ranges(&body, categories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_selected_categories() {
        let body = br#"{
            "verifiable_password_authentication": false,
            "web": ["140.82.112.0/20", "2a0a:a440::/29"],
            "api": ["192.30.252.0/22", "140.82.112.0/20"],
            "git": ["185.199.108.0/22"],
            "hooks": ["10.0.0.0/8"]
        }"#;

        let ranges = parse_ranges(body, &categories(&["web", "api", "git"])).unwrap();
        let rendered: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["140.82.112.0/20", "192.30.252.0/22", "185.199.108.0/22"]
        );
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let body = br#"{"web": ["not-a-cidr", "300.1.1.1/24", 42, "1.2.3.0/24"]}"#;
        let ranges = parse_ranges(body, &categories(&["web"])).unwrap();
        assert_eq!(ranges, vec!["1.2.3.0/24".parse::<Ipv4Net>().unwrap()]);
    }

    #[test]
    fn test_missing_category_is_empty() {
        let ranges = parse_ranges(b"{}", &categories(&["web"])).unwrap();
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_non_object_is_error() {
        assert!(parse_ranges(b"[1,2]", &categories(&["web"])).is_err());
        assert!(parse_ranges(b"<html>", &categories(&["web"])).is_err());
    }

    #[test]
    fn test_source_requires_host() {
        let tls = egress_core::tls::client_config().unwrap();
        assert!(HttpRangeSource::new("/meta", tls.clone()).is_err());
        assert!(HttpRangeSource::new("https://api.github.com/meta", tls).is_ok());
    }
}

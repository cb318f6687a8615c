use bytes::Bytes;
use egress_gateway::{CredentialInjection, Gateway, GatewayHandle, GatewaySettings, Upstream};
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1 as server_http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use zeroize::Zeroizing;

/// Loopback upstream that reports what it received in response headers
struct FakeUpstream {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

async fn echo(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let api_key = req
        .headers()
        .get("x-api-key")
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_else(|| "<absent>".to_string());
    let authorization = req
        .headers()
        .get("authorization")
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_else(|| "<absent>".to_string());
    let host = req
        .headers()
        .get("host")
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    let path = req.uri().to_string();
    let body = req.into_body().collect().await.unwrap().to_bytes();

    let response = Response::builder()
        .header("x-seen-api-key", api_key)
        .header("x-seen-authorization", authorization)
        .header("x-seen-host", host)
        .header("x-seen-path", path)
        .header("content-type", "text/event-stream")
        .body(Full::new(body))
        .unwrap();
    Ok(response)
}

impl FakeUpstream {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let _ = server_http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service_fn(echo))
                        .await;
                });
            }
        });

        Self { addr, hits }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn injection(secret: Option<&str>) -> CredentialInjection {
    let secret = secret.map(|s| Zeroizing::new(s.to_string()));
    CredentialInjection::from_secret(secret.as_ref()).unwrap()
}

async fn start_gateway(upstream: SocketAddr, secret: Option<&str>, timeout: Duration) -> GatewayHandle {
    let settings = GatewaySettings {
        listen: "127.0.0.1:0".parse().unwrap(),
        upstream: Upstream::plain("127.0.0.1", upstream.port()),
        timeout,
        injection: injection(secret),
    };
    Gateway::bind(settings).await.unwrap().spawn()
}

async fn send<B>(gateway: SocketAddr, request: Request<B>) -> Response<Incoming>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let stream = TcpStream::connect(gateway).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);
    sender.send_request(request).await.unwrap()
}

fn post(path: &str, headers: &[(&str, &str)]) -> Request<Full<Bytes>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("host", "localhost");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Full::new(Bytes::from_static(b"{}"))).unwrap()
}

fn seen(response: &Response<Incoming>, name: &str) -> String {
    response
        .headers()
        .get(name)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_secret_overwrites_client_header() {
    let upstream = FakeUpstream::start().await;
    let gateway = start_gateway(upstream.addr, Some("sk-configured"), Duration::from_secs(5)).await;

    let response = send(
        gateway.local_addr(),
        post("/v1/messages", &[("x-api-key", "sk-from-client")]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(seen(&response, "x-seen-api-key"), "sk-configured");
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_secret_added_when_absent() {
    let upstream = FakeUpstream::start().await;
    let gateway = start_gateway(upstream.addr, Some("sk-configured"), Duration::from_secs(5)).await;

    let response = send(gateway.local_addr(), post("/v1/messages", &[])).await;
    assert_eq!(seen(&response, "x-seen-api-key"), "sk-configured");
}

#[tokio::test]
async fn test_passthrough_preserves_client_auth() {
    let upstream = FakeUpstream::start().await;
    let gateway = start_gateway(upstream.addr, None, Duration::from_secs(5)).await;

    let response = send(
        gateway.local_addr(),
        post(
            "/v1/messages",
            &[("x-api-key", "sk-from-client"), ("authorization", "Bearer session")],
        ),
    )
    .await;
    assert_eq!(seen(&response, "x-seen-api-key"), "sk-from-client");
    assert_eq!(seen(&response, "x-seen-authorization"), "Bearer session");

    let response = send(gateway.local_addr(), post("/v1/messages", &[])).await;
    assert_eq!(seen(&response, "x-seen-api-key"), "<absent>");
}

#[tokio::test]
async fn test_host_and_path_forwarded() {
    let upstream = FakeUpstream::start().await;
    let gateway = start_gateway(upstream.addr, None, Duration::from_secs(5)).await;

    let response = send(gateway.local_addr(), post("/v1/messages?beta=true", &[])).await;
    assert_eq!(
        seen(&response, "x-seen-host"),
        format!("127.0.0.1:{}", upstream.addr.port())
    );
    assert_eq!(seen(&response, "x-seen-path"), "/v1/messages?beta=true");
    assert_eq!(seen(&response, "content-type"), "text/event-stream");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"{}");
}

#[tokio::test]
async fn test_concurrent_requests_see_only_configured_secret() {
    let upstream = FakeUpstream::start().await;
    let gateway = start_gateway(upstream.addr, Some("sk-configured"), Duration::from_secs(5)).await;
    let addr = gateway.local_addr();

    let mut tasks = Vec::new();
    for i in 0..16 {
        tasks.push(tokio::spawn(async move {
            let client_key = format!("sk-client-{}", i);
            let response = send(addr, post("/v1/messages", &[("x-api-key", client_key.as_str())])).await;
            seen(&response, "x-seen-api-key")
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), "sk-configured");
    }
    assert_eq!(upstream.hits(), 16);
}

#[tokio::test]
async fn test_options_answered_locally() {
    let upstream = FakeUpstream::start().await;
    let gateway = start_gateway(upstream.addr, Some("sk-configured"), Duration::from_secs(5)).await;

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/v1/messages")
        .header("host", "localhost")
        .body(Empty::<Bytes>::new())
        .unwrap();
    let response = send(gateway.local_addr(), request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(seen(&response, "access-control-allow-origin"), "*");
    assert_eq!(upstream.hits(), 0);
}

#[tokio::test]
async fn test_absolute_form_is_bad_request() {
    let upstream = FakeUpstream::start().await;
    let gateway = start_gateway(upstream.addr, None, Duration::from_secs(5)).await;

    let response = send(
        gateway.local_addr(),
        post("http://elsewhere.test/v1/messages", &[]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(upstream.hits(), 0);
}

#[tokio::test]
async fn test_dead_upstream_is_bad_gateway() {
    // Reserve a port, then free it so nothing listens there
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let gateway = start_gateway(dead, Some("sk-configured"), Duration::from_secs(5)).await;
    let response = send(gateway.local_addr(), post("/v1/messages", &[])).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(!String::from_utf8_lossy(&body).contains("sk-configured"));
}

#[tokio::test]
async fn test_silent_upstream_is_gateway_timeout() {
    // Accepts connections but never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            held.push(stream);
        }
    });

    let gateway = start_gateway(silent, None, Duration::from_millis(200)).await;
    let response = send(gateway.local_addr(), post("/v1/messages", &[])).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let upstream = FakeUpstream::start().await;
    let gateway = start_gateway(upstream.addr, None, Duration::from_secs(5)).await;
    let addr = gateway.local_addr();

    gateway.shutdown().await.unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}

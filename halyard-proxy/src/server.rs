//! Server module for handling incoming connections and forwarding each
//! request to the active backend of its service.
//!
//! The first path segment names the service: `/WEBHDFS/v1/tmp?op=LISTSTATUS`
//! is sent to `<active WEBHDFS URL>/v1/tmp?op=LISTSTATUS`. Request bodies are
//! buffered so they can be replayed against another backend on failover.

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use halyard_core::HaRouter;
use http::request::Parts;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::HOST;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time;

use crate::config::ServiceConfig;
use crate::dispatch::{dispatch, DispatchError, DispatchFailure};

type BackendClient = Client<HttpConnector, Full<Bytes>>;

/// Why a single forwarding attempt failed.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The backend URL and request path do not form a valid URI.
    #[error("invalid backend URI '{0}'")]
    InvalidUri(String),
    /// The outgoing request could not be built.
    #[error("failed to build backend request: {0}")]
    Request(http::Error),
    /// No response within the upstream timeout.
    #[error("backend request timed out")]
    Timeout,
    /// Connection or protocol failure talking to the backend.
    #[error("backend request failed: {0}")]
    Client(hyper_util::client::legacy::Error),
    /// The response body could not be read.
    #[error("failed to read backend response: {0}")]
    Body(hyper::Error),
    /// The backend answered with a status that means it is down.
    #[error("backend responded {}", .0.status())]
    Unavailable(Response<Full<Bytes>>),
}

/// Shared state of the request handlers.
#[derive(Clone)]
pub struct Gateway {
    router: Arc<HaRouter>,
    /// First configured URL per service, used when HA routing does not apply.
    direct_urls: Arc<HashMap<String, String>>,
    client: BackendClient,
    timeout: Duration,
}

impl Gateway {
    /// Creates the handler state for the configured services.
    pub fn new(
        router: Arc<HaRouter>,
        services: &BTreeMap<String, ServiceConfig>,
        timeout: Duration,
    ) -> Self {
        let direct_urls = services
            .iter()
            .filter_map(|(name, service)| Some((name.clone(), service.urls.first()?.clone())))
            .collect();
        Self {
            router,
            direct_urls: Arc::new(direct_urls),
            client: Client::builder(TokioExecutor::new()).build_http(),
            timeout,
        }
    }
}

/// Starts the proxy server on the given address.
pub async fn start_server(
    addr: SocketAddr,
    gateway: Gateway,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "listening");
    serve(listener, gateway).await
}

/// Accepts connections on `listener` until an accept error occurs.
pub async fn serve(
    listener: TcpListener,
    gateway: Gateway,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let gateway = gateway.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, gateway.clone()));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(peer = %peer, error = %err, "error serving connection");
            }
        });
    }
}

/// Resolves the target service and forwards the request with failover.
async fn handle_request(
    req: Request<Incoming>,
    gateway: Gateway,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let Some((service, rest)) = split_service(req.uri()) else {
        return Ok(error_response(StatusCode::NOT_FOUND, "request path names no service"));
    };

    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => return Ok(error_response(StatusCode::BAD_REQUEST, &err.to_string())),
    };

    let client = &gateway.client;
    let parts = &parts;
    let rest = rest.as_str();
    let timeout = gateway.timeout;
    let direct = gateway.direct_urls.get(&service).map(String::as_str);

    let result = dispatch(&gateway.router, &service, direct, move |url| {
        forward(client, parts, url, rest, body.clone(), timeout)
    })
    .await;

    Ok(match result {
        Ok(response) => response,
        // Surface the backend's own answer once the failover budget is spent.
        Err(DispatchError::Backend(ForwardError::Unavailable(response))) => response,
        Err(DispatchError::Backend(err)) => {
            tracing::warn!(service = %service, error = %err, "request failed");
            error_response(StatusCode::BAD_GATEWAY, &err.to_string())
        }
        Err(err @ DispatchError::NoBackend(_)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, &err.to_string())
        }
    })
}

/// One attempt against `base_url`.
async fn forward(
    client: &BackendClient,
    parts: &Parts,
    base_url: String,
    rest: &str,
    body: Bytes,
    timeout: Duration,
) -> Result<Response<Full<Bytes>>, DispatchFailure<ForwardError>> {
    let target = concat_url(&base_url, rest);
    let uri: Uri = target
        .parse()
        .map_err(|_| DispatchFailure::Fatal(ForwardError::InvalidUri(target.clone())))?;

    let mut request = Request::builder()
        .method(parts.method.clone())
        .uri(uri)
        .body(Full::new(body))
        .map_err(|err| DispatchFailure::Fatal(ForwardError::Request(err)))?;
    *request.headers_mut() = parts.headers.clone();
    request.headers_mut().remove(HOST);

    let response = match time::timeout(timeout, client.request(request)).await {
        Err(_) if parts.method.is_idempotent() => {
            return Err(DispatchFailure::Failover(ForwardError::Timeout))
        }
        // The backend may have applied a non-idempotent request before timing out.
        Err(_) => return Err(DispatchFailure::Fatal(ForwardError::Timeout)),
        Ok(Err(err)) if err.is_connect() => {
            return Err(DispatchFailure::Failover(ForwardError::Client(err)))
        }
        Ok(Err(err)) if parts.method.is_idempotent() => {
            return Err(DispatchFailure::Retry(ForwardError::Client(err)))
        }
        Ok(Err(err)) => return Err(DispatchFailure::Fatal(ForwardError::Client(err))),
        Ok(Ok(response)) => response,
    };

    let (head, body) = response.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|err| DispatchFailure::Retry(ForwardError::Body(err)))?
        .to_bytes();
    let response = Response::from_parts(head, Full::new(bytes));

    if is_backend_down(response.status()) {
        return Err(DispatchFailure::Failover(ForwardError::Unavailable(response)));
    }
    Ok(response)
}

fn is_backend_down(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Splits `/SERVICE/rest?query` into `("SERVICE", "/rest?query")`.
fn split_service(uri: &Uri) -> Option<(String, String)> {
    let path = uri.path().trim_start_matches('/');
    let (service, tail) = match path.find('/') {
        Some(index) => path.split_at(index),
        None => (path, ""),
    };
    if service.is_empty() {
        return None;
    }

    let mut rest = tail.to_string();
    if let Some(query) = uri.query() {
        rest.push('?');
        rest.push_str(query);
    }
    Some((service.to_string(), rest))
}

/// Joins a backend base URL and a request path with exactly one `/`.
fn concat_url(prefix: &str, suffix: &str) -> String {
    if suffix.is_empty() || suffix.starts_with('?') {
        return format!("{prefix}{suffix}");
    }
    match (prefix.ends_with('/'), suffix.starts_with('/')) {
        (true, true) => format!("{prefix}{}", suffix.trim_start_matches('/')),
        (false, false) => format!("{prefix}/{suffix}"),
        _ => format!("{prefix}{suffix}"),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use halyard_core::{HaDescriptor, HaServiceConfig};

    #[test]
    fn test_split_service() {
        let uri: Uri = "/WEBHDFS/v1/tmp?op=LISTSTATUS".parse().unwrap();
        assert_eq!(
            split_service(&uri),
            Some(("WEBHDFS".to_string(), "/v1/tmp?op=LISTSTATUS".to_string()))
        );

        let uri: Uri = "/OOZIE?x=1".parse().unwrap();
        assert_eq!(split_service(&uri), Some(("OOZIE".to_string(), "?x=1".to_string())));

        let uri: Uri = "/".parse().unwrap();
        assert_eq!(split_service(&uri), None);
    }

    #[test]
    fn test_concat_url() {
        assert_eq!(concat_url("http://nn:50070/webhdfs", "/v1"), "http://nn:50070/webhdfs/v1");
        assert_eq!(concat_url("http://nn:50070/webhdfs/", "/v1"), "http://nn:50070/webhdfs/v1");
        assert_eq!(concat_url("http://nn:50070/webhdfs", "v1"), "http://nn:50070/webhdfs/v1");
        assert_eq!(concat_url("http://nn:50070/", "v1"), "http://nn:50070/v1");
        assert_eq!(concat_url("http://nn:50070", "?op=1"), "http://nn:50070?op=1");
        assert_eq!(concat_url("http://nn:50070", ""), "http://nn:50070");
    }

    async fn spawn_backend(reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| async move {
                        let body = format!("{reply} {}", req.uri().path());
                        Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        format!("http://{addr}")
    }

    async fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_gateway_fails_over_to_live_backend() {
        let dead = closed_port_url().await;
        let live = spawn_backend("from-live").await;

        let descriptor = HaDescriptor::builder()
            .service("WEBHDFS", HaServiceConfig::default().with_failover_sleep_millis(0))
            .build();
        let router = Arc::new(HaRouter::new(descriptor));
        router.register_service("WEBHDFS", vec![dead.clone(), live.clone()]).unwrap();

        let services = BTreeMap::from([(
            "WEBHDFS".to_string(),
            ServiceConfig { urls: vec![dead.clone(), live.clone()] },
        )]);
        let gateway = Gateway::new(router.clone(), &services, Duration::from_secs(5));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, gateway));

        let client: Client<HttpConnector, Full<Bytes>> =
            Client::builder(TokioExecutor::new()).build_http();
        let uri: Uri = format!("http://{addr}/WEBHDFS/v1/tmp").parse().unwrap();
        let response = client.get(uri).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from("from-live /v1/tmp"));
        assert_eq!(router.get_active_url("WEBHDFS"), Some(live));

        let uri: Uri = format!("http://{addr}/UNKNOWN/x").parse().unwrap();
        let response = client.get(uri).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    /// Accepts connections and never answers.
    async fn spawn_silent_backend() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                held.push(stream);
            }
        });
        format!("http://{addr}")
    }

    fn request_parts(method: hyper::Method) -> Parts {
        Request::builder().method(method).uri("/x").body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_timeout_fails_over_only_idempotent_requests() {
        let silent = spawn_silent_backend().await;
        let client: BackendClient = Client::builder(TokioExecutor::new()).build_http();
        let timeout = Duration::from_millis(100);

        let get = request_parts(hyper::Method::GET);
        let result = forward(&client, &get, silent.clone(), "/x", Bytes::new(), timeout).await;
        assert!(matches!(result, Err(DispatchFailure::Failover(ForwardError::Timeout))));

        let post = request_parts(hyper::Method::POST);
        let body = Bytes::from("payload");
        let result = forward(&client, &post, silent, "/x", body, timeout).await;
        assert!(matches!(result, Err(DispatchFailure::Fatal(ForwardError::Timeout))));
    }
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    handler::Handler,
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::copy_bidirectional;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use ocrouter_core::{Backend, Config, Registry};

use crate::{api, dashboard};

type ProxyClient = hyper_util::client::legacy::Client<HttpConnector, Body>;

/// Request headers that belong to a single hop and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Clone)]
pub(crate) struct RouterState {
    pub(crate) registry: Arc<Registry>,
    pub(crate) config: Arc<Config>,
    client: ProxyClient,
}

/// Builds the router.
///
/// Everything goes through one fallback handler so the resolution order is
/// exactly: host-based proxy, then path-based proxy, then control API,
/// then dashboard.
pub fn make_app(registry: Arc<Registry>, config: Arc<Config>) -> Router {
    let mut connector = HttpConnector::new();
    connector.set_nodelay(true);
    connector.set_keepalive(Some(Duration::from_secs(60)));

    let client = hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(connector);

    let state = RouterState {
        registry,
        config,
        client,
    };

    Router::new()
        .fallback_service(handle_request.with_state(state))
        .layer(TraceLayer::new_for_http())
}

async fn handle_request(State(state): State<RouterState>, req: Request) -> Response {
    // Present when served through `into_make_service_with_connect_info`;
    // absent under test harnesses.
    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| req.uri().host().map(str::to_owned));

    if let Some(host) = host {
        if let Some(slug) = slug_from_host(&host, &state.config.username) {
            if let Some(backend) = state.registry.lookup(slug) {
                return proxy_to(&state, &backend, req, None, client_addr).await;
            }
        }
    }

    // Path-based routing runs before the control API on purpose: a backend
    // whose slug is literally "api" therefore shadows /api/*.
    if let Some((slug, remainder)) = slug_from_path(req.uri().path()) {
        if let Some(backend) = state.registry.lookup(&slug) {
            return proxy_to(&state, &backend, req, Some(remainder), client_addr).await;
        }
    }

    match req.uri().path() {
        "/api/backends" => api::handle_backends(&state, &req),
        "/api/health" => api::handle_health(&state),
        "/api/resolve" => api::handle_resolve(&state, &req),
        _ => dashboard::render(&state),
    }
}

/// Extracts the project slug from a Host header of the form
/// `{slug}-{username}.local`, with or without a port suffix.
fn slug_from_host<'a>(host: &'a str, username: &str) -> Option<&'a str> {
    let hostname = match host.rsplit_once(':') {
        Some((before, _)) => before,
        None => host,
    };

    let hostname = hostname.strip_suffix(".local")?;
    let suffix = format!("-{username}");
    let slug = hostname.strip_suffix(suffix.as_str())?;
    if slug.is_empty() {
        return None;
    }
    Some(slug)
}

/// Splits `/{slug}/rest` into the slug and the remainder path the backend
/// should see. A bare `/{slug}` maps to `/`.
fn slug_from_path(path: &str) -> Option<(String, String)> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return None;
    }

    match trimmed.split_once('/') {
        Some((slug, rest)) => Some((slug.to_string(), format!("/{rest}"))),
        None => Some((trimmed.to_string(), "/".to_string())),
    }
}

/// Forwards the request to a backend, rewriting the URL (and, for
/// path-based matches, the path) and streaming the response back.
async fn proxy_to(
    state: &RouterState,
    backend: &Backend,
    mut req: Request,
    path_override: Option<String>,
    client_addr: Option<SocketAddr>,
) -> Response {
    let authority = format!("127.0.0.1:{}", backend.port);
    let path = path_override.as_deref().unwrap_or_else(|| req.uri().path());
    let query = req
        .uri()
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();

    let uri: Uri = match format!("http://{authority}{path}{query}").parse() {
        Ok(uri) => uri,
        Err(e) => {
            error!(slug = %backend.slug, error = %e, "failed to build upstream URI");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
        }
    };

    debug!(
        slug = %backend.slug,
        method = %req.method(),
        uri = %uri,
        "proxying request"
    );

    if wants_websocket(req.headers()) {
        return websocket_bridge(state, req, uri).await;
    }

    rewrite_request(&mut req, &uri, &authority, client_addr);

    match state.client.request(req).await {
        // The upstream body flows through as it arrives, so server-sent
        // events and long polls reach the client without extra latency.
        Ok(response) => response.into_response(),
        Err(e) => {
            error!(
                slug = %backend.slug,
                target = %authority,
                error = %e,
                "upstream request failed"
            );
            (
                StatusCode::BAD_GATEWAY,
                format!("backend {:?} unavailable: {e}", backend.slug),
            )
                .into_response()
        }
    }
}

fn rewrite_request(req: &mut Request, uri: &Uri, authority: &str, client_addr: Option<SocketAddr>) {
    let original_host = req.headers().get(header::HOST).cloned();

    for name in HOP_BY_HOP {
        req.headers_mut().remove(*name);
    }

    if let Ok(value) = HeaderValue::from_str(authority) {
        req.headers_mut().insert(header::HOST, value);
    }
    if let Some(host) = original_host {
        req.headers_mut().insert("x-forwarded-host", host);
    }
    req.headers_mut()
        .insert("x-forwarded-proto", HeaderValue::from_static("http"));
    if let Some(addr) = client_addr {
        if let Ok(value) = HeaderValue::from_str(&addr.ip().to_string()) {
            req.headers_mut().append("x-forwarded-for", value);
        }
    }

    *req.uri_mut() = uri.clone();
}

fn wants_websocket(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"websocket"))
}

/// Bridges a WebSocket upgrade: performs the handshake against the backend
/// and, once both sides switch protocols, copies bytes in both directions.
async fn websocket_bridge(state: &RouterState, mut req: Request, uri: Uri) -> Response {
    let mut builder = Request::builder().uri(uri).method(req.method().clone());
    if let Some(headers) = builder.headers_mut() {
        *headers = req.headers().clone();
    }
    let upstream_req = match builder.body(Body::empty()) {
        Ok(upstream_req) => upstream_req,
        Err(e) => {
            error!(error = %e, "failed to build upgrade request");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to build upgrade request",
            )
                .into_response();
        }
    };

    let client_upgrade = hyper::upgrade::on(&mut req);

    match state.client.request(upstream_req).await {
        Ok(mut upstream_response) if upstream_response.status() == StatusCode::SWITCHING_PROTOCOLS => {
            let upstream_upgrade = hyper::upgrade::on(&mut upstream_response);

            tokio::spawn(async move {
                match tokio::try_join!(client_upgrade, upstream_upgrade) {
                    Ok((client_io, upstream_io)) => {
                        let mut client_io = TokioIo::new(client_io);
                        let mut upstream_io = TokioIo::new(upstream_io);
                        if let Err(e) = copy_bidirectional(&mut client_io, &mut upstream_io).await {
                            debug!(error = %e, "websocket bridge closed");
                        }
                    }
                    Err(e) => error!(error = %e, "websocket upgrade failed"),
                }
            });

            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
            *response.headers_mut() = upstream_response.headers().clone();
            response
        }
        Ok(upstream_response) => upstream_response.into_response(),
        Err(e) => {
            error!(error = %e, "upstream upgrade request failed");
            (StatusCode::BAD_GATEWAY, format!("upgrade failed: {e}")).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_parsing_requires_local_and_username() {
        assert_eq!(slug_from_host("myapp-alice.local", "alice"), Some("myapp"));
        assert_eq!(slug_from_host("myapp-alice.local:8080", "alice"), Some("myapp"));
        assert_eq!(
            slug_from_host("my-app-alice.local", "alice"),
            Some("my-app")
        );
        assert_eq!(slug_from_host("myapp-alice.example.com", "alice"), None);
        assert_eq!(slug_from_host("myapp-bob.local", "alice"), None);
        assert_eq!(slug_from_host("-alice.local", "alice"), None);
        assert_eq!(slug_from_host("localhost:8080", "alice"), None);
    }

    #[test]
    fn path_parsing_splits_first_segment() {
        assert_eq!(
            slug_from_path("/myapp/api/v1"),
            Some(("myapp".to_string(), "/api/v1".to_string()))
        );
        assert_eq!(
            slug_from_path("/myapp"),
            Some(("myapp".to_string(), "/".to_string()))
        );
        assert_eq!(
            slug_from_path("/myapp/"),
            Some(("myapp".to_string(), "/".to_string()))
        );
        assert_eq!(slug_from_path("/"), None);
        assert_eq!(slug_from_path(""), None);
    }
}

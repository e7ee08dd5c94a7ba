use axum::{
    extract::{Query, Request},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use ocrouter_core::{slugify, Backend, Config};

use crate::proxy::RouterState;

/// Wire shape shared by `/api/backends` entries and `/api/resolve` hits.
#[derive(Debug, Serialize)]
pub(crate) struct BackendInfo {
    slug: String,
    project_name: String,
    project_path: String,
    port: u16,
    version: String,
    domain: String,
    path_prefix: String,
    url: String,
    last_seen: DateTime<Utc>,
}

impl BackendInfo {
    fn new(backend: &Backend, config: &Config) -> Self {
        Self {
            slug: backend.slug.clone(),
            project_name: backend.project_name.clone(),
            project_path: backend.project_path.clone(),
            port: backend.port,
            version: backend.version.clone(),
            domain: config.domain_for(&backend.slug),
            path_prefix: format!("/{}/", backend.slug),
            // Always "localhost": the router does not know its externally
            // reachable address, so remote callers rewrite the host.
            url: format!("http://localhost:{}/{}/", config.listen_port, backend.slug),
            last_seen: backend.last_seen,
        }
    }
}

/// `GET /api/backends`: every discovered backend with its routing info.
pub(crate) fn handle_backends(state: &RouterState, req: &Request) -> Response {
    if req.method() != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
    }

    let items: Vec<BackendInfo> = state
        .registry
        .all()
        .iter()
        .map(|backend| BackendInfo::new(backend, &state.config))
        .collect();

    Json(items).into_response()
}

/// `GET /api/health`: the router's own liveness and backend count.
pub(crate) fn handle_health(state: &RouterState) -> Response {
    Json(json!({
        "healthy": true,
        "username": state.config.username,
        "backends": state.registry.len(),
    }))
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct ResolveQuery {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// `GET /api/resolve?path=...` or `?name=...`: single-project lookup so
/// external agents can map a project to its routing URL.
pub(crate) fn handle_resolve(state: &RouterState, req: &Request) -> Response {
    if req.method() != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
    }

    let query = Query::<ResolveQuery>::try_from_uri(req.uri())
        .map(|Query(query)| query)
        .unwrap_or_default();

    let (found, queried) = match (&query.path, &query.name) {
        (Some(path), _) if !path.is_empty() => (state.registry.lookup_by_path(path), path.clone()),
        (_, Some(name)) if !name.is_empty() => {
            (state.registry.lookup(&slugify(name)), name.clone())
        }
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                r#"missing "path" or "name" query parameter"#,
            )
                .into_response();
        }
    };

    match found {
        Some(backend) => Json(BackendInfo::new(&backend, &state.config)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "not_found",
                "query": queried,
                "detail": "no backend found for this project",
            })),
        )
            .into_response(),
    }
}

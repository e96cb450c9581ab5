//! Intercepting proxy
//!
//! Every request not handled by another route is resolved against the
//! upstream origin and run through the engine.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use fieldcache_core::{Command, CommandReply, CoreError, Intercepted};
use fieldcache_proxy::ResourceRequest;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

/// Response header naming where the body came from
pub const SOURCE_HEADER: &str = "x-fieldcache-source";

/// Headers describing the client connection, not the resource
const SKIPPED_HEADERS: &[&str] = &["host", "connection", "content-length", "transfer-encoding"];

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/html"))
}

/// Build the engine request for an inbound HTTP request
pub fn to_resource_request(
    state: &AppState,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<ResourceRequest, CoreError> {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = state.engine.config().resolve(path);
    let navigation = method == Method::GET && accepts_html(headers);

    let mut request = ResourceRequest::new(method, &url)?;
    for (name, value) in headers {
        if SKIPPED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    if !body.is_empty() {
        request = request.with_body(body);
    }
    if navigation {
        request = request.navigate();
    }

    Ok(request)
}

fn into_response(result: Intercepted) -> Response {
    let status = StatusCode::from_u16(result.response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::new();
    for (name, value) in &result.response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!("Dropping invalid response header {}", name),
        }
    }
    headers.insert(
        SOURCE_HEADER,
        HeaderValue::from_static(result.source.as_str()),
    );

    (status, headers, result.response.body).into_response()
}

/// Fallback handler
pub async fn intercept(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = to_resource_request(&state, method, &uri, &headers, body)?;

    match state.dispatcher.dispatch(Command::Intercept(request)).await? {
        CommandReply::Intercepted(result) => Ok(into_response(result)),
        other => Err(ApiError::Internal(format!("unexpected reply: {:?}", other))),
    }
}

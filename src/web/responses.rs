// Turns core results into axum responses.

use axum::body::Body;
use axum::http::header::{CONTENT_RANGE, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::TryStreamExt;
use serde_json::json;

use crate::core::proxy::{FetchStage, ProxiedFile, ProxyError};

/// Builds the response for a successfully proxied file. Headers whose value
/// can't be sent over HTTP are dropped with a warning.
pub fn file_response(file: ProxiedFile) -> Response {
    let status = StatusCode::from_u16(file.status.code()).unwrap_or(StatusCode::OK);

    let body = match file.body {
        Some(stream) => Body::from_stream(stream.inspect_err(|err| {
            // Headers are already out; all we can do is cut the connection.
            tracing::error!(error = %err, "File stream failed mid-response");
        })),
        None => Body::empty(),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in file.headers {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(name), value);
            }
            Err(_) => tracing::warn!(header = name, "Dropping header with invalid value"),
        }
    }
    response
}

/// `{"error": "<message>"}` with the given status.
pub fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::NotFound => StatusCode::NOT_FOUND,
            ProxyError::Forbidden => StatusCode::FORBIDDEN,
            ProxyError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ProxyError::Auth(_) | ProxyError::Upstream { .. } | ProxyError::Stream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The message shown to callers. Never includes upstream bodies or
    /// credential details.
    pub fn public_message(&self) -> &'static str {
        match self {
            ProxyError::NotFound => "File not found",
            ProxyError::Forbidden => "Access denied",
            ProxyError::RangeNotSatisfiable { .. } => "Requested range not satisfiable",
            ProxyError::Auth(_) => "Internal server error",
            ProxyError::Upstream {
                stage: FetchStage::Metadata,
                ..
            } => "Failed to fetch file metadata",
            ProxyError::Upstream {
                stage: FetchStage::Content,
                ..
            } => "Failed to fetch file content",
            ProxyError::Stream(_) => "Failed to stream file",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let mut response = json_error(self.status_code(), self.public_message());
        if let ProxyError::RangeNotSatisfiable { size } = self {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                response.headers_mut().insert(CONTENT_RANGE, value);
            }
        }
        response
    }
}

/// Plain-text 404 for unknown routes.
pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        "Not Found",
    )
        .into_response()
}

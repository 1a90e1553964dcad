//! Axum router for the proxy.
//!
//! | Path | Behavior |
//! |---|---|
//! | `GET /img/{id}` or `/img/{id}.{ext}` | proxies the file, honors `Range` |
//! | `HEAD /img/{id}` | same headers, content never fetched |
//! | `GET /img/{id}/redirect` | 301 to `/img/{id}.{ext}` |
//! | `GET /health` | liveness probe |
//! | `GET /` | usage document |
//!
//! Everything else is a plain-text 404.

use std::sync::Arc;

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::header::{AsHeaderName, HOST, IF_NONE_MATCH, LOCATION, RANGE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use super::responses::{file_response, json_error, not_found};
use crate::core::auth::AccessTokenProvider;
use crate::core::proxy::{FileProxyService, FileStore};

pub struct AppState<P: AccessTokenProvider, S: FileStore> {
    pub proxy: Arc<FileProxyService<P, S>>,
}

// Derived Clone would require P: Clone and S: Clone.
impl<P: AccessTokenProvider, S: FileStore> Clone for AppState<P, S> {
    fn clone(&self) -> Self {
        Self {
            proxy: Arc::clone(&self.proxy),
        }
    }
}

/// Build the axum router for the proxy.
pub fn router<P, S>(proxy: Arc<FileProxyService<P, S>>) -> Router
where
    P: AccessTokenProvider + 'static,
    S: FileStore + 'static,
{
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/img/{id}", get(proxy_file::<P, S>))
        .route("/img/{id}/redirect", get(redirect_file::<P, S>))
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .with_state(AppState { proxy })
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// `scheme://host` of the incoming request, as far as we can tell.
fn external_origin(headers: &HeaderMap) -> Option<String> {
    let host = header_str(headers, HOST)?;
    let scheme = header_str(headers, "x-forwarded-proto").unwrap_or("http");
    Some(format!("{}://{}", scheme, host))
}

/// A segment that doesn't decode (e.g. invalid UTF-8) names no file.
fn file_id_segment(path: Result<Path<String>, PathRejection>) -> Result<String, Response> {
    path.map(|Path(id)| id).map_err(|rejection| {
        tracing::debug!(error = %rejection, "Undecodable file path");
        json_error(StatusCode::NOT_FOUND, "File not found")
    })
}

async fn proxy_file<P, S>(
    State(state): State<AppState<P, S>>,
    method: Method,
    path: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
) -> Response
where
    P: AccessTokenProvider + 'static,
    S: FileStore + 'static,
{
    let id = match file_id_segment(path) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let range = header_str(&headers, RANGE);
    let if_none_match = header_str(&headers, IF_NONE_MATCH);

    let result = if method == Method::HEAD {
        state
            .proxy
            .handle_head_request(&id, range, if_none_match)
            .await
    } else {
        match if_none_match {
            Some(tag) => {
                state
                    .proxy
                    .handle_conditional_request(&id, range, Some(tag))
                    .await
            }
            None => state.proxy.handle_file_request(&id, range).await,
        }
    };

    match result {
        Ok(file) => {
            tracing::debug!(
                file_id = %id,
                range,
                content_length = file.header("content-length"),
                "Sending file"
            );
            file_response(file)
        }
        Err(err) => {
            match err.status_code() {
                StatusCode::INTERNAL_SERVER_ERROR => {
                    tracing::error!(file_id = %id, error = %err, "Error fetching file")
                }
                status => tracing::info!(
                    file_id = %id,
                    status = status.as_u16(),
                    error = %err,
                    "File request refused"
                ),
            }
            err.into_response()
        }
    }
}

async fn redirect_file<P, S>(
    State(state): State<AppState<P, S>>,
    path: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
) -> Response
where
    P: AccessTokenProvider + 'static,
    S: FileStore + 'static,
{
    let id = match file_id_segment(path) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.proxy.redirect_target(&id).await {
        Ok(path) => {
            let location = match external_origin(&headers) {
                Some(origin) => format!("{}{}", origin, path),
                None => path,
            };
            (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response()
        }
        Err(err) => {
            tracing::warn!(file_id = %id, error = %err, "Redirect lookup failed");
            json_error(StatusCode::NOT_FOUND, "File not found")
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

async fn service_info(headers: HeaderMap) -> Json<Value> {
    let origin = external_origin(&headers).unwrap_or_else(|| "http://localhost".to_string());
    Json(json!({
        "service": "Google Drive Proxy",
        "usage": "GET /img/{FILE_ID}.{EXT}",
        "example": format!("{}/img/1ABC123DEF456GHI789JKL.jpg", origin),
        "endpoints": {
            "/img/:fileId": "Proxy Google Drive file (backward compatible)",
            "/img/:fileId.ext": "Proxy Google Drive file with proper extension",
            "/img/:fileId/redirect": "Redirect to proper extension URL",
            "/health": "Health check",
        },
        "notionCompatible": true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::proxy::FileMetadata;
    use crate::infra::in_memory::{InMemoryFileStore, StaticTokenProvider};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::DateTime;
    use tower::ServiceExt;

    fn sample_content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 199) as u8).collect()
    }

    fn app_with(store: InMemoryFileStore) -> Router {
        router(Arc::new(FileProxyService::new(
            StaticTokenProvider::new("test-token"),
            store,
        )))
    }

    fn jpeg_store() -> InMemoryFileStore {
        let store = InMemoryFileStore::new();
        store.insert(
            "1ABC",
            FileMetadata {
                name: "pic.jpg".to_string(),
                mime_type: "image/jpeg".to_string(),
                size: 1000,
                modified_time: "2024-01-01T00:00:00Z".to_string(),
            },
            sample_content(1000),
        );
        store
    }

    fn app() -> Router {
        let store = jpeg_store();
        store.insert(
            "2PNG",
            FileMetadata {
                name: "diagram".to_string(),
                mime_type: "image/png".to_string(),
                size: 3,
                modified_time: "2024-02-02T10:00:00Z".to_string(),
            },
            vec![1, 2, 3],
        );
        store.forbid("locked");
        app_with(store)
    }

    async fn send(app: Router, request: Request<Body>) -> Response {
        app.oneshot(request).await.unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_proxies_file_with_notion_headers() {
        let response = send(app(), get("/img/1ABC.jpg")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["content-type"], "image/jpeg");
        assert_eq!(headers["content-length"], "1000");
        assert_eq!(headers["etag"], "\"1ABC-2024-01-01T00:00:00Z\"");
        assert_eq!(headers["last-modified"], "Mon, 01 Jan 2024 00:00:00 GMT");
        assert_eq!(headers["cache-control"], "public, max-age=31536000, immutable");
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "GET");
        assert_eq!(headers["access-control-allow-headers"], "Range");
        assert!(headers.get("content-range").is_none());
        assert_eq!(body_bytes(response).await, sample_content(1000));
    }

    #[tokio::test]
    async fn test_identifier_without_extension() {
        let response = send(app(), get("/img/1ABC")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["etag"], "\"1ABC-2024-01-01T00:00:00Z\"");
    }

    #[tokio::test]
    async fn test_range_request() {
        let request = Request::builder()
            .uri("/img/1ABC.jpg")
            .header("range", "bytes=100-299")
            .body(Body::empty())
            .unwrap();

        let response = send(app(), request).await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()["content-range"], "bytes 100-299/1000");
        assert_eq!(response.headers()["content-length"], "200");
        assert_eq!(body_bytes(response).await, sample_content(1000)[100..300]);
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let request = Request::builder()
            .uri("/img/1ABC")
            .header("range", "bytes=5000-")
            .body(Body::empty())
            .unwrap();

        let response = send(app(), request).await;

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()["content-range"], "bytes */1000");
    }

    #[tokio::test]
    async fn test_if_none_match_returns_304() {
        let request = Request::builder()
            .uri("/img/1ABC.jpg")
            .header("if-none-match", "\"1ABC-2024-01-01T00:00:00Z\"")
            .body(Body::empty())
            .unwrap();

        let response = send(app(), request).await;

        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_forbidden_files() {
        let missing = send(app(), get("/img/nothing.jpg")).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(missing).await, json!({ "error": "File not found" }));

        let forbidden = send(app(), get("/img/locked")).await;
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(forbidden).await, json!({ "error": "Access denied" }));
    }

    #[tokio::test]
    async fn test_token_failure_is_internal_error() {
        let store = InMemoryFileStore::new();
        let app = router(Arc::new(FileProxyService::new(
            StaticTokenProvider::failing(),
            store,
        )));

        let response = send(app, get("/img/1ABC")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Internal server error" })
        );
    }

    #[tokio::test]
    async fn test_redirect_to_extension_url() {
        let request = Request::builder()
            .uri("/img/2PNG/redirect")
            .header("host", "proxy.example.com")
            .body(Body::empty())
            .unwrap();

        let response = send(app(), request).await;

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()["location"],
            "http://proxy.example.com/img/2PNG.png"
        );
    }

    #[tokio::test]
    async fn test_redirect_honors_forwarded_proto() {
        let request = Request::builder()
            .uri("/img/1ABC/redirect")
            .header("host", "proxy.example.com")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();

        let response = send(app(), request).await;

        assert_eq!(
            response.headers()["location"],
            "https://proxy.example.com/img/1ABC.jpg"
        );
    }

    #[tokio::test]
    async fn test_redirect_for_unknown_file_is_404() {
        let response = send(app(), get("/img/nothing/redirect")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({ "error": "File not found" }));
    }

    #[tokio::test]
    async fn test_health() {
        let response = send(app(), get("/health")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        let timestamp = body["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_service_info() {
        let request = Request::builder()
            .uri("/")
            .header("host", "proxy.example.com")
            .body(Body::empty())
            .unwrap();

        let response = send(app(), request).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["notionCompatible"], true);
        assert_eq!(
            body["example"],
            "http://proxy.example.com/img/1ABC123DEF456GHI789JKL.jpg"
        );
        assert!(body["endpoints"]["/health"].is_string());
    }

    #[tokio::test]
    async fn test_content_open_failure_is_json_500() {
        let store = jpeg_store();
        store.fail_content_on_open("1ABC");

        let response = send(app_with(store), get("/img/1ABC.jpg")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Failed to fetch file content" })
        );
    }

    #[tokio::test]
    async fn test_mid_stream_failure_cuts_body_after_headers() {
        let store = jpeg_store();
        store.break_content_after("1ABC", 100);

        let response = send(app_with(store), get("/img/1ABC.jpg")).await;

        // Status and headers are already committed
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-length"], "1000");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await;
        assert!(body.is_err());
    }

    #[tokio::test]
    async fn test_head_returns_headers_only() {
        let request = Request::builder()
            .method("HEAD")
            .uri("/img/1ABC.jpg")
            .body(Body::empty())
            .unwrap();

        let response = send(app(), request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/jpeg");
        assert_eq!(response.headers()["content-length"], "1000");
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_head_does_not_open_content() {
        let store = jpeg_store();
        store.fail_content_on_open("1ABC");
        let request = Request::builder()
            .method("HEAD")
            .uri("/img/1ABC")
            .body(Body::empty())
            .unwrap();

        let response = send(app_with(store), request).await;

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_undecodable_identifier_is_404() {
        let response = send(app(), get("/img/%FF")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({ "error": "File not found" }));

        let redirect = send(app(), get("/img/%FF/redirect")).await;
        assert_eq!(redirect.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(redirect).await, json!({ "error": "File not found" }));
    }

    #[tokio::test]
    async fn test_unknown_routes_and_methods_are_404() {
        let unknown = send(app(), get("/files/1ABC")).await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_bytes(unknown).await, b"Not Found");

        let post = Request::builder()
            .method("POST")
            .uri("/img/1ABC")
            .body(Body::empty())
            .unwrap();
        let response = send(app(), post).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

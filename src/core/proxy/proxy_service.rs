// This is the file proxy - the business logic behind `/img/{id}`.
// It knows nothing about axum or reqwest: it asks a token provider for a
// credential, asks a file store for metadata and bytes, and decides which
// status, headers and body slice the caller gets.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;

use super::byte_range::{ByteRange, RangeRequest};
use super::content_type::{derive_content_type, extension_for_mime};
use super::file_id::FileId;
use super::range_stream::RangeStream;
use crate::core::auth::{AccessTokenProvider, AuthError};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Proxied files are addressed by id + modification time, so they never change.
pub const CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// What the backend tells us about a file. Fetched fresh on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// RFC 3339 timestamp exactly as the backend reported it.
    pub modified_time: String,
}

/// A file body, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProxyError>> + Send>>;

/// Which upstream call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    Metadata,
    Content,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStage::Metadata => f.write_str("metadata"),
            FetchStage::Content => f.write_str("content"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    /// 200, full body.
    Full,
    /// 206, body limited to the requested range.
    Partial,
    /// 304, the caller's cached copy is current. No body.
    NotModified,
}

impl ProxyStatus {
    pub fn code(&self) -> u16 {
        match self {
            ProxyStatus::Full => 200,
            ProxyStatus::Partial => 206,
            ProxyStatus::NotModified => 304,
        }
    }
}

/// Everything the HTTP layer needs to answer a proxied file request.
///
/// Header names are lowercase.
pub struct ProxiedFile {
    pub status: ProxyStatus,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<ByteStream>,
}

impl ProxiedFile {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for ProxiedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxiedFile")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("File not found")]
    NotFound,

    #[error("Access denied")]
    Forbidden,

    #[error("Requested range not satisfiable (file is {size} bytes)")]
    RangeNotSatisfiable { size: u64 },

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Any other non-success answer from the backend.
    #[error("Upstream {stage} request failed: {detail}")]
    Upstream { stage: FetchStage, detail: String },

    /// The content stream broke after it was opened.
    #[error("Stream error: {0}")]
    Stream(String),
}

// ============================================================================
// FILE STORE TRAIT (PORT)
// ============================================================================

/// The storage backend, as seen by the proxy.
///
/// Implementations translate backend 404/403 into `NotFound`/`Forbidden`
/// and any other failure into `Upstream` for the matching stage.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn fetch_metadata(
        &self,
        access_token: &str,
        id: &FileId,
    ) -> Result<FileMetadata, ProxyError>;

    /// Opens the full content of the file. Ranges are applied by the caller.
    async fn fetch_content(&self, access_token: &str, id: &FileId)
        -> Result<ByteStream, ProxyError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct FileProxyService<P: AccessTokenProvider, S: FileStore> {
    tokens: P,
    store: S,
}

impl<P: AccessTokenProvider, S: FileStore> FileProxyService<P, S> {
    pub fn new(tokens: P, store: S) -> Self {
        Self { tokens, store }
    }

    /// Proxies file `identifier` (any `.ext` suffix ignored), honoring an
    /// optional `Range` header.
    pub async fn handle_file_request(
        &self,
        identifier: &str,
        range_header: Option<&str>,
    ) -> Result<ProxiedFile, ProxyError> {
        self.handle_conditional_request(identifier, range_header, None)
            .await
    }

    /// Same as [`handle_file_request`](Self::handle_file_request), but answers
    /// 304 without touching the content when `If-None-Match` matches the ETag.
    pub async fn handle_conditional_request(
        &self,
        identifier: &str,
        range_header: Option<&str>,
        if_none_match: Option<&str>,
    ) -> Result<ProxiedFile, ProxyError> {
        self.respond(identifier, range_header, if_none_match, true)
            .await
    }

    /// Headers and status of the matching GET, without opening the content.
    pub async fn handle_head_request(
        &self,
        identifier: &str,
        range_header: Option<&str>,
        if_none_match: Option<&str>,
    ) -> Result<ProxiedFile, ProxyError> {
        self.respond(identifier, range_header, if_none_match, false)
            .await
    }

    async fn respond(
        &self,
        identifier: &str,
        range_header: Option<&str>,
        if_none_match: Option<&str>,
        include_body: bool,
    ) -> Result<ProxiedFile, ProxyError> {
        let id = FileId::parse(identifier).ok_or(ProxyError::NotFound)?;
        let credential = self.tokens.obtain_access_token().await?;
        let metadata = self
            .store
            .fetch_metadata(&credential.access_token, &id)
            .await?;

        let etag = entity_tag(&id, &metadata.modified_time);
        let mut headers = vec![
            (
                "content-type",
                derive_content_type(&metadata.mime_type, &metadata.name),
            ),
            ("cache-control", CACHE_CONTROL.to_string()),
            ("etag", etag.clone()),
        ];
        match http_date(&metadata.modified_time) {
            Some(date) => headers.push(("last-modified", date)),
            None => tracing::warn!(
                file_id = %id,
                modified_time = %metadata.modified_time,
                "Backend returned an unparseable modification time"
            ),
        }
        headers.extend([
            ("access-control-allow-origin", "*".to_string()),
            ("access-control-allow-methods", "GET".to_string()),
            ("access-control-allow-headers", "Range".to_string()),
        ]);

        if if_none_match.is_some_and(|value| etag_matches(value, &etag)) {
            tracing::debug!(file_id = %id, "ETag matched, answering 304");
            return Ok(ProxiedFile {
                status: ProxyStatus::NotModified,
                headers,
                body: None,
            });
        }

        let range = match range_header.and_then(|value| ByteRange::parse(value, metadata.size)) {
            Some(RangeRequest::Satisfiable(range)) => Some(range),
            Some(RangeRequest::Unsatisfiable) => {
                return Err(ProxyError::RangeNotSatisfiable {
                    size: metadata.size,
                })
            }
            None => None,
        };

        let status = match range {
            Some(range) => {
                headers.push(("content-length", range.byte_len().to_string()));
                headers.push(("content-range", range.content_range(metadata.size)));
                ProxyStatus::Partial
            }
            None => {
                headers.push(("content-length", metadata.size.to_string()));
                ProxyStatus::Full
            }
        };

        let body = if include_body {
            let content = self
                .store
                .fetch_content(&credential.access_token, &id)
                .await?;
            let body: ByteStream = match range {
                Some(range) => Box::pin(RangeStream::new(content, range)),
                None => content,
            };
            Some(body)
        } else {
            None
        };

        tracing::info!(
            file_id = %id,
            status = status.code(),
            size = metadata.size,
            with_body = include_body,
            "Proxying file"
        );

        Ok(ProxiedFile {
            status,
            headers,
            body,
        })
    }

    /// Path of the extension-bearing URL for `identifier`, e.g.
    /// `/img/1ABC.png`. The extension comes from the backend MIME type.
    pub async fn redirect_target(&self, identifier: &str) -> Result<String, ProxyError> {
        let id = FileId::parse(identifier).ok_or(ProxyError::NotFound)?;
        let credential = self.tokens.obtain_access_token().await?;
        let metadata = self
            .store
            .fetch_metadata(&credential.access_token, &id)
            .await?;

        Ok(format!("/img/{}.{}", id, extension_for_mime(&metadata.mime_type)))
    }
}

// ============================================================================
// HEADER HELPERS
// ============================================================================

/// `"<id>-<modifiedTime>"`, quotes included.
pub fn entity_tag(id: &FileId, modified_time: &str) -> String {
    format!("\"{}-{}\"", id, modified_time)
}

/// Formats an RFC 3339 timestamp as an RFC 1123 HTTP date.
pub fn http_date(rfc3339: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(rfc3339)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).format(HTTP_DATE_FORMAT).to_string())
}

/// Does an `If-None-Match` header value match `etag`? Weak tags compare equal.
fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

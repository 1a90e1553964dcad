// In-memory implementations of the core ports, for tests.
//
// They behave like the real Google implementations from the proxy's point of
// view (404/403 mapping, chunked content) without any network I/O, and they
// record what was asked of them so tests can assert on it.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use futures_util::{stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::core::auth::{AccessTokenProvider, AuthError, Credential, CREDENTIAL_LIFETIME_SECS};
use crate::core::proxy::{ByteStream, FetchStage, FileId, FileMetadata, FileStore, ProxyError};

/// Content is handed out in chunks of this size so range slicing is exercised
/// across chunk boundaries.
const CHUNK_SIZE: usize = 64;

/// Always returns the same bearer token (or always fails).
pub struct StaticTokenProvider {
    token: Option<String>,
    issued: AtomicUsize,
}

impl StaticTokenProvider {
    pub fn new(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            issued: AtomicUsize::new(0),
        }
    }

    /// A provider whose token endpoint always says no.
    pub fn failing() -> Self {
        Self {
            token: None,
            issued: AtomicUsize::new(0),
        }
    }

    pub fn tokens_issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn obtain_access_token(&self) -> Result<Credential, AuthError> {
        let Some(token) = &self.token else {
            return Err(AuthError::Rejected {
                status: 401,
                body: "invalid_client".to_string(),
            });
        };
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(Credential {
            issuer: "test@example.iam.gserviceaccount.com".to_string(),
            assertion: "header.payload.signature".to_string(),
            access_token: token.clone(),
            expires_at: Utc::now() + Duration::seconds(CREDENTIAL_LIFETIME_SECS),
        })
    }
}

/// How a content request for a given id goes wrong.
#[derive(Debug, Clone, Copy)]
enum ContentFailure {
    /// The backend refuses to open the content.
    OnOpen,
    /// The stream yields this many bytes, then breaks.
    AfterBytes(usize),
}

/// A file store backed by a HashMap.
#[derive(Default)]
pub struct InMemoryFileStore {
    files: Mutex<HashMap<String, (FileMetadata, Vec<u8>)>>,
    forbidden: Mutex<HashSet<String>>,
    content_failures: Mutex<HashMap<String, ContentFailure>>,
    /// Every id passed to `fetch_metadata` / `fetch_content`, in order.
    requests: Mutex<Vec<String>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str, metadata: FileMetadata, content: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(id.to_string(), (metadata, content));
    }

    /// Makes every request for `id` fail with 403.
    pub fn forbid(&self, id: &str) {
        self.forbidden.lock().unwrap().insert(id.to_string());
    }

    /// Metadata for `id` still works, but opening its content fails.
    pub fn fail_content_on_open(&self, id: &str) {
        self.content_failures
            .lock()
            .unwrap()
            .insert(id.to_string(), ContentFailure::OnOpen);
    }

    /// The content stream for `id` breaks after `bytes` bytes.
    pub fn break_content_after(&self, id: &str, bytes: usize) {
        self.content_failures
            .lock()
            .unwrap()
            .insert(id.to_string(), ContentFailure::AfterBytes(bytes));
    }

    pub fn requested_ids(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn lookup(&self, id: &FileId) -> Result<(FileMetadata, Vec<u8>), ProxyError> {
        self.requests.lock().unwrap().push(id.to_string());
        if self.forbidden.lock().unwrap().contains(id.as_str()) {
            return Err(ProxyError::Forbidden);
        }
        self.files
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or(ProxyError::NotFound)
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn fetch_metadata(
        &self,
        _access_token: &str,
        id: &FileId,
    ) -> Result<FileMetadata, ProxyError> {
        self.lookup(id).map(|(metadata, _)| metadata)
    }

    async fn fetch_content(&self, _access_token: &str, id: &FileId) -> Result<ByteStream, ProxyError> {
        let (_, content) = self.lookup(id)?;
        let failure = self.content_failures.lock().unwrap().get(id.as_str()).copied();

        let served = match failure {
            Some(ContentFailure::OnOpen) => {
                return Err(ProxyError::Upstream {
                    stage: FetchStage::Content,
                    detail: "502 Bad Gateway".to_string(),
                })
            }
            Some(ContentFailure::AfterBytes(bytes)) => &content[..bytes.min(content.len())],
            None => &content[..],
        };

        let mut chunks: Vec<Result<Bytes, ProxyError>> = served
            .chunks(CHUNK_SIZE)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if failure.is_some() {
            chunks.push(Err(ProxyError::Stream("connection reset".to_string())));
        }
        Ok(stream::iter(chunks).boxed())
    }
}

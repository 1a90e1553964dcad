use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

use crate::core::proxy::{ByteStream, FetchStage, FileId, FileMetadata, FileStore, ProxyError};

const METADATA_FIELDS: &str = "name,mimeType,size,modifiedTime";

/// Minimal Google Drive v3 client. It only exposes the two calls the proxy
/// needs: file metadata and raw media.
pub struct DriveFileStore {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

/// The subset of a Drive `File` resource we ask for.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    name: String,
    #[serde(default)]
    mime_type: String,
    /// Drive encodes int64 as a JSON string. Missing for Google-native docs.
    #[serde(default, deserialize_with = "string_or_number")]
    size: Option<u64>,
    modified_time: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl DriveFileStore {
    pub fn new(client: Client, base_url: Url, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }

    /// `{base}/files/{id}`, with the id percent-encoded as one path segment.
    fn file_url(&self, id: &FileId) -> Result<Url, ProxyError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProxyError::Upstream {
                stage: FetchStage::Metadata,
                detail: format!("invalid Drive API base URL {}", self.base_url),
            })?
            .pop_if_empty()
            .push("files")
            .push(id.as_str());
        Ok(url)
    }

    fn upstream(stage: FetchStage, detail: impl ToString) -> ProxyError {
        ProxyError::Upstream {
            stage,
            detail: detail.to_string(),
        }
    }
}

#[async_trait]
impl FileStore for DriveFileStore {
    async fn fetch_metadata(
        &self,
        access_token: &str,
        id: &FileId,
    ) -> Result<FileMetadata, ProxyError> {
        let response = self
            .client
            .get(self.file_url(id)?)
            .bearer_auth(access_token)
            .query(&[("fields", METADATA_FIELDS), ("supportsAllDrives", "true")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Self::upstream(FetchStage::Metadata, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(ProxyError::NotFound),
            StatusCode::FORBIDDEN => return Err(ProxyError::Forbidden),
            status if !status.is_success() => {
                let body = match response.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::debug!(error = %e, "Could not read Drive error body");
                        format!("<unreadable body: {}>", e)
                    }
                };
                tracing::warn!(file_id = %id, status = status.as_u16(), "Drive metadata request failed");
                return Err(Self::upstream(
                    FetchStage::Metadata,
                    format!("{}: {}", status, body),
                ));
            }
            _ => {}
        }

        let file: DriveFile = response
            .json()
            .await
            .map_err(|e| Self::upstream(FetchStage::Metadata, e))?;
        let size = file.size.ok_or_else(|| {
            Self::upstream(FetchStage::Metadata, "file has no binary content")
        })?;

        Ok(FileMetadata {
            name: file.name,
            mime_type: file.mime_type,
            size,
            modified_time: file.modified_time,
        })
    }

    async fn fetch_content(&self, access_token: &str, id: &FileId) -> Result<ByteStream, ProxyError> {
        let request = self
            .client
            .get(self.file_url(id)?)
            .bearer_auth(access_token)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send();

        // Only waiting for the response head is bounded; the body may take
        // as long as the file needs.
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| Self::upstream(FetchStage::Content, "timed out waiting for Drive"))?
            .map_err(|e| Self::upstream(FetchStage::Content, e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(file_id = %id, status = status.as_u16(), "Drive content request failed");
            return Err(Self::upstream(FetchStage::Content, status));
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| ProxyError::Stream(e.to_string()))
            .boxed();
        Ok(stream)
    }
}

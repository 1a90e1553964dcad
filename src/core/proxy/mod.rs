// File proxy - identifier handling, header derivation and range slicing.

pub mod byte_range;
pub mod content_type;
pub mod file_id;
pub mod proxy_service;
pub mod range_stream;

pub use file_id::FileId;
pub use proxy_service::{
    ByteStream, FetchStage, FileMetadata, FileProxyService, FileStore, ProxiedFile, ProxyError,
};

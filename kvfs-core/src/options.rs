//! Per-call option structs and the polymorphic `content` input, replacing
//! what a dynamically-typed caller would pass as a loose options object.
//!
//! Grounded on the teacher's `domain.rs`, where request parameters are
//! modeled as plain structs rather than builder chains.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;

use crate::error::FsError;
use crate::kv::Cursor;

/// A path-validation predicate, consulted once per call.
pub type ValidateAccess = Arc<dyn Fn(&[String]) -> bool + Send + Sync>;

pub fn always_allow() -> ValidateAccess {
    Arc::new(|_| true)
}

/// The three shapes `save`'s `content` may arrive in. The engine funnels
/// all three through `Chunker`.
pub enum Content {
    Bytes(Vec<u8>),
    Text(String),
    Stream(Pin<Box<dyn Stream<Item = std::io::Result<Vec<u8>>> + Send>>),
}

impl From<Vec<u8>> for Content {
    fn from(b: Vec<u8>) -> Self {
        Content::Bytes(b)
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

pub struct SaveOptions {
    pub path: Vec<String>,
    pub content: Content,
    pub metadata: Option<serde_json::Value>,
    pub chunks_per_second: Option<u64>,
    pub client_id: Option<String>,
    pub validate_access: ValidateAccess,
    pub max_client_id_concurrent_reqs: Option<u64>,
    pub max_file_size_bytes: Option<u64>,
    pub allowed_extensions: Vec<String>,
}

impl SaveOptions {
    pub fn new(path: Vec<String>, content: impl Into<Content>) -> Self {
        Self {
            path,
            content: content.into(),
            metadata: None,
            chunks_per_second: None,
            client_id: None,
            validate_access: always_allow(),
            max_client_id_concurrent_reqs: None,
            max_file_size_bytes: None,
            allowed_extensions: Vec::new(),
        }
    }
}

pub struct ReadOptions {
    pub path: Vec<String>,
    pub chunks_per_second: Option<u64>,
    pub client_id: Option<String>,
    pub validate_access: ValidateAccess,
    pub max_client_id_concurrent_reqs: Option<u64>,
}

impl ReadOptions {
    pub fn new(path: Vec<String>) -> Self {
        Self {
            path,
            chunks_per_second: None,
            client_id: None,
            validate_access: always_allow(),
            max_client_id_concurrent_reqs: None,
        }
    }
}

pub struct DeleteOptions {
    pub path: Vec<String>,
    pub chunks_per_second: Option<u64>,
    pub client_id: Option<String>,
    pub validate_access: ValidateAccess,
    pub max_client_id_concurrent_reqs: Option<u64>,
}

impl DeleteOptions {
    pub fn new(path: Vec<String>) -> Self {
        Self {
            path,
            chunks_per_second: None,
            client_id: None,
            validate_access: always_allow(),
            max_client_id_concurrent_reqs: None,
        }
    }
}

pub struct ReadDirOptions {
    pub path: Vec<String>,
    pub chunks_per_second: Option<u64>,
    pub max_dir_entries_per_second: Option<u64>,
    pub client_id: Option<String>,
    pub validate_access: ValidateAccess,
    pub max_client_id_concurrent_reqs: Option<u64>,
    pub pagination: bool,
    pub cursor: Option<Cursor>,
}

impl ReadDirOptions {
    pub fn new(path: Vec<String>) -> Self {
        Self {
            path,
            chunks_per_second: None,
            max_dir_entries_per_second: None,
            client_id: None,
            validate_access: always_allow(),
            max_client_id_concurrent_reqs: None,
            pagination: false,
            cursor: None,
        }
    }
}

pub struct DeleteDirOptions {
    pub path: Vec<String>,
    pub max_dir_entries_per_second: Option<u64>,
    pub client_id: Option<String>,
    pub validate_access: ValidateAccess,
    pub max_client_id_concurrent_reqs: Option<u64>,
}

impl DeleteDirOptions {
    pub fn new(path: Vec<String>) -> Self {
        Self {
            path,
            max_dir_entries_per_second: None,
            client_id: None,
            validate_access: always_allow(),
            max_client_id_concurrent_reqs: None,
        }
    }
}

/// Reads a content stream to completion and returns the concatenated bytes.
pub async fn read_stream(
    mut stream: Pin<Box<dyn Stream<Item = Result<Vec<u8>, FsError>> + Send>>,
) -> Result<Vec<u8>, FsError> {
    use futures::StreamExt;
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Reads a content stream to completion and UTF-8 decodes it.
pub async fn read_stream_as_string(
    stream: Pin<Box<dyn Stream<Item = Result<Vec<u8>, FsError>> + Send>>,
) -> Result<String, FsError> {
    let bytes = read_stream(stream).await?;
    String::from_utf8(bytes).map_err(|e| FsError::Substrate(crate::error::SubstrateError::new(e.to_string())))
}

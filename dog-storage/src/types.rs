use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::StorageResult;

/// Stream of bytes for blob content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Stream of named parts produced by a multipart request
pub type PartStream = Pin<Box<dyn Stream<Item = StorageResult<UploadPart>> + Send>>;

/// Addresses one stored object within a backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageIdentity {
    pub container: String,
    pub key: String,
}

impl StorageIdentity {
    pub fn new<C: Into<String>, K: Into<String>>(container: C, key: K) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for StorageIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

/// Normalized view of a backend's property response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    pub last_modified: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    /// Caller-assigned label, never the storage key
    pub logical_name: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl BlobMetadata {
    pub fn new<S: Into<String>>(logical_name: S, size_bytes: u64) -> Self {
        Self {
            last_modified: None,
            size_bytes,
            logical_name: logical_name.into(),
            status_code: 200,
            content_type: None,
            etag: None,
        }
    }

    pub fn with_last_modified(mut self, last_modified: Option<DateTime<Utc>>) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }
}

/// Time-bounded read capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedAccessGrant {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Parameters for signed URL issuance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrlRequest {
    /// Validity window measured from issuance
    pub ttl: Duration,
    /// How far the start of the window is backdated to absorb clock drift
    pub start_skew: Duration,
    /// Content-Disposition the backend should answer with
    pub content_disposition: Option<String>,
}

impl SignedUrlRequest {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            start_skew: Duration::ZERO,
            content_disposition: None,
        }
    }

    pub fn with_start_skew(mut self, skew: Duration) -> Self {
        self.start_skew = skew;
        self
    }

    pub fn with_content_disposition<S: Into<String>>(mut self, disposition: S) -> Self {
        self.content_disposition = Some(disposition.into());
        self
    }
}

/// Per-item failure recorded in a batch result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDescriptor {
    pub message: String,
    pub status_code: u16,
    pub logical_name: String,
    pub file_name: String,
}

/// Outcome of one property lookup in a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchEntry {
    Found(BlobMetadata),
    Failed(FailureDescriptor),
}

impl BatchEntry {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Found(meta) => meta.status_code,
            Self::Failed(failure) => failure.status_code,
        }
    }
}

/// Ordered mapping from logical name to lookup outcome.
///
/// Serializes as a JSON object in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    entries: Vec<(String, BatchEntry)>,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<S: Into<String>>(&mut self, logical_name: S, entry: BatchEntry) {
        self.entries.push((logical_name.into(), entry));
    }

    pub fn get(&self, logical_name: &str) -> Option<&BatchEntry> {
        self.entries
            .iter()
            .find(|(name, _)| name == logical_name)
            .map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BatchEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|(_, e)| !e.is_found()).count()
    }
}

impl Serialize for BatchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, entry) in &self.entries {
            map.serialize_entry(name, entry)?;
        }
        map.end()
    }
}

/// Progress notification emitted during a chunked upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub key: String,
    pub bytes_transferred: u64,
    pub parts_completed: u32,
    /// Unknown until the whole body has been read when no size was declared
    pub total_parts: Option<u32>,
}

/// Non-blocking progress channel handed to `chunked_upload`.
///
/// Reporting never waits on the observer; a dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    sender: Option<mpsc::UnboundedSender<UploadProgress>>,
}

impl ProgressReporter {
    /// Reporter with no observer attached
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Reporter plus the receiving half for the observer
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UploadProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    pub fn report(&self, progress: UploadProgress) {
        tracing::debug!(
            key = %progress.key,
            bytes = progress.bytes_transferred,
            parts = progress.parts_completed,
            total_parts = ?progress.total_parts,
            "upload progress"
        );
        if let Some(sender) = &self.sender {
            let _ = sender.send(progress);
        }
    }
}

/// One named segment of a multipart request
pub struct UploadPart {
    pub field_name: String,
    pub filename: Option<String>,
    pub declared_size: Option<u64>,
    pub body: ByteStream,
}

impl UploadPart {
    pub fn new<S: Into<String>>(field_name: S, body: ByteStream) -> Self {
        Self {
            field_name: field_name.into(),
            filename: None,
            declared_size: None,
            body,
        }
    }

    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }

    /// Only parts carrying a filename are uploaded
    pub fn is_file(&self) -> bool {
        self.filename.as_deref().map_or(false, |f| !f.is_empty())
    }
}

impl std::fmt::Debug for UploadPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPart")
            .field("field_name", &self.field_name)
            .field("filename", &self.filename)
            .field("declared_size", &self.declared_size)
            .finish_non_exhaustive()
    }
}

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub key: String,
    pub size_bytes: u64,
    pub etag: Option<String>,
    pub parts_uploaded: u32,
}

/// Options for uploading a local file
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub metadata: Vec<(String, String)>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

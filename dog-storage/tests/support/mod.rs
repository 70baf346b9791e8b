//! In-memory provider used by the integration tests.

#![allow(dead_code)]

pub mod http_stub;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dog_storage::{
    BlobMetadata, ByteStream, PartStream, ProgressReporter, SignedAccessGrant, SignedUrlRequest,
    StorageError, StorageProvider, StorageResult, StoreCapabilities, UploadOptions, UploadPart,
    UploadProgress, UploadReceipt,
};

pub const CONTAINER: &str = "reports";

/// Failure injected for a key or for uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    NotFound,
    Forbidden,
    Backend,
    Invalid,
}

impl Failure {
    fn to_error(self, key: &str) -> StorageError {
        match self {
            Self::NotFound => StorageError::not_found(key),
            Self::Forbidden => StorageError::forbidden("AuthorizationFailure"),
            Self::Backend => StorageError::backend_msg("connection reset by peer"),
            Self::Invalid => StorageError::invalid("signed URL validity exceeds the 7 day limit"),
        }
    }
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub exists: AtomicUsize,
    pub get_properties: AtomicUsize,
    pub read_content: AtomicUsize,
    pub issue_signed_url: AtomicUsize,
    pub chunked_upload: AtomicUsize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.exists.load(Ordering::SeqCst)
            + self.get_properties.load(Ordering::SeqCst)
            + self.read_content.load(Ordering::SeqCst)
            + self.issue_signed_url.load(Ordering::SeqCst)
            + self.chunked_upload.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeProvider {
    objects: Mutex<HashMap<String, Bytes>>,
    failures: Mutex<HashMap<String, Failure>>,
    delays: Mutex<HashMap<String, Duration>>,
    upload_failures: Mutex<HashMap<usize, Failure>>,
    signing_failures: Mutex<HashMap<String, Failure>>,
    pub calls: CallCounts,
    pub signed_requests: Mutex<Vec<SignedUrlRequest>>,
    pub uploaded_keys: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, key: &str, data: &'static [u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::from_static(data));
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Every call touching `key` fails
    pub fn fail(&self, key: &str, failure: Failure) {
        self.failures.lock().unwrap().insert(key.to_string(), failure);
    }

    /// Property lookups of `key` take this long
    pub fn delay(&self, key: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(key.to_string(), delay);
    }

    /// The nth upload (0-based) fails after reading its first chunk
    pub fn fail_upload(&self, nth: usize, failure: Failure) {
        self.upload_failures.lock().unwrap().insert(nth, failure);
    }

    /// Only signing `key` fails; it still exists
    pub fn fail_signing(&self, key: &str, failure: Failure) {
        self.signing_failures.lock().unwrap().insert(key.to_string(), failure);
    }

    fn check(&self, key: &str) -> StorageResult<()> {
        match self.failures.lock().unwrap().get(key) {
            Some(failure) => Err(failure.to_error(key)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StorageProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic().with_signed_urls()
    }

    async fn exists(&self, _container: &str, key: &str) -> StorageResult<bool> {
        self.calls.exists.fetch_add(1, Ordering::SeqCst);
        match self.check(key) {
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
            Ok(()) => Ok(self.objects.lock().unwrap().contains_key(key)),
        }
    }

    async fn get_properties(
        &self,
        _container: &str,
        key: &str,
        logical_name: &str,
    ) -> StorageResult<BlobMetadata> {
        self.calls.get_properties.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(key)?;
        let size = self
            .object(key)
            .ok_or_else(|| StorageError::not_found(key))?
            .len() as u64;
        Ok(BlobMetadata::new(logical_name, size)
            .with_last_modified(Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap())))
    }

    async fn read_content(&self, _container: &str, key: &str) -> StorageResult<ByteStream> {
        self.calls.read_content.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        let data = self.object(key).ok_or_else(|| StorageError::not_found(key))?;
        // hand the body out in small pieces to exercise ordering
        let chunks: Vec<Result<Bytes, std::io::Error>> = data
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn read_text(&self, container: &str, key: &str) -> StorageResult<String> {
        let mut body = self.read_content(container, key).await?;
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk?);
        }
        String::from_utf8(out).map_err(StorageError::backend)
    }

    async fn issue_signed_url(
        &self,
        container: &str,
        key: &str,
        request: &SignedUrlRequest,
    ) -> StorageResult<SignedAccessGrant> {
        self.calls.issue_signed_url.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        if let Some(failure) = self.signing_failures.lock().unwrap().get(key) {
            return Err(failure.to_error(key));
        }
        self.signed_requests.lock().unwrap().push(request.clone());
        let expires_at = Utc::now() + chrono::Duration::from_std(request.ttl).unwrap();
        Ok(SignedAccessGrant {
            url: format!("https://fake.blob/{}/{}?se={}", container, key, expires_at.timestamp()),
            expires_at,
        })
    }

    async fn chunked_upload(
        &self,
        _container: &str,
        key: &str,
        mut body: ByteStream,
        _declared_size: Option<u64>,
        progress: &ProgressReporter,
    ) -> StorageResult<UploadReceipt> {
        let nth = self.calls.chunked_upload.fetch_add(1, Ordering::SeqCst);
        let failure = self.upload_failures.lock().unwrap().get(&nth).copied();

        let mut data = Vec::new();
        let mut parts = 0u32;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if let Some(failure) = failure {
                return Err(failure.to_error(key));
            }
            data.extend_from_slice(&chunk);
            parts += 1;
            progress.report(UploadProgress {
                key: key.to_string(),
                bytes_transferred: data.len() as u64,
                parts_completed: parts,
                total_parts: None,
            });
        }
        if let Some(failure) = failure {
            return Err(failure.to_error(key));
        }

        let size = data.len() as u64;
        self.objects.lock().unwrap().insert(key.to_string(), Bytes::from(data));
        self.uploaded_keys.lock().unwrap().push(key.to_string());
        Ok(UploadReceipt {
            key: key.to_string(),
            size_bytes: size,
            etag: None,
            parts_uploaded: parts,
        })
    }

    async fn simple_upload(
        &self,
        _container: &str,
        _key: &str,
        _local_path: &Path,
        _options: &UploadOptions,
    ) -> StorageResult<UploadReceipt> {
        Err(StorageError::NotImplemented {
            operation: "simple_upload",
        })
    }
}

pub fn body_of(chunks: &[&'static [u8]]) -> ByteStream {
    let chunks: Vec<Result<Bytes, std::io::Error>> =
        chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
    Box::pin(futures::stream::iter(chunks))
}

pub fn file_part(filename: &str, chunks: &[&'static [u8]]) -> UploadPart {
    UploadPart::new("file", body_of(chunks)).with_filename(filename)
}

pub fn field_part(name: &str, value: &'static [u8]) -> UploadPart {
    UploadPart::new(name, body_of(&[value]))
}

pub fn parts(items: Vec<StorageResult<UploadPart>>) -> PartStream {
    Box::pin(futures::stream::iter(items))
}

pub async fn collect(mut body: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

use async_trait::async_trait;
use std::path::Path;

use crate::{
    BlobMetadata, ByteStream, ProgressReporter, SignedAccessGrant, SignedUrlRequest,
    StorageResult, UploadOptions, UploadReceipt,
};

/// Uniform contract every storage backend adapter implements.
///
/// Adapters normalize native errors into [`crate::StorageError`] kinds and
/// never retry or cache.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &'static str;

    /// Get provider capabilities
    fn capabilities(&self) -> StoreCapabilities;

    /// Check whether an object exists
    async fn exists(&self, container: &str, key: &str) -> StorageResult<bool>;

    /// Fetch normalized properties, labelled with the caller's logical name
    async fn get_properties(
        &self,
        container: &str,
        key: &str,
        logical_name: &str,
    ) -> StorageResult<BlobMetadata>;

    /// Open the object as a byte stream. Dropping the stream closes the
    /// underlying transport.
    async fn read_content(&self, container: &str, key: &str) -> StorageResult<ByteStream>;

    /// Read a whole object as UTF-8 text
    async fn read_text(&self, container: &str, key: &str) -> StorageResult<String>;

    /// Issue a time-limited read URL
    async fn issue_signed_url(
        &self,
        container: &str,
        key: &str,
        request: &SignedUrlRequest,
    ) -> StorageResult<SignedAccessGrant>;

    /// Upload a stream of unknown or declared length in parts
    async fn chunked_upload(
        &self,
        container: &str,
        key: &str,
        body: ByteStream,
        declared_size: Option<u64>,
        progress: &ProgressReporter,
    ) -> StorageResult<UploadReceipt>;

    /// Upload a local file
    async fn simple_upload(
        &self,
        container: &str,
        key: &str,
        local_path: &Path,
        options: &UploadOptions,
    ) -> StorageResult<UploadReceipt>;
}

/// Store capabilities
#[derive(Debug, Clone, Default)]
pub struct StoreCapabilities {
    pub supports_signed_urls: bool,
    pub supports_simple_upload: bool,
    pub max_part_size: Option<u64>,
    pub min_part_size: Option<u64>,
}

impl StoreCapabilities {
    pub fn basic() -> Self {
        Self::default()
    }

    pub fn with_signed_urls(mut self) -> Self {
        self.supports_signed_urls = true;
        self
    }

    pub fn with_simple_upload(mut self) -> Self {
        self.supports_simple_upload = true;
        self
    }

    pub fn with_part_limits(mut self, min_size: Option<u64>, max_size: Option<u64>) -> Self {
        self.min_part_size = min_size;
        self.max_part_size = max_size;
        self
    }

    /// Clamp a configured part size into this store's limits
    pub fn clamp_part_size(&self, wanted: u64) -> u64 {
        let mut size = wanted.max(1);
        if let Some(min) = self.min_part_size {
            size = size.max(min);
        }
        if let Some(max) = self.max_part_size {
            size = size.min(max);
        }
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_size_is_clamped_into_limits() {
        let caps = StoreCapabilities::basic().with_part_limits(Some(5 * 1024 * 1024), Some(64 * 1024 * 1024));
        assert_eq!(caps.clamp_part_size(1024), 5 * 1024 * 1024);
        assert_eq!(caps.clamp_part_size(8 * 1024 * 1024), 8 * 1024 * 1024);
        assert_eq!(caps.clamp_part_size(u64::MAX), 64 * 1024 * 1024);
        assert_eq!(StoreCapabilities::basic().clamp_part_size(0), 1);
    }
}

use std::path::Path;
use std::sync::Arc;

use http::HeaderMap;
use tracing::warn;

use crate::envelope::REPORT_API_ID;
use crate::{
    registry, BatchConfig, BatchPropertyFetcher, BatchRequest, ChunkedUploadPipeline,
    DefaultKeyPolicy, DispositionRequest, GatewayConfig, ObjectKeyPolicy, PartStream,
    ProgressReporter, Reply, Retrieval, RetrievalConfig, RetrievalPolicy, StorageIdentity,
    StorageProvider, StorageResult, UploadOptions, UploadReceipt,
};

/// The entry point route handlers embed.
///
/// Holds one shared provider handle for the deployment's container and runs
/// each request through the matching policy. Every terminating call yields a
/// [`Reply`]; reads may instead yield a byte stream.
pub struct StorageGateway {
    provider: Arc<dyn StorageProvider>,
    keys: Arc<dyn ObjectKeyPolicy>,
    container: String,
    retrieval: RetrievalPolicy,
    batch: BatchPropertyFetcher,
    uploads: ChunkedUploadPipeline,
}

impl StorageGateway {
    /// Create a gateway over an existing provider with default tuning
    pub fn new<C: Into<String>>(provider: Arc<dyn StorageProvider>, container: C) -> Self {
        let keys: Arc<dyn ObjectKeyPolicy> = Arc::new(DefaultKeyPolicy::new());
        Self {
            provider,
            uploads: ChunkedUploadPipeline::new(keys.clone()),
            keys,
            container: container.into(),
            retrieval: RetrievalPolicy::new(&RetrievalConfig::default()),
            batch: BatchPropertyFetcher::new(&BatchConfig::default()),
        }
    }

    /// Create a gateway over an existing provider using configured tuning
    pub fn from_config(provider: Arc<dyn StorageProvider>, config: &GatewayConfig) -> Self {
        Self::new(provider, config.backend.container())
            .with_retrieval(&config.retrieval)
            .with_batch(&config.batch)
    }

    /// Connect the configured backend and build a gateway around it
    pub async fn connect(config: &GatewayConfig) -> StorageResult<Self> {
        let provider = registry::connect(config).await?;
        Ok(Self::from_config(provider, config))
    }

    /// Replace the key policy used for reads and uploads
    pub fn with_key_policy<K: ObjectKeyPolicy + 'static>(mut self, keys: K) -> Self {
        let keys: Arc<dyn ObjectKeyPolicy> = Arc::new(keys);
        self.uploads = ChunkedUploadPipeline::new(keys.clone());
        self.keys = keys;
        self
    }

    pub fn with_retrieval(mut self, config: &RetrievalConfig) -> Self {
        self.retrieval = RetrievalPolicy::new(config);
        self
    }

    pub fn with_batch(mut self, config: &BatchConfig) -> Self {
        self.batch = BatchPropertyFetcher::new(config);
        self
    }

    pub fn provider(&self) -> &Arc<dyn StorageProvider> {
        &self.provider
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn retrieval_policy(&self) -> &RetrievalPolicy {
        &self.retrieval
    }

    /// Object a route slug and filename resolve to
    pub fn locate(&self, slug: &str, filename: &str) -> StorageIdentity {
        StorageIdentity::new(self.container.as_str(), self.keys.read_key(slug, filename))
    }

    /// Serve a report addressed by route slug and filename
    pub async fn read(&self, slug: &str, filename: &str, headers: &HeaderMap) -> Retrieval {
        let target = self.locate(slug, filename);
        self.read_object(&target, headers).await
    }

    /// Serve a report by its storage identity, which may come from a caller-supplied path
    pub async fn read_object(&self, target: &StorageIdentity, headers: &HeaderMap) -> Retrieval {
        let disposition = DispositionRequest::from_headers(headers);
        self.retrieval
            .retrieve(self.provider.as_ref(), target, disposition.as_ref())
            .await
    }

    /// Batch property lookup from the JSON `fileNames` query value
    pub async fn properties(&self, file_names: &str) -> Reply {
        match BatchRequest::from_json(file_names) {
            Ok(request) => self.properties_of(&request).await,
            Err(err) => {
                warn!(error = %err, "Rejected fileNames parameter");
                let message = err.to_string();
                Reply::from_error(REPORT_API_ID, &err, message)
            }
        }
    }

    pub async fn properties_of(&self, request: &BatchRequest) -> Reply {
        self.batch
            .respond(self.provider.as_ref(), &self.container, request)
            .await
    }

    /// Upload every file part of a multipart request for `caller_id`
    pub async fn upload(
        &self,
        caller_id: Option<&str>,
        parts: PartStream,
        progress: &ProgressReporter,
    ) -> Reply {
        self.uploads
            .run(self.provider.as_ref(), &self.container, caller_id, parts, progress)
            .await
    }

    /// Whole-object text read, for small JSON or CSV artifacts
    pub async fn read_text(&self, key: &str) -> StorageResult<String> {
        self.provider.read_text(&self.container, key).await
    }

    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.provider.exists(&self.container, key).await
    }

    /// Upload a local file under an explicit key
    pub async fn upload_file(
        &self,
        key: &str,
        local_path: &Path,
        options: &UploadOptions,
    ) -> StorageResult<UploadReceipt> {
        self.provider
            .simple_upload(&self.container, key, local_path, options)
            .await
    }
}

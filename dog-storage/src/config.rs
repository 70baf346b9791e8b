use std::collections::HashMap;
use std::time::Duration;

use crate::{ProviderKind, StorageError, StorageResult};

/// Validity window of every signed URL the gateway issues, in seconds
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

/// Backdating applied to the start of a signed URL's validity window
pub const DEFAULT_SIGNED_URL_SKEW: Duration = Duration::from_secs(300);

/// Longest signed URL validity (TTL plus start skew) every backend accepts
pub const MAX_SIGNED_URL_VALIDITY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Prefix of every environment variable read by [`GatewayConfig::from_env`]
pub const ENV_PREFIX: &str = "DOG_STORAGE_";

/// Top-level gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub backend: BackendConfig,
    pub retrieval: RetrievalConfig,
    pub batch: BatchConfig,
    pub upload: UploadConfig,
    /// Transport timeout applied by backend clients
    pub http_timeout: Duration,
}

/// Credentials and addressing for the selected backend
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Azure(AzureConfig),
    S3(S3Config),
}

#[derive(Clone)]
pub struct AzureConfig {
    pub account_name: String,
    /// Base64 account key
    pub account_key: String,
    /// Container holding reports and uploads
    pub container: String,
    /// Blob service endpoint; defaults to `https://{account}.blob.core.windows.net`
    pub endpoint: Option<String>,
}

#[derive(Clone)]
pub struct S3Config {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub endpoint: String,
    pub bucket: String,
}

/// Rules for choosing between streaming and signed URLs
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Key suffixes that are proxied through the gateway
    pub stream_extensions: Vec<String>,
    pub signed_url_ttl: Duration,
    pub signed_url_skew: Duration,
}

/// Limits for batch property lookups
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_entries: usize,
    pub max_concurrency: usize,
}

/// Rules for chunked uploads
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Bytes buffered per staged block / multipart part
    pub part_size: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            stream_extensions: vec![".json".to_string()],
            signed_url_ttl: DEFAULT_SIGNED_URL_TTL,
            signed_url_skew: DEFAULT_SIGNED_URL_SKEW,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            max_concurrency: 16,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: 8 * 1024 * 1024, // 8MB
        }
    }
}

impl RetrievalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_signed_url_ttl(mut self, ttl: Duration) -> Self {
        self.signed_url_ttl = ttl;
        self
    }

    pub fn with_signed_url_skew(mut self, skew: Duration) -> Self {
        self.signed_url_skew = skew;
        self
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }
}

impl UploadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_part_size(mut self, bytes: u64) -> Self {
        self.part_size = bytes;
        self
    }
}

impl AzureConfig {
    pub fn new<A, K, C>(account_name: A, account_key: K, container: C) -> Self
    where
        A: Into<String>,
        K: Into<String>,
        C: Into<String>,
    {
        Self {
            account_name: account_name.into(),
            account_key: account_key.into(),
            container: container.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn validate(&self) -> StorageResult<()> {
        require("AZURE_ACCOUNT_NAME", &self.account_name)?;
        require("AZURE_ACCOUNT_KEY", &self.account_key)?;
        require("AZURE_REPORT_CONTAINER", &self.container)?;
        Ok(())
    }

    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.blob.core.windows.net", self.account_name),
        }
    }
}

impl S3Config {
    pub fn new<A, S, R, E, B>(access_key_id: A, secret_access_key: S, region: R, endpoint: E, bucket: B) -> Self
    where
        A: Into<String>,
        S: Into<String>,
        R: Into<String>,
        E: Into<String>,
        B: Into<String>,
    {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: region.into(),
            endpoint: endpoint.into(),
            bucket: bucket.into(),
        }
    }

    pub fn validate(&self) -> StorageResult<()> {
        require("S3_ACCESS_KEY_ID", &self.access_key_id)?;
        require("S3_SECRET_ACCESS_KEY", &self.secret_access_key)?;
        require("S3_REGION", &self.region)?;
        require("S3_ENDPOINT", &self.endpoint)?;
        require("S3_BUCKET", &self.bucket)?;
        Ok(())
    }
}

// Keep secrets out of debug output and logs.
impl std::fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureConfig")
            .field("account_name", &self.account_name)
            .field("account_key", &"***")
            .field("container", &self.container)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl BackendConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Azure(_) => ProviderKind::Azure,
            Self::S3(_) => ProviderKind::S3,
        }
    }

    /// Default container or bucket of the deployment
    pub fn container(&self) -> &str {
        match self {
            Self::Azure(azure) => &azure.container,
            Self::S3(s3) => &s3.bucket,
        }
    }

    pub fn validate(&self) -> StorageResult<()> {
        match self {
            Self::Azure(azure) => azure.validate(),
            Self::S3(s3) => s3.validate(),
        }
    }
}

impl GatewayConfig {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            retrieval: RetrievalConfig::default(),
            batch: BatchConfig::default(),
            upload: UploadConfig::default(),
            http_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_upload(mut self, upload: UploadConfig) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Load from `DOG_STORAGE_*` environment variables
    pub fn from_env() -> StorageResult<Self> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .map(|stripped| (stripped.to_string(), value))
            })
            .collect();
        Self::from_vars(&vars)
    }

    /// Load from an already prefix-stripped key/value map, e.g. `PROVIDER`,
    /// `S3_BUCKET`.
    pub fn from_vars(vars: &HashMap<String, String>) -> StorageResult<Self> {
        let get = |key: &str| -> StorageResult<String> {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    StorageError::configuration(format!("{}{} environment variable required", ENV_PREFIX, key))
                })
        };
        let optional = |key: &str| vars.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let kind: ProviderKind = get("PROVIDER")?.parse()?;
        let backend = match kind {
            ProviderKind::Azure => {
                let mut azure = AzureConfig::new(
                    get("AZURE_ACCOUNT_NAME")?,
                    get("AZURE_ACCOUNT_KEY")?,
                    get("AZURE_REPORT_CONTAINER")?,
                );
                if let Some(endpoint) = optional("AZURE_ENDPOINT") {
                    azure = azure.with_endpoint(endpoint);
                }
                BackendConfig::Azure(azure)
            }
            ProviderKind::S3 => BackendConfig::S3(S3Config::new(
                get("S3_ACCESS_KEY_ID")?,
                get("S3_SECRET_ACCESS_KEY")?,
                get("S3_REGION")?,
                get("S3_ENDPOINT")?,
                get("S3_BUCKET")?,
            )),
        };

        let mut config = Self::new(backend);

        if let Some(secs) = optional("SIGNED_URL_TTL_SECS") {
            config.retrieval.signed_url_ttl = Duration::from_secs(parse_number("SIGNED_URL_TTL_SECS", &secs)?);
        }
        if let Some(secs) = optional("SIGNED_URL_SKEW_SECS") {
            config.retrieval.signed_url_skew = Duration::from_secs(parse_number("SIGNED_URL_SKEW_SECS", &secs)?);
        }
        if let Some(list) = optional("STREAM_EXTENSIONS") {
            config.retrieval.stream_extensions = list
                .split(',')
                .map(|ext| ext.trim().to_string())
                .filter(|ext| !ext.is_empty())
                .collect();
        }
        if let Some(max) = optional("BATCH_MAX_ENTRIES") {
            config.batch.max_entries = parse_number("BATCH_MAX_ENTRIES", &max)? as usize;
        }
        if let Some(max) = optional("BATCH_MAX_CONCURRENCY") {
            config.batch.max_concurrency = parse_number("BATCH_MAX_CONCURRENCY", &max)? as usize;
        }
        if let Some(bytes) = optional("UPLOAD_PART_SIZE_BYTES") {
            config.upload.part_size = parse_number("UPLOAD_PART_SIZE_BYTES", &bytes)?;
        }
        if let Some(secs) = optional("HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(parse_number("HTTP_TIMEOUT_SECS", &secs)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on anything a backend cannot be built from
    pub fn validate(&self) -> StorageResult<()> {
        self.backend.validate()?;
        if self.retrieval.signed_url_ttl.is_zero() {
            return Err(StorageError::configuration("signed URL TTL must be greater than zero"));
        }
        let validity = self.retrieval.signed_url_ttl + self.retrieval.signed_url_skew;
        if validity > MAX_SIGNED_URL_VALIDITY {
            return Err(StorageError::configuration(format!(
                "signed URL TTL plus skew is {}s, the limit is {}s",
                validity.as_secs(),
                MAX_SIGNED_URL_VALIDITY.as_secs()
            )));
        }
        if self.batch.max_entries == 0 || self.batch.max_concurrency == 0 {
            return Err(StorageError::configuration("batch limits must be greater than zero"));
        }
        if self.upload.part_size == 0 {
            return Err(StorageError::configuration("upload part size must be greater than zero"));
        }
        Ok(())
    }
}

fn require(name: &str, value: &str) -> StorageResult<()> {
    if value.trim().is_empty() {
        return Err(StorageError::configuration(format!(
            "required configuration is missing: {}",
            name
        )));
    }
    Ok(())
}

fn parse_number(name: &str, value: &str) -> StorageResult<u64> {
    value
        .parse::<u64>()
        .map_err(|_| StorageError::configuration(format!("{}{} must be a whole number, got '{}'", ENV_PREFIX, name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn loads_s3_section() {
        let config = GatewayConfig::from_vars(&vars(&[
            ("PROVIDER", "oci"),
            ("S3_ACCESS_KEY_ID", "id"),
            ("S3_SECRET_ACCESS_KEY", "secret"),
            ("S3_REGION", "ap-hyderabad-1"),
            ("S3_ENDPOINT", "https://ns.compat.objectstorage.ap-hyderabad-1.oraclecloud.com"),
            ("S3_BUCKET", "reports"),
            ("STREAM_EXTENSIONS", ".json, .csv"),
            ("BATCH_MAX_ENTRIES", "10"),
        ]))
        .unwrap();

        assert_eq!(config.backend.kind(), ProviderKind::S3);
        assert_eq!(config.backend.container(), "reports");
        assert_eq!(config.retrieval.stream_extensions, vec![".json", ".csv"]);
        assert_eq!(config.retrieval.signed_url_ttl, DEFAULT_SIGNED_URL_TTL);
        assert_eq!(config.batch.max_entries, 10);
    }

    #[test]
    fn missing_azure_key_fails_fast() {
        let err = GatewayConfig::from_vars(&vars(&[
            ("PROVIDER", "azure"),
            ("AZURE_ACCOUNT_NAME", "acct"),
            ("AZURE_REPORT_CONTAINER", "reports"),
        ]))
        .unwrap_err();

        assert!(matches!(err, StorageError::Configuration { .. }));
        assert!(err.to_string().contains("AZURE_ACCOUNT_KEY"));
    }

    #[test]
    fn blank_fields_fail_validation() {
        let config = GatewayConfig::new(BackendConfig::S3(S3Config::new("id", " ", "r", "e", "b")));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("S3_SECRET_ACCESS_KEY"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = GatewayConfig::from_vars(&vars(&[("PROVIDER", "gcloud")])).unwrap_err();
        assert!(matches!(err, StorageError::Configuration { .. }));
    }

    #[test]
    fn non_numeric_tuning_is_rejected() {
        let err = GatewayConfig::from_vars(&vars(&[
            ("PROVIDER", "azure"),
            ("AZURE_ACCOUNT_NAME", "acct"),
            ("AZURE_ACCOUNT_KEY", "a2V5"),
            ("AZURE_REPORT_CONTAINER", "reports"),
            ("SIGNED_URL_TTL_SECS", "an hour"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SIGNED_URL_TTL_SECS"));
    }

    #[test]
    fn week_long_ttl_is_rejected_at_load() {
        let s3 = [
            ("PROVIDER", "s3"),
            ("S3_ACCESS_KEY_ID", "id"),
            ("S3_SECRET_ACCESS_KEY", "secret"),
            ("S3_REGION", "us-east-1"),
            ("S3_ENDPOINT", "http://127.0.0.1:9000"),
            ("S3_BUCKET", "reports"),
        ];

        let mut week = s3.to_vec();
        week.push(("SIGNED_URL_TTL_SECS", "604800"));
        let err = GatewayConfig::from_vars(&vars(&week)).unwrap_err();
        assert!(matches!(err, StorageError::Configuration { .. }));
        assert!(err.to_string().contains("605100s"));

        // the skew counts against the limit too
        let mut fits = s3.to_vec();
        fits.push(("SIGNED_URL_TTL_SECS", "604500"));
        let config = GatewayConfig::from_vars(&vars(&fits)).unwrap();
        assert_eq!(
            config.retrieval.signed_url_ttl + config.retrieval.signed_url_skew,
            MAX_SIGNED_URL_VALIDITY
        );
    }

    #[test]
    fn azure_endpoint_defaults_to_account_host() {
        let azure = AzureConfig::new("acct", "a2V5", "reports");
        assert_eq!(azure.endpoint(), "https://acct.blob.core.windows.net");
        let local = azure.with_endpoint("http://127.0.0.1:10000/devstoreaccount1/");
        assert_eq!(local.endpoint(), "http://127.0.0.1:10000/devstoreaccount1");
        assert!(!format!("{:?}", local).contains("a2V5"));
    }
}

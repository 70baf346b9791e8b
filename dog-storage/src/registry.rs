use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use crate::{
    AzureBlobProvider, BackendConfig, GatewayConfig, S3CompatibleProvider, StorageError,
    StorageProvider, StorageResult,
};

/// Backend family selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Azure block-blob storage
    Azure,
    /// Any S3-compatible object store (AWS, OCI, MinIO, RustFS)
    S3,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::S3 => "s3",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "azure" => Ok(Self::Azure),
            // OCI Object Storage is reached through its S3 compatibility API
            "s3" | "aws" | "oci" => Ok(Self::S3),
            other => Err(StorageError::configuration(format!(
                "unknown storage provider '{}', expected one of: azure, oci, s3, aws",
                other
            ))),
        }
    }
}

/// Build the adapter for the configured backend
pub async fn connect(config: &GatewayConfig) -> StorageResult<Arc<dyn StorageProvider>> {
    config.validate()?;

    let provider: Arc<dyn StorageProvider> = match &config.backend {
        BackendConfig::Azure(azure) => Arc::new(AzureBlobProvider::new(
            azure,
            config.upload.part_size,
            config.http_timeout,
        )?),
        BackendConfig::S3(s3) => Arc::new(
            S3CompatibleProvider::connect(s3, config.upload.part_size, config.http_timeout).await?,
        ),
    };

    info!(provider = provider.name(), container = %config.backend.container(), "Storage provider connected");
    Ok(provider)
}

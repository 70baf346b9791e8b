//! # dog-storage: Provider-agnostic blob storage gateway
//!
//! `dog-storage` puts one capability set in front of an Azure block-blob
//! account or any S3-compatible object store (AWS S3, OCI Object Storage,
//! MinIO, RustFS), so request handlers never branch on which backend is active.
//!
//! ## Key Features
//!
//! - **Streamed or signed reads**: `.json` reports are proxied as a byte
//!   stream, everything else is answered with a time-limited signed URL
//! - **Batch properties**: concurrent lookups where one failure never fails
//!   the batch, answered in request order
//! - **Chunked uploads**: multipart request parts are re-chunked and uploaded
//!   without buffering whole files, under date-bucketed collision-free keys
//! - **Uniform replies**: every terminating operation returns a [`Reply`]
//!   carrying the HTTP status and a [`ResponseEnvelope`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_storage::prelude::*;
//! use http::HeaderMap;
//!
//! # #[tokio::main]
//! # async fn main() -> StorageResult<()> {
//! // DOG_STORAGE_PROVIDER=oci, DOG_STORAGE_S3_BUCKET=reports, ...
//! let config = GatewayConfig::from_env()?;
//! let gateway = StorageGateway::connect(&config).await?;
//!
//! // `reports__2024` addresses the folder `reports/2024`
//! match gateway.read("reports__2024", "summary.pdf", &HeaderMap::new()).await {
//!     Retrieval::Respond(reply) => println!("{} {:?}", reply.status, reply.envelope.result),
//!     Retrieval::Stream { body, .. } => { /* forward `body` to the client */ drop(body) }
//! }
//!
//! let reply = gateway.properties(r#"{"r1": "reports/2024/a.json"}"#).await;
//! assert!(reply.envelope.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │     Route layer      │  ← HTTP framing (not part of this crate)
//! ├──────────────────────┤
//! │    StorageGateway    │  ← Retrieval / batch / upload policies
//! ├──────────────────────┤
//! │   StorageProvider    │  ← Azure or S3-compatible adapter
//! └──────────────────────┘
//! ```

mod azure;
mod batch;
mod config;
pub mod envelope;
mod error;
mod gateway;
mod keys;
pub mod multipart;
mod parts;
pub mod registry;
mod retrieval;
mod s3;
pub mod store;
#[cfg(feature = "tracing-basic")]
pub mod telemetry;
mod types;
mod upload;

// Re-export main types for clean API
pub use azure::AzureBlobProvider;
pub use batch::{BatchPropertyFetcher, BatchRequest};
pub use config::{
    AzureConfig, BackendConfig, BatchConfig, GatewayConfig, RetrievalConfig, S3Config,
    UploadConfig, DEFAULT_SIGNED_URL_SKEW, DEFAULT_SIGNED_URL_TTL, ENV_PREFIX, MAX_SIGNED_URL_VALIDITY,
};
pub use envelope::{Reply, ResponseCode, ResponseEnvelope, ResponseParams, ResponseStatus};
pub use error::{StorageError, StorageResult};
pub use gateway::StorageGateway;
pub use keys::{DefaultKeyPolicy, ObjectKeyPolicy, ANONYMOUS_CALLER, SLUG_SEPARATOR};
pub use registry::{connect, ProviderKind};
pub use retrieval::{
    pipe_to_sink, DispositionRequest, PipeOutcome, Retrieval, RetrievalMode, RetrievalPolicy,
};
pub use s3::S3CompatibleProvider;
pub use store::{StorageProvider, StoreCapabilities};
pub use types::{
    BatchEntry, BatchResult, BlobMetadata, ByteStream, FailureDescriptor, PartStream,
    ProgressReporter, SignedAccessGrant, SignedUrlRequest, StorageIdentity, UploadOptions,
    UploadPart, UploadProgress, UploadReceipt,
};
pub use upload::ChunkedUploadPipeline;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        GatewayConfig, ProgressReporter, Reply, ResponseCode, ResponseEnvelope, Retrieval,
        StorageError, StorageGateway, StorageProvider, StorageResult,
    };
}

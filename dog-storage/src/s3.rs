//! S3-compatible adapter (AWS S3, OCI Object Storage, MinIO, RustFS).
//!
//! Uses the AWS SDK with static credentials and path-style addressing so the
//! same client works against any S3-compatible endpoint.

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::parts::{expected_parts, PartReader};
use crate::{
    BlobMetadata, ByteStream, ProgressReporter, S3Config, SignedAccessGrant, SignedUrlRequest,
    StorageError, StorageProvider, StorageResult, StoreCapabilities, UploadOptions, UploadProgress,
    UploadReceipt, MAX_SIGNED_URL_VALIDITY,
};

/// S3 rejects non-final multipart parts smaller than this
const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

const MAX_PARTS: u32 = 10_000;

/// S3-compatible object storage backend
#[derive(Clone)]
pub struct S3CompatibleProvider {
    client: Client,
    part_size: u64,
}

impl S3CompatibleProvider {
    /// Build a client from static credentials and connect to the endpoint
    pub async fn connect(config: &S3Config, part_size: u64, timeout: Duration) -> StorageResult<Self> {
        config.validate()?;

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "dog-storage",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint.clone())
            .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build())
            .load()
            .await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(true) // S3-compatible endpoints address buckets by path
                .build(),
        );

        info!(
            endpoint = %config.endpoint,
            region = %config.region,
            bucket = %config.bucket,
            "S3-compatible provider initialized"
        );

        Ok(Self::from_client(client, part_size))
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client, part_size: u64) -> Self {
        Self {
            client,
            part_size: Self::store_capabilities().clamp_part_size(part_size),
        }
    }

    fn store_capabilities() -> StoreCapabilities {
        StoreCapabilities::basic()
            .with_signed_urls()
            .with_part_limits(Some(MIN_PART_SIZE), Some(MAX_PART_SIZE))
    }

    /// Normalize an SDK failure using the HTTP status when one was received
    fn classify<E>(err: SdkError<E, HttpResponse>, key: &str) -> StorageError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let status = err.raw_response().map(|response| response.status().as_u16());
        let detail = format!("S3 error code {}", err.code().unwrap_or("unknown"));
        match status.and_then(|status| StorageError::from_status(status, key, detail)) {
            Some(normalized) => normalized,
            None => StorageError::backend(err),
        }
    }

    fn to_chrono(timestamp: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
    }

    async fn put_single(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<Option<String>> {
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(AwsByteStream::from(data))
            .send()
            .await
            .map_err(|e| Self::classify(e, key))?;
        Ok(output.e_tag)
    }

    /// Upload every part of a started multipart upload and complete it
    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        first: Bytes,
        reader: &mut PartReader,
        total_parts: Option<u32>,
        progress: &ProgressReporter,
    ) -> StorageResult<(Option<String>, u32)> {
        let mut completed = Vec::new();
        let mut next = Some(first);

        while let Some(data) = next.take() {
            let part_number = completed.len() as u32 + 1;
            if part_number > MAX_PARTS {
                return Err(StorageError::invalid(format!(
                    "upload exceeds {} parts of {} bytes",
                    MAX_PARTS, self.part_size
                )));
            }

            let output = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number as i32)
                .body(AwsByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::classify(e, key))?;

            completed.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag)
                    .part_number(part_number as i32)
                    .build(),
            );

            next = reader.next_part().await?;
            progress.report(UploadProgress {
                key: key.to_string(),
                bytes_transferred: reader.bytes_read(),
                parts_completed: part_number,
                total_parts: if next.is_none() { Some(part_number) } else { total_parts },
            });
        }

        let parts_uploaded = completed.len() as u32;
        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Self::classify(e, key))?;

        Ok((output.e_tag, parts_uploaded))
    }
}

#[async_trait]
impl StorageProvider for S3CompatibleProvider {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn capabilities(&self) -> StoreCapabilities {
        Self::store_capabilities()
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        info!(bucket = %bucket, key = %key, "S3 exists check");
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().map_or(false, |e| e.is_not_found()) {
                    return Ok(false);
                }
                let err = Self::classify(err, key);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn get_properties(
        &self,
        bucket: &str,
        key: &str,
        logical_name: &str,
    ) -> StorageResult<BlobMetadata> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::classify(e, key))?;

        Ok(BlobMetadata::new(logical_name, output.content_length().unwrap_or(0).max(0) as u64)
            .with_last_modified(output.last_modified().and_then(Self::to_chrono))
            .with_content_type(output.content_type().map(str::to_string))
            .with_etag(output.e_tag().map(str::to_string)))
    }

    async fn read_content(&self, bucket: &str, key: &str) -> StorageResult<ByteStream> {
        info!(bucket = %bucket, key = %key, "S3 read stream opened");
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::classify(e, key))?;

        let mut body = output.body;
        let stream = async_stream::stream! {
            loop {
                match body.try_next().await {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(std::io::Error::new(std::io::ErrorKind::Other, e));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn read_text(&self, bucket: &str, key: &str) -> StorageResult<String> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::classify(e, key))?;

        let data = output.body.collect().await.map_err(StorageError::backend)?.into_bytes();
        debug!(bucket = %bucket, key = %key, bytes = data.len(), "S3 text read");
        String::from_utf8(data.to_vec()).map_err(StorageError::backend)
    }

    async fn issue_signed_url(
        &self,
        bucket: &str,
        key: &str,
        request: &SignedUrlRequest,
    ) -> StorageResult<SignedAccessGrant> {
        // The window opens `start_skew` early, so it must also run that much
        // longer to end at issued + ttl.
        let validity = request.ttl + request.start_skew;
        if validity > MAX_SIGNED_URL_VALIDITY {
            return Err(StorageError::invalid(format!(
                "signed URL validity of {}s exceeds the 7 day limit",
                validity.as_secs()
            )));
        }

        let issued_at = Utc::now().trunc_subsecs(0);
        let start = SystemTime::from(issued_at) - request.start_skew;
        let ttl = chrono::Duration::from_std(request.ttl)
            .map_err(|e| StorageError::invalid(format!("signed URL TTL out of range: {}", e)))?;

        let presigning = PresigningConfig::builder()
            .start_time(start)
            .expires_in(validity)
            .build()
            .map_err(StorageError::backend)?;

        let mut get = self.client.get_object().bucket(bucket).key(key);
        if let Some(disposition) = &request.content_disposition {
            get = get.response_content_disposition(disposition);
        }
        let presigned = get.presigned(presigning).await.map_err(|e| Self::classify(e, key))?;

        Ok(SignedAccessGrant {
            url: presigned.uri().to_string(),
            expires_at: issued_at + ttl,
        })
    }

    async fn chunked_upload(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        declared_size: Option<u64>,
        progress: &ProgressReporter,
    ) -> StorageResult<UploadReceipt> {
        info!(bucket = %bucket, key = %key, declared_size = ?declared_size, "S3 chunked upload started");

        let mut reader = PartReader::new(body, self.part_size);
        let total_parts = expected_parts(declared_size, self.part_size);
        let first = reader.next_part().await?.unwrap_or_default();

        // Bodies that fit in one part skip the multipart protocol
        if reader.is_finished() {
            let size = first.len() as u64;
            let etag = self.put_single(bucket, key, first).await?;
            progress.report(UploadProgress {
                key: key.to_string(),
                bytes_transferred: size,
                parts_completed: 1,
                total_parts: Some(1),
            });
            info!(bucket = %bucket, key = %key, bytes = size, "S3 object stored");
            return Ok(UploadReceipt {
                key: key.to_string(),
                size_bytes: size,
                etag,
                parts_uploaded: 1,
            });
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::classify(e, key))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::backend_msg("no upload id in create_multipart_upload response"))?
            .to_string();
        debug!(bucket = %bucket, key = %key, upload_id = %upload_id, "Created multipart upload");

        match self
            .upload_parts(bucket, key, &upload_id, first, &mut reader, total_parts, progress)
            .await
        {
            Ok((etag, parts_uploaded)) => {
                info!(bucket = %bucket, key = %key, bytes = reader.bytes_read(), parts = parts_uploaded, "S3 multipart upload completed");
                Ok(UploadReceipt {
                    key: key.to_string(),
                    size_bytes: reader.bytes_read(),
                    etag,
                    parts_uploaded,
                })
            }
            Err(err) => {
                // Leave no orphaned parts behind
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(bucket = %bucket, key = %key, upload_id = %upload_id, error = %abort_err, "Failed to abort multipart upload");
                }
                Err(err)
            }
        }
    }

    async fn simple_upload(
        &self,
        _bucket: &str,
        _key: &str,
        _local_path: &Path,
        _options: &UploadOptions,
    ) -> StorageResult<UploadReceipt> {
        Err(StorageError::NotImplemented {
            operation: "simple_upload",
        })
    }
}

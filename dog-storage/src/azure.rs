//! Azure Blob Storage adapter.
//!
//! Talks to the Blob REST API through `reqwest`, authorizing every call with
//! Shared Key (HMAC-SHA256 over the canonical request). Read grants are
//! service SAS tokens signed with the same account key.
//!
//! Chunked uploads stage fixed-size blocks with `Put Block` and commit them
//! with `Put Block List`, so no more than one block is buffered at a time.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, StatusCode};
use sha2::Sha256;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::parts::{expected_parts, PartReader};
use crate::{
    AzureConfig, BlobMetadata, ByteStream, ProgressReporter, SignedAccessGrant, SignedUrlRequest,
    StorageError, StorageProvider, StorageResult, StoreCapabilities, UploadOptions, UploadProgress,
    UploadReceipt,
};

/// REST API version used for requests and SAS tokens
const AZURE_API_VERSION: &str = "2021-08-06";

/// Block blobs hold at most this many committed blocks
const MAX_BLOCKS: u32 = 50_000;

const MAX_BLOCK_SIZE: u64 = 4000 * 1024 * 1024;

/// Encode everything except unreserved characters and '/'
const BLOB_PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Encode everything except unreserved characters
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

type HmacSha256 = Hmac<Sha256>;

/// Azure block-blob backend
pub struct AzureBlobProvider {
    client: reqwest::Client,
    account: String,
    key_bytes: Vec<u8>,
    /// Service endpoint without trailing slash
    endpoint: String,
    /// Path component of the endpoint, non-empty for emulator-style endpoints
    endpoint_path: String,
    part_size: u64,
}

/// One signed call against a blob
struct BlobCall<'a> {
    method: Method,
    container: &'a str,
    key: &'a str,
    query: Vec<(&'static str, String)>,
    ms_headers: Vec<(String, String)>,
    content_type: Option<&'a str>,
    body: Option<Bytes>,
}

impl<'a> BlobCall<'a> {
    fn new(method: Method, container: &'a str, key: &'a str) -> Self {
        Self {
            method,
            container,
            key,
            query: Vec::new(),
            ms_headers: Vec::new(),
            content_type: None,
            body: None,
        }
    }

    fn query(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.query.push((name, value.into()));
        self
    }

    fn ms_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name: String = name.into();
        self.ms_headers.push((name.to_lowercase(), value.into()));
        self
    }

    fn body(mut self, content_type: &'a str, body: Bytes) -> Self {
        self.content_type = Some(content_type);
        self.body = Some(body);
        self
    }
}

impl AzureBlobProvider {
    /// Create an adapter from validated configuration
    pub fn new(config: &AzureConfig, part_size: u64, timeout: Duration) -> StorageResult<Self> {
        config.validate()?;

        let key_bytes = BASE64_STANDARD
            .decode(config.account_key.trim())
            .map_err(|e| StorageError::configuration(format!("AZURE_ACCOUNT_KEY is not valid base64: {}", e)))?;

        let endpoint = config.endpoint();
        let endpoint_path = reqwest::Url::parse(&endpoint)
            .map_err(|e| StorageError::configuration(format!("invalid Azure endpoint '{}': {}", endpoint, e)))?
            .path()
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(StorageError::backend)?;

        let capabilities = Self::store_capabilities();
        info!(
            account = %config.account_name,
            container = %config.container,
            endpoint = %endpoint,
            "Azure blob provider initialized"
        );

        Ok(Self {
            client,
            account: config.account_name.clone(),
            key_bytes,
            endpoint,
            endpoint_path,
            part_size: capabilities.clamp_part_size(part_size),
        })
    }

    fn store_capabilities() -> StoreCapabilities {
        StoreCapabilities::basic()
            .with_signed_urls()
            .with_simple_upload()
            .with_part_limits(None, Some(MAX_BLOCK_SIZE))
    }

    fn encoded_path(container: &str, key: &str) -> String {
        format!(
            "/{}/{}",
            utf8_percent_encode(container, BLOB_PATH_ENCODE_SET),
            utf8_percent_encode(key, BLOB_PATH_ENCODE_SET)
        )
    }

    /// Full URL of a blob, without query
    fn blob_url(&self, container: &str, key: &str) -> String {
        format!("{}{}", self.endpoint, Self::encoded_path(container, key))
    }

    fn hmac_base64(&self, string_to_sign: &str) -> StorageResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key_bytes)
            .map_err(|e| StorageError::configuration(format!("unusable Azure account key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Shared Key string-to-sign for a call
    fn string_to_sign(&self, call: &BlobCall<'_>, date: &str) -> String {
        let content_length = match call.body.as_ref().map(Bytes::len) {
            Some(0) | None => String::new(),
            Some(len) => len.to_string(),
        };

        let mut ms_headers: Vec<(String, String)> = vec![
            ("x-ms-date".to_string(), date.to_string()),
            ("x-ms-version".to_string(), AZURE_API_VERSION.to_string()),
        ];
        ms_headers.extend(call.ms_headers.iter().cloned());
        ms_headers.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_headers = ms_headers
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        let mut canonical_resource = format!(
            "/{}{}{}",
            self.account,
            self.endpoint_path,
            Self::encoded_path(call.container, call.key)
        );
        let mut query = call.query.clone();
        query.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in &query {
            canonical_resource.push_str(&format!("\n{}:{}", name.to_lowercase(), value));
        }

        [
            call.method.as_str(),
            "", // Content-Encoding
            "", // Content-Language
            content_length.as_str(),
            "", // Content-MD5
            call.content_type.unwrap_or(""),
            "", // Date
            "", // If-Modified-Since
            "", // If-Match
            "", // If-None-Match
            "", // If-Unmodified-Since
            "", // Range
            canonical_headers.as_str(),
            canonical_resource.as_str(),
        ]
        .join("\n")
    }

    /// Send a signed call and return the raw response, whatever its status
    async fn send(&self, call: BlobCall<'_>) -> StorageResult<reqwest::Response> {
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());
        let signature = self.hmac_base64(&self.string_to_sign(&call, &date))?;

        let mut url = self.blob_url(call.container, call.key);
        if !call.query.is_empty() {
            let query = call
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", k, utf8_percent_encode(v, QUERY_ENCODE_SET)))
                .collect::<Vec<_>>()
                .join("&");
            url = format!("{}?{}", url, query);
        }

        let mut request = self
            .client
            .request(call.method.clone(), &url)
            .header("x-ms-date", &date)
            .header("x-ms-version", AZURE_API_VERSION)
            .header("Authorization", format!("SharedKey {}:{}", self.account, signature));

        for (name, value) in &call.ms_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = call.content_type {
            request = request.header("Content-Type", content_type);
        }
        if let Some(body) = call.body {
            request = request.body(body);
        }

        request.send().await.map_err(|e| {
            error!(container = %call.container, key = %call.key, error = %e, "Azure request failed");
            StorageError::backend(e)
        })
    }

    /// Send a call and normalize any non-success status
    async fn send_checked(&self, call: BlobCall<'_>) -> StorageResult<reqwest::Response> {
        let key = call.key.to_string();
        let response = self.send(call).await?;
        match Self::normalize(response.status(), &key, response.headers()) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    /// Translate an Azure REST status into the canonical error kinds
    fn normalize(status: StatusCode, key: &str, headers: &reqwest::header::HeaderMap) -> Option<StorageError> {
        let code = headers
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        StorageError::from_status(status.as_u16(), key, format!("Azure error code {}", code))
    }

    fn header_str<'h>(headers: &'h reqwest::header::HeaderMap, name: &str) -> Option<&'h str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Fixed-width block id; Azure requires equal lengths within a blob
    fn block_id(index: u32) -> String {
        BASE64_STANDARD.encode(format!("block-{:06}", index))
    }

    fn block_list_xml(block_ids: &[String]) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>");
        for id in block_ids {
            xml.push_str("<Latest>");
            xml.push_str(id);
            xml.push_str("</Latest>");
        }
        xml.push_str("</BlockList>");
        xml
    }

    /// Build a service SAS query string granting read access to one blob
    fn sas_query(
        &self,
        container: &str,
        key: &str,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
        content_disposition: Option<&str>,
    ) -> StorageResult<String> {
        let st = start.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let se = expiry.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let spr = if self.endpoint.starts_with("https://") { "https" } else { "https,http" };
        let rscd = content_disposition.unwrap_or("");
        let resource = format!("/blob/{}/{}/{}", self.account, container, key);

        let string_to_sign = [
            "r",                                                     // signedPermissions
            st.as_str(),                                             // signedStart
            se.as_str(),                                             // signedExpiry
            resource.as_str(),                                       // canonicalizedResource
            "",                                                      // signedIdentifier
            "",                                                      // signedIP
            spr,                                                     // signedProtocol
            AZURE_API_VERSION,                                       // signedVersion
            "b",                                                     // signedResource
            "",                                                      // signedSnapshotTime
            "",                                                      // signedEncryptionScope
            "",                                                      // rscc
            rscd,                                                    // rscd
            "",                                                      // rsce
            "",                                                      // rscl
            "",                                                      // rsct
        ]
        .join("\n");
        let signature = self.hmac_base64(&string_to_sign)?;

        let mut params: Vec<(&str, &str)> = vec![
            ("sv", AZURE_API_VERSION),
            ("st", st.as_str()),
            ("se", se.as_str()),
            ("sr", "b"),
            ("sp", "r"),
            ("spr", spr),
        ];
        if content_disposition.is_some() {
            params.push(("rscd", rscd));
        }
        params.push(("sig", signature.as_str()));

        Ok(params
            .iter()
            .map(|(k, v)| format!("{}={}", k, utf8_percent_encode(v, QUERY_ENCODE_SET)))
            .collect::<Vec<_>>()
            .join("&"))
    }

    /// Stage blocks from `body` and commit them as one block blob
    async fn upload_blocks(
        &self,
        container: &str,
        key: &str,
        body: ByteStream,
        declared_size: Option<u64>,
        progress: &ProgressReporter,
        options: &UploadOptions,
    ) -> StorageResult<UploadReceipt> {
        let mut reader = PartReader::new(body, self.part_size);
        let total_parts = expected_parts(declared_size, self.part_size);
        let mut block_ids = Vec::new();

        while let Some(block) = reader.next_part().await? {
            let index = block_ids.len() as u32;
            if index >= MAX_BLOCKS {
                return Err(StorageError::invalid(format!(
                    "upload exceeds {} blocks of {} bytes",
                    MAX_BLOCKS, self.part_size
                )));
            }

            let block_id = Self::block_id(index);
            let call = BlobCall::new(Method::PUT, container, key)
                .query("comp", "block")
                .query("blockid", block_id.clone())
                .body("application/octet-stream", block);
            self.send_checked(call).await?;
            block_ids.push(block_id);

            progress.report(UploadProgress {
                key: key.to_string(),
                bytes_transferred: reader.bytes_read(),
                parts_completed: block_ids.len() as u32,
                total_parts: if reader.is_finished() { Some(block_ids.len() as u32) } else { total_parts },
            });
        }

        let xml = Self::block_list_xml(&block_ids);
        let mut commit = BlobCall::new(Method::PUT, container, key)
            .query("comp", "blocklist")
            .body("application/xml", Bytes::from(xml));
        if let Some(content_type) = &options.content_type {
            commit = commit.ms_header("x-ms-blob-content-type", content_type.clone());
        }
        for (name, value) in &options.metadata {
            commit = commit.ms_header(format!("x-ms-meta-{}", name), value.clone());
        }

        let response = self.send_checked(commit).await?;
        let etag = Self::header_str(response.headers(), "etag").map(str::to_string);

        info!(container = %container, key = %key, bytes = reader.bytes_read(), blocks = block_ids.len(), "Azure block blob committed");

        Ok(UploadReceipt {
            key: key.to_string(),
            size_bytes: reader.bytes_read(),
            etag,
            parts_uploaded: block_ids.len() as u32,
        })
    }
}

#[async_trait]
impl StorageProvider for AzureBlobProvider {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn capabilities(&self) -> StoreCapabilities {
        Self::store_capabilities()
    }

    async fn exists(&self, container: &str, key: &str) -> StorageResult<bool> {
        info!(container = %container, key = %key, "Azure exists check");
        let response = self.send(BlobCall::new(Method::HEAD, container, key)).await?;
        match Self::normalize(response.status(), key, response.headers()) {
            None => Ok(true),
            Some(err) if err.is_not_found() => Ok(false),
            Some(err) => Err(err),
        }
    }

    async fn get_properties(
        &self,
        container: &str,
        key: &str,
        logical_name: &str,
    ) -> StorageResult<BlobMetadata> {
        let response = self.send_checked(BlobCall::new(Method::HEAD, container, key)).await?;
        let headers = response.headers();

        let size_bytes = Self::header_str(headers, "content-length")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let last_modified = Self::header_str(headers, "last-modified")
            .and_then(|v| httpdate::parse_http_date(v).ok())
            .map(DateTime::<Utc>::from);

        Ok(BlobMetadata::new(logical_name, size_bytes)
            .with_last_modified(last_modified)
            .with_content_type(Self::header_str(headers, "content-type").map(str::to_string))
            .with_etag(Self::header_str(headers, "etag").map(str::to_string)))
    }

    async fn read_content(&self, container: &str, key: &str) -> StorageResult<ByteStream> {
        info!(container = %container, key = %key, "Azure read stream opened");
        let response = self.send_checked(BlobCall::new(Method::GET, container, key)).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        Ok(Box::pin(stream))
    }

    async fn read_text(&self, container: &str, key: &str) -> StorageResult<String> {
        let response = self.send_checked(BlobCall::new(Method::GET, container, key)).await?;
        let data = response.bytes().await.map_err(StorageError::backend)?;
        debug!(container = %container, key = %key, bytes = data.len(), "Azure text read");
        String::from_utf8(data.to_vec()).map_err(StorageError::backend)
    }

    async fn issue_signed_url(
        &self,
        container: &str,
        key: &str,
        request: &SignedUrlRequest,
    ) -> StorageResult<SignedAccessGrant> {
        let issued_at = Utc::now().trunc_subsecs(0);
        let ttl = chrono::Duration::from_std(request.ttl)
            .map_err(|e| StorageError::invalid(format!("signed URL TTL out of range: {}", e)))?;
        let skew = chrono::Duration::from_std(request.start_skew)
            .map_err(|e| StorageError::invalid(format!("signed URL skew out of range: {}", e)))?;
        let expires_at = issued_at + ttl;

        let query = self.sas_query(
            container,
            key,
            issued_at - skew,
            expires_at,
            request.content_disposition.as_deref(),
        )?;

        Ok(SignedAccessGrant {
            url: format!("{}?{}", self.blob_url(container, key), query),
            expires_at,
        })
    }

    async fn chunked_upload(
        &self,
        container: &str,
        key: &str,
        body: ByteStream,
        declared_size: Option<u64>,
        progress: &ProgressReporter,
    ) -> StorageResult<UploadReceipt> {
        info!(container = %container, key = %key, declared_size = ?declared_size, "Azure chunked upload started");
        self.upload_blocks(container, key, body, declared_size, progress, &UploadOptions::default())
            .await
    }

    async fn simple_upload(
        &self,
        container: &str,
        key: &str,
        local_path: &Path,
        options: &UploadOptions,
    ) -> StorageResult<UploadReceipt> {
        let file = tokio::fs::File::open(local_path).await?;
        let size = file.metadata().await?.len();
        let body: ByteStream = Box::pin(tokio_util::io::ReaderStream::new(file));

        info!(container = %container, key = %key, path = %local_path.display(), size, "Azure upload from local file");
        self.upload_blocks(container, key, body, Some(size), &ProgressReporter::disabled(), options)
            .await
    }
}

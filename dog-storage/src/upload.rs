//! Chunked upload of multipart request parts.
//!
//! Every file part is written under a key derived from the upload date, the
//! caller and a monotonic timestamp, so concurrent uploads of the same
//! filename never collide.

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::envelope::{ResponseCode, UPLOAD_API_ID};
use crate::{ObjectKeyPolicy, PartStream, ProgressReporter, Reply, StorageError, StorageProvider};

const UPLOAD_SUCCEEDED: &str = "Successfully uploaded to blob";
const UPLOAD_FAILED: &str = "Failed to upload to blob";
const UPLOAD_FORBIDDEN: &str = "Unable to authorize to blob storage";
const NO_FILE: &str = "No file found in request";

/// Drives the parts of one request into storage and decides the single reply
#[derive(Clone)]
pub struct ChunkedUploadPipeline {
    keys: Arc<dyn ObjectKeyPolicy>,
}

impl ChunkedUploadPipeline {
    pub fn new(keys: Arc<dyn ObjectKeyPolicy>) -> Self {
        Self { keys }
    }

    /// Upload every file part in arrival order.
    ///
    /// All parts must succeed: the first failure stops the pipeline and
    /// decides the reply. Parts committed before the failure stay in storage
    /// and are listed under `files` in the failure result. Parts without a
    /// filename are drained and skipped. A request that carries no file part
    /// at all is a server error, like any other malformed upload.
    pub async fn run(
        &self,
        provider: &dyn StorageProvider,
        container: &str,
        caller_id: Option<&str>,
        mut parts: PartStream,
        progress: &ProgressReporter,
    ) -> Reply {
        let mut uploaded = Vec::new();

        while let Some(part) = parts.next().await {
            let mut part = match part {
                Ok(part) => part,
                Err(err) => {
                    error!(container = %container, error = %err, "Failed to read multipart request");
                    return Self::failure_reply(&err, &uploaded);
                }
            };

            if !part.is_file() {
                while let Some(chunk) = part.body.next().await {
                    if let Err(err) = chunk {
                        error!(field = %part.field_name, error = %err, "Failed to read form field");
                        return Self::failure_reply(&err.into(), &uploaded);
                    }
                }
                continue;
            }

            let filename = part.filename.clone().unwrap_or_default();
            let key = self.keys.upload_key(caller_id, &filename, Utc::now());
            info!(
                provider = provider.name(),
                container = %container,
                key = %key,
                declared_size = ?part.declared_size,
                "Uploading part"
            );

            match provider
                .chunked_upload(container, &key, part.body, part.declared_size, progress)
                .await
            {
                Ok(receipt) => {
                    info!(key = %receipt.key, bytes = receipt.size_bytes, parts = receipt.parts_uploaded, "Part uploaded");
                    uploaded.push(key);
                }
                Err(err) => {
                    error!(
                        provider = provider.name(),
                        key = %key,
                        committed = ?uploaded,
                        error = %err,
                        "Chunked upload failed"
                    );
                    return Self::failure_reply(&err, &uploaded);
                }
            }
        }

        if uploaded.is_empty() {
            error!(container = %container, "Upload request carried no file part");
            return Reply::failure(UPLOAD_API_ID, ResponseCode::ServerError, NO_FILE);
        }

        Reply::ok(
            UPLOAD_API_ID,
            json!({ "message": UPLOAD_SUCCEEDED, "files": uploaded }),
        )
    }

    /// Forbidden answers 403, every other failure 500
    fn failure_reply(err: &StorageError, committed: &[String]) -> Reply {
        let reply = if err.is_forbidden() {
            Reply::failure(UPLOAD_API_ID, ResponseCode::Forbidden, UPLOAD_FORBIDDEN)
        } else {
            Reply::failure(UPLOAD_API_ID, ResponseCode::ServerError, UPLOAD_FAILED)
        };
        if committed.is_empty() {
            reply
        } else {
            reply.with_result(json!({ "files": committed }))
        }
    }
}

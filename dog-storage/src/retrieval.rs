//! Per-request choice between proxying bytes and redirecting to a signed URL.

use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use http::HeaderMap;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::envelope::{ResponseCode, REPORT_API_ID};
use crate::{ByteStream, Reply, RetrievalConfig, SignedUrlRequest, StorageIdentity, StorageProvider};

const BLOB_NOT_FOUND: &str = "Blob not found";
const DISPLAY_FAILED: &str = "Failed to display blob";
const EXISTS_FAILED: &str = "Failed to check file exists";
const SIGN_FAILED: &str = "Failed to generate signed URL";

/// How a key is delivered to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Bytes are proxied through the gateway
    Stream,
    /// Client is handed a time-limited URL
    Sign,
}

/// Download disposition requested through request headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispositionRequest {
    pub filename: String,
}

impl DispositionRequest {
    /// Present only when `content-disposition: attachment` is sent together
    /// with a `filename` header
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let disposition = headers.get(http::header::CONTENT_DISPOSITION)?.to_str().ok()?;
        if !disposition.trim().eq_ignore_ascii_case("attachment") {
            return None;
        }
        let filename = headers.get("filename")?.to_str().ok()?.trim();
        if filename.is_empty() {
            return None;
        }
        Some(Self {
            filename: filename.to_string(),
        })
    }

    /// Value the backend should answer with
    pub fn header_value(&self) -> String {
        format!("attachment;filename={}", self.filename)
    }
}

/// Outcome of a retrieval request
pub enum Retrieval {
    /// Content stream to forward; the status is already decided as 200
    Stream {
        body: ByteStream,
        /// A disposition override was requested but cannot apply to a proxied stream
        disposition_ignored: bool,
    },
    /// Terminal reply (signed URL, or an error before any byte was sent)
    Respond(Reply),
}

impl Retrieval {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }

    /// The reply, if this outcome is not a stream
    pub fn into_reply(self) -> Option<Reply> {
        match self {
            Self::Respond(reply) => Some(reply),
            Self::Stream { .. } => None,
        }
    }
}

impl std::fmt::Debug for Retrieval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream {
                disposition_ignored,
                ..
            } => f
                .debug_struct("Stream")
                .field("disposition_ignored", disposition_ignored)
                .finish_non_exhaustive(),
            Self::Respond(reply) => f.debug_tuple("Respond").field(reply).finish(),
        }
    }
}

/// Decides STREAM vs SIGN by key suffix and runs the chosen path
#[derive(Debug, Clone)]
pub struct RetrievalPolicy {
    stream_extensions: Vec<String>,
    signed_url_ttl: Duration,
    signed_url_skew: Duration,
}

impl RetrievalPolicy {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            stream_extensions: config
                .stream_extensions
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
            signed_url_ttl: config.signed_url_ttl,
            signed_url_skew: config.signed_url_skew,
        }
    }

    pub fn choose(&self, key: &str) -> RetrievalMode {
        let key = key.to_ascii_lowercase();
        if self.stream_extensions.iter().any(|ext| key.ends_with(ext.as_str())) {
            RetrievalMode::Stream
        } else {
            RetrievalMode::Sign
        }
    }

    /// Resolve one retrieval request against a provider
    pub async fn retrieve(
        &self,
        provider: &dyn StorageProvider,
        target: &StorageIdentity,
        disposition: Option<&DispositionRequest>,
    ) -> Retrieval {
        let (container, key) = (target.container.as_str(), target.key.as_str());
        match self.choose(key) {
            RetrievalMode::Stream => self.stream(provider, container, key, disposition).await,
            RetrievalMode::Sign => Retrieval::Respond(self.sign(provider, container, key, disposition).await),
        }
    }

    async fn stream(
        &self,
        provider: &dyn StorageProvider,
        container: &str,
        key: &str,
        disposition: Option<&DispositionRequest>,
    ) -> Retrieval {
        info!(provider = provider.name(), container = %container, key = %key, "Streaming blob");

        let disposition_ignored = disposition.is_some();
        if disposition_ignored {
            warn!(key = %key, "Content-Disposition override is not applied to streamed blobs");
        }

        match provider.read_content(container, key).await {
            Ok(body) => Retrieval::Stream {
                body,
                disposition_ignored,
            },
            Err(err) => {
                error!(provider = provider.name(), container = %container, key = %key, error = %err, "Failed to open blob stream");
                let message = if err.is_not_found() { BLOB_NOT_FOUND } else { DISPLAY_FAILED };
                Retrieval::Respond(Reply::from_error(REPORT_API_ID, &err, message))
            }
        }
    }

    async fn sign(
        &self,
        provider: &dyn StorageProvider,
        container: &str,
        key: &str,
        disposition: Option<&DispositionRequest>,
    ) -> Reply {
        info!(provider = provider.name(), container = %container, key = %key, "Issuing signed URL");

        match provider.exists(container, key).await {
            Ok(true) => {}
            Ok(false) => {
                info!(container = %container, key = %key, "Blob does not exist");
                return Reply::failure(REPORT_API_ID, ResponseCode::ClientError, BLOB_NOT_FOUND);
            }
            Err(err) => {
                error!(provider = provider.name(), key = %key, error = %err, "Exists check failed");
                return Reply::failure(REPORT_API_ID, ResponseCode::ServerError, EXISTS_FAILED);
            }
        }

        let mut request = SignedUrlRequest::new(self.signed_url_ttl).with_start_skew(self.signed_url_skew);
        if let Some(disposition) = disposition {
            request = request.with_content_disposition(disposition.header_value());
        }

        match provider.issue_signed_url(container, key, &request).await {
            Ok(grant) => Reply::ok(REPORT_API_ID, json!({ "signedUrl": grant.url })),
            Err(err) => {
                error!(provider = provider.name(), key = %key, error = %err, "Failed to issue signed URL");
                Reply::failure(REPORT_API_ID, ResponseCode::ServerError, SIGN_FAILED)
            }
        }
    }
}

/// How a streamed body ended
#[derive(Debug)]
pub enum PipeOutcome {
    /// Every byte reached the sink
    Completed { bytes: u64 },
    /// The sink stopped accepting data; the backend stream was dropped
    SinkClosed { bytes: u64 },
    /// The backend failed mid-stream; the sink was closed early
    SourceFailed { bytes: u64, error: std::io::Error },
}

impl PipeOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            Self::Completed { bytes } | Self::SinkClosed { bytes } | Self::SourceFailed { bytes, .. } => *bytes,
        }
    }
}

/// Forward a blob stream into a response sink, preserving byte order.
///
/// The status line has already gone out when this runs, so failures are
/// reported, not turned into replies.
pub async fn pipe_to_sink<S>(mut body: ByteStream, sink: &mut S) -> PipeOutcome
where
    S: Sink<Bytes> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut bytes = 0u64;

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(chunk) => {
                let len = chunk.len() as u64;
                if let Err(e) = sink.send(chunk).await {
                    warn!(bytes, error = %e, "Response sink closed before the blob was fully sent");
                    return PipeOutcome::SinkClosed { bytes };
                }
                bytes += len;
            }
            Err(error) => {
                error!(bytes, error = %error, "Blob stream failed after streaming began");
                let _ = sink.close().await;
                return PipeOutcome::SourceFailed { bytes, error };
            }
        }
    }

    if let Err(e) = sink.close().await {
        warn!(bytes, error = %e, "Response sink failed to close");
        return PipeOutcome::SinkClosed { bytes };
    }
    PipeOutcome::Completed { bytes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    fn policy() -> RetrievalPolicy {
        RetrievalPolicy::new(&RetrievalConfig::default())
    }

    fn body(chunks: Vec<Result<&'static [u8], std::io::Error>>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| c.map(Bytes::from_static)),
        ))
    }

    #[test]
    fn json_keys_stream_everything_else_signs() {
        let policy = policy();
        assert_eq!(policy.choose("reports/2024/a.json"), RetrievalMode::Stream);
        assert_eq!(policy.choose("reports/2024/A.JSON"), RetrievalMode::Stream);
        assert_eq!(policy.choose("reports/2024/a.pdf"), RetrievalMode::Sign);
        assert_eq!(policy.choose("reports/json"), RetrievalMode::Sign);
    }

    #[test]
    fn stream_extensions_are_configurable() {
        let policy = RetrievalPolicy::new(&RetrievalConfig::new().with_stream_extensions([".csv", ".JSON"]));
        assert_eq!(policy.choose("a.csv"), RetrievalMode::Stream);
        assert_eq!(policy.choose("a.json"), RetrievalMode::Stream);
        assert_eq!(policy.choose("a.txt"), RetrievalMode::Sign);
    }

    #[test]
    fn disposition_needs_attachment_and_filename() {
        let mut headers = HeaderMap::new();
        assert!(DispositionRequest::from_headers(&headers).is_none());

        headers.insert("content-disposition", "attachment".parse().unwrap());
        assert!(DispositionRequest::from_headers(&headers).is_none());

        headers.insert("filename", "report.pdf".parse().unwrap());
        let request = DispositionRequest::from_headers(&headers).unwrap();
        assert_eq!(request.header_value(), "attachment;filename=report.pdf");

        headers.insert("content-disposition", "inline".parse().unwrap());
        assert!(DispositionRequest::from_headers(&headers).is_none());
    }

    #[tokio::test]
    async fn pipe_preserves_byte_order() {
        let (mut tx, rx) = mpsc::unbounded::<Bytes>();
        let outcome = pipe_to_sink(body(vec![Ok(b"{\"a\":"), Ok(b"1}")]), &mut tx).await;
        assert!(matches!(outcome, PipeOutcome::Completed { bytes: 7 }));

        let received: Vec<Bytes> = rx.collect().await;
        assert_eq!(received.concat(), b"{\"a\":1}".to_vec());
    }

    #[tokio::test]
    async fn pipe_stops_when_sink_closes() {
        let (mut tx, rx) = mpsc::unbounded::<Bytes>();
        drop(rx);
        let outcome = pipe_to_sink(body(vec![Ok(b"abc"), Ok(b"def")]), &mut tx).await;
        assert!(matches!(outcome, PipeOutcome::SinkClosed { bytes: 0 }));
    }

    #[tokio::test]
    async fn pipe_reports_mid_stream_failure() {
        let (mut tx, rx) = mpsc::unbounded::<Bytes>();
        let outcome = pipe_to_sink(
            body(vec![
                Ok(b"abc"),
                Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
                Ok(b"never"),
            ]),
            &mut tx,
        )
        .await;

        match outcome {
            PipeOutcome::SourceFailed { bytes, error } => {
                assert_eq!(bytes, 3);
                assert_eq!(error.kind(), std::io::ErrorKind::ConnectionReset);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let received: Vec<Bytes> = rx.collect().await;
        assert_eq!(received, vec![Bytes::from_static(b"abc")]);
    }
}

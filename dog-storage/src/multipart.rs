//! Turns a raw `multipart/form-data` body into a stream of upload parts.
//!
//! Parts are yielded one at a time and must be consumed (or dropped) before
//! the next one is pulled; unread data of a dropped part is skipped.

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use http::HeaderMap;
use tracing::{debug, warn};

use crate::{ByteStream, PartStream, StorageError, StorageResult, UploadPart};

/// Extract the boundary from a `Content-Type` value
pub fn boundary_from_content_type(content_type: &str) -> StorageResult<String> {
    multer::parse_boundary(content_type)
        .map_err(|e| StorageError::invalid(format!("not a multipart/form-data request: {}", e)))
}

/// Parse a multipart body whose boundary is given in `headers`
pub fn part_stream_from_headers<S>(headers: &HeaderMap, body: S) -> StorageResult<PartStream>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
{
    let content_type = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| StorageError::invalid("missing Content-Type header"))?;
    let boundary = boundary_from_content_type(content_type)?;
    Ok(part_stream(body, boundary))
}

/// Parse a multipart body into [`UploadPart`]s without buffering part content
pub fn part_stream<S, B>(body: S, boundary: B) -> PartStream
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    B: Into<String>,
{
    let mut multipart = multer::Multipart::new(body, boundary);

    Box::pin(async_stream::stream! {
        loop {
            match multipart.next_field().await {
                Ok(Some(field)) => {
                    let field_name = field.name().unwrap_or_default().to_string();
                    let filename = field.file_name().map(str::to_string);
                    let declared_size = field
                        .headers()
                        .get(http::header::CONTENT_LENGTH)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok());

                    debug!(field = %field_name, filename = ?filename, declared_size = ?declared_size, "Multipart field");

                    let body: ByteStream = Box::pin(field.map(|chunk| {
                        chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
                    }));
                    let mut part = UploadPart::new(field_name, body);
                    if let Some(filename) = filename {
                        part = part.with_filename(filename);
                    }
                    if let Some(size) = declared_size {
                        part = part.with_declared_size(size);
                    }
                    yield Ok(part);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Malformed multipart body");
                    yield Err(StorageError::invalid(format!("malformed multipart body: {}", e)));
                    break;
                }
            }
        }
    })
}

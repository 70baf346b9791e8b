use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

use crate::ByteStream;

/// Re-chunks a body of unknown length into parts of a fixed size.
///
/// At most one part (plus one incoming chunk) is held in memory.
pub(crate) struct PartReader {
    body: ByteStream,
    part_size: usize,
    pending: BytesMut,
    exhausted: bool,
    bytes_read: u64,
}

impl PartReader {
    pub(crate) fn new(body: ByteStream, part_size: u64) -> Self {
        let part_size = usize::try_from(part_size).unwrap_or(usize::MAX).max(1);
        Self {
            body,
            part_size,
            pending: BytesMut::new(),
            exhausted: false,
            bytes_read: 0,
        }
    }

    /// Next full part, or the short final part, or `None` once drained
    pub(crate) async fn next_part(&mut self) -> std::io::Result<Option<Bytes>> {
        while !self.exhausted && self.pending.len() < self.part_size {
            match self.body.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    self.bytes_read += chunk.len() as u64;
                    self.pending.extend_from_slice(&chunk);
                }
                None => self.exhausted = true,
            }
        }

        if self.pending.is_empty() {
            return Ok(None);
        }

        let take = self.pending.len().min(self.part_size);
        Ok(Some(self.pending.split_to(take).freeze()))
    }

    /// True once the body is drained and no buffered bytes remain
    pub(crate) fn is_finished(&self) -> bool {
        self.exhausted && self.pending.is_empty()
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

/// Number of parts a declared size splits into
pub(crate) fn expected_parts(declared_size: Option<u64>, part_size: u64) -> Option<u32> {
    declared_size.map(|size| {
        let parts = size.div_ceil(part_size.max(1)).max(1);
        u32::try_from(parts).unwrap_or(u32::MAX)
    })
}

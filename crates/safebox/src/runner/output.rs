//! Capped capture buffer for guest output streams

use crate::types::TRUNCATION_MARKER;

/// Accumulates a byte stream up to a fixed cap
///
/// Bytes past the cap are counted but discarded. The stream must still be
/// read to the end by the caller so the guest never blocks on a full pipe.
#[derive(Debug)]
pub struct OutputBuffer {
    data: Vec<u8>,
    limit: usize,
    discarded: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            discarded: 0,
        }
    }

    /// Append a chunk, keeping at most `limit` bytes overall
    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        let take = room.min(chunk.len());
        self.data.extend_from_slice(&chunk[..take]);
        self.discarded += chunk.len() - take;
    }

    /// Whether any bytes were dropped
    pub fn is_truncated(&self) -> bool {
        self.discarded > 0
    }

    /// Number of bytes dropped past the cap
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Finish capture, appending the truncation marker if anything was dropped
    pub fn into_bytes(mut self) -> Vec<u8> {
        if self.is_truncated() {
            self.data.extend_from_slice(TRUNCATION_MARKER);
        }
        self.data
    }
}

/// Decode captured output as UTF-8, keeping the text within `limit` bytes
///
/// Invalid bytes become U+FFFD, which is three bytes wide, so lossy decoding
/// can grow a capped capture well past its cap. The decoded body is cut back
/// to the last character boundary within `limit` and the truncation marker
/// is kept or added whenever anything was dropped.
pub fn decode_capped(bytes: &[u8], limit: usize) -> String {
    let (body, marked) = match bytes.strip_suffix(TRUNCATION_MARKER) {
        Some(body) => (body, true),
        None => (bytes, false),
    };

    let mut text = String::from_utf8_lossy(body).into_owned();
    let cut = text.len() > limit;
    if cut {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    if marked || cut {
        text.push_str(&String::from_utf8_lossy(TRUNCATION_MARKER));
    }
    text
}

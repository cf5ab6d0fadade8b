//! Framing: split a byte stream on a delimiter (CRLF by default), retaining a partial frame across reads.

/// Delimiter used by the streaming endpoints.
pub const DEFAULT_DELIMITER: &[u8] = b"\r\n";

/// One delimiter-bounded unit of the body, delimiter excluded. May be empty (keep-alive).
pub type Frame = Vec<u8>;

/// Accumulating frame splitter. Output depends only on the concatenated input, not on how it was chunked.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    delimiter: Vec<u8>,
    buffer: Vec<u8>,
    max_frame: usize,
    /// Bytes already thrown away from a frame that outgrew `max_frame`.
    overflow: Option<usize>,
}

/// A frame longer than the tokenizer's limit. Its bytes were dropped up to the next delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame of at least {len} bytes exceeds the {max} byte limit")]
pub struct OversizedFrame {
    pub len: usize,
    pub max: usize,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self::with_delimiter(DEFAULT_DELIMITER)
    }

    /// Tokenizer splitting on `delimiter`. An empty delimiter falls back to CRLF.
    pub fn with_delimiter(delimiter: &[u8]) -> Self {
        let delimiter = if delimiter.is_empty() {
            DEFAULT_DELIMITER.to_vec()
        } else {
            delimiter.to_vec()
        };
        Self {
            delimiter,
            buffer: Vec::new(),
            max_frame: usize::MAX,
            overflow: None,
        }
    }

    /// Cap the length of a single frame. Longer frames are skipped, not buffered.
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame.max(1);
        self
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// Append `chunk` and return every frame whose trailing delimiter has now been seen, in order.
    /// Bytes after the last delimiter stay buffered for the next call. Frames over the
    /// limit set by [`Tokenizer::with_max_frame`] are dropped; see [`Tokenizer::extract_checked`].
    pub fn extract(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.extract_checked(chunk)
            .into_iter()
            .filter_map(Result::ok)
            .collect()
    }

    /// As [`Tokenizer::extract`], reporting each oversized frame in its place in the sequence.
    /// Between calls the buffer holds at most the frame limit plus a partial delimiter.
    pub fn extract_checked(&mut self, chunk: &[u8]) -> Vec<Result<Frame, OversizedFrame>> {
        let delim_len = self.delimiter.len();
        // The retained buffer holds no complete delimiter, so a new match can start at most
        // `delimiter.len() - 1` bytes before the old end.
        let scan_from = self.buffer.len().saturating_sub(delim_len - 1);
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0usize;
        let mut pos = scan_from;
        while let Some(offset) = find(&self.buffer[pos..], &self.delimiter) {
            let end = pos + offset;
            let len = end - start;
            frames.push(match self.overflow.take() {
                Some(dropped) => Err(self.oversized(dropped + len)),
                None if len > self.max_frame => Err(self.oversized(len)),
                None => Ok(self.buffer[start..end].to_vec()),
            });
            start = end + delim_len;
            pos = start;
        }
        self.buffer.drain(..start);

        // The last `delim_len - 1` bytes may be the start of a delimiter, not frame content.
        if self.buffer.len() > self.max_frame.saturating_add(delim_len - 1) {
            let drop = self.buffer.len() - (delim_len - 1).min(self.buffer.len());
            self.buffer.drain(..drop);
            self.overflow = Some(self.overflow.unwrap_or(0) + drop);
        }
        frames
    }

    fn oversized(&self, len: usize) -> OversizedFrame {
        OversizedFrame {
            len,
            max: self.max_frame,
        }
    }

    /// Bytes of the incomplete trailing frame.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any partial frame (new connection attempt).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflow = None;
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(frames: Vec<Frame>) -> Vec<String> {
        frames
            .into_iter()
            .map(|f| String::from_utf8(f).unwrap())
            .collect()
    }

    #[test]
    fn frame_spanning_two_reads() {
        let mut t = Tokenizer::new();
        let first = t.extract(b"{\"a\":1}\r\n{\"b\":2");
        assert_eq!(strings(first), vec!["{\"a\":1}"]);
        assert_eq!(t.buffered(), b"{\"b\":2");
        let second = t.extract(b"}\r\n");
        assert_eq!(strings(second), vec!["{\"b\":2}"]);
        assert!(t.buffered().is_empty());
    }

    #[test]
    fn bare_delimiter_is_empty_frame() {
        let mut t = Tokenizer::new();
        assert_eq!(strings(t.extract(b"\r\n")), vec![""]);
        assert_eq!(strings(t.extract(b"x\r\n\r\n")), vec!["x", ""]);
    }

    #[test]
    fn delimiter_split_across_reads() {
        let mut t = Tokenizer::new();
        assert!(t.extract(b"abc\r").is_empty());
        assert_eq!(strings(t.extract(b"\ndef")), vec!["abc"]);
        assert_eq!(t.buffered(), b"def");
    }

    #[test]
    fn empty_chunk_is_noop() {
        let mut t = Tokenizer::new();
        assert!(t.extract(b"").is_empty());
        t.extract(b"partial");
        assert!(t.extract(b"").is_empty());
        assert_eq!(t.buffered(), b"partial");
    }

    #[test]
    fn custom_delimiter() {
        let mut t = Tokenizer::with_delimiter(b"\n");
        assert_eq!(strings(t.extract(b"a\nb\nc")), vec!["a", "b"]);
        assert_eq!(t.delimiter(), b"\n");
        assert_eq!(Tokenizer::with_delimiter(b"").delimiter(), DEFAULT_DELIMITER);
    }

    #[test]
    fn oversized_frame_is_reported_and_skipped() {
        let mut t = Tokenizer::new().with_max_frame(8);
        let out = t.extract_checked(b"short\r\n0123456789abcdef\r\nnext\r\n");
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_deref(), Ok(&b"short"[..]));
        assert_eq!(out[1], Err(OversizedFrame { len: 16, max: 8 }));
        assert_eq!(out[2].as_deref(), Ok(&b"next"[..]));
    }

    #[test]
    fn endless_frame_is_not_buffered() {
        let mut t = Tokenizer::new().with_max_frame(8);
        for _ in 0..100 {
            assert!(t.extract_checked(b"xxxxxxxxxxxxxxxx").is_empty());
            assert!(t.buffered().len() <= 8);
        }
        // Delimiter split across reads still ends the dropped frame.
        assert!(t.extract_checked(b"xx\r").is_empty());
        let out = t.extract_checked(b"\n{}\r\n");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Err(OversizedFrame { len: 1602, max: 8 }));
        assert_eq!(out[1].as_deref(), Ok(&b"{}"[..]));
        assert!(t.buffered().is_empty());
    }

    #[test]
    fn reset_discards_partial() {
        let mut t = Tokenizer::new();
        t.extract(b"{\"half\"");
        t.reset();
        assert_eq!(strings(t.extract(b"{}\r\n")), vec!["{}"]);
    }
}

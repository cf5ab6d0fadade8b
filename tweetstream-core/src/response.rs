//! Streaming response adapter: parse the status line and headers once per connection attempt,
//! then strip body framing, split frames, decode JSON and classify.
//!
//! Feed it bytes in transport order; it hands back messages in arrival order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chunked::{ChunkedDecoder, ChunkedError};
use crate::classifier::classify_value;
use crate::error::{map_status, ApiError, ErrorKind};
use crate::headers::Headers;
use crate::message::StreamMessage;
use crate::tokenizer::{Tokenizer, DEFAULT_DELIMITER};

const MAX_HEAD_LEN: usize = 64 * 1024;
const MAX_HEADERS: usize = 64;

/// Default cap on the error body collected for a non-2xx response.
pub const DEFAULT_MAX_ERROR_BODY: usize = 64 * 1024;

/// Default cap on one frame. Longer frames are skipped up to the next delimiter.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// What to do with a frame that is not valid JSON. Either way the stream continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameErrorPolicy {
    /// Log and drop.
    #[default]
    Skip,
    /// Log and surface as [`Output::FrameError`].
    Report,
}

/// What to do with frames that classify as `Unrecognized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnrecognizedPolicy {
    #[default]
    Deliver,
    Drop,
}

#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub frame_errors: FrameErrorPolicy,
    pub unrecognized: UnrecognizedPolicy,
    pub delimiter: Vec<u8>,
    pub max_error_body: usize,
    pub max_frame_len: usize,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            frame_errors: FrameErrorPolicy::default(),
            unrecognized: UnrecognizedPolicy::default(),
            delimiter: DEFAULT_DELIMITER.to_vec(),
            max_error_body: DEFAULT_MAX_ERROR_BODY,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Status line and headers of the streaming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One frame failed to decode as JSON.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed frame ({len} bytes): {reason}")]
pub struct FrameError {
    pub len: usize,
    pub reason: String,
}

/// Item produced from the body, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Message(StreamMessage),
    FrameError(FrameError),
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Non-2xx response mapped through the error table.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Neither success nor an error status (e.g. a redirect).
    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),
    #[error("malformed response head: {0}")]
    MalformedHead(String),
    #[error("response head too large")]
    HeadTooLarge,
    #[error("connection closed before the response head was complete")]
    IncompleteHead,
    #[error("chunked body: {0}")]
    Chunked(#[from] ChunkedError),
}

impl AdapterError {
    /// Transport-class failures may be retried by reconnecting; status errors go to the caller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Api(_) | Self::UnexpectedStatus(_))
    }
}

#[derive(Debug)]
enum Body {
    Chunked(ChunkedDecoder),
    Length(u64),
    UntilClose,
}

impl Body {
    fn from_headers(headers: &Headers) -> Self {
        let chunked = headers
            .get("transfer-encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
        if chunked {
            return Self::Chunked(ChunkedDecoder::new());
        }
        match headers.parse::<u64>("content-length") {
            Some(len) => Self::Length(len),
            None => Self::UntilClose,
        }
    }

    fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), ChunkedError> {
        match self {
            Self::Chunked(decoder) => decoder.decode(input, out),
            Self::Length(remaining) => {
                let take = (*remaining).min(input.len() as u64) as usize;
                out.extend_from_slice(&input[..take]);
                *remaining -= take as u64;
                Ok(())
            }
            Self::UntilClose => {
                out.extend_from_slice(input);
                Ok(())
            }
        }
    }

    fn is_done(&self) -> bool {
        match self {
            Self::Chunked(decoder) => decoder.is_done(),
            Self::Length(remaining) => *remaining == 0,
            Self::UntilClose => false,
        }
    }
}

#[derive(Debug)]
enum Phase {
    Head(Vec<u8>),
    Streaming(Body),
    /// Non-2xx: collect the error body, then fail.
    Rejected { body: Body, collected: Vec<u8> },
    Done,
}

/// Per-attempt adapter. Create a fresh one for every connection attempt.
#[derive(Debug)]
pub struct ResponseAdapter {
    options: AdapterOptions,
    phase: Phase,
    head: Option<ResponseHead>,
    tokenizer: Tokenizer,
}

impl ResponseAdapter {
    pub fn new(options: AdapterOptions) -> Self {
        let tokenizer =
            Tokenizer::with_delimiter(&options.delimiter).with_max_frame(options.max_frame_len);
        Self {
            options,
            phase: Phase::Head(Vec::new()),
            head: None,
            tokenizer,
        }
    }

    pub fn head(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    /// A 2xx head has been accepted.
    pub fn is_streaming(&self) -> bool {
        self.head.as_ref().is_some_and(ResponseHead::is_success)
    }

    /// The body has ended (terminal chunk or full content length).
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    /// Consume the next bytes from the transport.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Output>, AdapterError> {
        let mut out = Vec::new();
        if let Phase::Head(buf) = &mut self.phase {
            buf.extend_from_slice(bytes);
            if let Some(rest) = self.parse_head()? {
                self.feed_body(&rest, &mut out)?;
            }
            return Ok(out);
        }
        self.feed_body(bytes, &mut out)?;
        Ok(out)
    }

    /// Transport reached end of stream. A trailing partial frame is discarded.
    pub fn finish(&mut self) -> Result<(), AdapterError> {
        match self.phase {
            Phase::Head(_) => Err(AdapterError::IncompleteHead),
            Phase::Rejected { .. } => Err(self.reject()),
            Phase::Streaming(_) | Phase::Done => {
                self.phase = Phase::Done;
                Ok(())
            }
        }
    }

    /// Parse the head once complete; returns the bytes that followed it.
    fn parse_head(&mut self) -> Result<Option<Vec<u8>>, AdapterError> {
        loop {
            let Phase::Head(buf) = &mut self.phase else {
                return Ok(None);
            };
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut resp = httparse::Response::new(&mut headers);
            let consumed = match resp.parse(buf) {
                Ok(httparse::Status::Complete(n)) => n,
                Ok(httparse::Status::Partial) => {
                    if buf.len() > MAX_HEAD_LEN {
                        return Err(AdapterError::HeadTooLarge);
                    }
                    return Ok(None);
                }
                Err(e) => return Err(AdapterError::MalformedHead(e.to_string())),
            };
            let head = ResponseHead {
                status: resp.code.unwrap_or(0),
                reason: resp.reason.unwrap_or_default().to_string(),
                headers: Headers::from_pairs(resp.headers.iter().map(|h| {
                    (
                        h.name.to_string(),
                        String::from_utf8_lossy(h.value).into_owned(),
                    )
                })),
            };
            let rest = buf[consumed..].to_vec();
            // Interim 1xx heads precede the real one.
            if (100..200).contains(&head.status) {
                *buf = rest;
                continue;
            }
            tracing::debug!(status = head.status, reason = %head.reason, "response head");
            self.enter_body(head)?;
            return Ok(Some(rest));
        }
    }

    fn enter_body(&mut self, head: ResponseHead) -> Result<(), AdapterError> {
        let body = Body::from_headers(&head.headers);
        let status = head.status;
        let success = head.is_success();
        self.head = Some(head);
        if success {
            self.phase = Phase::Streaming(body);
            return Ok(());
        }
        if ErrorKind::from_status(status).is_none() {
            self.phase = Phase::Done;
            return Err(AdapterError::UnexpectedStatus(status));
        }
        self.phase = Phase::Rejected {
            body,
            collected: Vec::new(),
        };
        Ok(())
    }

    fn feed_body(&mut self, input: &[u8], out: &mut Vec<Output>) -> Result<(), AdapterError> {
        match &mut self.phase {
            Phase::Head(_) | Phase::Done => Ok(()),
            Phase::Streaming(body) => {
                let mut decoded = Vec::with_capacity(input.len());
                body.decode(input, &mut decoded)?;
                let finished = body.is_done();
                for frame in self.tokenizer.extract_checked(&decoded) {
                    match frame {
                        Ok(frame) => process_frame(&self.options, &frame, out),
                        Err(oversized) => {
                            let err = FrameError {
                                len: oversized.len,
                                reason: oversized.to_string(),
                            };
                            report_frame_error(&self.options, err, out);
                        }
                    }
                }
                if finished {
                    self.phase = Phase::Done;
                }
                Ok(())
            }
            Phase::Rejected { body, collected } => {
                let mut decoded = Vec::new();
                body.decode(input, &mut decoded)?;
                let room = self.options.max_error_body.saturating_sub(collected.len());
                collected.extend_from_slice(&decoded[..decoded.len().min(room)]);
                if body.is_done() || collected.len() >= self.options.max_error_body {
                    return Err(self.reject());
                }
                Ok(())
            }
        }
    }

    fn reject(&mut self) -> AdapterError {
        let collected = match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::Rejected { collected, .. } => collected,
            _ => Vec::new(),
        };
        let Some(head) = &self.head else {
            return AdapterError::IncompleteHead;
        };
        match map_status(head.status, &head.headers, &collected) {
            Some(err) => AdapterError::Api(err),
            None => AdapterError::UnexpectedStatus(head.status),
        }
    }
}

fn process_frame(options: &AdapterOptions, frame: &[u8], out: &mut Vec<Output>) {
    let trimmed = trim_ascii(frame);
    if trimmed.is_empty() {
        out.push(Output::Message(StreamMessage::KeepAlive));
        return;
    }
    match serde_json::from_slice::<Value>(trimmed) {
        Ok(value) => {
            let message = classify_value(value);
            if options.unrecognized == UnrecognizedPolicy::Drop
                && matches!(message, StreamMessage::Unrecognized(_))
            {
                tracing::debug!("dropping unrecognized message");
                return;
            }
            out.push(Output::Message(message));
        }
        Err(e) => {
            let err = FrameError {
                len: frame.len(),
                reason: e.to_string(),
            };
            report_frame_error(options, err, out);
        }
    }
}

fn report_frame_error(options: &AdapterOptions, err: FrameError, out: &mut Vec<Output>) {
    tracing::warn!(len = err.len, error = %err.reason, "skipping malformed frame");
    if options.frame_errors == FrameErrorPolicy::Report {
        out.push(Output::FrameError(err));
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

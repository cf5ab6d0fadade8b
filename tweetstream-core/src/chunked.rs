//! HTTP/1.1 chunked transfer decoding. Incremental: input may be split anywhere.

const MAX_LINE_LEN: usize = 4096;

/// Error in chunk framing. The connection cannot resynchronise after one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkedError {
    #[error("invalid chunk size line: {0:?}")]
    InvalidSize(String),
    #[error("chunk size line too long")]
    LineTooLong,
    #[error("missing CRLF after chunk data")]
    MissingCrlf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// Reading the hex size line.
    Size,
    /// Inside chunk data; bytes left.
    Data(u64),
    /// Expecting CRLF after data.
    DataEnd { seen_cr: bool },
    /// After the zero-size chunk: trailer lines until an empty one.
    Trailers,
    Done,
}

/// Strips chunk framing and yields the payload bytes.
#[derive(Debug, Clone)]
pub struct ChunkedDecoder {
    state: State,
    line: Vec<u8>,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Size,
            line: Vec::new(),
        }
    }

    /// True once the terminal chunk and trailers have been consumed.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Decode `input`, appending payload bytes to `out`. Input after the terminal chunk is ignored.
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), ChunkedError> {
        let mut i = 0usize;
        while i < input.len() {
            match self.state {
                State::Size => {
                    let b = input[i];
                    i += 1;
                    if b == b'\n' {
                        let size = parse_size_line(&self.line)?;
                        self.line.clear();
                        self.state = if size == 0 {
                            State::Trailers
                        } else {
                            State::Data(size)
                        };
                    } else {
                        self.push_line_byte(b)?;
                    }
                }
                State::Data(remaining) => {
                    let available = (input.len() - i) as u64;
                    let take = remaining.min(available) as usize;
                    out.extend_from_slice(&input[i..i + take]);
                    i += take;
                    let left = remaining - take as u64;
                    self.state = if left == 0 {
                        State::DataEnd { seen_cr: false }
                    } else {
                        State::Data(left)
                    };
                }
                State::DataEnd { seen_cr } => {
                    let b = input[i];
                    i += 1;
                    match (seen_cr, b) {
                        (false, b'\r') => self.state = State::DataEnd { seen_cr: true },
                        (_, b'\n') => self.state = State::Size,
                        _ => return Err(ChunkedError::MissingCrlf),
                    }
                }
                State::Trailers => {
                    let b = input[i];
                    i += 1;
                    if b == b'\n' {
                        let empty = matches!(self.line.as_slice(), [] | [b'\r']);
                        self.line.clear();
                        if empty {
                            self.state = State::Done;
                        }
                    } else {
                        self.push_line_byte(b)?;
                    }
                }
                State::Done => return Ok(()),
            }
        }
        Ok(())
    }

    fn push_line_byte(&mut self, b: u8) -> Result<(), ChunkedError> {
        if self.line.len() >= MAX_LINE_LEN {
            return Err(ChunkedError::LineTooLong);
        }
        self.line.push(b);
        Ok(())
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// "1a3;ext=1\r" -> 0x1a3. Extensions are ignored.
fn parse_size_line(line: &[u8]) -> Result<u64, ChunkedError> {
    let text = String::from_utf8_lossy(line);
    let size = text.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size, 16).map_err(|_| ChunkedError::InvalidSize(text.trim().to_string()))
}

//! Newline-framed label wire format.
//!
//! Each label travels as its UTF-8 text followed by a single `\n`:
//!
//! ```text
//! happy\nsad\nneutral\n
//! ```
//!
//! There is no length prefix, checksum or escaping; the newline is the only
//! message boundary, which is why [`Label`] refuses line breaks.

use crate::types::Label;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Terminator appended to every label.
pub const TERMINATOR: u8 = b'\n';

/// Longest line the decoder buffers before discarding it.
pub const MAX_LINE_LEN: usize = 1024;

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
    #[error("line is not valid UTF-8 ({len} bytes discarded)")]
    InvalidUtf8 { len: usize },
    #[error("line exceeded {max} bytes without a terminator ({len} bytes discarded)", max = MAX_LINE_LEN)]
    Overlong { len: usize },
}

/// Encode a label into its wire message.
pub fn encode(label: &Label) -> Bytes {
    let text = label.as_str().as_bytes();
    let mut buf = BytesMut::with_capacity(text.len() + 1);
    buf.put_slice(text);
    buf.put_u8(TERMINATOR);
    buf.freeze()
}

/// Incremental decoder turning arbitrarily fragmented bytes into label texts.
///
/// Feed every chunk read from the transport with [`push`](Self::push), then
/// drain complete lines with [`next_line`](Self::next_line). Lines that are
/// empty after trimming are skipped silently.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
    /// Bytes of an overlong line still being discarded up to its terminator.
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Drop any partial line, e.g. after the transport broke mid-line.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    /// Bytes buffered but not yet terminated.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete line, if one is buffered.
    ///
    /// Returns `Some(Err(_))` for a line that had to be discarded; decoding
    /// continues normally with the following bytes.
    pub fn next_line(&mut self) -> Option<Result<String, DecodeError>> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == TERMINATOR) else {
                if self.buf.len() > MAX_LINE_LEN {
                    let len = self.buf.len();
                    self.buf.clear();
                    let already_reported = std::mem::replace(&mut self.discarding, true);
                    if !already_reported {
                        return Some(Err(DecodeError::Overlong { len }));
                    }
                }
                return None;
            };

            let line = self.buf.split_to(pos);
            self.buf.advance(1);

            if std::mem::take(&mut self.discarding) {
                // Tail of an overlong line already reported.
                continue;
            }
            if line.len() > MAX_LINE_LEN {
                return Some(Err(DecodeError::Overlong { len: line.len() }));
            }

            match std::str::from_utf8(&line) {
                Ok(text) => {
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    return Some(Ok(text.to_string()));
                }
                Err(_) => return Some(Err(DecodeError::InvalidUtf8 { len: line.len() })),
            }
        }
    }

    /// Feed `bytes` and collect every line completed by them.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<Result<String, DecodeError>> {
        self.push(bytes);
        std::iter::from_fn(|| self.next_line()).collect()
    }
}

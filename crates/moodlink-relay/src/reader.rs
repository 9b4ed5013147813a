//! Reads newline-framed labels from the byte transport.

use moodlink_core::LineDecoder;
use moodlink_hw::link::is_transient;
use std::io::Read;

const READ_CHUNK: usize = 256;

/// Result of one bounded read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes arrived; zero or more complete labels, in arrival order.
    Labels(Vec<String>),
    /// Nothing arrived within the read timeout.
    Idle,
    /// The transport failed; the caller waits before the next attempt.
    Failed,
}

/// Owns the transport and the accumulation buffer.
pub struct RelayReader<R> {
    transport: R,
    decoder: LineDecoder,
    chunk: Vec<u8>,
    consecutive_failures: u32,
    decode_failures: u64,
}

impl<R: Read> RelayReader<R> {
    pub fn new(transport: R) -> Self {
        Self {
            transport,
            decoder: LineDecoder::new(),
            chunk: vec![0; READ_CHUNK],
            consecutive_failures: 0,
            decode_failures: 0,
        }
    }

    /// One read attempt. Never fails: transport and decode errors are logged
    /// and reported through [`ReadOutcome`].
    pub fn poll(&mut self) -> ReadOutcome {
        match self.transport.read(&mut self.chunk) {
            Ok(0) => ReadOutcome::Idle,
            Ok(n) => {
                if self.consecutive_failures > 0 {
                    tracing::info!(failures = self.consecutive_failures, "transport reads recovered");
                    self.consecutive_failures = 0;
                }
                ReadOutcome::Labels(self.decode(n))
            }
            Err(e) if is_transient(&e) => ReadOutcome::Idle,
            Err(e) => {
                self.consecutive_failures += 1;
                let dropped = self.decoder.pending();
                self.decoder.reset();
                tracing::warn!(
                    error = %e,
                    consecutive = self.consecutive_failures,
                    dropped_bytes = dropped,
                    "transport read failed"
                );
                ReadOutcome::Failed
            }
        }
    }

    fn decode(&mut self, n: usize) -> Vec<String> {
        let mut labels = Vec::new();
        for line in self.decoder.decode(&self.chunk[..n]) {
            match line {
                Ok(label) => {
                    tracing::debug!(label = %label, "received label");
                    labels.push(label);
                }
                Err(e) => {
                    self.decode_failures += 1;
                    tracing::warn!(error = %e, "discarding malformed line");
                }
            }
        }
        labels
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    /// Bytes buffered after the last newline.
    pub fn buffered(&self) -> usize {
        self.decoder.pending()
    }
}

/// Transport stub replaying a script of read results.
#[cfg(test)]
pub(crate) struct ScriptedTransport {
    pub steps: std::collections::VecDeque<std::io::Result<Vec<u8>>>,
}

#[cfg(test)]
impl ScriptedTransport {
    pub fn new(steps: Vec<std::io::Result<Vec<u8>>>) -> Self {
        Self { steps: steps.into() }
    }
}

#[cfg(test)]
impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.steps.pop_front() {
            None => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data")),
            Some(Err(e)) => Err(e),
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    fn data(s: &str) -> io::Result<Vec<u8>> {
        Ok(s.as_bytes().to_vec())
    }

    fn broken() -> io::Result<Vec<u8>> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
    }

    #[test]
    fn test_fragmented_delivery() {
        let mut reader = RelayReader::new(ScriptedTransport::new(vec![data("ha"), data("ppy\nsad\n")]));
        assert_eq!(reader.poll(), ReadOutcome::Labels(vec![]));
        assert_eq!(reader.buffered(), 2);
        assert_eq!(reader.poll(), ReadOutcome::Labels(vec!["happy".into(), "sad".into()]));
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_timeout_is_idle() {
        let mut reader = RelayReader::new(ScriptedTransport::new(vec![]));
        assert_eq!(reader.poll(), ReadOutcome::Idle);
        assert_eq!(reader.consecutive_failures(), 0);
    }

    #[test]
    fn test_failures_then_recovery() {
        let mut reader = RelayReader::new(ScriptedTransport::new(vec![
            broken(),
            broken(),
            broken(),
            data("neutral\n"),
            data("angry\n"),
        ]));
        for expected in 1..=3 {
            assert_eq!(reader.poll(), ReadOutcome::Failed);
            assert_eq!(reader.consecutive_failures(), expected);
        }
        assert_eq!(reader.poll(), ReadOutcome::Labels(vec!["neutral".into()]));
        assert_eq!(reader.consecutive_failures(), 0);
        assert_eq!(reader.poll(), ReadOutcome::Labels(vec!["angry".into()]));
    }

    #[test]
    fn test_partial_line_does_not_survive_a_failure() {
        let mut reader = RelayReader::new(ScriptedTransport::new(vec![data("ha"), broken(), data("sad\n")]));
        assert_eq!(reader.poll(), ReadOutcome::Labels(vec![]));
        assert_eq!(reader.poll(), ReadOutcome::Failed);
        assert_eq!(reader.buffered(), 0);
        assert_eq!(reader.poll(), ReadOutcome::Labels(vec!["sad".into()]));
    }

    #[test]
    fn test_malformed_line_is_discarded() {
        let mut bytes = b"happy\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        bytes.extend_from_slice(b"sad\n");
        let mut reader = RelayReader::new(Cursor::new(bytes));
        assert_eq!(reader.poll(), ReadOutcome::Labels(vec!["happy".into(), "sad".into()]));
        assert_eq!(reader.decode_failures(), 1);
    }

    #[test]
    fn test_blank_and_padded_lines() {
        let mut reader = RelayReader::new(Cursor::new(b"\n  \n surprise \r\n".to_vec()));
        assert_eq!(reader.poll(), ReadOutcome::Labels(vec!["surprise".into()]));
    }

    #[test]
    fn test_end_of_stream_is_idle() {
        let mut reader = RelayReader::new(Cursor::new(Vec::new()));
        assert_eq!(reader.poll(), ReadOutcome::Idle);
    }
}

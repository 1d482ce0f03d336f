use thiserror::Error;

use crate::mcp::rpc::EnvelopeError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("message exceeds the {limit} byte frame limit")]
    MessageTooLarge { limit: usize },
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid header line: {0}")]
    InvalidHeader(String),
    #[error("malformed message: {0}")]
    Malformed(#[source] EnvelopeError),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl TransportError {
    /// A recoverable error concerns a single, fully consumed frame; the stream
    /// is still in sync and the next read may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_malformed_frames_are_recoverable() {
        let malformed = TransportError::Malformed(EnvelopeError::InvalidResponse);
        assert!(malformed.is_recoverable());

        assert!(!TransportError::MessageTooLarge { limit: 8 }.is_recoverable());
        assert!(!TransportError::MissingContentLength.is_recoverable());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(!TransportError::from(io).is_recoverable());
    }
}

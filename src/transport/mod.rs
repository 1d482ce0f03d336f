//! Framed envelope transports
//!
//! A transport moves whole envelopes over a byte stream. Two framings are
//! provided: newline-delimited JSON ([`LineTransport`]) and `Content-Length`
//! header framing ([`HeaderTransport`]). A session uses exactly one of them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::mcp::rpc::Envelope;

mod error;
mod header;
mod line;

pub use error::TransportError;
pub use header::HeaderTransport;
pub use line::LineTransport;

/// Initial capacity of the read buffer.
pub const INITIAL_BUFFER_BYTES: usize = 64 * 1024;
/// Largest single frame a reader accepts before failing the stream.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Reads and writes whole envelopes.
///
/// Reads are issued by a single reader. Writes may come from many tasks at
/// once; implementations serialize them so frames never interleave.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns `Ok(None)` on a clean end of stream.
    async fn read(&self) -> Result<Option<Envelope>, TransportError>;

    async fn write(&self, envelope: &Envelope) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    #[default]
    Line,
    Header,
}

#[derive(Debug, Error)]
#[error("unknown framing {0:?}, expected \"line\" or \"header\"")]
pub struct UnknownFraming(String);

impl FromStr for Framing {
    type Err = UnknownFraming;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "line" | "ndjson" => Ok(Self::Line),
            "header" | "content-length" => Ok(Self::Header),
            _ => Err(UnknownFraming(value.to_string())),
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line => f.write_str("line"),
            Self::Header => f.write_str("header"),
        }
    }
}

/// Builds a transport over the process's stdin and stdout.
pub fn stdio(framing: Framing, max_message_bytes: usize) -> Arc<dyn Transport> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    match framing {
        Framing::Line => {
            Arc::new(LineTransport::new(stdin, stdout).with_max_message_bytes(max_message_bytes))
        }
        Framing::Header => Arc::new(
            HeaderTransport::new(stdin, stdout).with_max_message_bytes(max_message_bytes),
        ),
    }
}

/// Reads one `\n`-terminated line into `line`, without the terminator or a
/// trailing `\r`. Returns `false` when the stream ended before any byte.
///
/// A line longer than `limit` fails with [`TransportError::MessageTooLarge`]
/// instead of being truncated.
pub(crate) async fn read_bounded_line<R>(
    reader: &mut R,
    limit: usize,
    line: &mut Vec<u8>,
) -> Result<bool, TransportError>
where
    R: AsyncBufRead + Unpin + Send,
{
    line.clear();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            strip_carriage_return(line);
            return Ok(!line.is_empty());
        }

        let (chunk_len, consumed, terminated) = match available.iter().position(|b| *b == b'\n') {
            Some(index) => (index, index + 1, true),
            None => (available.len(), available.len(), false),
        };

        if line.len() + chunk_len > limit {
            return Err(TransportError::MessageTooLarge { limit });
        }
        line.extend_from_slice(&available[..chunk_len]);
        reader.consume(consumed);

        if terminated {
            strip_carriage_return(line);
            return Ok(true);
        }
    }
}

fn strip_carriage_return(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
}

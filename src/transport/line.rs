use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::trace;

use super::{read_bounded_line, Transport, TransportError, INITIAL_BUFFER_BYTES, MAX_MESSAGE_BYTES};
use crate::mcp::rpc::Envelope;

/// Newline-delimited JSON: one envelope per line.
pub struct LineTransport<R, W> {
    reader: Mutex<LineReader<R>>,
    writer: Mutex<W>,
    max_message_bytes: usize,
}

struct LineReader<R> {
    inner: BufReader<R>,
    line: Vec<u8>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(LineReader {
                inner: BufReader::with_capacity(INITIAL_BUFFER_BYTES, reader),
                line: Vec::with_capacity(INITIAL_BUFFER_BYTES),
            }),
            writer: Mutex::new(writer),
            max_message_bytes: MAX_MESSAGE_BYTES,
        }
    }

    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read(&self) -> Result<Option<Envelope>, TransportError> {
        let mut reader = self.reader.lock().await;
        let LineReader { inner, line } = &mut *reader;

        loop {
            if !read_bounded_line(inner, self.max_message_bytes, line).await? {
                return Ok(None);
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            trace!(bytes = line.len(), "frame received");
            return Envelope::parse(line)
                .map(Some)
                .map_err(TransportError::Malformed);
        }
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut frame = envelope.to_bytes().map_err(TransportError::Encode)?;
        frame.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

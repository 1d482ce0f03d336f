use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::trace;

use super::{read_bounded_line, Transport, TransportError, INITIAL_BUFFER_BYTES, MAX_MESSAGE_BYTES};
use crate::mcp::rpc::Envelope;

const CONTENT_LENGTH: &str = "content-length";

/// `Content-Length` framing:
///
/// ```text
/// Content-Length: <length>\r\n
/// \r\n
/// <payload>
/// ```
pub struct HeaderTransport<R, W> {
    reader: Mutex<HeaderReader<R>>,
    writer: Mutex<W>,
    max_message_bytes: usize,
}

struct HeaderReader<R> {
    inner: BufReader<R>,
    line: Vec<u8>,
}

impl<R, W> HeaderTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(HeaderReader {
                inner: BufReader::with_capacity(INITIAL_BUFFER_BYTES, reader),
                line: Vec::new(),
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

impl<R> HeaderReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Reads the header block. `Ok(None)` means the stream ended cleanly
    /// before a new frame started.
    async fn read_content_length(&mut self, limit: usize) -> Result<Option<usize>, TransportError> {
        let mut content_length = None;
        let mut started = false;

        loop {
            if !read_bounded_line(&mut self.inner, limit, &mut self.line).await? {
                if started {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed while reading headers",
                    )));
                }
                return Ok(None);
            }
            started = true;

            let line = String::from_utf8_lossy(&self.line);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            let Some((name, value)) = trimmed.split_once(':') else {
                return Err(TransportError::InvalidHeader(trimmed.to_string()));
            };
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let length = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| TransportError::InvalidHeader(trimmed.to_string()))?;
                content_length = Some(length);
            }
            // Other headers (e.g. Content-Type) are ignored.
        }

        content_length
            .map(Some)
            .ok_or(TransportError::MissingContentLength)
    }
}

#[async_trait]
impl<R, W> Transport for HeaderTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read(&self) -> Result<Option<Envelope>, TransportError> {
        let mut reader = self.reader.lock().await;
        let Some(content_length) = reader.read_content_length(self.max_message_bytes).await? else {
            return Ok(None);
        };
        if content_length > self.max_message_bytes {
            return Err(TransportError::MessageTooLarge {
                limit: self.max_message_bytes,
            });
        }

        let mut body = vec![0_u8; content_length];
        reader.inner.read_exact(&mut body).await?;
        trace!(bytes = content_length, "frame received");

        Envelope::parse(&body)
            .map(Some)
            .map_err(TransportError::Malformed)
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let body = envelope.to_bytes().map_err(TransportError::Encode)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        let mut writer = self.writer.lock().await;
        writer.write_all(header.as_bytes()).await?;
        writer.write_all(&body).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::duplex;

    use super::*;
    use crate::mcp::rpc::{json_rpc_result, RequestId};

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{body}", body.len()).into_bytes()
    }

    #[tokio::test]
    async fn reads_consecutive_frames_until_clean_eof() {
        let mut input = frame(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        input.extend(frame(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#));
        let transport = HeaderTransport::new(&input[..], tokio::io::sink());

        let first = transport.read().await.expect("read").expect("envelope");
        assert_eq!(first.id(), Some(&RequestId::Integer(1)));
        let second = transport.read().await.expect("read").expect("envelope");
        assert_eq!(second.method(), Some("notifications/initialized"));
        assert!(transport.read().await.expect("eof").is_none());
    }

    #[tokio::test]
    async fn header_names_are_case_insensitive_and_extra_headers_ignored() {
        let body = r#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#;
        let input = format!(
            "content-length: {}\r\n{}\r\n\r\n{body}",
            body.len(),
            "Content-Type: application/vscode-jsonrpc; charset=utf-8",
        );
        let transport = HeaderTransport::new(input.as_bytes(), tokio::io::sink());

        let envelope = transport.read().await.expect("read").expect("envelope");
        assert_eq!(envelope.method(), Some("ping"));
    }

    #[tokio::test]
    async fn missing_content_length_is_fatal() {
        let input = b"Content-Type: application/json\r\n\r\n{}";
        let transport = HeaderTransport::new(&input[..], tokio::io::sink());

        let err = transport.read().await.expect_err("no length");
        assert!(matches!(err, TransportError::MissingContentLength));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn non_numeric_length_is_invalid_header() {
        let input = b"Content-Length: lots\r\n\r\n{}";
        let transport = HeaderTransport::new(&input[..], tokio::io::sink());

        let err = transport.read().await.expect_err("bad length");
        assert!(matches!(err, TransportError::InvalidHeader(_)));
    }

    #[tokio::test]
    async fn oversized_declared_length_is_rejected() {
        let input = b"Content-Length: 4096\r\n\r\n";
        let transport =
            HeaderTransport::new(&input[..], tokio::io::sink()).with_max_message_bytes(1024);

        let err = transport.read().await.expect_err("too large");
        assert!(matches!(err, TransportError::MessageTooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn eof_inside_header_block_is_an_io_error() {
        let input = b"Content-Length: 10\r\n";
        let transport = HeaderTransport::new(&input[..], tokio::io::sink());

        let err = transport.read().await.expect_err("truncated");
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_consumed_and_recoverable() {
        let mut input = frame("{broken");
        input.extend(frame(r#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#));
        let transport = HeaderTransport::new(&input[..], tokio::io::sink());

        let err = transport.read().await.expect_err("malformed");
        assert!(err.is_recoverable());
        let next = transport.read().await.expect("read").expect("envelope");
        assert_eq!(next.id(), Some(&RequestId::Integer(5)));
    }

    #[tokio::test]
    async fn writes_length_prefixed_frames() {
        let (client, server) = duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let transport = HeaderTransport::new(server_read, server_write);

        transport
            .write(&json_rpc_result(RequestId::Integer(1), json!({})))
            .await
            .expect("write");
        transport.close().await.expect("close");

        let mut output = String::new();
        let mut client = client;
        client.read_to_string(&mut output).await.expect("read output");
        assert_eq!(
            output,
            "Content-Length: 36\r\n\r\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}"
        );
    }
}

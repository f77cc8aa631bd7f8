use std::io;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::messages::Request;
use super::{MAX_DAP_HEADER_LINE_BYTES, MAX_DAP_MESSAGE_BYTES};

#[derive(Debug, Error)]
pub enum DapError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(String),

    #[error("dap protocol error: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for DapError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(sanitize_json_error_message(&err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, DapError>;

/// Strips user-provided scalars from `serde_json` error messages.
///
/// DAP payloads carry evaluated expressions and launch arguments, which must not end up in
/// logs or error responses.
pub(crate) fn sanitize_json_error_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find('"') {
        out.push_str(&rest[..start + 1]);
        rest = &rest[start + 1..];

        let Some(end) = rest.find('"') else {
            out.push_str(rest);
            return out;
        };
        out.push_str("<redacted>\"");
        rest = &rest[end + 1..];
    }
    out.push_str(rest);

    // `unknown field `secret`, expected ...`: keep the expected list, drop the field name.
    if let Some(start) = out.find('`') {
        if let Some(end_rel) = out[start + 1..].find('`') {
            let end = start + 1 + end_rel;
            out.replace_range(start + 1..end, "<redacted>");
        }
    }

    out
}

pub struct DapReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> DapReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    async fn read_header_line(&mut self, line: &mut Vec<u8>) -> Result<usize> {
        line.clear();
        let n = (&mut self.reader)
            .take(MAX_DAP_HEADER_LINE_BYTES as u64 + 1)
            .read_until(b'\n', line)
            .await?;
        if line.len() > MAX_DAP_HEADER_LINE_BYTES {
            return Err(DapError::Protocol(format!(
                "header line exceeds maximum size ({MAX_DAP_HEADER_LINE_BYTES} bytes)"
            )));
        }
        Ok(n)
    }

    /// Reads one framed message. `Ok(None)` means the peer closed the stream between messages.
    pub async fn read_value(&mut self) -> Result<Option<Value>> {
        let mut content_length: Option<usize> = None;
        let mut saw_header = false;
        let mut line = Vec::new();

        loop {
            let n = self.read_header_line(&mut line).await?;
            if n == 0 {
                if saw_header {
                    return Err(DapError::Protocol(
                        "stream ended inside a header block".to_string(),
                    ));
                }
                return Ok(None);
            }

            let text = std::str::from_utf8(&line)
                .map_err(|_| DapError::Protocol("header line is not UTF-8".to_string()))?;
            let trimmed = text.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                if !saw_header {
                    // Stray blank line between messages.
                    continue;
                }
                break;
            }
            saw_header = true;

            let Some((name, value)) = trimmed.split_once(':') else {
                continue;
            };

            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                let len = value.parse::<usize>().map_err(|e| {
                    DapError::Protocol(format!("invalid Content-Length {value:?}: {e}"))
                })?;
                if len > MAX_DAP_MESSAGE_BYTES {
                    return Err(DapError::Protocol(format!(
                        "Content-Length {len} exceeds maximum allowed size {MAX_DAP_MESSAGE_BYTES}"
                    )));
                }
                content_length = Some(len);
            }
        }

        let Some(len) = content_length else {
            return Err(DapError::Protocol(
                "missing Content-Length header".to_string(),
            ));
        };

        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;
        Ok(Some(serde_json::from_slice::<Value>(&buf)?))
    }

    pub async fn read_request(&mut self) -> Result<Option<Request>> {
        let Some(value) = self.read_value().await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value::<Request>(value)?))
    }
}

pub struct DapWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> DapWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_value(&mut self, value: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.writer
            .write_all(format!("Content-Length: {}\r\n\r\n", bytes.len()).as_bytes())
            .await?;
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

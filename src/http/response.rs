//! HTTP/1.1 response reader
//!
//! Reads one response off a connection that is closed afterwards. The body
//! is framed by Content-Length, chunked transfer coding, or end of stream.

use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Maximum response header size (32KB)
const MAX_RESPONSE_HEADER_SIZE: usize = 32 * 1024;

/// Maximum number of response headers
const MAX_HEADERS: usize = 64;

/// Maximum chunk-size line or trailer line
const MAX_CHUNK_LINE: usize = 4 * 1024;

/// A complete response, owned by the caller
#[derive(Debug, Clone, Serialize)]
pub struct ResponseResult {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    #[serde(skip)]
    pub body: Bytes,
}

impl ResponseResult {
    /// First header with this name, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Parsed status line and headers
struct Head {
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
}

/// Body framing
#[derive(Debug, PartialEq, Eq)]
enum BodyKind {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

/// Read one response; `head_request` suppresses the body
pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
    head_request: bool,
) -> Result<ResponseResult> {
    let mut buf = BytesMut::with_capacity(8 * 1024);

    let head = loop {
        let head = read_head(reader, &mut buf).await?;
        // Interim responses precede the final one
        if (100..200).contains(&head.status) && head.status != 101 {
            trace!("Skipping interim response {}", head.status);
            continue;
        }
        break head;
    };

    let kind = body_kind(&head, head_request)?;
    trace!(
        "Response: status={}, headers={}, body={:?}",
        head.status,
        head.headers.len(),
        kind
    );

    let body = match kind {
        BodyKind::Empty => Bytes::new(),
        BodyKind::Length(len) => read_fixed_body(reader, &mut buf, len).await?,
        BodyKind::Chunked => read_chunked_body(reader, &mut buf).await?,
        BodyKind::UntilClose => read_until_close(reader, &mut buf).await?,
    };

    Ok(ResponseResult {
        status: head.status,
        reason: head.reason,
        headers: head.headers,
        body,
    })
}

/// Read more bytes into `buf`; returns the count (0 on EOF)
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut BytesMut) -> io::Result<usize> {
    buf.reserve(8 * 1024);
    reader.read_buf(buf).await
}

async fn read_head<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut BytesMut) -> Result<Head> {
    loop {
        if !buf.is_empty() {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut response = httparse::Response::new(&mut headers);
            match response.parse(&buf[..]) {
                Ok(httparse::Status::Complete(len)) => {
                    let head = Head {
                        status: response.code.unwrap_or(0),
                        reason: response.reason.unwrap_or("").to_string(),
                        headers: response
                            .headers
                            .iter()
                            .map(|h| {
                                (
                                    h.name.to_string(),
                                    String::from_utf8_lossy(h.value).into_owned(),
                                )
                            })
                            .collect(),
                    };
                    buf.advance(len);
                    return Ok(head);
                }
                Ok(httparse::Status::Partial) => {}
                Err(httparse::Error::TooManyHeaders) => {
                    return Err(Error::protocol(format!(
                        "Response has more than {} headers",
                        MAX_HEADERS
                    )));
                }
                Err(e) => {
                    return Err(Error::protocol(format!("Invalid HTTP response: {}", e)));
                }
            }
        }

        if buf.len() >= MAX_RESPONSE_HEADER_SIZE {
            return Err(Error::protocol("Response header too large"));
        }

        if fill(reader, buf).await? == 0 {
            return Err(Error::protocol("Connection closed before headers complete"));
        }
    }
}

fn body_kind(head: &Head, head_request: bool) -> Result<BodyKind> {
    if head_request || head.status == 204 || head.status == 304 || head.status < 200 {
        return Ok(BodyKind::Empty);
    }

    let mut content_length: Option<usize> = None;
    let mut chunked = false;

    for (name, value) in &head.headers {
        if name.eq_ignore_ascii_case("transfer-encoding") {
            // Chunked applies only as the final coding
            chunked = value
                .rsplit(',')
                .next()
                .map_or(false, |c| c.trim().eq_ignore_ascii_case("chunked"));
        } else if name.eq_ignore_ascii_case("content-length") {
            let len = value
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::protocol(format!("Invalid Content-Length: {}", value)))?;
            if content_length.map_or(false, |prev| prev != len) {
                return Err(Error::protocol("Conflicting Content-Length headers"));
            }
            content_length = Some(len);
        }
    }

    Ok(if chunked {
        BodyKind::Chunked
    } else if let Some(len) = content_length {
        BodyKind::Length(len)
    } else {
        BodyKind::UntilClose
    })
}

async fn read_fixed_body<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
    len: usize,
) -> Result<Bytes> {
    while buf.len() < len {
        if fill(reader, buf).await? == 0 {
            return Err(Error::protocol(format!(
                "Connection closed after {} of {} body bytes",
                buf.len(),
                len
            )));
        }
    }
    Ok(buf.split_to(len).freeze())
}

/// Read one CRLF-terminated line, returning it without the CRLF
async fn read_line<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut BytesMut) -> Result<BytesMut> {
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = buf.split_to(pos);
            buf.advance(2);
            return Ok(line);
        }
        if buf.len() > MAX_CHUNK_LINE {
            return Err(Error::protocol("Chunk line too long"));
        }
        if fill(reader, buf).await? == 0 {
            return Err(Error::protocol("Connection closed in chunked body"));
        }
    }
}

async fn read_chunked_body<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
) -> Result<Bytes> {
    let mut body = BytesMut::new();

    loop {
        let line = read_line(reader, buf).await?;
        let line = std::str::from_utf8(&line)
            .map_err(|_| Error::protocol("Invalid chunk header"))?;

        // Chunk size is hex, possibly followed by extensions
        let size_str = line.split(';').next().unwrap_or(line).trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| Error::protocol(format!("Invalid chunk size: {:?}", size_str)))?;

        if size == 0 {
            break;
        }
        let framed = size
            .checked_add(2)
            .ok_or_else(|| Error::protocol(format!("Chunk size out of range: {:?}", size_str)))?;

        while buf.len() < framed {
            if fill(reader, buf).await? == 0 {
                return Err(Error::protocol("Connection closed in chunk data"));
            }
        }
        body.extend_from_slice(&buf[..size]);
        if &buf[size..framed] != b"\r\n" {
            return Err(Error::protocol("Missing CRLF after chunk data"));
        }
        buf.advance(framed);
    }

    // Trailers end with an empty line; a peer that closes instead is tolerated
    loop {
        match read_line(reader, buf).await {
            Ok(line) if line.is_empty() => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    Ok(body.freeze())
}

async fn read_until_close<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
) -> Result<Bytes> {
    loop {
        match fill(reader, buf).await {
            Ok(0) => break,
            Ok(_) => {}
            // TLS peers often close without close_notify
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(buf.split().freeze())
}

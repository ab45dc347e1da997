//! The HTTP/1.1 driver: build a request, send it, read and decode the
//! complete response.
//!
//! Responses are accumulated in a buffer grown in 1 MiB blocks; all
//! positions are kept as offsets so growth never invalidates them.
//! Chunked transfer encoding is stripped in place by copying each chunk's
//! payload down over the envelope already consumed.

use std::io::{Read, Write};

use crate::progress::TransferProgress;
use crate::proxy::{self, ProxyConfig};
use crate::tls::TlsStream;
use crate::{tcp, tls, TransportError};

const BLOCK: usize = 1 << 20;

/// One repository server endpoint, plus the optional proxy in front of it.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    pub host: String,
    pub port: u16,
    pub proxy: Option<ProxyConfig>,
    pub user_agent: String,
}

/// A decoded response: status code and the de-chunked body.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpEndpoint {
    /// The Host header value, bracketing bare IPv6 addresses.
    pub fn host_header(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Dial the server: TCP (to the proxy if one is configured), CONNECT
    /// tunnel, then the TLS handshake.
    fn dial(&self) -> Result<TlsStream, TransportError> {
        let mut stream = match &self.proxy {
            Some(proxy) => {
                let mut tcp_stream = tcp::connect(&proxy.host, proxy.port)?;
                let bracketed = if self.host.contains(':') && !self.host.starts_with('[') {
                    format!("[{}]", self.host)
                } else {
                    self.host.clone()
                };
                proxy::tunnel(&mut tcp_stream, proxy, &bracketed, self.port)?;
                tcp_stream
            }
            None => tcp::connect(&self.host, self.port)?,
        };
        stream.flush().ok();
        tls::wrap(stream, &self.host)
    }

    /// GET a path, expecting 200.
    pub fn get(
        &self,
        path: &str,
        progress: Option<&mut TransferProgress>,
    ) -> Result<HttpResponse, TransportError> {
        let request = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             User-Agent: {agent}\r\n\
             Git-Protocol: version=2\r\n\
             \r\n",
            host = self.host_header(),
            agent = self.user_agent,
        );
        self.exchange(request.into_bytes(), path, progress)
    }

    /// POST a git-upload-pack request body, expecting 200.
    pub fn post(
        &self,
        path: &str,
        body: &[u8],
        progress: Option<&mut TransferProgress>,
    ) -> Result<HttpResponse, TransportError> {
        let mut request = format!(
            "POST {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             User-Agent: {agent}\r\n\
             Accept-encoding: deflate, gzip\r\n\
             Content-type: application/x-git-upload-pack-request\r\n\
             Accept: application/x-git-upload-pack-result\r\n\
             Git-Protocol: version=2\r\n\
             Content-length: {len}\r\n\
             \r\n",
            host = self.host_header(),
            agent = self.user_agent,
            len = body.len(),
        )
        .into_bytes();
        request.extend_from_slice(body);
        self.exchange(request, path, progress)
    }

    fn exchange(
        &self,
        request: Vec<u8>,
        context: &str,
        progress: Option<&mut TransferProgress>,
    ) -> Result<HttpResponse, TransportError> {
        let mut stream = self.dial()?;
        stream.write_all(&request)?;
        stream.flush()?;

        let response = read_response(&mut stream, progress)?;
        if response.status != 200 {
            return Err(TransportError::Status {
                status: response.status,
                context: context.to_string(),
            });
        }
        Ok(response)
    }
}

/// Parse the status code out of an `HTTP/1.x NNN ...` status line.
pub fn parse_status_line(response: &[u8]) -> Result<u16, TransportError> {
    if !response.starts_with(b"HTTP/1.") {
        return Err(TransportError::Framing("missing HTTP status line".into()));
    }
    let space = response
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| TransportError::Framing("malformed status line".into()))?;
    let digits: Vec<u8> = response[space + 1..]
        .iter()
        .copied()
        .take_while(u8::is_ascii_digit)
        .collect();
    std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TransportError::Framing("malformed status code".into()))
}

/// Case-insensitive search for a header value within the header block.
fn find_header<'a>(headers: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let lower: Vec<u8> = headers.iter().map(|b| b.to_ascii_lowercase()).collect();
    let needle = format!("\r\n{}:", name.to_ascii_lowercase());
    let pos = lower
        .windows(needle.len())
        .position(|w| w == needle.as_bytes())?;
    let value_start = pos + needle.len();
    let value_end = headers[value_start..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| value_start + p)
        .unwrap_or(headers.len());
    let value = &headers[value_start..value_end];
    Some(value.strip_prefix(b" ").unwrap_or(value))
}

fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < from + needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Read a complete response from `stream`: headers, then a body delimited
/// by Content-Length or chunked transfer encoding.
pub fn read_response(
    stream: &mut impl Read,
    mut progress: Option<&mut TransferProgress>,
) -> Result<HttpResponse, TransportError> {
    let mut buf: Vec<u8> = Vec::with_capacity(BLOCK);
    let mut chunk = [0u8; 16384];

    let mut header_end: Option<usize> = None;
    let mut status = 0u16;
    let mut content_length: Option<usize> = None;
    let mut decoder: Option<ChunkDecoder> = None;

    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        if buf.len() + n > buf.capacity() {
            buf.reserve(BLOCK.max(n));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(p) = progress.as_deref_mut() {
            p.account(buf.len() as u64);
        }

        if header_end.is_none() {
            let Some(terminator) = find_subslice(&buf, b"\r\n\r\n", 0) else {
                continue;
            };
            let end = terminator + 4;
            let headers = &buf[..end];
            status = parse_status_line(headers)?;

            if let Some(value) = find_header(headers, "content-length") {
                let text = std::str::from_utf8(value)
                    .map_err(|_| TransportError::Framing("bad Content-Length".into()))?;
                content_length = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| TransportError::Framing("bad Content-Length".into()))?,
                );
            } else {
                decoder = Some(ChunkDecoder::new(end));
            }
            header_end = Some(end);
        }

        let start = header_end.unwrap();
        match (&mut decoder, content_length) {
            (None, Some(length)) => {
                if buf.len() - start >= length {
                    let body = buf[start..start + length].to_vec();
                    if let Some(p) = progress.as_deref_mut() {
                        p.finish();
                    }
                    return Ok(HttpResponse { status, body });
                }
            }
            (Some(dec), _) => {
                if dec.advance(&mut buf)? {
                    let body = buf[start..start + dec.decoded_len()].to_vec();
                    if let Some(p) = progress.as_deref_mut() {
                        p.finish();
                    }
                    return Ok(HttpResponse { status, body });
                }
            }
            (None, None) => unreachable!("either a length or a chunk decoder is set"),
        }
    }
}

/// Incremental in-place chunked-transfer decoder.
///
/// Decoded payload accumulates at the front of the body region while the
/// raw cursor walks the undecoded tail; the decoded region can never
/// overtake the raw cursor, so the copy-down is always safe.
struct ChunkDecoder {
    body_start: usize,
    decoded: usize,
    raw: usize,
    done: bool,
}

impl ChunkDecoder {
    fn new(body_start: usize) -> Self {
        Self {
            body_start,
            decoded: 0,
            raw: body_start,
            done: false,
        }
    }

    fn decoded_len(&self) -> usize {
        self.decoded
    }

    /// Consume as many complete chunks as the buffer holds. Returns true
    /// once the terminating zero-size chunk has been seen.
    fn advance(&mut self, buf: &mut Vec<u8>) -> Result<bool, TransportError> {
        while !self.done {
            // The size line must be complete.
            let Some(line_end) = find_subslice(buf, b"\r\n", self.raw) else {
                break;
            };
            let size_line = &buf[self.raw..line_end];
            let size_text = std::str::from_utf8(size_line)
                .map_err(|_| TransportError::Framing("bad chunk size".into()))?;
            let size_text = size_text.split(';').next().unwrap_or(size_text).trim();
            let size = usize::from_str_radix(size_text, 16)
                .map_err(|_| TransportError::Framing(format!("bad chunk size '{size_text}'")))?;

            if size == 0 {
                self.done = true;
                break;
            }

            let data_start = line_end + 2;
            // Payload plus its trailing CRLF must be complete.
            if buf.len() < data_start + size + 2 {
                break;
            }
            if &buf[data_start + size..data_start + size + 2] != b"\r\n" {
                return Err(TransportError::Framing("missing chunk terminator".into()));
            }

            buf.copy_within(
                data_start..data_start + size,
                self.body_start + self.decoded,
            );
            self.decoded += size;
            self.raw = data_start + size + 2;
        }
        Ok(self.done)
    }
}

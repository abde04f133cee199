//! Incremental HTTP/1.x request framing.
//!
//! The framer operates on a connection's accumulated receive buffer. Each
//! call to [`Framer::advance`] consumes at most one complete message from
//! the front of the buffer; partial arrivals leave the buffer untouched and
//! yield `Ok(None)` so the caller simply waits for the next read event.
//! Chunked bodies are decoded into a contiguous body before the request is
//! handed onward, so downstream code only ever sees fixed-length framing.

use std::collections::HashMap;
use std::convert::TryFrom;

use crate::headers;
use crate::http::error::RequestError;
use crate::http::request::{parse_cookies, url_decode, Request};
use crate::version::Version;

/// Note httparse requires we preallocate an array of this size so be wise.
pub const MAX_HEADERS_NUM: usize = 256;
/// Upper bound for a single chunk-size line, including extensions.
pub const MAX_CHUNK_HEAD: usize = 128;
/// Hard cap on an assembled body; per-location limits are enforced by the
/// router, this one only guards the buffer itself.
pub const MAX_BODY_SIZE: u64 = 104_857_600;
/// Longer request URIs are answered with 414.
pub const MAX_URI_LENGTH: usize = 2048;

const KNOWN_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "PATCH", "OPTIONS",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Fixed(u64),
    Chunked,
}

#[derive(Debug)]
enum State {
    Headers,
    Body { head: Box<Request>, kind: BodyKind, header_len: usize },
}

/// Incremental request parser for one connection.
#[derive(Debug)]
pub struct Framer {
    state: State,
    max_headers_size: usize,
}

impl Framer {
    pub fn new(max_headers_size: usize) -> Framer {
        Framer {
            state: State::Headers,
            max_headers_size,
        }
    }

    /// Drops any half-parsed message. Used when an error response was
    /// queued and the connection is about to close.
    pub fn reset(&mut self) {
        self.state = State::Headers;
    }

    /// Tries to pull one complete request out of `buf`.
    ///
    /// Consumed bytes are removed from the front of `buf`; for keep-alive
    /// the leftover stays in place and seeds the next request.
    pub fn advance(
        &mut self,
        buf: &mut Vec<u8>,
    ) -> Result<Option<Request>, RequestError> {
        loop {
            match std::mem::replace(&mut self.state, State::Headers) {
                State::Headers => {
                    skip_blank_prefix(buf);
                    let (end, sep) = match find_header_end(buf) {
                        Some(x) => x,
                        None => {
                            if buf.len() > self.max_headers_size {
                                return Err(RequestError::HeadersAreTooLarge);
                            }
                            return Ok(None);
                        }
                    };
                    if end + sep > self.max_headers_size {
                        return Err(RequestError::HeadersAreTooLarge);
                    }
                    let (head, kind) = parse_head(&buf[..end + sep])?;
                    buf.drain(..end + sep);
                    self.state = State::Body {
                        head: Box::new(head),
                        kind,
                        header_len: end + sep,
                    };
                    // Fall through: the body bytes may already be here.
                }
                State::Body { mut head, kind, header_len } => match kind {
                    BodyKind::Fixed(0) => {
                        return Ok(Some(*head));
                    }
                    BodyKind::Fixed(n) => {
                        if n > MAX_BODY_SIZE {
                            return Err(RequestError::PayloadTooLarge);
                        }
                        // A length claim the byte counter cannot even
                        // represent is a framing error, not a large body.
                        let n = usize::try_from(n)
                            .ok()
                            .filter(|n| n.checked_add(header_len).is_some())
                            .ok_or(RequestError::ContentLengthOverflow)?;
                        if buf.len() < n {
                            self.state = State::Body { head, kind, header_len };
                            return Ok(None);
                        }
                        head.body = buf.drain(..n).collect();
                        head.content_length = n as u64;
                        return Ok(Some(*head));
                    }
                    BodyKind::Chunked => match decode_chunked(buf)? {
                        Some((body, consumed)) => {
                            buf.drain(..consumed);
                            head.content_length = body.len() as u64;
                            head.body = body;
                            return Ok(Some(*head));
                        }
                        None => {
                            if buf.len() as u64 > MAX_BODY_SIZE {
                                return Err(RequestError::PayloadTooLarge);
                            }
                            self.state = State::Body { head, kind, header_len };
                            return Ok(None);
                        }
                    },
                },
            }
        }
    }
}

/// Empty lines before a request line are tolerated (RFC 7230 §3.5).
fn skip_blank_prefix(buf: &mut Vec<u8>) {
    let n = buf
        .iter()
        .position(|&c| c != b'\r' && c != b'\n')
        .unwrap_or(buf.len());
    if n > 0 {
        buf.drain(..n);
    }
}

/// Locates the header terminator: `\r\n\r\n`, with `\n\n` accepted as a
/// lenient fallback. Whichever occurs first wins, otherwise body bytes
/// that happen to contain the other sequence would be mistaken for the
/// end of an LF-terminated header section. Returns (offset, terminator
/// length).
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = find(buf, b"\r\n\r\n");
    let lf = find(buf, b"\n\n");
    match (crlf, lf) {
        (Some(c), Some(l)) if l < c => Some((l, 2)),
        (Some(c), _) => Some((c, 4)),
        (None, Some(l)) => Some((l, 2)),
        (None, None) => None,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

/// Rewrites bare-LF line endings to CRLF so httparse accepts the lenient
/// form. Only taken on the `\n\n` fallback path.
fn normalize_line_endings(head: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(head.len() + 16);
    let mut prev = 0u8;
    for &c in head {
        if c == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(c);
        prev = c;
    }
    out
}

/// Parses a complete header section into a `Request` head plus its body
/// framing. The slice must include the blank-line terminator.
fn parse_head(raw: &[u8]) -> Result<(Request, BodyKind), RequestError> {
    let normalized;
    let raw = if raw.ends_with(b"\r\n\r\n") {
        raw
    } else {
        normalized = normalize_line_endings(raw);
        &normalized[..]
    };

    let mut header_array = [httparse::EMPTY_HEADER; MAX_HEADERS_NUM];
    let mut parsed = httparse::Request::new(&mut header_array);
    match parsed.parse(raw)? {
        httparse::Status::Complete(_) => {}
        // We only call this with a terminator present, so a partial result
        // means the header section itself is broken.
        httparse::Status::Partial => {
            return Err(RequestError::BadHeaders(httparse::Error::Token))
        }
    }

    let method = parsed.method.unwrap_or("").to_string();
    if !KNOWN_METHODS.contains(&method.as_str()) {
        return Err(RequestError::MethodNotImplemented);
    }
    let version = parsed
        .version
        .and_then(Version::from_minor)
        .ok_or(RequestError::VersionNotSupported)?;

    let raw_path = parsed.path.unwrap_or("");
    if raw_path.len() > MAX_URI_LENGTH {
        return Err(RequestError::UriTooLong);
    }
    let without_fragment = raw_path.split('#').next().unwrap_or("");
    let mut parts = without_fragment.splitn(2, '?');
    let uri = url_decode(parts.next().unwrap_or(""));
    let query_string = parts.next().unwrap_or("").to_string();

    let mut headers: HashMap<String, String> = HashMap::new();
    let mut content_length: Option<u64> = None;
    let mut chunked = false;
    for h in parsed.headers.iter() {
        let value = std::str::from_utf8(h.value)?.trim().to_string();
        if headers::is_content_length(h.name) {
            if content_length.is_some() {
                return Err(RequestError::DuplicateContentLength);
            }
            if value.is_empty() || !value.bytes().all(|c| c.is_ascii_digit())
            {
                return Err(RequestError::ContentLengthOverflow);
            }
            let n = value
                .parse::<u64>()
                .map_err(|_| RequestError::ContentLengthOverflow)?;
            content_length = Some(n);
        } else if headers::is_transfer_encoding(h.name) {
            if !headers::is_chunked(h.value) {
                return Err(RequestError::BadHeaders(httparse::Error::Token));
            }
            chunked = true;
        }
        let key = h.name.to_ascii_lowercase();
        match headers.get_mut(&key) {
            // RFC 7230: repeated headers join into a comma-separated list.
            Some(prev) => {
                prev.push(',');
                prev.push_str(&value);
            }
            None => {
                headers.insert(key, value);
            }
        }
    }

    if chunked && content_length.is_some() {
        return Err(RequestError::ConflictingFraming);
    }

    let host_header = headers.get("host").cloned().unwrap_or_default();
    if version == Version::Http11 && host_header.is_empty() {
        return Err(RequestError::MissingHost);
    }
    let host = match host_header.rsplit_once(':') {
        Some((name, port)) => {
            port.parse::<u16>().map_err(|_| RequestError::BadHost)?;
            name.to_string()
        }
        None => host_header,
    };

    let cookies = headers
        .get("cookie")
        .map(|v| parse_cookies(v))
        .unwrap_or_default();

    let kind = if chunked {
        BodyKind::Chunked
    } else {
        match content_length {
            Some(n) => BodyKind::Fixed(n),
            None => match method.as_str() {
                "POST" | "PUT" | "PATCH" => {
                    return Err(RequestError::LengthRequired)
                }
                _ => BodyKind::Fixed(0),
            },
        }
    };

    let req = Request {
        method,
        uri,
        version,
        query_string,
        headers,
        body: Vec::new(),
        host,
        port: 0,
        cookies,
        content_length: match kind {
            BodyKind::Fixed(n) => n,
            BodyKind::Chunked => 0,
        },
    };
    Ok((req, kind))
}

/// Decodes a chunked body accumulated in `buf`.
///
/// Returns `Ok(None)` while the terminating zero-length chunk (and its
/// final CRLF) has not arrived yet. Trailer lines after the last chunk are
/// consumed and discarded. Decode failures are 400-class errors.
pub fn decode_chunked(
    buf: &[u8],
) -> Result<Option<(Vec<u8>, usize)>, RequestError> {
    let mut body = Vec::new();
    let mut pos = 0;
    loop {
        let line_end = match find(&buf[pos..], b"\r\n") {
            Some(x) => pos + x,
            None => {
                if buf.len() - pos > MAX_CHUNK_HEAD {
                    return Err(RequestError::BadChunk);
                }
                return Ok(None);
            }
        };
        if line_end - pos > MAX_CHUNK_HEAD {
            return Err(RequestError::BadChunk);
        }
        let size_line = &buf[pos..line_end];
        // Chunk extensions (`;name=value`) are allowed and ignored.
        let size_part = match size_line.iter().position(|&c| c == b';') {
            Some(x) => &size_line[..x],
            None => size_line,
        };
        let size_str = std::str::from_utf8(size_part)
            .map_err(|_| RequestError::BadChunk)?
            .trim();
        if size_str.is_empty() {
            return Err(RequestError::BadChunk);
        }
        let size = u64::from_str_radix(size_str, 16)
            .map_err(|_| RequestError::BadChunk)?;
        pos = line_end + 2;

        if size == 0 {
            // Skip optional trailers up to the final blank line.
            loop {
                match find(&buf[pos..], b"\r\n") {
                    Some(0) => return Ok(Some((body, pos + 2))),
                    Some(x) => pos += x + 2,
                    None => return Ok(None),
                }
            }
        }

        let size = usize::try_from(size)
            .map_err(|_| RequestError::PayloadTooLarge)?;
        if body.len() as u64 + size as u64 > MAX_BODY_SIZE {
            return Err(RequestError::PayloadTooLarge);
        }
        if pos + size + 2 > buf.len() {
            return Ok(None);
        }
        body.extend_from_slice(&buf[pos..pos + size]);
        pos += size;
        if &buf[pos..pos + 2] != b"\r\n" {
            return Err(RequestError::BadChunk);
        }
        pos += 2;
    }
}

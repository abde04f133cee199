use std::io::Write;

use crate::http::error::status_text;
use crate::version::Version;

pub const SERVER_TOKEN: &str = concat!("floodgate/", env!("CARGO_PKG_VERSION"));

/// An in-memory response, serialized into a connection's send buffer in
/// one piece. The response reuses the request's declared HTTP version.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub version: Version,
    pub headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    pub fn new(version: Version, status: u16) -> Response {
        Response {
            status,
            reason: status_text(status).to_string(),
            version,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn set_status(&mut self, status: u16, reason: &str) {
        self.status = status;
        self.reason = reason.to_string();
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Replaces the header if present, appends otherwise. Used for
    /// `Connection`, which the reactor decides late.
    pub fn set_header(&mut self, name: &str, value: &str) {
        for (k, v) in self.headers.iter_mut() {
            if k.eq_ignore_ascii_case(name) {
                *v = value.to_string();
                return;
            }
        }
        self.add_header(name, value);
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serializes the full message. `Content-Length` and `Server` are
    /// filled in unless the caller already set them.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 256);
        // Writing to a Vec cannot fail.
        let _ = write!(
            out,
            "{} {} {}\r\n",
            self.version, self.status, self.reason
        );
        for (name, value) in &self.headers {
            let _ = write!(out, "{}: {}\r\n", name, value);
        }
        if !self.has_header("content-length") {
            let _ = write!(out, "Content-Length: {}\r\n", self.body.len());
        }
        if !self.has_header("server") {
            let _ = write!(out, "Server: {}\r\n", SERVER_TOKEN);
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod test {
    use super::Response;
    use crate::version::Version;

    #[test]
    fn test_serialization() {
        let mut resp = Response::new(Version::Http11, 200);
        resp.add_header("Content-Type", "text/plain");
        resp.set_body(b"hi".to_vec());
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn test_version_echo() {
        let resp = Response::new(Version::Http10, 404);
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.0 404 Not Found\r\n"));
    }

    #[test]
    fn test_set_header_replaces() {
        let mut resp = Response::new(Version::Http11, 200);
        resp.set_header("Connection", "keep-alive");
        resp.set_header("Connection", "close");
        assert_eq!(resp.header("connection"), Some("close"));
        assert_eq!(
            resp.to_bytes()
                .windows(b"Connection".len())
                .filter(|w| *w == b"Connection")
                .count(),
            1
        );
    }
}

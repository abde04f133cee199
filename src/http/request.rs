use std::collections::HashMap;

use crate::version::Version;

/// A fully framed request: headers plus the assembled body.
///
/// Chunked bodies have already been decoded by the framer, so `body` is
/// always contiguous and `content_length` reflects its real size.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    /// Request URI with the query string and fragment split off,
    /// percent-decoded.
    pub uri: String,
    pub version: Version,
    pub query_string: String,
    /// Header names lowercased; repeated headers joined with commas.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub host: String,
    /// The port the request arrived on. Set by the reactor from the
    /// listening socket, not trusted from the Host header.
    pub port: u16,
    pub cookies: HashMap<String, String>,
    pub content_length: u64,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|s| s.as_str())
    }

    /// Pulls a field out of an `application/x-www-form-urlencoded` body.
    pub fn form_field(&self, name: &str) -> Option<String> {
        let body = std::str::from_utf8(&self.body).ok()?;
        for pair in body.split('&') {
            let mut it = pair.splitn(2, '=');
            let key = it.next()?;
            if key == name {
                return Some(url_decode(it.next().unwrap_or("")));
            }
        }
        None
    }
}

/// Percent-decoding with `+` treated as space, as form submissions use.
/// Invalid escapes are passed through untouched.
pub fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3);
                match hex.and_then(|h| {
                    std::str::from_utf8(h)
                        .ok()
                        .and_then(|s| u8::from_str_radix(s, 16).ok())
                }) {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Splits a `Cookie` header into a name -> value map.
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let mut it = pair.splitn(2, '=');
        if let (Some(name), Some(value)) = (it.next(), it.next()) {
            cookies.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    cookies
}

//! Body uploads into a location's configured upload directory.
//!
//! `multipart/form-data` bodies are unwrapped to the first file part;
//! anything else is stored verbatim. The stored name comes from the
//! multipart filename, then the URI, then a timestamp fallback. Only the
//! basename is kept, so a hostile filename cannot escape the directory.

use std::fs;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::http::router::{join_paths, RouteResult};
use crate::http::{Request, Response};

fn io_status(e: &io::Error) -> u16 {
    match e.kind() {
        io::ErrorKind::NotFound => 404,
        io::ErrorKind::PermissionDenied => 403,
        _ => 500,
    }
}

/// Extracts the boundary parameter from a Content-Type value.
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    let mut parts = content_type.split(';');
    if !parts
        .next()?
        .trim()
        .eq_ignore_ascii_case("multipart/form-data")
    {
        return None;
    }
    for param in parts {
        let (key, value) = param.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            return Some(value.trim().trim_matches('"').to_string());
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn part_filename(headers: &str) -> Option<String> {
    for line in headers.split('\n') {
        let line = line.trim_end_matches('\r');
        let lower = line.to_ascii_lowercase();
        if !lower.starts_with("content-disposition:") {
            continue;
        }
        let marker = "filename=\"";
        let start = lower.find(marker)? + marker.len();
        let end = line[start..].find('"')? + start;
        return Some(line[start..end].to_string());
    }
    None
}

/// Finds the first multipart part that carries a filename and returns
/// (filename, content).
pub fn extract_file(body: &[u8], boundary: &str) -> Option<(String, Vec<u8>)> {
    let delim = format!("--{}", boundary).into_bytes();
    let mut pos = find(body, &delim, 0)?;
    loop {
        let part_start = pos + delim.len();
        // Terminal boundary carries a trailing `--`.
        if body.get(part_start..part_start + 2) == Some(b"--") {
            return None;
        }
        let head_start = match body.get(part_start..part_start + 2) {
            Some(b"\r\n") => part_start + 2,
            _ => part_start + 1,
        };
        let next = find(body, &delim, head_start)?;
        pos = next;

        let (head_end, body_start) =
            match find(&body[..next], b"\r\n\r\n", head_start) {
                Some(p) => (p, p + 4),
                None => match find(&body[..next], b"\n\n", head_start) {
                    Some(p) => (p, p + 2),
                    None => continue,
                },
            };
        let headers =
            match std::str::from_utf8(&body[head_start..head_end]) {
                Ok(s) => s,
                Err(_) => continue,
            };
        if let Some(filename) = part_filename(headers) {
            // Content runs up to the CRLF preceding the next boundary.
            let mut content_end = next;
            if body.get(content_end.wrapping_sub(2)..content_end)
                == Some(b"\r\n")
            {
                content_end -= 2;
            } else if body.get(content_end.wrapping_sub(1)..content_end)
                == Some(b"\n")
            {
                content_end -= 1;
            }
            if body_start > content_end {
                continue;
            }
            return Some((filename, body[body_start..content_end].to_vec()));
        }
    }
}

fn sanitize(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let base = base.trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

fn fallback_name() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("upload_{}.bin", secs)
}

/// Stores the request body and answers 201 with the stored name.
pub fn handle(req: &Request, route: &RouteResult) -> Result<Response, u16> {
    let location = route.location.ok_or(500u16)?;
    let upload_dir = location.upload_dir.as_deref().ok_or(500u16)?;

    let (name, data) = match req
        .header("content-type")
        .and_then(multipart_boundary)
        .and_then(|b| extract_file(&req.body, &b))
    {
        Some((name, data)) => (name, data),
        None => {
            let from_uri = route
                .remaining_path
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());
            (from_uri.unwrap_or_default(), req.body.clone())
        }
    };
    let name = sanitize(&name).unwrap_or_else(fallback_name);

    let target = join_paths(upload_dir, &name);
    fs::write(&target, &data).map_err(|e| io_status(&e))?;
    info!("stored upload {} ({} bytes)", target, data.len());

    let mut response = Response::new(req.version, 201);
    response.add_header("Content-Type", "text/plain");
    response.add_header(
        "Location",
        &join_paths(route.matched_path.trim_end_matches('/'), &name),
    );
    response.set_body(format!("stored as {}\n", name).into_bytes());
    Ok(response)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::fs;

    use super::{extract_file, handle, multipart_boundary};
    use crate::config::LocationConfig;
    use crate::http::router::{HandlerKind, RouteResult};
    use crate::http::Request;
    use crate::version::Version;

    fn request(body: &[u8], content_type: Option<&str>) -> Request {
        let mut headers = HashMap::new();
        if let Some(ct) = content_type {
            headers.insert("content-type".to_string(), ct.to_string());
        }
        Request {
            method: "POST".into(),
            uri: "/upload/file.txt".into(),
            version: Version::Http11,
            query_string: String::new(),
            headers,
            body: body.to_vec(),
            host: "example.com".into(),
            port: 8080,
            cookies: HashMap::new(),
            content_length: body.len() as u64,
        }
    }

    fn route<'a>(
        location: &'a LocationConfig,
        remaining: &str,
    ) -> RouteResult<'a> {
        RouteResult {
            kind: HandlerKind::Upload,
            status: 200,
            server: None,
            location: Some(location),
            fs_path: String::new(),
            matched_path: "/upload".to_string(),
            remaining_path: remaining.to_string(),
            redirect: None,
        }
    }

    #[test]
    fn test_boundary_parse() {
        assert_eq!(
            multipart_boundary("multipart/form-data; boundary=xyz"),
            Some("xyz".to_string())
        );
        assert_eq!(
            multipart_boundary("multipart/form-data; boundary=\"a b\""),
            Some("a b".to_string())
        );
        assert_eq!(multipart_boundary("text/plain"), None);
    }

    #[test]
    fn test_extract_file_part() {
        let body = b"--XX\r\n\
            Content-Disposition: form-data; name=\"f\"; filename=\"pic.png\"\r\n\
            Content-Type: image/png\r\n\r\n\
            BINARY\r\n\
            --XX--\r\n";
        let (name, data) = extract_file(body, "XX").unwrap();
        assert_eq!(name, "pic.png");
        assert_eq!(data, b"BINARY");
    }

    #[test]
    fn test_extract_skips_plain_fields() {
        let body = b"--B\r\n\
            Content-Disposition: form-data; name=\"k\"\r\n\r\n\
            v\r\n\
            --B\r\n\
            Content-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n\r\n\
            data\r\n\
            --B--\r\n";
        let (name, data) = extract_file(body, "B").unwrap();
        assert_eq!(name, "a.txt");
        assert_eq!(data, b"data");
    }

    #[test]
    fn test_raw_upload_named_from_uri() {
        let dir = tempfile::tempdir().unwrap();
        let mut loc = LocationConfig::new("/upload");
        loc.upload_dir = Some(dir.path().to_str().unwrap().to_string());

        let req = request(b"raw bytes", None);
        let resp = handle(&req, &route(&loc, "/file.txt")).unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(resp.header("Location"), Some("/upload/file.txt"));
        assert_eq!(
            fs::read(dir.path().join("file.txt")).unwrap(),
            b"raw bytes"
        );
    }

    #[test]
    fn test_multipart_upload_named_from_part() {
        let dir = tempfile::tempdir().unwrap();
        let mut loc = LocationConfig::new("/upload");
        loc.upload_dir = Some(dir.path().to_str().unwrap().to_string());

        let body = b"--ZZ\r\n\
            Content-Disposition: form-data; name=\"f\"; filename=\"notes.md\"\r\n\r\n\
            # hi\r\n\
            --ZZ--\r\n";
        let req =
            request(body, Some("multipart/form-data; boundary=ZZ"));
        let resp = handle(&req, &route(&loc, "/ignored")).unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(fs::read(dir.path().join("notes.md")).unwrap(), b"# hi");
    }

    #[test]
    fn test_hostile_filename_is_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let mut loc = LocationConfig::new("/upload");
        loc.upload_dir = Some(dir.path().to_str().unwrap().to_string());

        let body = b"--Q\r\n\
            Content-Disposition: form-data; name=\"f\"; filename=\"../../etc/shadow\"\r\n\r\n\
            nope\r\n\
            --Q--\r\n";
        let req = request(body, Some("multipart/form-data; boundary=Q"));
        handle(&req, &route(&loc, "/x")).unwrap();
        assert_eq!(fs::read(dir.path().join("shadow")).unwrap(), b"nope");
    }

    #[test]
    fn test_unwritable_dir_errors() {
        let mut loc = LocationConfig::new("/upload");
        loc.upload_dir = Some("/no/such/dir".to_string());
        let req = request(b"x", None);
        let err = handle(&req, &route(&loc, "/f")).unwrap_err();
        assert_eq!(err, 404);
    }
}

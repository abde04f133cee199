//! Error response construction, with per-location and per-server page
//! overrides falling back to a built-in template.

use std::fs;

use log::debug;

use crate::config::{LocationConfig, ServerConfig};
use crate::http::{status_text, Response};
use crate::version::Version;

fn builtin_html(status: u16) -> String {
    let text = status_text(status);
    format!(
        "<html>\n<head><title>{status} {text}</title></head>\n\
         <body>\n<h1>{status} {text}</h1>\n<hr>\n</body>\n</html>\n",
        status = status,
        text = text,
    )
}

/// Resolves a configured page path against the location root when the
/// path is relative.
fn page_path(path: &str, location: Option<&LocationConfig>) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }
    match location {
        Some(loc) => crate::http::router::join_paths(&loc.root, path),
        None => format!("/{}", path),
    }
}

pub fn build(
    status: u16,
    version: Version,
    server: Option<&ServerConfig>,
    location: Option<&LocationConfig>,
) -> Response {
    let mut response = Response::new(version, status);
    response.add_header("Content-Type", "text/html");

    let custom = location
        .and_then(|l| l.error_page(status))
        .or_else(|| server.and_then(|s| s.error_page(status)));
    if let Some(path) = custom {
        match fs::read(page_path(path, location)) {
            Ok(body) => {
                response.set_body(body);
                return response;
            }
            Err(e) => {
                debug!("error page {} unreadable: {}", path, e);
            }
        }
    }
    response.set_body(builtin_html(status).into_bytes());
    response
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::build;
    use crate::config::{LocationConfig, ServerConfig};
    use crate::version::Version;

    #[test]
    fn test_builtin_page() {
        let resp = build(404, Version::Http11, None, None);
        assert_eq!(resp.status, 404);
        let body = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(body.contains("404 Not Found"));
    }

    #[test]
    fn test_custom_page_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"<h1>custom</h1>").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let mut srv = ServerConfig::default();
        srv.error_pages.insert(404, path);
        let resp = build(404, Version::Http11, Some(&srv), None);
        assert_eq!(resp.body(), b"<h1>custom</h1>");
    }

    #[test]
    fn test_unreadable_page_falls_back() {
        let mut loc = LocationConfig::new("/");
        loc.error_pages
            .insert(500, "/definitely/not/here.html".to_string());
        let resp = build(500, Version::Http11, None, Some(&loc));
        let body = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(body.contains("500 Internal Server Error"));
    }
}

//! Maps a parsed request plus the configuration tree to a handling
//! decision. Routing is pure string work: filesystem existence and type
//! checks belong to the content handlers, never here.

use crate::config::{LocationConfig, Redirect, ServerConfig};
use crate::http::request::Request;

/// What the dispatch layer should do with the request, decided once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Static,
    Upload,
    Cgi,
    Redirect,
    Error,
}

/// The outcome of routing one request. Borrows into the config tree,
/// which outlives the reactor run.
#[derive(Debug)]
pub struct RouteResult<'a> {
    pub kind: HandlerKind,
    pub status: u16,
    pub server: Option<&'a ServerConfig>,
    pub location: Option<&'a LocationConfig>,
    /// Resolved filesystem target (the script path for CGI).
    pub fs_path: String,
    pub matched_path: String,
    /// URI suffix past the matched location (PATH_INFO for CGI).
    pub remaining_path: String,
    pub redirect: Option<&'a Redirect>,
}

impl<'a> RouteResult<'a> {
    fn error(status: u16) -> RouteResult<'a> {
        RouteResult {
            kind: HandlerKind::Error,
            status,
            server: None,
            location: None,
            fs_path: String::new(),
            matched_path: String::new(),
            remaining_path: String::new(),
            redirect: None,
        }
    }
}

/// Collapses duplicate slashes and guarantees a leading slash.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    if !path.starts_with('/') {
        out.push('/');
    }
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

pub fn join_paths(base: &str, rest: &str) -> String {
    let base = base.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        format!("{}/", base)
    } else {
        format!("{}/{}", base, rest)
    }
}

fn has_dotdot(uri: &str) -> bool {
    uri.split('/').any(|seg| seg == "..")
}

/// A location path matches when it is a prefix of the URI and the
/// boundary falls on a path segment.
fn prefix_matches(uri: &str, loc_path: &str) -> bool {
    if loc_path == "/" {
        return true;
    }
    match uri.strip_prefix(loc_path) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn find_server<'a>(
    servers: &'a [ServerConfig],
    port: u16,
    host: &str,
) -> Option<&'a ServerConfig> {
    servers
        .iter()
        .find(|s| s.has_port(port) && s.has_name(host))
        // The first server bound to the port is the default one.
        .or_else(|| servers.iter().find(|s| s.has_port(port)))
}

fn best_location<'a>(
    server: &'a ServerConfig,
    uri: &str,
) -> Option<&'a LocationConfig> {
    server
        .locations
        .iter()
        .filter(|loc| prefix_matches(uri, &normalize_path(&loc.path)))
        .max_by_key(|loc| normalize_path(&loc.path).len())
}

/// Splits the suffix at the first segment whose extension the location
/// maps to an interpreter. Returns (script suffix, PATH_INFO).
fn split_cgi_suffix<'s>(
    loc: &LocationConfig,
    suffix: &'s str,
) -> Option<(String, &'s str)> {
    let mut consumed = 0;
    let trimmed = suffix.trim_start_matches('/');
    let lead = suffix.len() - trimmed.len();
    for seg in trimmed.split('/') {
        let end = lead + consumed + seg.len();
        if loc.interpreter_for(seg).is_some() {
            let script = &suffix[..end];
            let path_info = &suffix[end..];
            return Some((script.to_string(), path_info));
        }
        consumed += seg.len() + 1;
        if lead + consumed > suffix.len() {
            break;
        }
    }
    None
}

/// Resolves a request against the configuration tree. See module docs;
/// the checks run in a fixed order so the most specific error wins.
pub fn resolve<'a>(
    servers: &'a [ServerConfig],
    req: &Request,
) -> RouteResult<'a> {
    let server = match find_server(servers, req.port, &req.host) {
        Some(s) => s,
        None => return RouteResult::error(500),
    };

    let uri = normalize_path(&req.uri);
    if has_dotdot(&uri) {
        let mut res = RouteResult::error(403);
        res.server = Some(server);
        return res;
    }

    let location = match best_location(server, &uri) {
        Some(l) => l,
        None => {
            let mut res = RouteResult::error(404);
            res.server = Some(server);
            return res;
        }
    };
    let matched_path = normalize_path(&location.path);

    let mut result = RouteResult {
        kind: HandlerKind::Static,
        status: 200,
        server: Some(server),
        location: Some(location),
        fs_path: String::new(),
        matched_path: matched_path.clone(),
        remaining_path: String::new(),
        redirect: None,
    };

    if let Some(redirect) = &location.redirect {
        result.kind = HandlerKind::Redirect;
        result.status = redirect.code;
        result.redirect = Some(redirect);
        return result;
    }

    if !location.allows_method(&req.method) {
        result.kind = HandlerKind::Error;
        result.status = 405;
        return result;
    }

    if req.content_length > 0 {
        let limit = location.max_body.unwrap_or(u64::MAX);
        if req.content_length > limit {
            result.kind = HandlerKind::Error;
            result.status = 413;
            return result;
        }
    }

    // URI suffix past the matched location path.
    let suffix = if matched_path == "/" {
        uri.as_str()
    } else {
        uri.strip_prefix(matched_path.as_str()).unwrap_or(&uri)
    };

    if location.has_cgi() {
        if let Some((script, path_info)) = split_cgi_suffix(location, suffix)
        {
            result.kind = HandlerKind::Cgi;
            result.fs_path = join_paths(&location.root, &script);
            result.remaining_path = path_info.to_string();
            return result;
        }
    }

    if location.upload_dir.is_some()
        && (req.method == "POST" || req.method == "PUT")
    {
        result.kind = HandlerKind::Upload;
        result.remaining_path = suffix.to_string();
        return result;
    }

    result.fs_path = join_paths(&location.root, suffix);
    result.remaining_path = suffix.to_string();
    result
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::{join_paths, normalize_path, resolve, HandlerKind};
    use crate::config::{
        validate, ListenAddress, LocationConfig, Redirect, ServerConfig,
    };
    use crate::http::request::Request;
    use crate::version::Version;

    fn request(method: &str, uri: &str, port: u16) -> Request {
        Request {
            method: method.into(),
            uri: uri.into(),
            version: Version::Http11,
            query_string: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            host: "example.com".into(),
            port,
            cookies: HashMap::new(),
            content_length: 0,
        }
    }

    fn servers() -> Vec<ServerConfig> {
        let mut images = LocationConfig::new("/images");
        images.autoindex = true;
        let mut api = LocationConfig::new("/api");
        api.allowed_methods.push("DELETE".to_string());
        let mut old = LocationConfig::new("/old");
        old.redirect = Some(Redirect {
            code: 301,
            target: "/new".to_string(),
        });
        let mut cgi = LocationConfig::new("/cgi-bin");
        cgi.cgi_pass
            .insert(".py".to_string(), "/usr/bin/python3".to_string());
        let mut small = LocationConfig::new("/small");
        small.max_body = Some(10);
        small.allowed_methods.push("POST".to_string());

        let mut srv = ServerConfig {
            listen: vec![ListenAddress::parse("8080").unwrap()],
            server_names: vec!["example.com".to_string()],
            root: "/var/www".to_string(),
            ..Default::default()
        };
        srv.locations.push(LocationConfig::new("/"));
        srv.locations.push(images);
        srv.locations.push(api);
        srv.locations.push(old);
        srv.locations.push(cgi);
        srv.locations.push(small);

        let other = ServerConfig {
            listen: vec![ListenAddress::parse("8080").unwrap()],
            server_names: vec!["other.com".to_string()],
            root: "/srv/other".to_string(),
            ..Default::default()
        };

        let mut all = vec![srv, other];
        validate(&mut all, None).unwrap();
        all
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_path("//a///b"), "/a/b");
        assert_eq!(normalize_path("x"), "/x");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_join() {
        assert_eq!(join_paths("/var/www/", "/x/y"), "/var/www/x/y");
        assert_eq!(join_paths("/var/www", "x"), "/var/www/x");
        assert_eq!(join_paths("/var/www", ""), "/var/www/");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let servers = servers();
        let res = resolve(&servers, &request("GET", "/images/x.png", 8080));
        assert_eq!(res.matched_path, "/images");
        assert_eq!(res.fs_path, "/var/www/x.png");
        assert_eq!(res.kind, HandlerKind::Static);
    }

    #[test]
    fn test_prefix_needs_segment_boundary() {
        let servers = servers();
        // `/imagesfoo` must fall back to `/`, not match `/images`.
        let res = resolve(&servers, &request("GET", "/imagesfoo", 8080));
        assert_eq!(res.matched_path, "/");
        assert_eq!(res.fs_path, "/var/www/imagesfoo");
    }

    #[test]
    fn test_virtual_host_selection() {
        let servers = servers();
        let mut req = request("GET", "/x", 8080);
        req.host = "other.com".into();
        let res = resolve(&servers, &req);
        assert_eq!(res.fs_path, "/srv/other/x");
    }

    #[test]
    fn test_default_server_fallback() {
        let servers = servers();
        let mut req = request("GET", "/x", 8080);
        req.host = "unknown.example".into();
        let res = resolve(&servers, &req);
        // First server on the port wins.
        assert_eq!(res.fs_path, "/var/www/x");
    }

    #[test]
    fn test_no_server_on_port() {
        let servers = servers();
        let res = resolve(&servers, &request("GET", "/", 9999));
        assert_eq!(res.kind, HandlerKind::Error);
        assert_eq!(res.status, 500);
    }

    #[test]
    fn test_method_not_allowed() {
        let servers = servers();
        let res = resolve(&servers, &request("GET", "/api/thing", 8080));
        assert_eq!(res.kind, HandlerKind::Error);
        assert_eq!(res.status, 405);
        assert!(res.location.is_some());
    }

    #[test]
    fn test_redirect_short_circuits_method_check() {
        let servers = servers();
        // DELETE is not allowed on /old, but redirect wins.
        let res = resolve(&servers, &request("DELETE", "/old/page", 8080));
        assert_eq!(res.kind, HandlerKind::Redirect);
        assert_eq!(res.status, 301);
        assert_eq!(res.redirect.unwrap().target, "/new");
    }

    #[test]
    fn test_body_too_large() {
        let servers = servers();
        let mut req = request("POST", "/small/upload", 8080);
        req.content_length = 11;
        let res = resolve(&servers, &req);
        assert_eq!(res.status, 413);
    }

    #[test]
    fn test_body_within_limit() {
        let servers = servers();
        let mut req = request("POST", "/small/upload", 8080);
        req.content_length = 10;
        let res = resolve(&servers, &req);
        assert_eq!(res.status, 200);
    }

    #[test]
    fn test_cgi_classification_and_path_info() {
        let servers = servers();
        let res = resolve(
            &servers,
            &request("GET", "/cgi-bin/run.py/extra/info", 8080),
        );
        assert_eq!(res.kind, HandlerKind::Cgi);
        // Root joins with the suffix past the matched prefix, so the
        // location path itself is not part of the filesystem target.
        assert_eq!(res.fs_path, "/var/www/run.py");
        assert_eq!(res.remaining_path, "/extra/info");
    }

    #[test]
    fn test_cgi_without_mapped_extension_is_static() {
        let servers = servers();
        let res =
            resolve(&servers, &request("GET", "/cgi-bin/readme.txt", 8080));
        assert_eq!(res.kind, HandlerKind::Static);
    }

    #[test]
    fn test_dotdot_rejected() {
        let servers = servers();
        let res = resolve(&servers, &request("GET", "/../etc/passwd", 8080));
        assert_eq!(res.status, 403);
    }

    #[test]
    fn test_duplicate_slashes_collapsed() {
        let servers = servers();
        let res = resolve(&servers, &request("GET", "//images///x.png", 8080));
        assert_eq!(res.matched_path, "/images");
        assert_eq!(res.fs_path, "/var/www/x.png");
    }
}

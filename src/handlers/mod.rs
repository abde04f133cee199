//! Content handlers and the dispatch seam between routing and them.

pub mod autoindex;
pub mod error_pages;
pub mod static_files;
pub mod upload;

use log::debug;

use crate::http::router::{HandlerKind, RouteResult};
use crate::http::{Request, Response};
use crate::session::SessionStore;

fn error_response(status: u16, req: &Request, route: &RouteResult) -> Response {
    let mut response =
        error_pages::build(status, req.version, route.server, route.location);
    if status == 405 {
        if let Some(loc) = route.location {
            response.set_header("Allow", &loc.allowed_methods.join(", "));
        }
    }
    response
}

fn redirect_response(req: &Request, route: &RouteResult) -> Response {
    let mut response = Response::new(req.version, route.status);
    if let Some(redirect) = route.redirect {
        response.add_header("Location", &redirect.target);
    }
    response.add_header("Content-Type", "text/html");
    response
}

/// Runs a successful POST carrying a `username` form field through the
/// session store, attaching a cookie when the client has none. A POST
/// with a `logout` field instead drops the session and expires the
/// cookie.
fn attach_session(
    response: &mut Response,
    req: &Request,
    sessions: &mut SessionStore,
) {
    if req.method != "POST" || response.status >= 400 {
        return;
    }
    if req.form_field("logout").is_some() {
        if let Some(id) = req.cookie(crate::session::COOKIE_NAME) {
            sessions.remove(id);
        }
        response.add_header("Set-Cookie", &crate::session::expire_cookie());
        return;
    }
    let username = match req.form_field("username") {
        Some(u) if !u.is_empty() => u,
        _ => return,
    };
    let live = req
        .cookie(crate::session::COOKIE_NAME)
        .map(|id| sessions.get(id).is_some())
        .unwrap_or(false);
    if live {
        return;
    }
    match sessions.create(&username) {
        Ok(id) => {
            let cookie = sessions.cookie_for(&id);
            response.add_header("Set-Cookie", &cookie);
        }
        Err(e) => debug!("session creation failed: {}", e),
    }
}

/// Produces the response for every routing outcome except CGI, which the
/// reactor drives asynchronously.
pub fn dispatch(
    req: &Request,
    route: &RouteResult,
    sessions: &mut SessionStore,
) -> Response {
    let mut response = match route.kind {
        HandlerKind::Error => error_response(route.status, req, route),
        HandlerKind::Redirect => redirect_response(req, route),
        HandlerKind::Static => static_files::serve(req, route)
            .unwrap_or_else(|status| error_response(status, req, route)),
        HandlerKind::Upload => upload::handle(req, route)
            .unwrap_or_else(|status| error_response(status, req, route)),
        // Spawn failures surface as a gateway error.
        HandlerKind::Cgi => error_response(502, req, route),
    };
    attach_session(&mut response, req, sessions);
    response
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::dispatch;
    use crate::config::{LocationConfig, Redirect};
    use crate::http::router::{HandlerKind, RouteResult};
    use crate::http::Request;
    use crate::session::SessionStore;
    use crate::version::Version;

    fn request(method: &str) -> Request {
        Request {
            method: method.into(),
            uri: "/".into(),
            version: Version::Http11,
            query_string: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            host: "example.com".into(),
            port: 8080,
            cookies: HashMap::new(),
            content_length: 0,
        }
    }

    fn error_route(status: u16, loc: Option<&LocationConfig>) -> RouteResult {
        RouteResult {
            kind: HandlerKind::Error,
            status,
            server: None,
            location: loc,
            fs_path: String::new(),
            matched_path: String::new(),
            remaining_path: String::new(),
            redirect: None,
        }
    }

    #[test]
    fn test_405_carries_allow() {
        let mut loc = LocationConfig::new("/api");
        loc.allowed_methods.push("DELETE".to_string());
        loc.allowed_methods.push("POST".to_string());
        let mut sessions = SessionStore::new(Duration::from_secs(60));
        let resp =
            dispatch(&request("GET"), &error_route(405, Some(&loc)), &mut sessions);
        assert_eq!(resp.status, 405);
        assert_eq!(resp.header("Allow"), Some("DELETE, POST"));
    }

    #[test]
    fn test_redirect() {
        let redirect = Redirect {
            code: 301,
            target: "/new".to_string(),
        };
        let route = RouteResult {
            kind: HandlerKind::Redirect,
            status: 301,
            server: None,
            location: None,
            fs_path: String::new(),
            matched_path: String::new(),
            remaining_path: String::new(),
            redirect: Some(&redirect),
        };
        let mut sessions = SessionStore::new(Duration::from_secs(60));
        let resp = dispatch(&request("GET"), &route, &mut sessions);
        assert_eq!(resp.status, 301);
        assert_eq!(resp.header("Location"), Some("/new"));
    }

    #[test]
    fn test_login_post_sets_cookie() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("login"), b"ok").unwrap();
        let mut loc = LocationConfig::new("/");
        loc.allowed_methods.push("POST".to_string());
        let route = RouteResult {
            kind: HandlerKind::Static,
            status: 200,
            server: None,
            location: Some(&loc),
            fs_path: dir.path().join("login").to_str().unwrap().to_string(),
            matched_path: "/".to_string(),
            remaining_path: "login".to_string(),
            redirect: None,
        };
        let mut req = request("POST");
        req.headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        req.body = b"username=alice&password=x".to_vec();
        let mut sessions = SessionStore::new(Duration::from_secs(60));
        let resp = dispatch(&req, &route, &mut sessions);
        assert_eq!(resp.status, 200);
        let cookie = resp.header("Set-Cookie").unwrap();
        assert!(cookie.starts_with("fg_session="));
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_logout_post_expires_cookie() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("logout"), b"bye").unwrap();
        let mut loc = LocationConfig::new("/");
        loc.allowed_methods.push("POST".to_string());
        let route = RouteResult {
            kind: HandlerKind::Static,
            status: 200,
            server: None,
            location: Some(&loc),
            fs_path: dir.path().join("logout").to_str().unwrap().to_string(),
            matched_path: "/".to_string(),
            remaining_path: "logout".to_string(),
            redirect: None,
        };
        let mut sessions = SessionStore::new(Duration::from_secs(60));
        let id = sessions.create("alice").unwrap();

        let mut req = request("POST");
        req.body = b"logout=1".to_vec();
        req.cookies
            .insert("fg_session".to_string(), id.clone());
        let resp = dispatch(&req, &route, &mut sessions);
        assert!(resp.header("Set-Cookie").unwrap().contains("Max-Age=0"));
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_failed_request_gets_no_cookie() {
        let mut sessions = SessionStore::new(Duration::from_secs(60));
        let mut req = request("POST");
        req.body = b"username=alice".to_vec();
        req.headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        let resp = dispatch(&req, &error_route(404, None), &mut sessions);
        assert_eq!(resp.status, 404);
        assert!(resp.header("Set-Cookie").is_none());
        assert!(sessions.is_empty());
    }
}

//! Filesystem content: file delivery, index resolution, directory
//! redirects, autoindex and DELETE.

use std::fs;
use std::io;
use std::path::Path;

use log::debug;

use crate::config::mime;
use crate::handlers::autoindex;
use crate::http::router::RouteResult;
use crate::http::{Request, Response};

fn io_status(e: &io::Error) -> u16 {
    match e.kind() {
        io::ErrorKind::NotFound => 404,
        io::ErrorKind::PermissionDenied => 403,
        _ => 500,
    }
}

fn deliver_file(req: &Request, path: &str) -> Result<Response, u16> {
    let body = fs::read(path).map_err(|e| io_status(&e))?;
    let mut response = Response::new(req.version, 200);
    response.add_header("Content-Type", mime::from_path(path));
    if req.method == "HEAD" {
        response.set_header("Content-Length", &body.len().to_string());
    } else {
        response.set_body(body);
    }
    Ok(response)
}

fn delete_file(req: &Request, path: &str) -> Result<Response, u16> {
    let meta = fs::metadata(path).map_err(|e| io_status(&e))?;
    if meta.is_dir() {
        return Err(403);
    }
    fs::remove_file(path).map_err(|e| io_status(&e))?;
    Ok(Response::new(req.version, 204))
}

/// Serves `route.fs_path` for GET, HEAD and DELETE.
///
/// A directory hit without a trailing slash redirects to the slashed
/// URI. With the slash, index files are tried in order, then autoindex,
/// then 403.
pub fn serve(req: &Request, route: &RouteResult) -> Result<Response, u16> {
    let location = route.location.ok_or(500u16)?;
    let path = &route.fs_path;

    if req.method == "DELETE" {
        return delete_file(req, path);
    }

    let meta = fs::metadata(path).map_err(|e| {
        debug!("stat {} failed: {}", path, e);
        io_status(&e)
    })?;

    if !meta.is_dir() {
        return deliver_file(req, path);
    }

    if !req.uri.ends_with('/') {
        let mut response = Response::new(req.version, 301);
        let target = if req.query_string.is_empty() {
            format!("{}/", req.uri)
        } else {
            format!("{}/?{}", req.uri, req.query_string)
        };
        response.add_header("Location", &target);
        response.add_header("Content-Type", "text/html");
        return Ok(response);
    }

    for index in &location.indexes {
        let candidate = crate::http::router::join_paths(path, index);
        if Path::new(&candidate).is_file() {
            return deliver_file(req, &candidate);
        }
    }

    if location.autoindex {
        let html = autoindex::listing(Path::new(path), &req.uri)
            .map_err(|e| io_status(&e))?;
        let mut response = Response::new(req.version, 200);
        response.add_header("Content-Type", "text/html");
        if req.method == "HEAD" {
            response.set_header("Content-Length", &html.len().to_string());
        } else {
            response.set_body(html.into_bytes());
        }
        return Ok(response);
    }

    Err(403)
}

//! A single-process, non-blocking HTTP/1.1 server.
//!
//! Everything runs on one reactor thread: listening sockets, client
//! connections and CGI subprocess pipes share a single readiness loop.
//! Requests are framed incrementally, routed against an nginx-flavoured
//! configuration tree and answered by static file, upload, redirect or
//! CGI handlers.

pub mod cgi;
pub mod config;
pub mod handlers;
pub mod headers;
pub mod http;
pub mod server;
pub mod session;
pub mod version;

pub use version::Version;

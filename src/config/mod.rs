//! The immutable server/location configuration tree.
//!
//! The file format is nginx-flavoured: an `http { .. }` block containing
//! `server { .. }` blocks, which contain `location <path> { .. }` blocks.
//! Parsing happens once at startup; after [`validate`] resolves inheritance
//! the tree never changes and the router only ever borrows into it.

pub mod lexer;
pub mod mime;
pub mod parser;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use quick_error::quick_error;

pub use parser::load;

/// Fallback body limit when neither location nor server sets one.
pub const DEFAULT_MAX_BODY: u64 = 1024 * 1024;

quick_error! {
    #[derive(Debug)]
    pub enum ConfigError {
        Io(err: std::io::Error) {
            from()
            display("cannot read configuration: {}", err)
        }
        Syntax(line: usize, msg: String) {
            display("syntax error on line {}: {}", line, msg)
        }
        UnknownDirective(line: usize, name: String) {
            display("unknown directive `{}` on line {}", name, line)
        }
        BadValue(line: usize, msg: String) {
            display("bad value on line {}: {}", line, msg)
        }
        Invalid(msg: String) {
            display("invalid configuration: {}", msg)
        }
    }
}

/// An (interface, port) pair a server binds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenAddress {
    pub interface: String,
    pub port: u16,
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.interface, self.port)
    }
}

impl ListenAddress {
    /// Accepts `port`, `:port` or `interface:port`.
    pub fn parse(s: &str) -> Option<ListenAddress> {
        let (iface, port) = match s.rsplit_once(':') {
            Some((iface, port)) => (iface, port),
            None => ("", s),
        };
        let port = port.parse::<u16>().ok().filter(|p| *p != 0)?;
        let interface = if iface.is_empty() {
            "0.0.0.0".to_string()
        } else {
            iface.to_string()
        };
        Some(ListenAddress { interface, port })
    }
}

#[derive(Debug, Clone)]
pub struct Redirect {
    pub code: u16,
    pub target: String,
}

/// A URI-prefix-scoped policy block inside a virtual server.
#[derive(Debug, Clone, Default)]
pub struct LocationConfig {
    pub path: String,
    /// Effective root; inherited from the server during validation.
    /// Empty only for redirect locations.
    pub root: String,
    pub autoindex: bool,
    pub indexes: Vec<String>,
    pub upload_dir: Option<String>,
    /// Extension (with leading dot) to interpreter path.
    pub cgi_pass: HashMap<String, String>,
    /// Effective limit; resolved location -> server -> default during
    /// validation, so request-time code never walks the hierarchy.
    pub max_body: Option<u64>,
    pub allowed_methods: Vec<String>,
    pub redirect: Option<Redirect>,
    pub error_pages: HashMap<u16, String>,
}

impl LocationConfig {
    pub fn new(path: &str) -> LocationConfig {
        LocationConfig {
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn has_cgi(&self) -> bool {
        !self.cgi_pass.is_empty()
    }

    /// Looks up an interpreter for the target's file extension.
    pub fn interpreter_for(&self, path: &str) -> Option<&str> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let dot = name.rfind('.')?;
        if dot == 0 {
            return None;
        }
        self.cgi_pass.get(&name[dot..]).map(|s| s.as_str())
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.allowed_methods.iter().any(|m| m == method)
    }

    pub fn error_page(&self, code: u16) -> Option<&str> {
        self.error_pages.get(&code).map(|s| s.as_str())
    }
}

/// One virtual server: listen addresses, names and a set of locations.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub listen: Vec<ListenAddress>,
    pub server_names: Vec<String>,
    pub root: String,
    pub indexes: Vec<String>,
    pub max_body: Option<u64>,
    pub error_pages: HashMap<u16, String>,
    pub locations: Vec<LocationConfig>,
}

impl ServerConfig {
    pub fn has_port(&self, port: u16) -> bool {
        self.listen.iter().any(|a| a.port == port)
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.server_names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn error_page(&self, code: u16) -> Option<&str> {
        self.error_pages.get(&code).map(|s| s.as_str())
    }
}

/// Operational constants. Defaults apply unless the config overrides them
/// with same-named directives in the `http` block.
#[derive(Debug, Clone)]
pub struct Tunables {
    pub client_timeout: Duration,
    pub cgi_timeout: Duration,
    pub max_header_size: usize,
    pub max_connections: usize,
    pub max_keepalive_requests: u32,
    pub session_ttl: Duration,
    pub session_cleanup_interval: Duration,
}

impl Default for Tunables {
    fn default() -> Tunables {
        Tunables {
            client_timeout: Duration::from_secs(30),
            cgi_timeout: Duration::from_secs(10),
            max_header_size: 16384,
            max_connections: 1024,
            max_keepalive_requests: 100,
            session_ttl: Duration::from_secs(1800),
            session_cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// The validated configuration tree.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub servers: Vec<ServerConfig>,
    pub tunables: Tunables,
}

/// Parses `1024`, `64k`, `1M`, `2G` (suffixes case-insensitive).
pub fn parse_size(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    let (digits, mult) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1024),
        Some('m') | Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    digits.parse::<u64>().ok()?.checked_mul(mult)
}

/// Resolves inheritance and rejects structurally broken trees.
///
/// After this runs every non-redirect location has a non-empty root, an
/// explicit method set and a resolved body limit, so the router can read
/// the tree without fallback logic.
pub fn validate(
    servers: &mut Vec<ServerConfig>,
    global_max_body: Option<u64>,
) -> Result<(), ConfigError> {
    if servers.is_empty() {
        return Err(ConfigError::Invalid("no server blocks defined".into()));
    }
    for (i, srv) in servers.iter_mut().enumerate() {
        if srv.listen.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "server #{} has no listen address",
                i + 1
            )));
        }
        for (a, addr) in srv.listen.iter().enumerate() {
            if srv.listen[..a].contains(addr) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate listen address {}",
                    addr
                )));
            }
        }
        if srv.indexes.is_empty() {
            srv.indexes.push("index.html".to_string());
        }
        if srv.locations.is_empty() {
            // A bare server still serves its root.
            srv.locations.push(LocationConfig::new("/"));
        }
        let server_root = srv.root.clone();
        let server_indexes = srv.indexes.clone();
        let server_max_body = srv.max_body;
        for loc in srv.locations.iter_mut() {
            if !loc.path.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "location path `{}` does not start with '/'",
                    loc.path
                )));
            }
            if loc.root.is_empty() {
                loc.root = server_root.clone();
            }
            if loc.root.is_empty() && loc.redirect.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "location `{}` has no root and no redirect",
                    loc.path
                )));
            }
            if loc.indexes.is_empty() {
                loc.indexes = server_indexes.clone();
            }
            if loc.max_body.is_none() {
                loc.max_body = server_max_body
                    .or(global_max_body)
                    .or(Some(DEFAULT_MAX_BODY));
            }
            if loc.allowed_methods.is_empty() {
                loc.allowed_methods.push("GET".to_string());
            }
            if let Some(redir) = &loc.redirect {
                if !(300..400).contains(&redir.code) {
                    return Err(ConfigError::Invalid(format!(
                        "redirect code {} in `{}` is not 3xx",
                        redir.code, loc.path
                    )));
                }
            }
        }
        for (l, loc) in srv.locations.iter().enumerate() {
            if srv.locations[..l].iter().any(|o| o.path == loc.path) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate location `{}`",
                    loc.path
                )));
            }
        }
    }
    Ok(())
}

//! CGI subprocess orchestration.
//!
//! A CGI child gets the request body on its stdin and produces a header
//! block plus body on its stdout. Both pipes run non-blocking and are
//! driven by the reactor next to the client sockets; nothing here ever
//! waits on a child synchronously.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::http::response::SERVER_TOKEN;
use crate::http::{status_text, Request, Response};
use crate::version::Version;

const READ_CHUNK: usize = 8192;

/// Largest body a child may produce before it is cut off.
pub const MAX_CGI_OUTPUT: usize = 100 * 1024 * 1024;

fn strip_controls(value: &str) -> String {
    value.chars().filter(|c| !c.is_control()).collect()
}

/// Builds the CGI/1.1 environment for one request.
///
/// Request headers become `HTTP_*` variables except Content-Type and
/// Content-Length, which have dedicated names. Control characters are
/// stripped from forwarded header values.
pub fn build_env(
    req: &Request,
    script_path: &str,
    path_info: &str,
    doc_root: &str,
    remote_addr: &str,
) -> Vec<(String, String)> {
    let script_name = Path::new(script_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(script_path);
    let request_uri = if req.query_string.is_empty() {
        req.uri.clone()
    } else {
        format!("{}?{}", req.uri, req.query_string)
    };
    let mut env = vec![
        ("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string()),
        ("SERVER_PROTOCOL".to_string(), req.version.to_string()),
        ("SERVER_SOFTWARE".to_string(), SERVER_TOKEN.to_string()),
        ("REQUEST_METHOD".to_string(), req.method.clone()),
        ("REQUEST_URI".to_string(), request_uri),
        ("SCRIPT_FILENAME".to_string(), script_path.to_string()),
        ("SCRIPT_NAME".to_string(), script_name.to_string()),
        ("PATH_INFO".to_string(), path_info.to_string()),
        ("QUERY_STRING".to_string(), req.query_string.clone()),
        ("SERVER_NAME".to_string(), req.host.clone()),
        ("SERVER_PORT".to_string(), req.port.to_string()),
        ("REMOTE_ADDR".to_string(), remote_addr.to_string()),
        (
            "CONTENT_LENGTH".to_string(),
            req.body.len().to_string(),
        ),
    ];
    if !path_info.is_empty() {
        env.push((
            "PATH_TRANSLATED".to_string(),
            crate::http::router::join_paths(doc_root, path_info),
        ));
    }
    if let Some(ct) = req.header("content-type") {
        env.push(("CONTENT_TYPE".to_string(), ct.to_string()));
    }
    for (name, value) in &req.headers {
        if name == "content-type" || name == "content-length" {
            continue;
        }
        let var: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        env.push((format!("HTTP_{}", var), strip_controls(value)));
    }
    env
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// A running CGI child plus the plumbing state around its pipes.
pub struct CgiProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    /// Request body still to be fed to the child.
    input: Vec<u8>,
    written: usize,
    /// Everything the child produced so far.
    pub output: Vec<u8>,
    started: Instant,
    term_sent: bool,
    pub request_version: Version,
}

impl CgiProcess {
    /// Spawns the interpreter on the script. The working directory is the
    /// script's own directory so relative paths inside it resolve.
    pub fn spawn(
        interpreter: &str,
        script_path: &str,
        env: Vec<(String, String)>,
        body: Vec<u8>,
        version: Version,
    ) -> io::Result<CgiProcess> {
        let script = Path::new(script_path);
        let dir = script.parent().unwrap_or_else(|| Path::new("/"));
        let name = script.file_name().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "bad script path")
        })?;

        let mut command = Command::new(interpreter);
        command
            .arg(name)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        for (k, v) in env {
            command.env(k, v);
        }
        let mut child = command.spawn()?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        if let Some(ref pipe) = stdin {
            set_nonblocking(pipe.as_raw_fd())?;
        }
        if let Some(ref pipe) = stdout {
            set_nonblocking(pipe.as_raw_fd())?;
        }
        debug!("spawned cgi pid {} for {}", child.id(), script_path);

        Ok(CgiProcess {
            child,
            stdin,
            stdout,
            input: body,
            written: 0,
            output: Vec::new(),
            started: Instant::now(),
            term_sent: false,
            request_version: version,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn stdin_fd(&self) -> Option<RawFd> {
        self.stdin.as_ref().map(|p| p.as_raw_fd())
    }

    pub fn stdout_fd(&self) -> Option<RawFd> {
        self.stdout.as_ref().map(|p| p.as_raw_fd())
    }

    pub fn wants_write(&self) -> bool {
        self.stdin.is_some()
    }

    /// Feeds pending body bytes to the child. Closes stdin once the body
    /// is fully delivered so the child sees EOF. Returns true when stdin
    /// is finished with.
    pub fn write_input(&mut self) -> io::Result<bool> {
        let pipe = match self.stdin.as_mut() {
            Some(p) => p,
            None => return Ok(true),
        };
        while self.written < self.input.len() {
            match pipe.write(&self.input[self.written..]) {
                Ok(0) => break,
                Ok(n) => self.written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(false);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(ref e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    // Child stopped reading; drop the rest of the body.
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        self.stdin = None;
        Ok(true)
    }

    /// Drains the child's stdout. Returns true on EOF.
    pub fn read_output(&mut self) -> io::Result<bool> {
        let pipe = match self.stdout.as_mut() {
            Some(p) => p,
            None => return Ok(true),
        };
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => {
                    self.stdout = None;
                    return Ok(true);
                }
                Ok(n) => {
                    if self.output.len() + n > MAX_CGI_OUTPUT {
                        warn!("cgi pid {} exceeded output cap", self.pid());
                        self.stdout = None;
                        return Ok(true);
                    }
                    self.output.extend_from_slice(&chunk[..n]);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(false);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    pub fn output_done(&self) -> bool {
        self.stdout.is_none()
    }

    pub fn expired(&self, timeout: Duration) -> bool {
        self.started.elapsed() >= timeout
    }

    /// Asks the child to die. First call sends SIGTERM, subsequent calls
    /// escalate to SIGKILL.
    pub fn terminate(&mut self) {
        let pid = self.child.id() as libc::pid_t;
        let sig = if self.term_sent {
            libc::SIGKILL
        } else {
            libc::SIGTERM
        };
        self.term_sent = true;
        unsafe {
            libc::kill(pid, sig);
        }
    }

    /// Non-blocking reap. `Ok(true)` once the child has exited.
    pub fn try_reap(&mut self) -> io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }
}

impl Drop for CgiProcess {
    fn drop(&mut self) {
        // A still-running child must not outlive its connection.
        if let Ok(None) = self.child.try_wait() {
            unsafe {
                libc::kill(self.child.id() as libc::pid_t, libc::SIGKILL);
            }
            let _ = self.child.wait();
        }
    }
}

/// Turns raw child output into an HTTP response.
///
/// The child speaks the CGI header convention: a block of `Name: value`
/// lines, a blank line, then the body. A `Status:` header picks the
/// response code; everything else is forwarded. Output without a valid
/// header block is a gateway failure.
pub fn parse_output(raw: &[u8], version: Version) -> Response {
    let split = find_blank_line(raw);
    let (head, body) = match split {
        Some((head_end, body_start)) => {
            (&raw[..head_end], &raw[body_start..])
        }
        None => return bad_gateway(version),
    };
    let head = match std::str::from_utf8(head) {
        Ok(s) => s,
        Err(_) => return bad_gateway(version),
    };

    let mut status = 200u16;
    let mut reason: Option<String> = None;
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in head.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (name, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => return bad_gateway(version),
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("status") {
            let mut parts = value.splitn(2, ' ');
            match parts.next().and_then(|c| c.parse::<u16>().ok()) {
                Some(code) => status = code,
                None => return bad_gateway(version),
            }
            reason = parts.next().map(|r| r.to_string());
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let mut response = Response::new(version, status);
    if let Some(reason) = reason {
        response.set_status(status, &reason);
    }
    if !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("content-type")) {
        response.add_header("Content-Type", "text/html");
    }
    for (name, value) in headers {
        response.add_header(&name, &value);
    }
    response.set_body(body.to_vec());
    response
}

/// Builds the 504 sent when a child outlives its deadline.
pub fn timeout_response(version: Version) -> Response {
    let mut response = Response::new(version, 504);
    response.add_header("Content-Type", "text/plain");
    response.set_body(format!("504 {}\n", status_text(504)).into_bytes());
    response
}

fn bad_gateway(version: Version) -> Response {
    let mut response = Response::new(version, 502);
    response.add_header("Content-Type", "text/plain");
    response.set_body(format!("502 {}\n", status_text(502)).into_bytes());
    response
}

fn find_blank_line(raw: &[u8]) -> Option<(usize, usize)> {
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = raw.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(c), Some(l)) if l + 1 < c => Some((l, l + 2)),
        (Some(c), _) => Some((c, c + 4)),
        (None, Some(l)) => Some((l, l + 2)),
        (None, None) => None,
    }
}

//! The event loop.
//!
//! One thread, one poll set. Listening sockets, client connections and
//! CGI pipes all live in the same readiness loop; each tick dispatches
//! the ready descriptors, then runs the periodic work: client idle
//! timeouts, CGI deadlines and the session sweep.

use std::collections::{HashMap, HashSet};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use mio::Interest;
use slab::Slab;

use crate::cgi::{self, CgiProcess};
use crate::config::{Config, ListenAddress};
use crate::handlers;
use crate::http::router::{self, HandlerKind};
use crate::http::{HttpError, Request, Response};
use crate::server::connection::{ConnState, Connection, FillResult};
use crate::server::listener::Listener;
use crate::server::multiplexer::{Multiplexer, Ready};
use crate::session::SessionStore;
use crate::version::Version;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const EVENT_CAPACITY: usize = 1024;

/// What a poll token resolves to. Entries are looked up per event, so a
/// descriptor closed earlier in the same batch simply misses.
#[derive(Debug, Clone, Copy)]
enum FdEntry {
    Listener(usize),
    Client(usize),
    /// CGI stdout pipe, keyed by the owning client.
    CgiRead(usize),
    /// CGI stdin pipe, keyed by the owning client.
    CgiWrite(usize),
}

struct CgiJob {
    process: CgiProcess,
    keep_alive: bool,
}

enum Action {
    Respond(Response),
    SpawnCgi {
        interpreter: String,
        script: String,
        path_info: String,
        root: String,
    },
}

pub struct Reactor {
    config: Config,
    mux: Multiplexer,
    listeners: Vec<Listener>,
    connections: Slab<Connection>,
    cgi: HashMap<usize, CgiJob>,
    fds: HashMap<RawFd, FdEntry>,
    /// Descriptors dropped while dispatching the current batch. Their
    /// numbers may already have been reused by an accept or a pipe, so
    /// remaining events for them are stale.
    dead_fds: HashSet<RawFd>,
    sessions: SessionStore,
    last_session_sweep: Instant,
}

impl Reactor {
    /// Binds every distinct configured address and sets up the poll set.
    pub fn new(config: Config) -> io::Result<Reactor> {
        let mut mux = Multiplexer::new(EVENT_CAPACITY)?;
        let mut listeners: Vec<Listener> = Vec::new();
        let mut bound: Vec<ListenAddress> = Vec::new();
        let mut fds = HashMap::new();

        for server in &config.servers {
            for addr in &server.listen {
                if bound.contains(addr) {
                    continue;
                }
                let listener = Listener::bind(addr)?;
                mux.register(listener.fd(), Interest::READABLE)?;
                fds.insert(listener.fd(), FdEntry::Listener(listeners.len()));
                bound.push(addr.clone());
                listeners.push(listener);
            }
        }

        let sessions = SessionStore::new(config.tunables.session_ttl);
        Ok(Reactor {
            config,
            mux,
            listeners,
            connections: Slab::new(),
            cgi: HashMap::new(),
            fds,
            dead_fds: HashSet::new(),
            sessions,
            last_session_sweep: Instant::now(),
        })
    }

    /// Runs until the shutdown flag flips. Existing connections are
    /// dropped on the way out; their CGI children die with them.
    pub fn run(&mut self, shutdown: &AtomicBool) -> io::Result<()> {
        info!(
            "serving {} virtual servers on {} sockets",
            self.config.servers.len(),
            self.listeners.len()
        );
        while !shutdown.load(Ordering::SeqCst) {
            self.tick()?;
        }
        info!(
            "shutting down with {} open connections",
            self.connections.len()
        );
        Ok(())
    }

    /// One poll round plus the periodic work.
    pub fn tick(&mut self) -> io::Result<()> {
        let events = self.mux.wait(Some(POLL_INTERVAL))?;
        self.dead_fds.clear();
        for ev in events {
            if self.dead_fds.contains(&ev.fd) {
                continue;
            }
            let entry = match self.fds.get(&ev.fd) {
                Some(entry) => *entry,
                None => continue,
            };
            match entry {
                FdEntry::Listener(idx) => self.accept_ready(idx),
                FdEntry::Client(key) => self.client_ready(key, ev),
                FdEntry::CgiRead(key) => self.cgi_read_ready(key),
                FdEntry::CgiWrite(key) => self.cgi_write_ready(key),
            }
        }
        self.expire_clients();
        self.reap_cgi();
        self.expire_cgi();
        self.maybe_sweep_sessions();
        Ok(())
    }

    fn accept_ready(&mut self, idx: usize) {
        loop {
            let (stream, peer) = match self.listeners[idx].socket.accept() {
                Ok(pair) => pair,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    continue;
                }
                Err(e) => {
                    warn!("accept failed: {}", e);
                    return;
                }
            };
            if self.connections.len() >= self.config.tunables.max_connections {
                // Dropping the stream closes it; the client sees a reset
                // rather than an ever-pending connection.
                warn!("connection limit reached, rejecting {}", peer);
                continue;
            }
            let port = self.listeners[idx].port();
            let conn = Connection::new(
                stream,
                peer,
                port,
                self.config.tunables.max_header_size,
            );
            let fd = conn.fd();
            if let Err(e) = self.mux.register(fd, Interest::READABLE) {
                warn!("cannot register client {}: {}", peer, e);
                continue;
            }
            let key = self.connections.insert(conn);
            self.fds.insert(fd, FdEntry::Client(key));
            debug!("accepted {} on port {} (fd {})", peer, port, fd);
        }
    }

    fn client_ready(&mut self, key: usize, ev: Ready) {
        if ev.error {
            self.close_client(key);
            return;
        }
        if ev.readable {
            let fill = {
                let conn = &mut self.connections[key];
                conn.touch();
                conn.fill()
            };
            match fill {
                Ok(FillResult::Eof) => {
                    self.close_client(key);
                    return;
                }
                Ok(_) => {
                    if self.connections[key].state == ConnState::Reading {
                        self.process_input(key);
                    }
                }
                Err(e) => {
                    debug!("read error on fd {}: {}", ev.fd, e);
                    self.close_client(key);
                    return;
                }
            }
        }
        if !self.connections.contains(key) {
            return;
        }
        if ev.writable && self.connections[key].state == ConnState::Writing {
            self.connections[key].touch();
            self.try_flush(key);
        }
    }

    /// Feeds buffered bytes through the framer. Stops as soon as the
    /// connection leaves the reading state; pipelined requests wait in
    /// the buffer until the current response is out.
    fn process_input(&mut self, key: usize) {
        loop {
            let parsed = {
                let conn = &mut self.connections[key];
                let mut buf = std::mem::take(&mut conn.recv_buf);
                let result = conn.framer.advance(&mut buf);
                conn.recv_buf = buf;
                result
            };
            match parsed {
                Ok(Some(mut request)) => {
                    // The framer cannot know the accept port.
                    request.port = self.connections[key].port;
                    self.handle_request(key, request);
                    if !self.connections.contains(key)
                        || self.connections[key].state != ConnState::Reading
                    {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    let (status, _) = e.http_status();
                    debug!("framing error on client {}: {}", key, e);
                    let response = handlers::error_pages::build(
                        status,
                        Version::Http11,
                        None,
                        None,
                    );
                    self.finish_response(key, response, false);
                    return;
                }
            }
        }
    }

    fn handle_request(&mut self, key: usize, request: Request) {
        let keep_alive = self.connections[key].may_keep_alive(
            &request,
            self.config.tunables.max_keepalive_requests,
        );
        let action = {
            let route = router::resolve(&self.config.servers, &request);
            debug!(
                "{} {} -> {:?} {}",
                request.method, request.uri, route.kind, route.status
            );
            match route.kind {
                HandlerKind::Cgi => {
                    let interpreter = route
                        .location
                        .and_then(|l| l.interpreter_for(&route.fs_path));
                    match interpreter {
                        Some(interp) => Action::SpawnCgi {
                            interpreter: interp.to_string(),
                            script: route.fs_path.clone(),
                            path_info: route.remaining_path.clone(),
                            root: route
                                .location
                                .map(|l| l.root.clone())
                                .unwrap_or_default(),
                        },
                        None => Action::Respond(handlers::dispatch(
                            &request,
                            &route,
                            &mut self.sessions,
                        )),
                    }
                }
                _ => Action::Respond(handlers::dispatch(
                    &request,
                    &route,
                    &mut self.sessions,
                )),
            }
        };
        match action {
            Action::Respond(response) => {
                self.finish_response(key, response, keep_alive);
            }
            Action::SpawnCgi {
                interpreter,
                script,
                path_info,
                root,
            } => {
                self.start_cgi(
                    key,
                    request,
                    &interpreter,
                    &script,
                    &path_info,
                    &root,
                    keep_alive,
                );
            }
        }
    }

    fn start_cgi(
        &mut self,
        key: usize,
        request: Request,
        interpreter: &str,
        script: &str,
        path_info: &str,
        root: &str,
        keep_alive: bool,
    ) {
        let remote = self.connections[key].peer.ip().to_string();
        let env = cgi::build_env(&request, script, path_info, root, &remote);
        let version = request.version;
        let mut process = match CgiProcess::spawn(
            interpreter,
            script,
            env,
            request.body,
            version,
        ) {
            Ok(process) => process,
            Err(e) => {
                warn!("cgi spawn failed for {}: {}", script, e);
                let response =
                    handlers::error_pages::build(502, version, None, None);
                self.finish_response(key, response, keep_alive);
                return;
            }
        };

        // An empty body closes stdin immediately.
        let stdin_fd = process.stdin_fd();
        let stdin_done = process.write_input().unwrap_or(true);
        if stdin_done {
            if let Some(fd) = stdin_fd {
                self.forget_fd(fd);
            }
        } else if let Some(fd) = process.stdin_fd() {
            if self.mux.register(fd, Interest::WRITABLE).is_ok() {
                self.fds.insert(fd, FdEntry::CgiWrite(key));
            }
        }
        if let Some(fd) = process.stdout_fd() {
            if let Err(e) = self.mux.register(fd, Interest::READABLE) {
                warn!("cannot watch cgi stdout: {}", e);
                self.drop_cgi_fds(&process);
                let response =
                    handlers::error_pages::build(502, version, None, None);
                self.finish_response(key, response, keep_alive);
                return;
            }
            self.fds.insert(fd, FdEntry::CgiRead(key));
        }

        self.connections[key].state = ConnState::AwaitingCgi;
        self.cgi.insert(
            key,
            CgiJob {
                process,
                keep_alive,
            },
        );
    }

    fn cgi_write_ready(&mut self, key: usize) {
        let (done, fd) = match self.cgi.get_mut(&key) {
            Some(job) => {
                let fd = job.process.stdin_fd();
                let done = job.process.write_input().unwrap_or(true);
                (done, fd)
            }
            None => return,
        };
        if done {
            if let Some(fd) = fd {
                self.forget_fd(fd);
            }
            self.try_finalize_cgi(key);
        }
    }

    fn cgi_read_ready(&mut self, key: usize) {
        let (eof, fd) = match self.cgi.get_mut(&key) {
            Some(job) => {
                let fd = job.process.stdout_fd();
                let eof = match job.process.read_output() {
                    Ok(eof) => eof,
                    Err(e) => {
                        warn!("cgi read error: {}", e);
                        true
                    }
                };
                (eof, fd)
            }
            None => return,
        };
        if eof {
            if let Some(fd) = fd {
                self.forget_fd(fd);
            }
            self.try_finalize_cgi(key);
        }
    }

    /// A child is complete once its stdin is drained, its stdout reached
    /// EOF and its exit status has been collected. Pipes finish through
    /// readiness events; the exit status is picked up here or by the
    /// per-tick reap pass.
    fn try_finalize_cgi(&mut self, key: usize) {
        let done = match self.cgi.get_mut(&key) {
            Some(job) => {
                job.process.output_done()
                    && !job.process.wants_write()
                    && matches!(job.process.try_reap(), Ok(true))
            }
            None => return,
        };
        if done {
            self.finalize_cgi(key);
        }
    }

    /// Non-blocking reap of exited children whose pipes are already done.
    fn reap_cgi(&mut self) {
        let keys: Vec<usize> = self.cgi.keys().copied().collect();
        for key in keys {
            self.try_finalize_cgi(key);
        }
    }

    /// Queues the translated response for a fully finished child.
    fn finalize_cgi(&mut self, key: usize) {
        let job = match self.cgi.remove(&key) {
            Some(job) => job,
            None => return,
        };
        self.drop_cgi_fds(&job.process);
        let response = cgi::parse_output(
            &job.process.output,
            job.process.request_version,
        );
        if self.connections.contains(key) {
            self.finish_response(key, response, job.keep_alive);
        }
    }

    fn drop_cgi_fds(&mut self, process: &CgiProcess) {
        for fd in [process.stdin_fd(), process.stdout_fd()].iter().flatten() {
            self.forget_fd(*fd);
        }
    }

    /// Removes an fd from the poll set and lookup table, and quarantines
    /// its number from the rest of the current event batch.
    fn forget_fd(&mut self, fd: RawFd) {
        self.mux.unregister(fd);
        self.fds.remove(&fd);
        self.dead_fds.insert(fd);
    }

    /// Serializes the response, flips the connection to writing and
    /// takes an opportunistic first flush.
    fn finish_response(
        &mut self,
        key: usize,
        mut response: Response,
        keep_alive: bool,
    ) {
        response.set_header(
            "Connection",
            if keep_alive { "keep-alive" } else { "close" },
        );
        let fd = {
            let conn = &mut self.connections[key];
            conn.queue_response(&response, keep_alive);
            conn.fd()
        };
        let _ = self.mux.update(fd, Interest::WRITABLE);
        self.try_flush(key);
    }

    fn try_flush(&mut self, key: usize) {
        let flushed = self.connections[key].flush();
        match flushed {
            Ok(true) => {
                if self.connections[key].close_after_write {
                    self.close_client(key);
                    return;
                }
                let fd = {
                    let conn = &mut self.connections[key];
                    conn.reuse();
                    conn.fd()
                };
                let _ = self.mux.update(fd, Interest::READABLE);
                // Pipelined bytes may already hold the next request.
                self.process_input(key);
            }
            Ok(false) => {}
            Err(e) => {
                debug!("write error on client {}: {}", key, e);
                self.close_client(key);
            }
        }
    }

    fn close_client(&mut self, key: usize) {
        if !self.connections.contains(key) {
            return;
        }
        if let Some(job) = self.cgi.remove(&key) {
            self.drop_cgi_fds(&job.process);
            // Dropping the job kills a still-running child.
        }
        let conn = self.connections.remove(key);
        self.forget_fd(conn.fd());
        debug!("closed {} (fd {})", conn.peer, conn.fd());
    }

    fn expire_clients(&mut self) {
        let timeout = self.config.tunables.client_timeout;
        let now = Instant::now();
        let stale: Vec<usize> = self
            .connections
            .iter()
            .filter(|(_, c)| {
                c.state != ConnState::AwaitingCgi && c.idle_for(now) >= timeout
            })
            .map(|(key, _)| key)
            .collect();
        for key in stale {
            debug!("client {} idle past {:?}", key, timeout);
            self.close_client(key);
        }
    }

    /// Kills children past the CGI deadline and answers 504 for them.
    fn expire_cgi(&mut self) {
        let timeout = self.config.tunables.cgi_timeout;
        let expired: Vec<usize> = self
            .cgi
            .iter()
            .filter(|(_, job)| job.process.expired(timeout))
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            let mut job = match self.cgi.remove(&key) {
                Some(job) => job,
                None => continue,
            };
            warn!("cgi pid {} exceeded {:?}", job.process.pid(), timeout);
            self.drop_cgi_fds(&job.process);
            job.process.terminate();
            let version = job.process.request_version;
            if self.connections.contains(key) {
                self.finish_response(key, cgi::timeout_response(version), false);
            }
        }
    }

    fn maybe_sweep_sessions(&mut self) {
        let interval = self.config.tunables.session_cleanup_interval;
        if self.last_session_sweep.elapsed() >= interval {
            self.sessions.sweep();
            self.last_session_sweep = Instant::now();
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use super::Reactor;
    use crate::config::{
        validate, Config, ListenAddress, LocationConfig, ServerConfig,
        Tunables,
    };

    fn test_config(port: u16, root: &str) -> Config {
        let mut srv = ServerConfig {
            listen: vec![ListenAddress {
                interface: "127.0.0.1".to_string(),
                port,
            }],
            root: root.to_string(),
            ..Default::default()
        };
        srv.locations.push(LocationConfig::new("/"));
        let mut servers = vec![srv];
        validate(&mut servers, None).unwrap();
        Config {
            servers,
            tunables: Tunables::default(),
        }
    }

    fn tick_until<F: Fn(&Reactor) -> bool>(
        reactor: &mut Reactor,
        cond: F,
    ) -> bool {
        for _ in 0..40 {
            reactor.tick().unwrap();
            if cond(reactor) {
                return true;
            }
        }
        false
    }

    #[test]
    fn test_serves_a_file_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hi there").unwrap();
        let port = 18471;
        let config = test_config(port, dir.path().to_str().unwrap());
        let mut reactor = Reactor::new(config).unwrap();

        let mut client =
            TcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        client
            .write_all(
                b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\n\
                  Connection: close\r\n\r\n",
            )
            .unwrap();

        let mut response = Vec::new();
        for _ in 0..40 {
            reactor.tick().unwrap();
            let mut chunk = [0u8; 4096];
            match client.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => response.extend_from_slice(&chunk[..n]),
                Err(_) => {}
            }
        }
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "got: {}", text);
        assert!(text.contains("Connection: close"));
        assert!(text.ends_with("hi there"));
    }

    #[test]
    fn test_missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let port = 18472;
        let config = test_config(port, dir.path().to_str().unwrap());
        let mut reactor = Reactor::new(config).unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        client
            .write_all(b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();

        let mut response = Vec::new();
        for _ in 0..40 {
            reactor.tick().unwrap();
            let mut chunk = [0u8; 4096];
            match client.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&chunk[..n]);
                    if response.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                Err(_) => {}
            }
        }
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 404"), "got: {}", text);
    }

    #[test]
    fn test_connection_is_tracked_and_closed() {
        let dir = tempfile::tempdir().unwrap();
        let port = 18473;
        let config = test_config(port, dir.path().to_str().unwrap());
        let mut reactor = Reactor::new(config).unwrap();

        let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        assert!(tick_until(&mut reactor, |r| r.connections.len() == 1));
        drop(client);
        assert!(tick_until(&mut reactor, |r| r.connections.is_empty()));
    }

    fn cgi_config(port: u16, root: &str) -> Config {
        let mut config = test_config(port, root);
        config.servers[0].locations[0]
            .cgi_pass
            .insert(".sh".to_string(), "/bin/sh".to_string());
        config
    }

    fn read_until_close(client: &mut TcpStream, reactor: &mut Reactor) -> Vec<u8> {
        let mut response = Vec::new();
        for _ in 0..40 {
            reactor.tick().unwrap();
            let mut chunk = [0u8; 4096];
            match client.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => response.extend_from_slice(&chunk[..n]),
                Err(_) => {}
            }
        }
        response
    }

    #[test]
    fn test_cgi_script_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hello.sh"),
            "printf 'Content-Type: text/plain\\r\\n\\r\\nhi from cgi'\n",
        )
        .unwrap();
        let port = 18475;
        let config = cgi_config(port, dir.path().to_str().unwrap());
        let mut reactor = Reactor::new(config).unwrap();
        let baseline = reactor.mux.monitored_count();

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        client
            .write_all(
                b"GET /hello.sh HTTP/1.1\r\nHost: localhost\r\n\
                  Connection: close\r\n\r\n",
            )
            .unwrap();

        let response = read_until_close(&mut client, &mut reactor);
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "got: {}", text);
        assert!(text.ends_with("hi from cgi"), "got: {}", text);
        assert!(reactor.cgi.is_empty());
        // Both pipe fds and the client socket are gone from the poll set.
        assert_eq!(reactor.mux.monitored_count(), baseline);
    }

    #[test]
    fn test_cgi_child_outliving_its_stdout_is_reaped() {
        let dir = tempfile::tempdir().unwrap();
        // The child closes stdout, then keeps working before it exits.
        // Its response must wait for the exit, and the trailing work
        // must be allowed to complete.
        std::fs::write(
            dir.path().join("late.sh"),
            "printf 'Content-Type: text/plain\\r\\n\\r\\nearly body'\n\
             exec 1>&-\n\
             sleep 0.2\n\
             echo done > marker\n",
        )
        .unwrap();
        let port = 18476;
        let config = cgi_config(port, dir.path().to_str().unwrap());
        let mut reactor = Reactor::new(config).unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        client
            .write_all(
                b"GET /late.sh HTTP/1.1\r\nHost: localhost\r\n\
                  Connection: close\r\n\r\n",
            )
            .unwrap();

        let response = read_until_close(&mut client, &mut reactor);
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "got: {}", text);
        assert!(reactor.cgi.is_empty());
        assert!(
            dir.path().join("marker").exists(),
            "child was killed before it finished"
        );
    }

    #[test]
    fn test_cgi_timeout_yields_504_and_unregisters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("slow.sh"), "sleep 30\n").unwrap();
        let port = 18477;
        let mut config = cgi_config(port, dir.path().to_str().unwrap());
        config.tunables.cgi_timeout = Duration::from_millis(150);
        let mut reactor = Reactor::new(config).unwrap();
        let baseline = reactor.mux.monitored_count();

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        client
            .write_all(
                b"GET /slow.sh HTTP/1.1\r\nHost: localhost\r\n\
                  Connection: close\r\n\r\n",
            )
            .unwrap();

        let response = read_until_close(&mut client, &mut reactor);
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 504"), "got: {}", text);
        assert!(reactor.cgi.is_empty());
        assert_eq!(reactor.mux.monitored_count(), baseline);
    }

    #[test]
    fn test_closed_fd_is_quarantined_for_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let port = 18478;
        let config = test_config(port, dir.path().to_str().unwrap());
        let mut reactor = Reactor::new(config).unwrap();

        let _client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        assert!(tick_until(&mut reactor, |r| r.connections.len() == 1));
        let (key, fd) = {
            let (key, conn) = reactor.connections.iter().next().unwrap();
            (key, conn.fd())
        };
        reactor.close_client(key);
        // A leftover event for this number must not reach whatever
        // reuses it later in the same batch.
        assert!(reactor.dead_fds.contains(&fd));
        assert!(!reactor.fds.contains_key(&fd));
    }

    #[test]
    fn test_run_stops_on_flag() {
        let dir = tempfile::tempdir().unwrap();
        let port = 18474;
        let config = test_config(port, dir.path().to_str().unwrap());
        let mut reactor = Reactor::new(config).unwrap();
        let shutdown = AtomicBool::new(true);
        reactor.run(&shutdown).unwrap();
    }
}

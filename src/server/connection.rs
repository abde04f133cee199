//! Per-client connection state.
//!
//! A connection owns its socket, the framing state for the request being
//! assembled, and the outgoing byte queue. All reads and writes go until
//! `WouldBlock`; the reactor decides interest changes from the resulting
//! state.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Instant;

use mio::net::TcpStream;

use crate::http::{Framer, Request, Response};

const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Assembling a request; socket monitored for readability.
    Reading,
    /// Request handed to a CGI child; waiting on its pipes.
    AwaitingCgi,
    /// Draining the send queue.
    Writing,
}

pub enum FillResult {
    /// Bytes arrived.
    Data(usize),
    /// Peer closed its half; no more requests will come.
    Eof,
    /// Nothing available right now.
    Blocked,
}

pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// Local port this connection was accepted on; keyes server selection.
    pub port: u16,
    pub state: ConnState,
    pub framer: Framer,
    pub recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
    sent: usize,
    pub last_activity: Instant,
    pub requests_served: u32,
    pub close_after_write: bool,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        port: u16,
        max_header_size: usize,
    ) -> Connection {
        Connection {
            stream,
            peer,
            port,
            state: ConnState::Reading,
            framer: Framer::new(max_header_size),
            recv_buf: Vec::new(),
            send_buf: Vec::new(),
            sent: 0,
            last_activity: Instant::now(),
            requests_served: 0,
            close_after_write: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.duration_since(self.last_activity)
    }

    /// Reads everything currently available into the receive buffer.
    pub fn fill(&mut self) -> io::Result<FillResult> {
        let mut total = 0;
        loop {
            let start = self.recv_buf.len();
            self.recv_buf.resize(start + READ_CHUNK, 0);
            match self.stream.read(&mut self.recv_buf[start..]) {
                Ok(0) => {
                    self.recv_buf.truncate(start);
                    return Ok(if total > 0 {
                        FillResult::Data(total)
                    } else {
                        FillResult::Eof
                    });
                }
                Ok(n) => {
                    self.recv_buf.truncate(start + n);
                    total += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.recv_buf.truncate(start);
                    return Ok(if total > 0 {
                        FillResult::Data(total)
                    } else {
                        FillResult::Blocked
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.recv_buf.truncate(start);
                }
                Err(e) => {
                    self.recv_buf.truncate(start);
                    return Err(e);
                }
            }
        }
    }

    /// Serializes a response onto the send queue and switches to writing.
    pub fn queue_response(&mut self, response: &Response, keep_alive: bool) {
        self.send_buf.extend_from_slice(&response.to_bytes());
        if !keep_alive {
            self.close_after_write = true;
        }
        self.state = ConnState::Writing;
    }

    /// Writes as much of the queue as the socket accepts. Returns true
    /// once the queue is fully drained.
    pub fn flush(&mut self) -> io::Result<bool> {
        while self.sent < self.send_buf.len() {
            match self.stream.write(&self.send_buf[self.sent..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "peer stopped accepting data",
                    ));
                }
                Ok(n) => self.sent += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(false);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.send_buf.clear();
        self.sent = 0;
        Ok(true)
    }

    /// Prepares the connection for the next request on the same socket.
    /// Leftover pipelined bytes stay in the receive buffer.
    pub fn reuse(&mut self) {
        self.framer.reset();
        self.state = ConnState::Reading;
        self.requests_served += 1;
        self.touch();
    }

    /// Whether the protocol and headers let this connection carry another
    /// request after the current response.
    pub fn may_keep_alive(&self, req: &Request, max_requests: u32) -> bool {
        if self.requests_served + 1 >= max_requests {
            return false;
        }
        match req.header("connection") {
            Some(v) if crate::headers::is_close(v.as_bytes()) => false,
            Some(v) if crate::headers::is_keep_alive(v.as_bytes()) => true,
            _ => req.version == crate::Version::Http11,
        }
    }
}

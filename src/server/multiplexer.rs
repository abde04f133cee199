//! Thin wrapper over the OS readiness facility.
//!
//! Every monitored descriptor is registered by raw fd, and the fd doubles
//! as the poll token. The wrapper keeps its own interest table so interest
//! changes are idempotent and re-registration of a live fd is a no-op.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

/// A readiness notification copied out of the event buffer.
#[derive(Debug, Clone, Copy)]
pub struct Ready {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

pub struct Multiplexer {
    poll: Poll,
    events: Events,
    interests: HashMap<RawFd, Interest>,
}

impl Multiplexer {
    pub fn new(capacity: usize) -> io::Result<Multiplexer> {
        Ok(Multiplexer {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity),
            interests: HashMap::new(),
        })
    }

    /// Starts monitoring `fd`. Registering an already monitored fd just
    /// updates its interest.
    pub fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        if self.interests.contains_key(&fd) {
            return self.update(fd, interest);
        }
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(fd as usize), interest)?;
        self.interests.insert(fd, interest);
        Ok(())
    }

    /// Changes the interest set for `fd`. No syscall when unchanged.
    pub fn update(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        match self.interests.get_mut(&fd) {
            Some(current) if *current == interest => Ok(()),
            Some(current) => {
                self.poll.registry().reregister(
                    &mut SourceFd(&fd),
                    Token(fd as usize),
                    interest,
                )?;
                *current = interest;
                Ok(())
            }
            None => self.register(fd, interest),
        }
    }

    /// Stops monitoring `fd`. Unknown fds are ignored so teardown paths
    /// can deregister unconditionally.
    pub fn unregister(&mut self, fd: RawFd) {
        if self.interests.remove(&fd).is_some() {
            // The fd may already be closed; nothing to do about it here.
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.interests.contains_key(&fd)
    }

    pub fn monitored_count(&self) -> usize {
        self.interests.len()
    }

    /// Blocks until readiness or timeout. A signal interruption yields an
    /// empty batch so the caller can run its periodic work and retry.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Ready>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        }
        Ok(self
            .events
            .iter()
            .map(|ev| Ready {
                fd: ev.token().0 as RawFd,
                readable: ev.is_readable() || ev.is_read_closed(),
                writable: ev.is_writable(),
                error: ev.is_error(),
            })
            .collect())
    }
}

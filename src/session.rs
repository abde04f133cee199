//! In-memory cookie sessions.
//!
//! Ids are 128 random bits from `/dev/urandom`, hex encoded. Expiry is
//! idle-based: every successful lookup refreshes the clock, and a sweep
//! run from the reactor's periodic work drops stale entries.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::time::{Duration, Instant};

use log::{debug, info};

pub const COOKIE_NAME: &str = "fg_session";

const ID_BYTES: usize = 16;

#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub created: Instant,
    /// Free-form per-session values for handlers to stash.
    pub data: HashMap<String, String>,
    last_seen: Instant,
}

pub struct SessionStore {
    sessions: HashMap<String, Session>,
    ttl: Duration,
}

fn new_id() -> io::Result<String> {
    let mut bytes = [0u8; ID_BYTES];
    File::open("/dev/urandom")?.read_exact(&mut bytes)?;
    let mut id = String::with_capacity(ID_BYTES * 2);
    for b in bytes {
        id.push_str(&format!("{:02x}", b));
    }
    Ok(id)
}

impl SessionStore {
    pub fn new(ttl: Duration) -> SessionStore {
        SessionStore {
            sessions: HashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Creates a session and returns its id.
    pub fn create(&mut self, username: &str) -> io::Result<String> {
        let id = new_id()?;
        let now = Instant::now();
        self.sessions.insert(
            id.clone(),
            Session {
                username: username.to_string(),
                created: now,
                data: HashMap::new(),
                last_seen: now,
            },
        );
        info!("session created for {}", username);
        Ok(id)
    }

    /// Looks up a live session, refreshing its idle clock. An expired id
    /// is dropped on the spot.
    pub fn get(&mut self, id: &str) -> Option<&Session> {
        let expired = match self.sessions.get(id) {
            Some(s) => s.last_seen.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            self.sessions.remove(id);
            return None;
        }
        let session = self.sessions.get_mut(id)?;
        session.last_seen = Instant::now();
        Some(session)
    }

    /// Mutable variant of [`get`](Self::get), same expiry rules.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        if self.get(id).is_none() {
            return None;
        }
        self.sessions.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Drops every session idle past the TTL. Returns how many went.
    pub fn sweep(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.last_seen.elapsed() < ttl);
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            debug!("swept {} expired sessions", dropped);
        }
        dropped
    }

    /// The Set-Cookie value for a fresh session id.
    pub fn cookie_for(&self, id: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; Max-Age={}",
            COOKIE_NAME,
            id,
            self.ttl.as_secs()
        )
    }
}

/// The Set-Cookie value that makes a client drop its session cookie.
pub fn expire_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; Max-Age=0", COOKIE_NAME)
}

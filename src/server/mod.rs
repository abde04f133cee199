//! The single-threaded reactor and its supporting pieces.

pub mod connection;
pub mod listener;
pub mod multiplexer;
pub mod reactor;

pub use connection::{ConnState, Connection};
pub use listener::Listener;
pub use multiplexer::Multiplexer;
pub use reactor::Reactor;

//! Listening sockets, one per distinct configured address.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

use log::info;
use mio::net::TcpListener;

use crate::config::ListenAddress;

pub struct Listener {
    pub socket: TcpListener,
    pub addr: ListenAddress,
}

impl Listener {
    pub fn bind(addr: &ListenAddress) -> io::Result<Listener> {
        let sockaddr: SocketAddr = format!("{}", addr)
            .parse()
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("cannot resolve listen address {}", addr),
                )
            })?;
        let socket = TcpListener::bind(sockaddr)?;
        info!("listening on {}", addr);
        Ok(Listener {
            socket,
            addr: addr.clone(),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn port(&self) -> u16 {
        self.addr.port
    }
}

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use tokio::net::UdpSocket;

use crate::common::BuildError;

/// Resolves `host:port` to the first address it maps to.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, BuildError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| BuildError::InvalidCollectorAddress {
            reason: e.to_string(),
        })?
        .next() // just use the first address we resolve to
        .ok_or_else(|| BuildError::InvalidCollectorAddress {
            reason: format!("{}:{} did not resolve to any address", host, port),
        })
}

/// How datagrams get addressed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendMode {
    /// The socket is connected to the collector, so the kernel can report delivery errors such as
    /// an unreachable port back to us. Every line is echoed to stderr.
    Debug,
    /// Every datagram is sent to the collector explicitly; delivery errors are silent.
    Normal,
}

/// A UDP socket that sends each line as its own datagram.
///
/// The socket lives as long as the transport and is closed when it is dropped.
pub struct Transport {
    socket: UdpSocket,
    endpoint: SocketAddr,
    mode: SendMode,
}

impl Transport {
    /// Opens a socket for sending to `endpoint`.
    ///
    /// ## Panics
    ///
    /// Must be called from within a Tokio runtime context.
    pub fn open(endpoint: SocketAddr, mode: SendMode) -> Result<Self, BuildError> {
        let bind_addr: SocketAddr = if endpoint.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = std::net::UdpSocket::bind(bind_addr)?;
        if mode == SendMode::Debug {
            socket.connect(endpoint)?;
        }
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket)?;

        Ok(Transport {
            socket,
            endpoint,
            mode,
        })
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn mode(&self) -> SendMode {
        self.mode
    }

    /// Sends one line as a single datagram.
    pub async fn send(&self, line: &str) -> io::Result<usize> {
        let buf = line.as_bytes();
        let nsent = match self.mode {
            SendMode::Debug => {
                eprintln!("DEBUG: {}", line);
                self.socket.send(buf).await?
            }
            SendMode::Normal => self.socket.send_to(buf, self.endpoint).await?,
        };

        if nsent != buf.len() {
            tracing::error!(
                "Somehow this UDP socket sent less bytes ({}) than it was asked ({})",
                nsent,
                buf.len()
            );
        }
        Ok(nsent)
    }
}

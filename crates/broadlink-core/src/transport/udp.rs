//! UDP transport to a single plug.
//!
//! The socket is bound to an ephemeral local port and connected to the
//! device, so the kernel drops datagrams from any other source.

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{net::UdpSocket, time::timeout};
use tracing::{debug, trace};

use crate::{
    error::{Error, Result},
    transport::Transport,
};

/// Connected UDP socket to one device.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use broadlink_core::transport::{Transport, UdpTransport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let transport = UdpTransport::connect("192.168.10.146:80".parse()?).await?;
///     let mut buf = [0u8; 2048];
///     match transport.recv(&mut buf, Duration::from_secs(1)).await {
///         Ok(n) => println!("{} bytes", n),
///         Err(e) if e.is_timeout() => println!("nothing yet"),
///         Err(e) => return Err(e.into()),
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Opens a socket on an ephemeral port and connects it to `peer`.
    pub async fn connect(peer: SocketAddr) -> Result<Self> {
        let bind = if peer.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| Error::Transport(format!("bind {}: {}", bind, e)))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| Error::Transport(format!("connect {}: {}", peer, e)))?;

        debug!(peer = %peer, local = ?socket.local_addr().ok(), "udp transport open");
        Ok(Self { socket, peer })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, packet: &[u8]) -> Result<()> {
        trace!(peer = %self.peer, bytes = packet.len(), data = %hex::encode(packet), "udp send");
        self.socket
            .send(packet)
            .await
            .map_err(|e| Error::Transport(format!("send to {}: {}", self.peer, e)))?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8], wait: Duration) -> Result<usize> {
        let n = timeout(wait, self.socket.recv(buf))
            .await
            .map_err(|_| Error::Timeout(format!("no reply from {} within {:?}", self.peer, wait)))?
            .map_err(Error::from)?;
        trace!(peer = %self.peer, bytes = n, data = %hex::encode(&buf[..n]), "udp recv");
        Ok(n)
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }
}

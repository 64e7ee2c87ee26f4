//! Datagram transport between a device session and one plug.
//!
//! [`Device`](crate::Device) never touches a socket directly: it hands sealed
//! packets to a [`Transport`] and waits for replies through it. The real
//! implementation is [`UdpTransport`]; tests substitute a scripted transport.

pub mod udp;

pub use udp::UdpTransport;

use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;

use crate::error::Result;

/// Largest datagram a plug is expected to send.
pub const MAX_DATAGRAM: usize = 2048;

/// Trait for sending request datagrams and receiving replies.
///
/// Implementations map an expired receive deadline to
/// [`Error::Timeout`](crate::Error::Timeout) and every other failure to
/// [`Error::Transport`](crate::Error::Transport).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one complete datagram to the device.
    async fn send(&self, packet: &[u8]) -> Result<()>;

    /// Waits up to `timeout` for one datagram and copies it into `buf`.
    ///
    /// Returns the datagram length.
    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Returns the device address.
    fn peer(&self) -> SocketAddr;
}

//! Broadcast discovery of plugs on the local network.
//!
//! A Hello datagram carrying the local address and clock is broadcast to
//! port 80 once per interval until the deadline. Plugs answer with an
//! announcement; each distinct MAC is turned into an unauthenticated
//! [`Device`] and handed to the caller through a bounded queue.
//!
//! Two tasks run per discovery: one re-broadcasts Hello, one receives. Both
//! stop at the deadline, after which the stream ends.

use std::{
    collections::HashSet,
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use futures::Stream;
use tokio::{
    net::UdpSocket,
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, interval, timeout_at},
};
use tracing::{debug, info, trace, warn};

use crate::{
    BROADCAST_INTERVAL, DEFAULT_DISCOVERY_TIMEOUT, DISCOVERY_PORT,
    codec::{InboundPacket, ResponseLayout},
    device::{Device, DeviceIdentity, SessionConfig},
    error::{Error, Result},
    message::Hello,
    transport::MAX_DATAGRAM,
};

/// Default capacity of the queue between the receive task and the caller.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Public address used to pick the outgoing interface. Nothing is sent to it.
const ROUTE_LOOKUP_ADDR: &str = "8.8.8.8:80";

/// Discovery parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// How long to broadcast and listen.
    pub timeout: Duration,
    /// Delay between Hello broadcasts.
    pub broadcast_interval: Duration,
    /// Destination of the Hello broadcast.
    pub broadcast_addr: SocketAddr,
    /// Devices buffered before the receive task waits for the caller.
    pub queue_capacity: usize,
    /// Local address to bind; detected from the routing table if unset.
    pub local_addr: Option<Ipv4Addr>,
    /// Session settings given to every discovered device.
    pub session: SessionConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            broadcast_interval: BROADCAST_INTERVAL,
            broadcast_addr: SocketAddr::from((Ipv4Addr::BROADCAST, DISCOVERY_PORT)),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            local_addr: None,
            session: SessionConfig::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the discovery window.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the delay between broadcasts.
    pub fn with_broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval = interval;
        self
    }

    /// Sends Hello to `addr` instead of the limited broadcast address.
    pub fn with_broadcast_addr(mut self, addr: SocketAddr) -> Self {
        self.broadcast_addr = addr;
        self
    }

    /// Sets the queue capacity. Zero is treated as one.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Binds to `addr` instead of detecting the outgoing interface.
    pub fn with_local_addr(mut self, addr: Ipv4Addr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Sets the session configuration of discovered devices.
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

/// Returns the IPv4 address of the interface that routes to the internet.
///
/// Connecting a UDP socket only consults the routing table; no packet is sent.
pub async fn local_ipv4() -> Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| Error::Environment(format!("cannot open route lookup socket: {}", e)))?;
    socket
        .connect(ROUTE_LOOKUP_ADDR)
        .await
        .map_err(|e| Error::Environment(format!("no route to {}: {}", ROUTE_LOOKUP_ADDR, e)))?;

    match socket.local_addr() {
        Ok(SocketAddr::V4(addr)) if !addr.ip().is_unspecified() => Ok(*addr.ip()),
        Ok(other) => Err(Error::Environment(format!(
            "no usable IPv4 address (got {})",
            other
        ))),
        Err(e) => Err(Error::Environment(format!(
            "cannot read local address: {}",
            e
        ))),
    }
}

/// Discovers plugs for the default window using `timeout`.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use broadlink_core::discover;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut devices = discover(Duration::from_secs(3)).await?;
///     while let Some(mut device) = devices.recv().await {
///         device.authenticate().await?;
///         let state = device.get_state().await?;
///         println!("{}: {}", device.identity(), state);
///     }
///     Ok(())
/// }
/// ```
pub async fn discover(timeout: Duration) -> Result<DiscoveryStream> {
    Discovery::new(DiscoveryConfig::default().with_timeout(timeout))
        .start()
        .await
}

/// One discovery run.
#[derive(Debug, Clone)]
pub struct Discovery {
    config: DiscoveryConfig,
}

impl Discovery {
    /// Creates a discovery with `config`.
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Binds the socket, sends the first Hello and starts the background
    /// tasks.
    ///
    /// Setup failures are returned here; afterwards the stream only yields
    /// devices.
    pub async fn start(self) -> Result<DiscoveryStream> {
        let config = self.config;
        let ip = match config.local_addr {
            Some(ip) => ip,
            None => local_ipv4().await?,
        };

        let socket = UdpSocket::bind((ip, 0))
            .await
            .map_err(|e| Error::Transport(format!("bind {}: {}", ip, e)))?;
        socket
            .set_broadcast(true)
            .map_err(|e| Error::Transport(format!("enable broadcast: {}", e)))?;
        let local = match socket.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(addr) => {
                return Err(Error::Environment(format!(
                    "discovery socket bound to IPv6 address {}",
                    addr
                )));
            }
        };

        let deadline = Instant::now() + config.timeout;
        let socket = Arc::new(socket);

        send_hello(&socket, local, config.broadcast_addr).await?;
        debug!(
            local = %local,
            broadcast = %config.broadcast_addr,
            timeout = ?config.timeout,
            "discovery started"
        );

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

        let broadcaster = tokio::spawn(broadcast_loop(
            Arc::clone(&socket),
            local,
            config.broadcast_addr,
            config.broadcast_interval,
            deadline,
        ));
        let receiver = tokio::spawn(receive_loop(socket, tx, config.session, deadline));

        Ok(DiscoveryStream {
            rx,
            local,
            tasks: [broadcaster, receiver],
        })
    }
}

async fn send_hello(socket: &UdpSocket, local: SocketAddrV4, to: SocketAddr) -> Result<()> {
    let hello = Hello::new(local).to_bytes();
    trace!(to = %to, data = %hex::encode(&hello), "broadcasting hello");
    socket
        .send_to(&hello, to)
        .await
        .map_err(|e| Error::Transport(format!("broadcast to {}: {}", to, e)))?;
    Ok(())
}

/// Re-broadcasts Hello every `period` until `deadline`.
///
/// The first broadcast is sent by [`Discovery::start`].
async fn broadcast_loop(
    socket: Arc<UdpSocket>,
    local: SocketAddrV4,
    to: SocketAddr,
    period: Duration,
    deadline: Instant,
) {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.tick().await;

    while timeout_at(deadline, ticker.tick()).await.is_ok() {
        if let Err(e) = send_hello(&socket, local, to).await {
            warn!(error = %e, "hello broadcast failed");
        }
    }
}

/// Datagram socket the receive task reads announcements from.
#[async_trait]
trait AnnouncementSource: Send + Sync {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl AnnouncementSource for UdpSocket {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }
}

/// Receives announcements until `deadline`, forwarding each new MAC once.
///
/// A socket error ends discovery early; devices already queued are still
/// delivered.
async fn receive_loop<S: AnnouncementSource + ?Sized>(
    socket: Arc<S>,
    tx: mpsc::Sender<Device>,
    session: SessionConfig,
    deadline: Instant,
) {
    let mut seen = HashSet::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (n, from) = match timeout_at(deadline, socket.recv_datagram(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                warn!(error = %e, "discovery receive failed, stopping");
                break;
            }
            Ok(Ok(received)) => received,
        };

        let announcement = match ResponseLayout::Announcement.decode(&buf[..n]) {
            Ok(InboundPacket::Announcement(announcement)) => announcement,
            Ok(InboundPacket::Reply(_)) => continue,
            Err(e) => {
                trace!(from = %from, bytes = n, error = %e, "ignoring datagram");
                continue;
            }
        };

        if !seen.insert(announcement.mac) {
            trace!(from = %from, mac = %hex::encode(announcement.mac), "duplicate announcement");
            continue;
        }

        let identity = DeviceIdentity::from_announcement(&announcement, from);
        info!(device = %identity, addr = %from, "discovered device");

        match timeout_at(deadline, tx.send(Device::new(identity, session))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                debug!("discovery stream dropped, stopping");
                break;
            }
            Err(_) => break,
        }
    }

    debug!(devices = seen.len(), "discovery finished");
}

/// Devices found by a running discovery.
///
/// Ends once the deadline has passed and all queued devices are taken.
/// Dropping the stream stops discovery early.
#[derive(Debug)]
pub struct DiscoveryStream {
    rx: mpsc::Receiver<Device>,
    local: SocketAddrV4,
    tasks: [JoinHandle<()>; 2],
}

impl DiscoveryStream {
    /// Waits for the next device. Returns `None` when discovery is over.
    pub async fn recv(&mut self) -> Option<Device> {
        self.rx.recv().await
    }

    /// Address advertised in the Hello broadcasts.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }
}

impl Stream for DiscoveryStream {
    type Item = Device;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Device>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for DiscoveryStream {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;

    use super::*;
    use crate::codec::tests::{ANNOUNCEMENT, hexdec};

    /// Yields `datagrams` in order, then fails every read.
    struct BrokenSocket {
        datagrams: Mutex<VecDeque<Vec<u8>>>,
        reads: AtomicUsize,
    }

    impl BrokenSocket {
        fn new(datagrams: Vec<Vec<u8>>) -> Self {
            Self {
                datagrams: Mutex::new(datagrams.into()),
                reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AnnouncementSource for BrokenSocket {
        async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let next = self.datagrams.lock().unwrap().pop_front();
            match next {
                Some(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok((data.len(), "192.168.10.146:80".parse().unwrap()))
                }
                None => Err(io::Error::new(io::ErrorKind::ConnectionReset, "socket reset")),
            }
        }
    }

    /// Fake plug: waits for the first Hello, then answers with `replies`.
    async fn fake_plug(replies: Vec<Vec<u8>>) -> (SocketAddr, JoinHandle<Vec<u8>>) {
        let plug = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = plug.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (n, from) = plug.recv_from(&mut buf).await.unwrap();
            for reply in replies {
                plug.send_to(&reply, from).await.unwrap();
            }
            buf[..n].to_vec()
        });
        (addr, handle)
    }

    fn loopback_config(plug: SocketAddr) -> DiscoveryConfig {
        DiscoveryConfig::new()
            .with_local_addr(Ipv4Addr::LOCALHOST)
            .with_broadcast_addr(plug)
            .with_broadcast_interval(Duration::from_millis(50))
            .with_timeout(Duration::from_millis(400))
    }

    fn announcement_with_mac(last: u8) -> Vec<u8> {
        let mut data = hexdec(ANNOUNCEMENT);
        data[0x3f] = last;
        data
    }

    #[test]
    fn test_discovery_config_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.broadcast_interval, Duration::from_secs(1));
        assert_eq!(config.broadcast_addr, "255.255.255.255:80".parse().unwrap());
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.local_addr, None);
    }

    #[tokio::test]
    async fn test_duplicate_announcements_yield_one_device() {
        let announcement = hexdec(ANNOUNCEMENT);
        let (plug, hello) = fake_plug(vec![announcement.clone(), announcement]).await;

        let stream = Discovery::new(loopback_config(plug)).start().await.unwrap();
        let devices: Vec<Device> = stream.collect().await;

        assert_eq!(devices.len(), 1);
        let identity = devices[0].identity();
        assert_eq!(identity.mac_string(), "148e8642f7c8");
        assert_eq!(identity.device_type, 0x51e3);
        assert_eq!(identity.addr, plug);
        assert!(!devices[0].is_authenticated());
        assert_eq!(hello.await.unwrap().len(), 48);
    }

    #[tokio::test]
    async fn test_distinct_macs_are_all_delivered() {
        let replies = vec![
            announcement_with_mac(0x01),
            announcement_with_mac(0x02),
            announcement_with_mac(0x01),
            announcement_with_mac(0x03),
        ];
        let (plug, _hello) = fake_plug(replies).await;

        let mut stream = Discovery::new(loopback_config(plug)).start().await.unwrap();
        let mut macs = Vec::new();
        while let Some(device) = stream.recv().await {
            macs.push(device.identity().mac[5]);
        }

        assert_eq!(macs, [0x01, 0x02, 0x03]);
    }

    #[tokio::test]
    async fn test_malformed_datagrams_ignored() {
        let replies = vec![b"hello?".to_vec(), vec![0u8; 0x40], hexdec(ANNOUNCEMENT)];
        let (plug, _hello) = fake_plug(replies).await;

        let stream = Discovery::new(loopback_config(plug)).start().await.unwrap();
        let devices: Vec<Device> = stream.collect().await;

        assert_eq!(devices.len(), 1);
    }

    #[tokio::test]
    async fn test_hello_advertises_bound_address() {
        let (plug, hello) = fake_plug(Vec::new()).await;

        let stream = Discovery::new(loopback_config(plug)).start().await.unwrap();
        let local = stream.local_addr();
        let hello = hello.await.unwrap();

        assert_eq!(*local.ip(), Ipv4Addr::LOCALHOST);
        assert_eq!(&hello[0x18..0x1c], &u32::from(Ipv4Addr::LOCALHOST).to_le_bytes());
        assert_eq!(&hello[0x1c..0x1e], &local.port().to_le_bytes());
        assert_eq!(&hello[0x26..0x28], &[0x06, 0x00]);
    }

    #[tokio::test]
    async fn test_stream_ends_at_deadline() {
        let (plug, _hello) = fake_plug(Vec::new()).await;
        let started = std::time::Instant::now();

        let stream = Discovery::new(loopback_config(plug).with_timeout(Duration::from_millis(200)))
            .start()
            .await
            .unwrap();
        let devices: Vec<Device> = stream.collect().await;

        assert!(devices.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_receive_error_ends_discovery() {
        let socket = Arc::new(BrokenSocket::new(vec![hexdec(ANNOUNCEMENT)]));
        let (tx, mut rx) = mpsc::channel(4);
        let deadline = Instant::now() + Duration::from_secs(30);

        tokio::time::timeout(
            Duration::from_secs(2),
            receive_loop(Arc::clone(&socket), tx, SessionConfig::default(), deadline),
        )
        .await
        .unwrap();

        assert_eq!(socket.reads.load(Ordering::SeqCst), 2);
        assert_eq!(rx.recv().await.unwrap().identity().mac_string(), "148e8642f7c8");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_queue_stops_at_deadline() {
        let replies = vec![
            announcement_with_mac(0x01),
            announcement_with_mac(0x02),
            announcement_with_mac(0x03),
        ];
        let (plug, _hello) = fake_plug(replies).await;
        let config = loopback_config(plug)
            .with_queue_capacity(1)
            .with_timeout(Duration::from_millis(300));

        let stream = Discovery::new(config).start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;

        let started = std::time::Instant::now();
        let devices: Vec<Device> = stream.collect().await;

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].identity().mac[5], 0x01);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}

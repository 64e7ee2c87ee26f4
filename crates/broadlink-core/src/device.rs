//! Session with a single plug: authentication and power state commands.

use std::{fmt, net::SocketAddr, time::Duration};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::{
    DEFAULT_REPLY_TIMEOUT, MAX_ATTEMPTS,
    codec::{
        self, Announcement, InboundPacket, PACKET_CHECKSUM_SEED, ReplyPacket, RequestHeader,
        ResponseLayout,
    },
    crypto::{BLOCK_SIZE, CryptoContext},
    error::{Error, Result},
    message::{AuthRequest, CommandRequest, Request},
    state::PowerState,
    transport::{MAX_DATAGRAM, Transport, UdpTransport},
};

/// Identity of a plug as observed in its discovery announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Device type code from the announcement.
    pub device_type: u16,
    /// Hardware address, serialized as lowercase hex.
    #[serde(serialize_with = "serialize_mac", deserialize_with = "deserialize_mac")]
    pub mac: [u8; 6],
    /// Address the announcement came from.
    pub addr: SocketAddr,
}

impl DeviceIdentity {
    /// Builds an identity from a parsed announcement and its source address.
    pub fn from_announcement(announcement: &Announcement, addr: SocketAddr) -> Self {
        Self {
            device_type: announcement.device_type,
            mac: announcement.mac,
            addr,
        }
    }

    /// MAC as 12 lowercase hex digits, e.g. `148e8642f7c8`.
    pub fn mac_string(&self) -> String {
        hex::encode(self.mac)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device{{type: {:04x} mac: {}}}",
            self.device_type,
            self.mac_string()
        )
    }
}

fn serialize_mac<S: Serializer>(mac: &[u8; 6], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(mac))
}

fn deserialize_mac<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<[u8; 6], D::Error> {
    let text = String::deserialize(deserializer)?;
    let bytes = hex::decode(text.replace(':', "")).map_err(serde::de::Error::custom)?;
    bytes
        .try_into()
        .map_err(|_| serde::de::Error::custom("mac must be 6 bytes"))
}

/// Timing of the send/retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long to wait for each reply.
    pub reply_timeout: Duration,
    /// Sends of the same datagram before giving up.
    pub max_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl SessionConfig {
    /// Creates the default configuration (1 s, 5 attempts).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-attempt reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Sets the number of attempts. Values below one are treated as one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// Where a single exchange is in its send/wait cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Send,
    Wait,
    Exhausted,
}

/// One logical request: a fixed datagram re-sent on every timeout.
///
/// Replies echoing a different counter belong to an earlier request and are
/// dropped without consuming an attempt.
#[derive(Debug)]
struct Exchange<'a> {
    packet: &'a [u8],
    counter: u16,
    attempt: u32,
    max_attempts: u32,
    deadline: Instant,
    phase: Phase,
}

impl<'a> Exchange<'a> {
    fn new(packet: &'a [u8], counter: u16, max_attempts: u32) -> Self {
        Self {
            packet,
            counter,
            attempt: 0,
            max_attempts: max_attempts.max(1),
            deadline: Instant::now(),
            phase: Phase::Send,
        }
    }

    fn is_stale(&self, data: &[u8]) -> bool {
        matches!(ReplyPacket::parse(data), Ok(reply) if reply.counter != self.counter)
    }

    /// Drives the exchange until a matching datagram arrives or the attempts run out.
    async fn run(
        mut self,
        transport: &dyn Transport,
        reply_timeout: Duration,
        buf: &mut [u8],
    ) -> Result<usize> {
        loop {
            match self.phase {
                Phase::Send => {
                    self.attempt += 1;
                    transport.send(self.packet).await?;
                    self.deadline = Instant::now() + reply_timeout;
                    self.phase = Phase::Wait;
                }
                Phase::Wait => {
                    let remaining = self.deadline.saturating_duration_since(Instant::now());
                    let received = if remaining.is_zero() {
                        Err(Error::Timeout("reply window elapsed".into()))
                    } else {
                        transport.recv(buf, remaining).await
                    };

                    match received {
                        Ok(n) if self.is_stale(&buf[..n]) => {
                            debug!(
                                counter = self.counter,
                                bytes = n,
                                "discarding reply to an earlier request"
                            );
                        }
                        Ok(n) => return Ok(n),
                        Err(e) if e.is_retryable() => {
                            if self.attempt < self.max_attempts {
                                debug!(
                                    attempt = self.attempt,
                                    max_attempts = self.max_attempts,
                                    "no reply, retrying"
                                );
                                self.phase = Phase::Send;
                            } else {
                                self.phase = Phase::Exhausted;
                            }
                        }
                        Err(e) => return Err(e),
                    }
                }
                Phase::Exhausted => {
                    return Err(Error::Timeout(format!(
                        "no reply from {} after {} attempts",
                        transport.peer(),
                        self.attempt
                    )));
                }
            }
        }
    }
}

/// Session with one plug.
///
/// Starts unauthenticated with the bootstrap key. [`authenticate`] opens the
/// socket and switches to the negotiated key; only then are
/// [`get_state`] and [`set_state`] accepted. Requests are strictly
/// sequential.
///
/// [`authenticate`]: Device::authenticate
/// [`get_state`]: Device::get_state
/// [`set_state`]: Device::set_state
///
/// # Example
///
/// ```no_run
/// use broadlink_core::{Device, DeviceIdentity, PowerState, SessionConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let identity = DeviceIdentity {
///         device_type: 0x51e3,
///         mac: [0x14, 0x8e, 0x86, 0x42, 0xf7, 0xc8],
///         addr: "192.168.10.146:80".parse()?,
///     };
///     let mut device = Device::new(identity, SessionConfig::default());
///     device.authenticate().await?;
///     let state = device.set_state(PowerState::pwr1_on()).await?;
///     println!("{}", state);
///     Ok(())
/// }
/// ```
pub struct Device {
    identity: DeviceIdentity,
    config: SessionConfig,
    crypto: CryptoContext,
    counter: u16,
    device_id: u32,
    authenticated: bool,
    transport: Option<Box<dyn Transport>>,
}

impl Device {
    /// Creates an unauthenticated session. No socket is opened yet.
    pub fn new(identity: DeviceIdentity, config: SessionConfig) -> Self {
        Self {
            identity,
            config,
            crypto: CryptoContext::new(),
            counter: 0,
            device_id: 0,
            authenticated: false,
            transport: None,
        }
    }

    /// Uses `transport` instead of opening a UDP socket on authentication.
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Identity from the discovery announcement.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Returns `true` once [`Device::authenticate`] has succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Numeric id assigned by the device; zero before authentication.
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Counter of the most recent request.
    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Negotiates the per-device key.
    ///
    /// Fails with [`Error::Precondition`] if the session is already
    /// authenticated.
    pub async fn authenticate(&mut self) -> Result<()> {
        if self.authenticated {
            return Err(Error::Precondition(format!(
                "{} is already authenticated",
                self.identity
            )));
        }

        if self.transport.is_none() {
            self.transport = Some(Box::new(UdpTransport::connect(self.identity.addr).await?));
        }

        let response = self.send(&AuthRequest).await?;
        self.crypto.set_key(response.key);
        self.device_id = response.device_id;
        self.authenticated = true;

        info!(device = %self.identity, id = response.device_id, "authenticated");
        Ok(())
    }

    /// Reads the current power state.
    pub async fn get_state(&mut self) -> Result<PowerState> {
        let response = self.send(&CommandRequest::read()).await?;
        Ok(response.state)
    }

    /// Applies `update` and returns the state reported afterwards.
    ///
    /// Fields left unset in `update` are not changed on the device.
    pub async fn set_state(&mut self, update: PowerState) -> Result<PowerState> {
        let response = self.send(&CommandRequest::write(update)).await?;
        Ok(response.state)
    }

    /// Encrypts and sends `request`, retrying on timeout, and decodes the reply.
    ///
    /// Key negotiation is only accepted before authentication and every
    /// other request only after it.
    pub async fn send<R: Request>(&mut self, request: &R) -> Result<R::Response> {
        if self.authenticated && request.allowed_unauthenticated() {
            return Err(Error::Precondition(format!(
                "{} is already authenticated",
                self.identity
            )));
        }
        if !self.authenticated && !request.allowed_unauthenticated() {
            return Err(Error::Precondition(format!(
                "{} requires authentication",
                request.name()
            )));
        }

        let mut plaintext = request.payload()?;
        codec::pad_to_multiple(&mut plaintext, BLOCK_SIZE);

        self.counter = self.counter.wrapping_add(1);
        let header = RequestHeader {
            command: request.command(),
            counter: self.counter,
            mac: self.identity.mac,
            device_id: self.device_id,
            payload_checksum: codec::checksum16(&plaintext, PACKET_CHECKSUM_SEED),
        };
        let packet = header.encode(&self.crypto.encrypt(&plaintext));

        let transport = self
            .transport
            .as_deref()
            .ok_or_else(|| Error::Precondition("no transport open".into()))?;

        debug!(
            request = request.name(),
            peer = %transport.peer(),
            counter = self.counter,
            bytes = packet.len(),
            "sending request"
        );
        trace!(data = %hex::encode(&plaintext), "request plaintext");

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let n = Exchange::new(&packet, self.counter, self.config.max_attempts)
            .run(transport, self.config.reply_timeout, &mut buf)
            .await?;

        debug!(request = request.name(), bytes = n, "received reply");

        match ResponseLayout::Reply.decode(&buf[..n])? {
            InboundPacket::Reply(reply) => request.decode_response(&reply, &self.crypto),
            InboundPacket::Announcement(_) => Err(Error::Protocol(
                "expected a reply, got an announcement".into(),
            )),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("identity", &self.identity)
            .field("config", &self.config)
            .field("crypto", &self.crypto)
            .field("counter", &self.counter)
            .field("device_id", &self.device_id)
            .field("authenticated", &self.authenticated)
            .field("peer", &self.transport.as_ref().map(|t| t.peer()))
            .finish()
    }
}

//! Request/response pairs of the protocol.
//!
//! - [`Hello`]: cleartext discovery broadcast
//! - [`AuthRequest`] / [`AuthResponse`]: key negotiation
//! - [`CommandRequest`] / [`CommandResponse`]: read or write the power state
//!
//! A [`Request`] produces the plaintext payload; the device session wraps it
//! in the packet envelope, encrypts it, and hands the reply back to
//! [`Request::decode_response`].

mod auth;
mod command;
mod hello;

pub use auth::{AuthRequest, AuthResponse};
pub use command::{CommandFlag, CommandRequest, CommandResponse};
pub use hello::Hello;

use crate::codec::ReplyPacket;
use crate::crypto::CryptoContext;
use crate::error::Result;

/// Command code of the discovery broadcast.
pub const HELLO_COMMAND: u16 = 0x0006;

/// Command code of the Auth exchange.
pub const AUTH_COMMAND: u16 = 0x0065;

/// Command code of state reads and writes.
pub const STATE_COMMAND: u16 = 0x006a;

/// An encrypted request sent to an individual device.
pub trait Request {
    /// Typed result decoded from the device's reply.
    type Response;

    /// Human-readable name used in logs.
    fn name(&self) -> &'static str;

    /// Command code written into the packet header.
    fn command(&self) -> u16;

    /// Returns `true` for key negotiation, which is only accepted before
    /// authentication.
    fn allowed_unauthenticated(&self) -> bool {
        false
    }

    /// Plaintext payload, before block padding.
    fn payload(&self) -> Result<Vec<u8>>;

    /// Decodes the reply using the session's current key.
    fn decode_response(&self, reply: &ReplyPacket<'_>, crypto: &CryptoContext)
    -> Result<Self::Response>;
}

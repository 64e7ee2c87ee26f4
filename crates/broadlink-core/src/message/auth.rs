use std::fmt;

use super::{AUTH_COMMAND, Request};
use crate::codec::{self, ReplyPacket};
use crate::crypto::CryptoContext;
use crate::error::{Error, Result};

/// Identifier string sent in the Auth payload.
const CLIENT_NAME: &[u8] = b"Test  1";

/// Length of the Auth request payload.
pub const AUTH_PAYLOAD_LEN: usize = 80;

/// Minimum decrypted length of an Auth reply: id (4 bytes) plus key (16 bytes).
const AUTH_REPLY_MIN_LEN: usize = 0x14;

/// Key negotiation request. Sent with the bootstrap key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthRequest;

/// Result of a successful Auth exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthResponse {
    /// Numeric id to put in every later request.
    pub device_id: u32,
    /// Per-device key replacing the bootstrap key.
    pub key: [u8; 16],
}

impl Request for AuthRequest {
    type Response = AuthResponse;

    fn name(&self) -> &'static str {
        "Auth"
    }

    fn command(&self) -> u16 {
        AUTH_COMMAND
    }

    fn allowed_unauthenticated(&self) -> bool {
        true
    }

    fn payload(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(AUTH_PAYLOAD_LEN);
        codec::pad(&mut buf, 0, 4);
        codec::pad(&mut buf, 0x31, 15);
        codec::pad(&mut buf, 0, 11);
        buf.push(0x01);
        codec::pad(&mut buf, 0, 14);
        buf.push(0x01);
        codec::pad(&mut buf, 0, 2);
        buf.extend_from_slice(CLIENT_NAME);
        codec::pad(&mut buf, 0, 25);
        Ok(buf)
    }

    fn decode_response(
        &self,
        reply: &ReplyPacket<'_>,
        crypto: &CryptoContext,
    ) -> Result<AuthResponse> {
        let payload = crypto.decrypt(reply.ciphertext)?;
        if payload.len() < AUTH_REPLY_MIN_LEN {
            return Err(Error::Protocol(format!(
                "auth reply too short: {} bytes",
                payload.len()
            )));
        }

        let device_id = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let mut key = [0u8; 16];
        key.copy_from_slice(&payload[0x04..AUTH_REPLY_MIN_LEN]);

        Ok(AuthResponse { device_id, key })
    }
}

impl fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponse")
            .field("device_id", &self.device_id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthResponse{{id: {:04x}}}", self.device_id)
    }
}

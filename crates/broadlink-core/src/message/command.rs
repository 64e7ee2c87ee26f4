use super::{Request, STATE_COMMAND};
use crate::codec::{COMMAND_CHECKSUM_SEED, ReplyPacket, checksum16};
use crate::crypto::CryptoContext;
use crate::error::{Error, Result};
use crate::state::PowerState;

const PAYLOAD_MARKER_A: u16 = 0xa5a5;
const PAYLOAD_MARKER_B: u16 = 0x5a5a;
const PAYLOAD_KIND: u8 = 0x0b;

/// Offset of the checksum inside a command payload.
const PAYLOAD_CHECKSUM_OFFSET: usize = 0x06;

/// Offset of the JSON length field.
const JSON_LEN_OFFSET: usize = 0x0a;

/// Offset of the JSON document; also the minimum payload length.
const JSON_OFFSET: usize = 0x0e;

/// Whether a command reads or writes the power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandFlag {
    /// Query the current state.
    Read = 1,
    /// Apply an update and return the resulting state.
    Write = 2,
}

impl From<CommandFlag> for u8 {
    fn from(flag: CommandFlag) -> Self {
        flag as u8
    }
}

/// Power state read or write.
///
/// Payload layout:
///
/// ```text
/// 0x00  u16  length of everything after this field
/// 0x02  u16  0xa5a5
/// 0x04  u16  0x5a5a
/// 0x06  u16  checksum of bytes 0x08.. (seed 0xc0ad)
/// 0x08  u8   flag (1 = read, 2 = write)
/// 0x09  u8   0x0b
/// 0x0a  u32  JSON length
/// 0x0e  ..   JSON
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRequest {
    flag: CommandFlag,
    state: Option<PowerState>,
}

impl CommandRequest {
    /// Request for the current state.
    pub fn read() -> Self {
        Self {
            flag: CommandFlag::Read,
            state: None,
        }
    }

    /// Request applying `update`. Unset fields are left untouched.
    pub fn write(update: PowerState) -> Self {
        Self {
            flag: CommandFlag::Write,
            state: Some(update),
        }
    }

    /// Read or write.
    pub fn flag(&self) -> CommandFlag {
        self.flag
    }
}

/// State reported in a command reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResponse {
    /// Resulting (possibly partial) device state.
    pub state: PowerState,
}

impl Request for CommandRequest {
    type Response = CommandResponse;

    fn name(&self) -> &'static str {
        match self.flag {
            CommandFlag::Read => "GetState",
            CommandFlag::Write => "SetState",
        }
    }

    fn command(&self) -> u16 {
        STATE_COMMAND
    }

    fn payload(&self) -> Result<Vec<u8>> {
        let json = match &self.state {
            Some(state) => state.to_json()?,
            None => "{}".to_string(),
        };
        let json = json.as_bytes();

        let mut buf = Vec::with_capacity(JSON_OFFSET + json.len());
        buf.extend_from_slice(&((JSON_OFFSET - 2 + json.len()) as u16).to_le_bytes());
        buf.extend_from_slice(&PAYLOAD_MARKER_A.to_le_bytes());
        buf.extend_from_slice(&PAYLOAD_MARKER_B.to_le_bytes());
        buf.extend_from_slice(&[0, 0]);
        buf.push(self.flag.into());
        buf.push(PAYLOAD_KIND);
        buf.extend_from_slice(&(json.len() as u32).to_le_bytes());
        buf.extend_from_slice(json);

        let checksum = checksum16(&buf[PAYLOAD_CHECKSUM_OFFSET + 2..], COMMAND_CHECKSUM_SEED);
        buf[PAYLOAD_CHECKSUM_OFFSET..PAYLOAD_CHECKSUM_OFFSET + 2]
            .copy_from_slice(&checksum.to_le_bytes());
        Ok(buf)
    }

    fn decode_response(
        &self,
        reply: &ReplyPacket<'_>,
        crypto: &CryptoContext,
    ) -> Result<CommandResponse> {
        if reply.error_code != 0 {
            return Err(Error::DeviceError {
                code: reply.error_code,
            });
        }

        let payload = crypto.decrypt(reply.ciphertext)?;
        if payload.len() < JSON_OFFSET {
            return Err(Error::Protocol(format!(
                "command reply too short: {} bytes",
                payload.len()
            )));
        }

        let json_len = u32::from_le_bytes([
            payload[JSON_LEN_OFFSET],
            payload[JSON_LEN_OFFSET + 1],
            payload[JSON_LEN_OFFSET + 2],
            payload[JSON_LEN_OFFSET + 3],
        ]) as usize;
        let json = payload
            .get(JSON_OFFSET..JSON_OFFSET.saturating_add(json_len))
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "command reply declares {} bytes of state but carries {}",
                    json_len,
                    payload.len() - JSON_OFFSET
                ))
            })?;

        Ok(CommandResponse {
            state: PowerState::from_json(json)?,
        })
    }
}

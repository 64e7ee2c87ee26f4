//! Byte-level encoding and decoding of the packet envelope.
//!
//! Every datagram starts with the same 8-byte magic. Requests and command
//! replies share one field map; discovery announcements reuse the envelope
//! with a different, longer one. Which map applies is decided by the operation
//! that is waiting for the datagram ([`ResponseLayout`]), never by inspecting
//! the bytes.
//!
//! # Request / reply layout
//!
//! | Offset      | Field                                         |
//! |-------------|-----------------------------------------------|
//! | 0x00..0x08  | magic `5a a5 aa 55 5a a5 aa 55`               |
//! | 0x20..0x22  | outer checksum, seed `0xbeaf`                 |
//! | 0x22..0x24  | zero on requests, device error code on replies|
//! | 0x24..0x26  | device type (`0x51e3` on requests)            |
//! | 0x26..0x28  | command code                                  |
//! | 0x28..0x2a  | send counter                                  |
//! | 0x2a..0x30  | device MAC                                    |
//! | 0x30..0x34  | numeric device id                             |
//! | 0x34..0x36  | checksum of the padded plaintext, seed `0xbeaf`|
//! | 0x38..      | AES-CBC ciphertext                            |
//!
//! All integers are little-endian.

use crate::error::{Error, Result};

/// Magic bytes at the start of every packet.
pub const MAGIC: [u8; 8] = [0x5a, 0xa5, 0xaa, 0x55, 0x5a, 0xa5, 0xaa, 0x55];

/// Seed for the outer packet checksum and the plaintext checksum field.
pub const PACKET_CHECKSUM_SEED: u16 = 0xbeaf;

/// Seed for the checksum embedded in command payloads.
pub const COMMAND_CHECKSUM_SEED: u16 = 0xc0ad;

/// Device type written into every request.
pub const REQUEST_DEVICE_TYPE: u16 = 0x51e3;

/// Offset of the outer checksum.
pub const CHECKSUM_OFFSET: usize = 0x20;

/// Offset of the device error code in replies.
pub const ERROR_CODE_OFFSET: usize = 0x22;

const DEVICE_TYPE_OFFSET: usize = 0x24;
const COMMAND_OFFSET: usize = 0x26;

/// Offset of the request counter, echoed in replies.
pub const COUNTER_OFFSET: usize = 0x28;

const MAC_OFFSET: usize = 0x2a;
const DEVICE_ID_OFFSET: usize = 0x30;
const PAYLOAD_CHECKSUM_OFFSET: usize = 0x34;

/// Offset of the encrypted payload; also the length of the header.
pub const PAYLOAD_OFFSET: usize = 0x38;

const ANNOUNCEMENT_DEVICE_TYPE_OFFSET: usize = 0x34;
const ANNOUNCEMENT_MAC_OFFSET: usize = 0x3a;

/// Minimum length of an announcement datagram.
pub const ANNOUNCEMENT_MIN_LEN: usize = 0x40;

/// Sums every byte onto `seed`, wrapping at 2^16.
///
/// # Example
///
/// ```
/// use broadlink_core::codec::checksum16;
///
/// assert_eq!(checksum16(&[], 0xbeaf), 0xbeaf);
/// assert_eq!(checksum16(&[0x01, 0x02], 0xbeaf), 0xbeb2);
/// assert_eq!(checksum16(&[0xff; 2], 0xffff), 0x01fd);
/// ```
pub fn checksum16(data: &[u8], seed: u16) -> u16 {
    data.iter()
        .fold(seed, |sum, &byte| sum.wrapping_add(u16::from(byte)))
}

/// Appends `count` copies of `fill` to `buf`.
pub fn pad(buf: &mut Vec<u8>, fill: u8, count: usize) {
    buf.resize(buf.len() + count, fill);
}

/// Appends zero bytes until `buf.len()` is a multiple of `modulus`.
pub fn pad_to_multiple(buf: &mut Vec<u8>, modulus: usize) {
    let padding = (modulus - buf.len() % modulus) % modulus;
    pad(buf, 0, padding);
}

/// Computes the outer checksum over `packet` (with the checksum slot already
/// zeroed) and writes it at [`CHECKSUM_OFFSET`].
pub fn seal(packet: &mut [u8]) {
    let checksum = checksum16(packet, PACKET_CHECKSUM_SEED);
    packet[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_le_bytes());
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_mac(data: &[u8], offset: usize) -> [u8; 6] {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&data[offset..offset + 6]);
    mac
}

fn check_magic(data: &[u8]) -> Result<()> {
    if data[..MAGIC.len()] != MAGIC {
        return Err(Error::Protocol(format!(
            "bad packet magic: {}",
            hex::encode(&data[..MAGIC.len()])
        )));
    }
    Ok(())
}

/// Header fields of an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Command code of the message.
    pub command: u16,
    /// Session send counter for this logical request.
    pub counter: u16,
    /// MAC of the target device.
    pub mac: [u8; 6],
    /// Numeric device id (zero before authentication).
    pub device_id: u32,
    /// [`PACKET_CHECKSUM_SEED`] checksum of the padded plaintext.
    pub payload_checksum: u16,
}

impl RequestHeader {
    /// Builds the complete request datagram around an already encrypted payload.
    pub fn encode(&self, ciphertext: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(PAYLOAD_OFFSET + ciphertext.len());
        packet.extend_from_slice(&MAGIC);
        pad(&mut packet, 0, DEVICE_TYPE_OFFSET - MAGIC.len());
        packet.extend_from_slice(&REQUEST_DEVICE_TYPE.to_le_bytes());
        packet.extend_from_slice(&self.command.to_le_bytes());
        packet.extend_from_slice(&self.counter.to_le_bytes());
        packet.extend_from_slice(&self.mac);
        packet.extend_from_slice(&self.device_id.to_le_bytes());
        packet.extend_from_slice(&self.payload_checksum.to_le_bytes());
        let fill = PAYLOAD_OFFSET - packet.len();
        pad(&mut packet, 0, fill);
        packet.extend_from_slice(ciphertext);

        seal(&mut packet);
        packet
    }
}

/// A device announcement received during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announcement {
    /// Device type code.
    pub device_type: u16,
    /// Hardware address.
    pub mac: [u8; 6],
}

impl Announcement {
    /// Parses an announcement datagram.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ANNOUNCEMENT_MIN_LEN {
            return Err(Error::Protocol(format!(
                "announcement too short: {} bytes (expected at least {})",
                data.len(),
                ANNOUNCEMENT_MIN_LEN
            )));
        }
        check_magic(data)?;

        Ok(Self {
            device_type: read_u16(data, ANNOUNCEMENT_DEVICE_TYPE_OFFSET),
            mac: read_mac(data, ANNOUNCEMENT_MAC_OFFSET),
        })
    }
}

/// A reply to an Auth or Command request.
///
/// The outer checksum is not verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyPacket<'a> {
    /// Device-reported error code, zero on success.
    pub error_code: u16,
    /// Device type reported by the device.
    pub device_type: u16,
    /// Command code echoed by the device.
    pub command: u16,
    /// Counter echoed by the device.
    pub counter: u16,
    /// Device MAC.
    pub mac: [u8; 6],
    /// Numeric device id.
    pub device_id: u32,
    /// Checksum of the plaintext as claimed by the sender.
    pub payload_checksum: u16,
    /// Encrypted payload following the header.
    pub ciphertext: &'a [u8],
}

impl<'a> ReplyPacket<'a> {
    /// Parses a reply datagram. The ciphertext is borrowed from `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < PAYLOAD_OFFSET {
            return Err(Error::Protocol(format!(
                "reply too short: {} bytes (expected at least {})",
                data.len(),
                PAYLOAD_OFFSET
            )));
        }
        check_magic(data)?;

        Ok(Self {
            error_code: read_u16(data, ERROR_CODE_OFFSET),
            device_type: read_u16(data, DEVICE_TYPE_OFFSET),
            command: read_u16(data, COMMAND_OFFSET),
            counter: read_u16(data, COUNTER_OFFSET),
            mac: read_mac(data, MAC_OFFSET),
            device_id: read_u32(data, DEVICE_ID_OFFSET),
            payload_checksum: read_u16(data, PAYLOAD_CHECKSUM_OFFSET),
            ciphertext: &data[PAYLOAD_OFFSET..],
        })
    }
}

/// Field map to apply to an inbound datagram.
///
/// Chosen by the operation that issued the request: discovery expects
/// announcements, a device session expects replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLayout {
    /// Discovery announcement (device type at 0x34, MAC at 0x3a).
    Announcement,
    /// Auth or Command reply (standard header, ciphertext at 0x38).
    Reply,
}

/// An inbound datagram decoded with a given [`ResponseLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundPacket<'a> {
    /// Discovery announcement.
    Announcement(Announcement),
    /// Auth or Command reply.
    Reply(ReplyPacket<'a>),
}

impl ResponseLayout {
    /// Decodes `data` with this layout's field map.
    pub fn decode(self, data: &[u8]) -> Result<InboundPacket<'_>> {
        match self {
            ResponseLayout::Announcement => Announcement::parse(data).map(InboundPacket::Announcement),
            ResponseLayout::Reply => ReplyPacket::parse(data).map(InboundPacket::Reply),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Decodes a spaced, multi-line hex dump.
    pub(crate) fn hexdec(dump: &str) -> Vec<u8> {
        let compact: String = dump.split_whitespace().collect();
        hex::decode(compact).unwrap()
    }

    /// Announcement captured from a BG Electrical dual-outlet plug.
    pub(crate) const ANNOUNCEMENT: &str = "
        5a a5 aa 55 5a a5 aa 55  01 00 00 00 e3 07 31 0c
        07 02 0f 0a 00 00 00 00  ff ff ff ff 50 00 00 00
        4d d3 00 00 00 00 07 00  00 00 00 00 00 00 00 00
        cb 51 aa 53 e3 51 92 0a  a8 c0 14 8e 86 42 f7 c8
        73 6f 63 6b 65 74 00 00  00 00 00 00 00 00 00 00
        00 00 00 00 00 00 00 00  00 00 00 00 00 00 00 00
        00 00 00 00 00 00 00 00  00 00 00 00 00 00 00 00
        00 00 00 00 00 00 00 00  00 00 00 00 00 00 02 00";

    /// Auth reply captured from the same plug.
    pub(crate) const AUTH_REPLY: &str = "
        5a a5 aa 55 5a a5 aa 55  00 00 00 00 00 00 00 00
        00 00 00 00 00 00 00 00  00 00 00 00 00 00 00 00
        58 da 00 00 2a 27 e9 03  01 00 14 8e 86 42 f7 c8
        00 00 00 00 7c c5 00 00  36 ba 9e ea 63 61 10 4c
        fc f2 a8 13 f7 67 a5 ec  f4 bd 64 ef 47 14 ea 2d
        8f 36 5d e3 97 ea 81 58";

    /// Key negotiated in [`AUTH_REPLY`].
    pub(crate) const NEGOTIATED_KEY: [u8; 16] = [
        0x55, 0x65, 0x11, 0x3a, 0x28, 0x71, 0xbf, 0x61, 0xb0, 0x4d, 0xb5, 0x6a, 0x18, 0xb8, 0xd3,
        0x4f,
    ];

    /// Command reply encrypted with [`NEGOTIATED_KEY`], reporting both outlets
    /// and all limits.
    pub(crate) const COMMAND_REPLY: &str = "
        5a a5 aa 55 5a a5 aa 55  00 00 00 00 00 00 00 00
        00 00 00 00 00 00 00 00  00 00 00 00 00 00 00 00
        c6 fd 00 00 2a 27 ee 03  02 00 14 8e 86 42 f7 c8
        01 00 00 00 46 e2 00 00  43 34 06 08 a2 a6 ef 5c
        30 2a 34 a5 81 72 b1 2e  44 49 f6 3f 3f cf d1 0e
        ab 5e e2 9a 6a 50 e9 12  17 4e 03 9c a6 9a b8 b1
        0a cc e2 02 91 70 eb 88  b8 66 12 20 29 6f 93 16
        fd 69 a6 e6 fd 75 d9 84  c4 02 9f 47 fb 00 52 ff
        aa 1f 30 d1 72 f0 82 a6  39 07 56 69 68 1a 5e 6b
        6e 89 69 9a fd ad 42 e9  df 2a b8 96 d8 a1 b8 30
        0e 15 ad a8 a7 38 65 79";

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum16(&[0xff; 0x200], 0), 0xfe00);
        assert_eq!(checksum16(&[0x60], 0xffb0), 0x0010);
    }

    #[test]
    fn test_checksum_seeds_differ() {
        let data = b"{}";
        assert_eq!(
            checksum16(data, COMMAND_CHECKSUM_SEED).wrapping_sub(checksum16(data, PACKET_CHECKSUM_SEED)),
            COMMAND_CHECKSUM_SEED - PACKET_CHECKSUM_SEED
        );
    }

    #[test]
    fn test_pad() {
        let mut buf = vec![1u8];
        pad(&mut buf, 0x31, 3);
        assert_eq!(buf, [1, 0x31, 0x31, 0x31]);
    }

    #[test]
    fn test_pad_to_multiple() {
        let mut buf = vec![0xaa; 17];
        pad_to_multiple(&mut buf, 16);
        assert_eq!(buf.len(), 32);
        assert!(buf[17..].iter().all(|&b| b == 0));

        let mut aligned = vec![0xaa; 32];
        pad_to_multiple(&mut aligned, 16);
        assert_eq!(aligned.len(), 32);

        let mut empty = Vec::new();
        pad_to_multiple(&mut empty, 16);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_request_header_layout() {
        let header = RequestHeader {
            command: 0x006a,
            counter: 0x0102,
            mac: [0x14, 0x8e, 0x86, 0x42, 0xf7, 0xc8],
            device_id: 0x0403_0201,
            payload_checksum: 0xc335,
        };
        let packet = header.encode(&[0xee; 16]);

        assert_eq!(packet.len(), PAYLOAD_OFFSET + 16);
        assert_eq!(&packet[..8], &MAGIC);
        assert!(packet[0x08..0x20].iter().all(|&b| b == 0));
        assert_eq!(&packet[0x22..0x24], &[0x00, 0x00]);
        assert_eq!(&packet[0x24..0x26], &[0xe3, 0x51]);
        assert_eq!(&packet[0x26..0x28], &[0x6a, 0x00]);
        assert_eq!(&packet[0x28..0x2a], &[0x02, 0x01]);
        assert_eq!(&packet[0x2a..0x30], &header.mac);
        assert_eq!(&packet[0x30..0x34], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&packet[0x34..0x36], &[0x35, 0xc3]);
        assert_eq!(&packet[0x36..0x38], &[0x00, 0x00]);
        assert_eq!(&packet[0x38..], &[0xee; 16]);

        let mut zeroed = packet.clone();
        zeroed[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].fill(0);
        let expected = checksum16(&zeroed, PACKET_CHECKSUM_SEED);
        assert_eq!(read_u16(&packet, CHECKSUM_OFFSET), expected);
    }

    #[test]
    fn test_parse_announcement_fixture() {
        let data = hexdec(ANNOUNCEMENT);
        let announcement = Announcement::parse(&data).unwrap();
        assert_eq!(announcement.device_type, 0x51e3);
        assert_eq!(announcement.mac, [0x14, 0x8e, 0x86, 0x42, 0xf7, 0xc8]);
    }

    #[test]
    fn test_parse_announcement_too_short() {
        let data = hexdec(ANNOUNCEMENT);
        let err = Announcement::parse(&data[..0x3f]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut data = hexdec(ANNOUNCEMENT);
        data[0] = 0x00;
        assert!(matches!(Announcement::parse(&data), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_parse_reply_fixture() {
        let data = hexdec(AUTH_REPLY);
        let reply = ReplyPacket::parse(&data).unwrap();
        assert_eq!(reply.error_code, 0);
        assert_eq!(reply.device_type, 0x272a);
        assert_eq!(reply.command, 0x03e9);
        assert_eq!(reply.counter, 1);
        assert_eq!(reply.mac, [0x14, 0x8e, 0x86, 0x42, 0xf7, 0xc8]);
        assert_eq!(reply.device_id, 0);
        assert_eq!(reply.ciphertext.len(), 32);
        assert_eq!(reply.payload_checksum, 0xc57c);
    }

    #[test]
    fn test_parse_reply_truncated() {
        let data = hexdec(AUTH_REPLY);
        assert!(matches!(
            ReplyPacket::parse(&data[..PAYLOAD_OFFSET - 1]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_layout_selects_field_map() {
        let data = hexdec(ANNOUNCEMENT);

        match ResponseLayout::Announcement.decode(&data).unwrap() {
            InboundPacket::Announcement(a) => assert_eq!(a.device_type, 0x51e3),
            other => panic!("unexpected packet: {:?}", other),
        }

        // The same bytes read through the reply map land on different fields.
        match ResponseLayout::Reply.decode(&data).unwrap() {
            InboundPacket::Reply(r) => assert_eq!(r.device_type, 0x0000),
            other => panic!("unexpected packet: {:?}", other),
        }
    }
}

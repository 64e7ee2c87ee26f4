use std::net::SocketAddrV4;

use chrono::{DateTime, Datelike, Local, Offset, TimeZone, Timelike};

use super::HELLO_COMMAND;
use crate::codec::{self, CHECKSUM_OFFSET, MAGIC};

/// Discovery broadcast carrying the local clock and the address devices
/// should answer to.
///
/// The packet is sent in clear and is always 48 bytes long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    timezone: i32,
    year: i16,
    second: u8,
    minute: u8,
    hour: u8,
    weekday: u8,
    day: u8,
    month: u8,
    local: SocketAddrV4,
}

impl Hello {
    /// Builds a Hello stamped with the current local time.
    pub fn new(local: SocketAddrV4) -> Self {
        Self::at(&Local::now(), local)
    }

    /// Builds a Hello stamped with `now`.
    ///
    /// The timezone is sent as whole hours east of UTC.
    pub fn at<Tz: TimeZone>(now: &DateTime<Tz>, local: SocketAddrV4) -> Self {
        Self {
            timezone: now.offset().fix().local_minus_utc() / 3600,
            year: now.year() as i16,
            second: now.second() as u8,
            minute: now.minute() as u8,
            hour: now.hour() as u8,
            weekday: now.weekday().num_days_from_sunday() as u8,
            day: now.day() as u8,
            month: now.month() as u8,
            local,
        }
    }

    /// Address advertised to devices.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }

    /// Encodes the broadcast datagram.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(48);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&self.timezone.to_le_bytes());
        buf.extend_from_slice(&self.year.to_le_bytes());
        buf.extend_from_slice(&[
            self.second,
            self.minute,
            self.hour,
            self.weekday,
            self.day,
            self.month,
        ]);
        codec::pad(&mut buf, 0, 4);
        buf.extend_from_slice(&u32::from(*self.local.ip()).to_le_bytes());
        buf.extend_from_slice(&self.local.port().to_le_bytes());
        codec::pad(&mut buf, 0, 2);
        debug_assert_eq!(buf.len(), CHECKSUM_OFFSET);
        codec::pad(&mut buf, 0, 2);
        codec::pad(&mut buf, 0, 4);
        buf.extend_from_slice(&HELLO_COMMAND.to_le_bytes());
        codec::pad(&mut buf, 0, 4);
        codec::pad_to_multiple(&mut buf, 16);

        codec::seal(&mut buf);
        buf
    }
}

use std::net::Ipv4Addr;
use std::time::Duration;

use broadlink_core::PowerState;
use clap::{Args, Parser, Subcommand};

pub fn parse_duration(arg: &str) -> Result<Duration, std::num::ParseIntError> {
    let seconds = arg.parse()?;
    Ok(Duration::from_secs(seconds))
}

/// Parses `148e8642f7c8` or `14:8e:86:42:f7:c8`.
pub fn parse_mac(arg: &str) -> Result<[u8; 6], String> {
    let digits: String = arg.chars().filter(|c| *c != ':' && *c != '-').collect();
    if digits.len() != 12 {
        return Err(format!("expected 12 hex digits, got {:?}", arg));
    }

    let mut mac = [0u8; 6];
    for (i, byte) in mac.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
            .map_err(|e| format!("invalid MAC {:?}: {}", arg, e))?;
    }
    Ok(mac)
}

/// Broadlink/BG smart plug client
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Discovery timeout in seconds
    #[arg(
        long,
        global = true,
        value_parser = parse_duration,
        default_value = "3",
        env = "BROADLINK_DISCOVERY_TIMEOUT"
    )]
    pub timeout: Duration,

    /// Local IPv4 address to broadcast from.
    /// Detected from the default route if not set.
    #[arg(long, global = true, env = "BROADLINK_LOCAL_ADDR")]
    pub local_addr: Option<Ipv4Addr>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Discover plugs on the local network
    Discover,

    /// Print the power state of every discovered plug
    State {
        /// Only talk to the plug with this MAC
        #[arg(long, value_parser = parse_mac, env = "BROADLINK_MAC")]
        mac: Option<[u8; 6]>,
    },

    /// Change the power state of discovered plugs
    Set {
        /// Only talk to the plug with this MAC
        #[arg(long, value_parser = parse_mac, env = "BROADLINK_MAC")]
        mac: Option<[u8; 6]>,

        #[command(flatten)]
        update: StateArgs,
    },

    /// Cycle both outlets of every discovered plug, one second apart
    Demo {
        /// Only talk to the plug with this MAC
        #[arg(long, value_parser = parse_mac, env = "BROADLINK_MAC")]
        mac: Option<[u8; 6]>,
    },

    /// Show version information for CLI and core library
    Version,
}

/// Fields of a state update. Unset fields are left unchanged on the plug.
#[derive(Args, Debug, Default)]
pub struct StateArgs {
    /// Both outlets (0 = off, 1 = on)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub pwr: Option<u8>,

    /// Outlet 1 (0 = off, 1 = on)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub pwr1: Option<u8>,

    /// Outlet 2 (0 = off, 1 = on)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub pwr2: Option<u8>,

    /// Maximum on-time of both outlets
    #[arg(long)]
    pub maxworktime: Option<u32>,

    /// Maximum on-time of outlet 1
    #[arg(long)]
    pub maxworktime1: Option<u32>,

    /// Maximum on-time of outlet 2
    #[arg(long)]
    pub maxworktime2: Option<u32>,

    /// Indicator brightness
    #[arg(long)]
    pub idcbrightness: Option<u32>,
}

impl StateArgs {
    pub fn to_power_state(&self) -> PowerState {
        PowerState {
            pwr: self.pwr,
            pwr1: self.pwr1,
            pwr2: self.pwr2,
            maxworktime: self.maxworktime,
            maxworktime1: self.maxworktime1,
            maxworktime2: self.maxworktime2,
            idcbrightness: self.idcbrightness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mac() {
        let expected = [0x14, 0x8e, 0x86, 0x42, 0xf7, 0xc8];
        assert_eq!(parse_mac("148e8642f7c8").unwrap(), expected);
        assert_eq!(parse_mac("14:8E:86:42:F7:C8").unwrap(), expected);
        assert!(parse_mac("148e8642f7").is_err());
        assert!(parse_mac("zz8e8642f7c8").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
        assert!(parse_duration("1.5").is_err());
    }

    #[test]
    fn test_set_builds_sparse_state() {
        let cli = Cli::try_parse_from(["broadlink", "set", "--pwr1", "1", "--idcbrightness", "40"])
            .unwrap();
        match cli.command {
            Command::Set { mac, update } => {
                assert_eq!(mac, None);
                assert_eq!(
                    update.to_power_state(),
                    PowerState::pwr1_on().with_idcbrightness(40)
                );
            }
            _ => panic!("expected set"),
        }
    }

    #[test]
    fn test_set_rejects_out_of_range_switch() {
        assert!(Cli::try_parse_from(["broadlink", "set", "--pwr2", "2"]).is_err());
    }

    #[test]
    fn test_global_options() {
        let cli = Cli::try_parse_from([
            "broadlink",
            "state",
            "--mac",
            "148e8642f7c8",
            "--timeout",
            "5",
            "--local-addr",
            "192.168.10.2",
        ])
        .unwrap();
        assert_eq!(cli.timeout, Duration::from_secs(5));
        assert_eq!(cli.local_addr, Some(Ipv4Addr::new(192, 168, 10, 2)));
        assert!(matches!(cli.command, Command::State { mac: Some(_) }));
    }
}

//! Core library for Broadlink/BG Electrical smart plugs.
//!
//! This crate speaks the local UDP protocol used by BG dual-outlet plugs:
//! broadcast discovery, key negotiation, and reading or writing the power
//! state of each outlet.
//!
//! # Overview
//!
//! Every request is a fixed 56-byte header followed by an AES-128-CBC
//! encrypted payload. A fresh plug only knows a bootstrap key; the Auth
//! exchange hands out a per-device key and numeric id that every later
//! request must use. Power state travels as a small JSON document inside the
//! Command payload.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use broadlink_core::{PowerState, discover};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut devices = discover(Duration::from_secs(3)).await?;
//!
//!     while let Some(mut device) = devices.recv().await {
//!         device.authenticate().await?;
//!         let state = device.set_state(PowerState::all_on()).await?;
//!         println!("{}: {}", device.identity(), state);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Protocol Details
//!
//! 1. Discovery broadcasts a cleartext Hello to port 80 and collects one
//!    announcement per plug
//! 2. Auth is encrypted with the bootstrap key and returns the device key
//! 3. Command requests (read or write) are encrypted with the device key
//! 4. Each request is sent up to five times, one second apart, with the
//!    same counter. Replies carrying another counter are discarded

use std::time::Duration;

pub mod codec;
pub mod crypto;
pub mod device;
pub mod discovery;
pub mod error;
pub mod message;
pub mod state;
pub mod transport;

pub use device::{Device, DeviceIdentity, SessionConfig};
pub use discovery::{Discovery, DiscoveryConfig, DiscoveryStream, discover, local_ipv4};
pub use error::{Error, Result};
pub use state::PowerState;

/// The version of the broadlink-core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Port plugs listen on for discovery and commands.
pub const DISCOVERY_PORT: u16 = 80;

/// How long each request attempt waits for a reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Sends of one request before it fails with a timeout.
pub const MAX_ATTEMPTS: u32 = 5;

/// Default discovery window.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Delay between Hello broadcasts.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(1);

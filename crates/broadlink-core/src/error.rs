//! Error types for broadlink-core.
//!
//! Every fallible operation in the crate returns [`Error`]. The variants follow
//! the failure classes of the protocol: local preconditions, transport
//! failures, timeouts, malformed or rejected replies, and an unusable local
//! network environment.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for broadlink-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The session is not in a state that allows the operation
    /// (command before authentication, or authenticating twice).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Socket creation, write, or a non-timeout read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply arrived in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Malformed, truncated, or otherwise undecodable reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The device answered with a non-zero error code.
    #[error("device returned error code {code:#06x}")]
    DeviceError {
        /// Raw error code from the reply header.
        code: u16,
    },

    /// No usable local network address for discovery.
    #[error("environment error: {0}")]
    Environment(String),
}

impl Error {
    /// Returns `true` for errors produced by an expired receive deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Returns `true` if the send/retry loop may re-send after this error.
    ///
    /// Only timeouts are retried. Transport and decode failures end the call.
    pub fn is_retryable(&self) -> bool {
        self.is_timeout()
    }

    /// Returns `true` for errors caused by the content of a reply.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::DeviceError { .. })
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout(err.to_string()),
            _ => Error::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(format!("invalid state payload: {}", err))
    }
}

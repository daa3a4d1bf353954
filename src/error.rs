//! Error types for the modem daemon.
//!
//! Transport failures (serial I/O) and liveness failures (PPP stall) are
//! fatal — they propagate out of the engine thread and terminate the
//! process. Protocol anomalies and transient modem errors are logged and
//! handled locally; they never reach this type.

use std::fmt;
use std::io;

/// A fatal condition that ends the daemon's run.
#[derive(Debug)]
pub enum ModemError {
    /// The serial device could not be opened, read, or written.
    Io(io::Error),
    /// The modem never produced a usable prompt during boot-wait, or some
    /// other protocol-level condition the engine cannot recover from.
    Protocol(String),
    /// A liveness deadline was exceeded (PPP stall, boot-wait timeout).
    Timeout(String),
    /// A subprocess or filesystem interaction with an external collaborator
    /// (supervisor invocation, auth/chat file write) failed.
    Transport(String),
}

impl fmt::Display for ModemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "serial I/O error: {e}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for ModemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ModemError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<nix::Error> for ModemError {
    fn from(e: nix::Error) -> Self {
        Self::Io(io::Error::from(e))
    }
}

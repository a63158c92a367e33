//! ---
//! msp_section: "03-transport"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Duplex byte-stream transports for MSP links."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
//! Byte-stream plumbing between the protocol engine and a flight controller.
//!
//! The engine never sees a socket or a serial port directly. It gets a
//! [`TransportReader`] that yields raw chunks and a cloneable
//! [`TransportWriter`] that emits whole frames atomically.
#![warn(missing_docs)]

pub mod endpoint;
pub mod stream;

use std::time::Duration;

pub use endpoint::{Endpoint, DEFAULT_BAUD_RATE};
pub use stream::{connect, split, ReadOutcome, TransportReader, TransportWriter};

/// Shared result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors surfaced by transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the stream.
    #[error("transport closed by peer")]
    Closed,
    /// Underlying I/O failure.
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Connecting did not finish in time.
    #[error("connecting to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Endpoint being opened.
        endpoint: String,
        /// Configured limit.
        timeout: Duration,
    },
    /// Endpoint string could not be parsed.
    #[error("invalid endpoint `{0}`")]
    InvalidEndpoint(String),
    /// Serial port could not be opened.
    #[error("serial port {path}: {reason}")]
    Serial {
        /// Device path.
        path: String,
        /// Driver message.
        reason: String,
    },
}

impl TransportError {
    /// Whether the error means the link is gone for good.
    pub fn is_closed(&self) -> bool {
        match self {
            TransportError::Closed => true,
            TransportError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::WriteZero
            ),
            _ => false,
        }
    }
}

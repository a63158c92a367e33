//! ---
//! msp_section: "04-engine"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Unified error type for engine operations."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::time::Duration;

use msp_schema::SchemaError;
use msp_transport::TransportError;
use msp_wire::{CommandCode, EncodeError};

/// Errors returned by [`Engine`](crate::Engine) operations.
#[derive(Debug, thiserror::Error)]
pub enum MspError {
    /// The command could not be framed.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// Unknown command, unknown field or out-of-range value.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// No reply arrived before the deadline.
    #[error("no reply to command {code} within {timeout:?}")]
    RequestTimeout {
        /// Command that timed out.
        code: CommandCode,
        /// Timeout the caller asked for.
        timeout: Duration,
    },
    /// A request for the same code is already awaiting its reply.
    #[error("a request for command {code} is already pending")]
    AlreadyPending {
        /// Contended command.
        code: CommandCode,
    },
    /// The flight controller answered with an error-direction frame.
    #[error("command {code} rejected by the flight controller")]
    Rejected {
        /// Rejected command.
        code: CommandCode,
    },
    /// The link is gone or the engine was closed.
    #[error("transport closed")]
    TransportClosed,
    /// Non-fatal transport failure.
    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for MspError {
    fn from(err: TransportError) -> Self {
        if err.is_closed() {
            MspError::TransportClosed
        } else {
            MspError::Transport(err)
        }
    }
}

/// Shared result alias for engine operations.
pub type Result<T> = std::result::Result<T, MspError>;

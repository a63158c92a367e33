//! ---
//! msp_section: "04-engine"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Protocol engine tying codec, registry and transport together."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
//! Protocol engine for MSP flight-controller links.
//!
//! ```text
//! caller ──request──▶ Correlator ──▶ encode ──▶ TransportWriter ──▶ link
//!                        ▲                                            │
//!                        └── resolve ◀── Registry ◀── FrameDecoder ◀──┘
//!                                          │          (reader task)
//!                                          ▼
//!                                      StateStore
//! ```
#![warn(missing_docs)]

pub mod correlator;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod reader;
pub mod store;

pub use correlator::{Correlator, PendingRequest, Reply, SlotState};
pub use engine::{frame_version, Engine};
pub use error::{MspError, Result};
pub use metrics::{EngineMetricsExporter, EngineMetricsSnapshot};
pub use reader::EngineEvent;
pub use store::StateStore;

pub use msp_common::{EngineConfig, PendingPolicy, ProtocolPreference};
pub use msp_schema::{codes, FieldValues, Record, Registry};
pub use msp_wire::{CommandCode, Frame};

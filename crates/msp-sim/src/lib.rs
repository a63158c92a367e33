//! ---
//! msp_section: "05-simulation"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Simulated flight controller module exports."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
//! A flight controller stand-in speaking MSP, for tests and bench work
//! without hardware, plus the GPS sample builder used to feed
//! `MSP2_SENSOR_GPS` injections.

pub mod fc;
pub mod gps;
pub mod server;

pub use fc::{FcStats, SimulatedFc};
pub use gps::{degrees_to_e7, GpsSample};
pub use server::{serve_stream, serve_tcp, spawn_duplex};

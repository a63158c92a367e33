//! ---
//! msp_section: "00-common"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Shared configuration and logging primitives."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
//! Shared primitives for the MSP workspace: configuration loading and
//! tracing initialisation used by the engine, the simulator and `mspctl`.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, ConnectionConfig, EngineConfig, LoadedAppConfig, LoggingConfig, PendingPolicy,
    ProtocolPreference, RegistryConfig, SimulatorConfig,
};
pub use logging::{init_tracing, LogFormat};

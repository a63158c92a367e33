//! ---
//! msp_section: "00-common"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Shared configuration and logging primitives."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use msp_schema::{CommandDef, Registry};
use msp_transport::Endpoint;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_endpoint() -> Endpoint {
    Endpoint::tcp("127.0.0.1:54320")
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_request_timeout() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_payload_len() -> usize {
    4096
}

fn default_event_capacity() -> usize {
    256
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_file_logging() -> bool {
    true
}

fn default_simulator_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 54320))
}

/// Primary configuration object for MSP tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "MSP_CONFIG";

    /// Load configuration from disk, respecting the `MSP_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        let loaded = Self::load_or_default(candidates)?;
        match loaded.source {
            Some(_) => Ok(loaded.config),
            None => Err(anyhow!(
                "no configuration files found. inspected: {}",
                candidates
                    .iter()
                    .map(|p| p.as_ref().display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }

    /// Load the first existing candidate, or fall back to defaults when none
    /// exists. A file that exists but fails to parse is still an error.
    pub fn load_or_default<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no configuration file found, using defaults");
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in commands plus any `[[registry.commands]]` entries.
    pub fn build_registry(&self) -> Result<Registry> {
        let mut builder = Registry::builder().with_builtin();
        for def in &self.registry.commands {
            builder = builder
                .define(def.clone())
                .with_context(|| format!("invalid registry command `{}`", def.name))?;
        }
        builder.build().context("registry definitions conflict")
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        self.engine.validate()?;
        self.build_registry()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: Endpoint,
    #[serde(default = "default_connect_timeout", rename = "connect_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            bail!("connection.connect_timeout_ms must be positive");
        }
        Ok(())
    }
}

/// What `request` does when a request for the same code is already in flight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PendingPolicy {
    /// Fail immediately with `AlreadyPending`.
    #[default]
    FailFast,
    /// Wait for the slot, bounded by the request deadline.
    Queue,
}

/// Frame layout used for outgoing commands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolPreference {
    /// V1 whenever the code and payload fit, V2 otherwise.
    #[default]
    Auto,
    /// V1, tunnelling V2 codes through V1 frames.
    V1,
    /// V2 for everything.
    V2,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_request_timeout", rename = "request_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default)]
    pub pending_policy: PendingPolicy,
    #[serde(default)]
    pub protocol: ProtocolPreference,
    /// Largest V2 payload the decoder accepts before declaring a framing error.
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// How long the reader waits for bytes before re-checking for shutdown.
    #[serde(default = "default_read_timeout", rename = "read_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub read_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            pending_policy: PendingPolicy::default(),
            protocol: ProtocolPreference::default(),
            max_payload_len: default_max_payload_len(),
            event_capacity: default_event_capacity(),
            read_timeout: default_read_timeout(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("engine.request_timeout_ms must be positive");
        }
        if self.read_timeout.is_zero() {
            bail!("engine.read_timeout_ms must be positive");
        }
        if self.max_payload_len == 0 || self.max_payload_len > u16::MAX as usize {
            bail!(
                "engine.max_payload_len must be within 1..={}, got {}",
                u16::MAX,
                self.max_payload_len
            );
        }
        if self.event_capacity == 0 {
            bail!("engine.event_capacity must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_file_logging")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file: default_file_logging(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub commands: Vec<CommandDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_simulator_listen")]
    pub listen: SocketAddr,
    /// Canned replies keyed by command name, as raw field values.
    #[serde(default)]
    pub replies: IndexMap<String, IndexMap<String, i64>>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            listen: default_simulator_listen(),
            replies: IndexMap::new(),
        }
    }
}

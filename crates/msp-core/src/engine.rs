//! ---
//! msp_section: "04-engine"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Caller-facing engine handle and lifecycle."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use msp_common::{EngineConfig, ProtocolPreference};
use msp_schema::{FieldValues, Record, Registry};
use msp_transport::{Endpoint, TransportReader, TransportWriter};
use msp_wire::{
    encode, CommandCode, Direction, Frame, FrameDecoder, ProtocolVersion, V1_MAX_PAYLOAD_LEN,
};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::correlator::{Correlator, Reply, SlotState};
use crate::error::{MspError, Result};
use crate::metrics::{Counters, EngineMetricsExporter, EngineMetricsSnapshot};
use crate::reader::{EngineEvent, ReaderTask, Shared};

/// Cloneable handle to a running protocol engine.
///
/// One background task reads and decodes the link; any number of callers
/// may issue requests concurrently through clones of the handle.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    shared: Arc<Shared>,
    writer: TransportWriter,
    config: EngineConfig,
    shutdown: watch::Sender<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("link", &self.inner.writer.label())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Engine {
    /// Start an engine over an already split link. Must be called from
    /// within a tokio runtime.
    pub fn open(
        reader: TransportReader,
        writer: TransportWriter,
        registry: Arc<Registry>,
        config: EngineConfig,
    ) -> Self {
        Self::open_with_exporter(reader, writer, registry, config, None)
    }

    /// Like [`open`](Self::open), also feeding a prometheus exporter.
    pub fn open_with_exporter(
        reader: TransportReader,
        writer: TransportWriter,
        registry: Arc<Registry>,
        config: EngineConfig,
        exporter: Option<EngineMetricsExporter>,
    ) -> Self {
        let shared = Arc::new(Shared::new(
            registry,
            Correlator::new(config.pending_policy),
            Counters::with_exporter(exporter),
            config.event_capacity.max(1),
        ));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = ReaderTask {
            transport: reader,
            decoder: FrameDecoder::with_max_payload_len(config.max_payload_len),
            shared: Arc::clone(&shared),
            shutdown: shutdown_rx,
            read_timeout: config.read_timeout,
        };
        info!(
            link = %writer.label(),
            policy = ?config.pending_policy,
            protocol = ?config.protocol,
            "engine opened"
        );
        let handle = tokio::spawn(task.run());
        Self {
            inner: Arc::new(Inner {
                shared,
                writer,
                config,
                shutdown,
                reader: Mutex::new(Some(handle)),
            }),
        }
    }

    /// Connect to `endpoint` and start an engine on it.
    pub async fn connect(
        endpoint: &Endpoint,
        connect_timeout: Duration,
        registry: Arc<Registry>,
        config: EngineConfig,
    ) -> Result<Self> {
        let (reader, writer) = msp_transport::connect(endpoint, connect_timeout).await?;
        Ok(Self::open(reader, writer, registry, config))
    }

    /// Request a named command with field values and wait for its decoded reply.
    pub async fn request_by_name(
        &self,
        name: &str,
        fields: &FieldValues,
        timeout: Duration,
    ) -> Result<Record> {
        let (code, payload) = self.inner.shared.registry.encode(name, fields)?;
        self.request(code, &payload, timeout).await
    }

    /// Request a registered code with a raw payload and wait for its decoded reply.
    pub async fn request(
        &self,
        code: CommandCode,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Record> {
        let registry = &self.inner.shared.registry;
        registry.lookup_by_code(code)?;
        let reply = self.exchange(code, payload, timeout).await?;
        match reply.record {
            Some(record) => Ok(record),
            None => Ok(registry.decode(code, reply.frame.payload)?),
        }
    }

    /// Request any code and return the reply frame undecoded.
    pub async fn request_raw(
        &self,
        code: CommandCode,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Frame> {
        Ok(self.exchange(code, payload, timeout).await?.frame)
    }

    /// Send a named command without waiting for a reply.
    pub async fn send_telemetry(&self, name: &str, fields: &FieldValues) -> Result<()> {
        let (code, payload) = self.inner.shared.registry.encode(name, fields)?;
        self.send(code, &payload).await
    }

    /// Send a raw frame without waiting for a reply.
    pub async fn send(&self, code: CommandCode, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let bytes = self.encode_request(code, payload)?;
        self.write(&bytes).await?;
        self.inner.shared.counters.telemetry_sent();
        debug!(code = code.get(), len = payload.len(), "telemetry sent");
        Ok(())
    }

    /// Latest decoded record for a command name.
    pub fn latest(&self, name: &str) -> Option<Record> {
        let code = self.inner.shared.registry.lookup_by_name(name).ok()?;
        self.latest_by_code(code)
    }

    /// Latest decoded record for a code.
    pub fn latest_by_code(&self, code: CommandCode) -> Option<Record> {
        self.inner.shared.store.get(code)
    }

    /// Subscribe to decode and link events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.shared.events.subscribe()
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> EngineMetricsSnapshot {
        self.inner.shared.counters.snapshot()
    }

    /// Correlator state for `code`.
    pub fn pending_state(&self, code: CommandCode) -> SlotState {
        self.inner.shared.correlator.state(code)
    }

    /// Registry the engine decodes with.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.shared.registry
    }

    /// Configuration the engine was opened with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Whether the link is gone or [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.shared.is_closed()
    }

    /// Forget every cached record.
    pub fn reset(&self) {
        self.inner.shared.store.clear();
        debug!("state store cleared");
    }

    /// Stop the reader, fail pending requests and clear cached state.
    /// Safe to call more than once and from several clones.
    pub async fn close(&self) {
        let _ = self.inner.shutdown.send(true);
        if let Some(handle) = self.inner.reader.lock().await.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "reader task ended abnormally");
            }
        }
        self.inner.shared.shut_down();
        let _ = self.inner.writer.shutdown().await;
        info!(link = %self.inner.writer.label(), "engine closed");
    }

    async fn exchange(&self, code: CommandCode, payload: &[u8], timeout: Duration) -> Result<Reply> {
        self.ensure_open()?;
        let bytes = self.encode_request(code, payload)?;
        let deadline = Instant::now() + timeout;
        let counters = &self.inner.shared.counters;

        let pending = match timeout_at(deadline, self.inner.shared.correlator.begin(code)).await {
            Ok(pending) => pending?,
            Err(_) => {
                counters.request_timed_out();
                return Err(MspError::RequestTimeout { code, timeout });
            }
        };
        self.write(&bytes).await?;
        counters.request_sent();
        let sent_at = pending.submitted_at();

        let reply = match timeout_at(deadline, pending.wait()).await {
            Ok(reply) => reply?,
            Err(_) => {
                counters.request_timed_out();
                warn!(code = code.get(), ?timeout, "request timed out");
                return Err(MspError::RequestTimeout { code, timeout });
            }
        };
        counters.request_resolved(sent_at.elapsed());
        if reply.frame.direction == Direction::Error {
            return Err(MspError::Rejected { code });
        }
        Ok(reply)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(MspError::TransportClosed)
        } else {
            Ok(())
        }
    }

    fn encode_request(&self, code: CommandCode, payload: &[u8]) -> Result<Bytes> {
        let version = frame_version(self.inner.config.protocol, code, payload.len());
        Ok(encode(version, Direction::Request, code, payload)?)
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        self.inner.writer.write_frame(bytes).await.map_err(MspError::from)
    }
}

/// Pick the outgoing layout for a command.
pub fn frame_version(preference: ProtocolPreference, code: CommandCode, len: usize) -> ProtocolVersion {
    let fits_v1 = code.fits_v1() && len <= V1_MAX_PAYLOAD_LEN;
    match preference {
        ProtocolPreference::Auto if fits_v1 => ProtocolVersion::V1,
        ProtocolPreference::Auto => ProtocolVersion::V2,
        ProtocolPreference::V1 if fits_v1 => ProtocolVersion::V1,
        ProtocolPreference::V1 => ProtocolVersion::V2OverV1,
        ProtocolPreference::V2 => ProtocolVersion::V2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_preference() {
        let gps = CommandCode(0x1F03);
        let attitude = CommandCode(108);
        assert_eq!(frame_version(ProtocolPreference::Auto, attitude, 0), ProtocolVersion::V1);
        assert_eq!(frame_version(ProtocolPreference::Auto, gps, 52), ProtocolVersion::V2);
        assert_eq!(frame_version(ProtocolPreference::Auto, attitude, 300), ProtocolVersion::V2);
        assert_eq!(frame_version(ProtocolPreference::V1, gps, 52), ProtocolVersion::V2OverV1);
        assert_eq!(frame_version(ProtocolPreference::V2, attitude, 0), ProtocolVersion::V2);
    }
}

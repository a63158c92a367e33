//! ---
//! msp_section: "04-engine"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Background task turning received bytes into records."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use msp_schema::{Record, Registry};
use msp_transport::{ReadOutcome, TransportReader};
use msp_wire::{CommandCode, DecodeError, Direction, Frame, FrameDecoder};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::correlator::{Correlator, Reply};
use crate::metrics::Counters;
use crate::store::StateStore;

/// Notifications broadcast to [`Engine::subscribe`](crate::Engine::subscribe) receivers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A frame matched the registry and updated the store.
    Decoded(Record),
    /// A valid frame carried a code the registry does not know.
    Unrecognized {
        /// Frame code.
        code: CommandCode,
        /// Frame direction.
        direction: Direction,
        /// Payload length.
        len: usize,
    },
    /// The flight controller answered with an error-direction frame.
    Rejected {
        /// Rejected code.
        code: CommandCode,
    },
    /// A frame failed its checksum and was dropped.
    ChecksumError {
        /// Code read from the corrupted header.
        code: CommandCode,
    },
    /// A malformed header was skipped.
    FramingError {
        /// Decoder message.
        reason: String,
    },
    /// The link closed; no further events follow.
    Closed,
}

/// State shared by the reader task and every engine handle.
pub(crate) struct Shared {
    pub(crate) registry: Arc<Registry>,
    pub(crate) correlator: Arc<Correlator>,
    pub(crate) store: StateStore,
    pub(crate) counters: Counters,
    pub(crate) events: broadcast::Sender<EngineEvent>,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn new(
        registry: Arc<Registry>,
        correlator: Arc<Correlator>,
        counters: Counters,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            registry,
            correlator,
            store: StateStore::new(),
            counters,
            events,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fail pending requests, drop cached state and announce the close. Runs once.
    pub(crate) fn shut_down(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.correlator.close();
        self.store.clear();
        let _ = self.events.send(EngineEvent::Closed);
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn dispatch(&self, frame: Frame) {
        let code = frame.code;
        if frame.direction == Direction::Request {
            // Echoed or foreign request on a shared line; never a reply.
            self.counters.request_ignored();
            trace!(code = code.get(), "ignoring request-direction frame");
            return;
        }
        if frame.is_error() {
            warn!(code = code.get(), "flight controller rejected command");
            self.emit(EngineEvent::Rejected { code });
            self.correlator.resolve(code, Ok(Reply { frame, record: None }));
            return;
        }

        if !self.registry.contains(code) {
            self.counters.frame_unrecognized();
            debug!(
                code = code.get(),
                len = frame.payload.len(),
                "frame with unregistered code"
            );
            self.emit(EngineEvent::Unrecognized {
                code,
                direction: frame.direction,
                len: frame.payload.len(),
            });
            self.correlator.resolve(code, Ok(Reply { frame, record: None }));
            return;
        }

        let record = match self.registry.decode(code, frame.payload.clone()) {
            Ok(record) => record,
            Err(err) => {
                // Only reachable if the registry changed underneath us.
                warn!(code = code.get(), error = %err, "registered code failed to decode");
                return;
            }
        };
        self.counters.frame_decoded();
        if record.partial {
            self.counters.partial_payload();
        }
        debug!(
            command = %record.name,
            code = code.get(),
            version = ?frame.version,
            partial = record.partial,
            "frame decoded"
        );
        self.store.insert(record.clone());
        self.emit(EngineEvent::Decoded(record.clone()));
        self.correlator.resolve(
            code,
            Ok(Reply {
                frame,
                record: Some(record),
            }),
        );
    }

    fn decode_error(&self, err: DecodeError) {
        match err {
            DecodeError::Checksum {
                code,
                expected,
                actual,
            } => {
                self.counters.checksum_error();
                warn!(
                    code = code.get(),
                    expected = format_args!("{expected:#04x}"),
                    actual = format_args!("{actual:#04x}"),
                    "checksum mismatch, frame dropped"
                );
                self.emit(EngineEvent::ChecksumError { code });
            }
            DecodeError::Framing(err) => {
                self.counters.framing_error();
                warn!(error = %err, "framing error, resynchronising");
                self.emit(EngineEvent::FramingError {
                    reason: err.to_string(),
                });
            }
        }
    }
}

/// Owns the transport reader and the frame decoder.
pub(crate) struct ReaderTask {
    pub(crate) transport: TransportReader,
    pub(crate) decoder: FrameDecoder,
    pub(crate) shared: Arc<Shared>,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) read_timeout: Duration,
}

impl ReaderTask {
    pub(crate) async fn run(mut self) {
        info!(link = %self.transport.label(), "reader started");
        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        debug!("reader received shutdown");
                        break;
                    }
                }
                outcome = self.transport.read_chunk(self.read_timeout) => match outcome {
                    Ok(ReadOutcome::Data(bytes)) => {
                        self.decoder.extend(&bytes);
                        self.drain();
                    }
                    Ok(ReadOutcome::Idle) => {}
                    Err(err) => {
                        if err.is_closed() {
                            info!(link = %self.transport.label(), "link closed by peer");
                        } else {
                            warn!(link = %self.transport.label(), error = %err, "link failed");
                        }
                        break;
                    }
                },
            }
        }
        let stats = self.decoder.stats();
        info!(
            frames = stats.frames,
            garbage_bytes = stats.garbage_bytes,
            checksum_errors = stats.checksum_errors,
            framing_errors = stats.framing_errors,
            "reader stopped"
        );
        self.shared.shut_down();
    }

    fn drain(&mut self) {
        while let Some(result) = self.decoder.next_frame() {
            match result {
                Ok(frame) => self.shared.dispatch(frame),
                Err(err) => self.shared.decode_error(err),
            }
        }
    }
}

//! ---
//! msp_section: "04-engine"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Engine counters and the prometheus exporter."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};

/// Snapshot of engine counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineMetricsSnapshot {
    /// Frames that matched a registry entry.
    pub frames_decoded: u64,
    /// Valid frames with a code the registry does not know.
    pub frames_unrecognized: u64,
    /// Frames dropped for a checksum or CRC mismatch.
    pub checksum_errors: u64,
    /// Malformed headers.
    pub framing_errors: u64,
    /// Requests written to the link.
    pub requests_sent: u64,
    /// Requests that received a reply.
    pub requests_resolved: u64,
    /// Requests that hit their deadline.
    pub requests_timed_out: u64,
    /// Fire-and-forget frames written.
    pub telemetry_sent: u64,
    /// Records decoded from a short payload.
    pub partial_payloads: u64,
    /// Request-direction frames seen on the host side and dropped.
    pub requests_ignored: u64,
}

/// Prometheus metric handles mirroring [`EngineMetricsSnapshot`].
#[derive(Clone)]
pub struct EngineMetricsExporter {
    frames_decoded: IntCounter,
    frames_unrecognized: IntCounter,
    checksum_errors: IntCounter,
    framing_errors: IntCounter,
    requests_sent: IntCounter,
    requests_timed_out: IntCounter,
    telemetry_sent: IntCounter,
    partial_payloads: IntCounter,
    request_latency: Histogram,
}

impl EngineMetricsExporter {
    /// Register engine metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let counter = IntCounter::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };
        let frames_decoded = counter("msp_frames_decoded_total", "Frames decoded into records")?;
        let frames_unrecognized = counter(
            "msp_frames_unrecognized_total",
            "Valid frames carrying an unregistered command code",
        )?;
        let checksum_errors = counter("msp_checksum_errors_total", "Frames failing checksum")?;
        let framing_errors = counter("msp_framing_errors_total", "Malformed frame headers")?;
        let requests_sent = counter("msp_requests_sent_total", "Requests written to the link")?;
        let requests_timed_out =
            counter("msp_requests_timed_out_total", "Requests without a reply in time")?;
        let telemetry_sent = counter("msp_telemetry_sent_total", "Fire-and-forget frames written")?;
        let partial_payloads =
            counter("msp_partial_payloads_total", "Replies shorter than their schema")?;
        let request_latency = Histogram::with_opts(HistogramOpts::new(
            "msp_request_latency_seconds",
            "Time between writing a request and receiving its reply",
        ))?;
        registry.register(Box::new(request_latency.clone()))?;

        Ok(Self {
            frames_decoded,
            frames_unrecognized,
            checksum_errors,
            framing_errors,
            requests_sent,
            requests_timed_out,
            telemetry_sent,
            partial_payloads,
            request_latency,
        })
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    frames_decoded: AtomicU64,
    frames_unrecognized: AtomicU64,
    checksum_errors: AtomicU64,
    framing_errors: AtomicU64,
    requests_sent: AtomicU64,
    requests_resolved: AtomicU64,
    requests_timed_out: AtomicU64,
    telemetry_sent: AtomicU64,
    partial_payloads: AtomicU64,
    requests_ignored: AtomicU64,
    exporter: Option<EngineMetricsExporter>,
}

impl Counters {
    pub(crate) fn with_exporter(exporter: Option<EngineMetricsExporter>) -> Self {
        Self {
            exporter,
            ..Self::default()
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_decoded(&self) {
        Self::bump(&self.frames_decoded);
        if let Some(exporter) = &self.exporter {
            exporter.frames_decoded.inc();
        }
    }

    pub(crate) fn frame_unrecognized(&self) {
        Self::bump(&self.frames_unrecognized);
        if let Some(exporter) = &self.exporter {
            exporter.frames_unrecognized.inc();
        }
    }

    pub(crate) fn checksum_error(&self) {
        Self::bump(&self.checksum_errors);
        if let Some(exporter) = &self.exporter {
            exporter.checksum_errors.inc();
        }
    }

    pub(crate) fn framing_error(&self) {
        Self::bump(&self.framing_errors);
        if let Some(exporter) = &self.exporter {
            exporter.framing_errors.inc();
        }
    }

    pub(crate) fn request_sent(&self) {
        Self::bump(&self.requests_sent);
        if let Some(exporter) = &self.exporter {
            exporter.requests_sent.inc();
        }
    }

    pub(crate) fn request_resolved(&self, latency: Duration) {
        Self::bump(&self.requests_resolved);
        if let Some(exporter) = &self.exporter {
            exporter.request_latency.observe(latency.as_secs_f64());
        }
    }

    pub(crate) fn request_timed_out(&self) {
        Self::bump(&self.requests_timed_out);
        if let Some(exporter) = &self.exporter {
            exporter.requests_timed_out.inc();
        }
    }

    pub(crate) fn telemetry_sent(&self) {
        Self::bump(&self.telemetry_sent);
        if let Some(exporter) = &self.exporter {
            exporter.telemetry_sent.inc();
        }
    }

    pub(crate) fn partial_payload(&self) {
        Self::bump(&self.partial_payloads);
        if let Some(exporter) = &self.exporter {
            exporter.partial_payloads.inc();
        }
    }

    pub(crate) fn request_ignored(&self) {
        Self::bump(&self.requests_ignored);
    }

    pub(crate) fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_unrecognized: self.frames_unrecognized.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_resolved: self.requests_resolved.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            telemetry_sent: self.telemetry_sent.load(Ordering::Relaxed),
            partial_payloads: self.partial_payloads.load(Ordering::Relaxed),
            requests_ignored: self.requests_ignored.load(Ordering::Relaxed),
        }
    }
}

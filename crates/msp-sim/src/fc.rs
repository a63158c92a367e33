//! ---
//! msp_section: "05-simulation"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Request handling for the simulated flight controller."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use msp_schema::{codes, encode_payload, FieldValues, Registry, SchemaError};
use msp_wire::{CommandCode, Direction, Frame};
use parking_lot::Mutex;
use rand::prelude::*;
use tracing::{debug, trace};

/// Counters exposed for assertions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FcStats {
    /// Requests answered with a response frame.
    pub replies: u64,
    /// Requests answered with an error frame.
    pub rejections: u64,
    /// `MSP2_SENSOR_GPS` frames accepted.
    pub gps_injections: u64,
}

struct Noise {
    rng: StdRng,
    amplitude: i64,
}

#[derive(Default)]
struct FcState {
    replies: HashMap<CommandCode, Bytes>,
    silenced: HashSet<CommandCode>,
    rejected: HashSet<CommandCode>,
    truncated: HashMap<CommandCode, usize>,
    last_gps: Option<FieldValues>,
    noise: Option<Noise>,
    stats: FcStats,
}

/// Answers MSP requests from a table of canned replies.
///
/// * `MSP2_SENSOR_GPS` injections are mirrored into the `MSP_RAW_GPS` reply.
/// * `MSP_SET_RAW_RC` updates the `MSP_RC` reply.
/// * Unknown codes are answered with an error-direction frame.
pub struct SimulatedFc {
    registry: Arc<Registry>,
    state: Mutex<FcState>,
}

impl SimulatedFc {
    /// Flight controller with a Betaflight-like identity and level attitude.
    pub fn new(registry: Arc<Registry>) -> Self {
        let fc = Self {
            registry,
            state: Mutex::new(FcState::default()),
        };
        fc.load_defaults();
        fc
    }

    fn load_defaults(&self) {
        let text = [
            (codes::MSP_FC_VARIANT, "BTFL"),
            (codes::MSP_BOARD_INFO, "S405"),
            (codes::MSP_BUILD_INFO, "Jan 01 2026 00:00:00"),
            (codes::MSP_NAME, "SIMFC"),
            (codes::MSP_BOXNAMES, "ARM;ANGLE;HORIZON;BEEPER;GPS RESCUE;"),
        ];
        for (code, value) in text {
            self.set_raw_reply(code, Bytes::from_static(value.as_bytes()));
        }
        let fields: [(&str, &[(&str, i64)]); 9] = [
            (
                "MSP_API_VERSION",
                &[("protocol_version", 0), ("api_major", 1), ("api_minor", 46)],
            ),
            ("MSP_FC_VERSION", &[("major", 4), ("minor", 5), ("patch", 0)]),
            (
                "MSP_UID",
                &[("uid_0", 0x0033_0021), ("uid_1", 0x3233_5111), ("uid_2", 0x3734_3730)],
            ),
            (
                "MSP_STATUS",
                &[("cycle_time", 125), ("sensors", 0b10_0011), ("cpu_load", 12)],
            ),
            (
                "MSP_STATUS_EX",
                &[
                    ("cycle_time", 125),
                    ("sensors", 0b10_0011),
                    ("cpu_load", 12),
                    ("pid_profile_count", 3),
                    ("rate_profile", 0),
                ],
            ),
            (
                "MSP_BATTERY_CONFIG",
                &[
                    ("vbat_min_cell", 33),
                    ("vbat_max_cell", 43),
                    ("vbat_warning_cell", 35),
                    ("capacity", 1300),
                    ("vbat_min_cell_precise", 330),
                    ("vbat_max_cell_precise", 430),
                    ("vbat_warning_cell_precise", 350),
                ],
            ),
            (
                "MSP_BATTERY_STATE",
                &[
                    ("cell_count", 4),
                    ("capacity", 1300),
                    ("vbat", 164),
                    ("voltage", 1642),
                ],
            ),
            (
                "MSP_ANALOG",
                &[("vbat", 164), ("rssi", 1023), ("voltage", 1642)],
            ),
            ("MSP_ALTITUDE", &[("altitude", 0), ("vario", 0)]),
        ];
        for (name, values) in fields {
            let values: FieldValues = values.iter().map(|(k, v)| (k.to_string(), *v)).collect();
            if let Err(err) = self.set_reply(name, &values) {
                debug!(command = name, error = %err, "default reply skipped");
            }
        }
    }

    /// Registry used to encode replies and decode injections.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Replace the reply for a named command with encoded field values.
    pub fn set_reply(&self, name: &str, values: &FieldValues) -> Result<(), SchemaError> {
        let (code, payload) = self.registry.encode(name, values)?;
        self.set_raw_reply(code, payload);
        Ok(())
    }

    /// Replace the reply for a code with raw bytes.
    pub fn set_raw_reply(&self, code: CommandCode, payload: Bytes) {
        self.state.lock().replies.insert(code, payload);
    }

    /// Never answer `code`.
    pub fn silence(&self, code: CommandCode) {
        self.state.lock().silenced.insert(code);
    }

    /// Answer `code` with an error-direction frame.
    pub fn reject(&self, code: CommandCode) {
        self.state.lock().rejected.insert(code);
    }

    /// Cut replies to `code` down to `len` bytes.
    pub fn truncate(&self, code: CommandCode, len: usize) {
        self.state.lock().truncated.insert(code, len);
    }

    /// Perturb IMU and attitude replies by up to `amplitude` raw units.
    pub fn with_noise(self, seed: u64, amplitude: i64) -> Self {
        self.state.lock().noise = Some(Noise {
            rng: StdRng::seed_from_u64(seed),
            amplitude: amplitude.abs(),
        });
        self
    }

    /// Field values of the most recent GPS injection.
    pub fn last_gps(&self) -> Option<FieldValues> {
        self.state.lock().last_gps.clone()
    }

    /// Counters so far.
    pub fn stats(&self) -> FcStats {
        self.state.lock().stats
    }

    /// Produce the answer to one received frame, if any.
    pub fn handle(&self, frame: &Frame) -> Option<Frame> {
        if frame.direction != Direction::Request {
            trace!(code = frame.code.get(), "ignoring non-request frame");
            return None;
        }
        let code = frame.code;
        let mut state = self.state.lock();
        if state.silenced.contains(&code) {
            return None;
        }
        if state.rejected.contains(&code) {
            state.stats.rejections += 1;
            return Some(Frame::new(frame.version, Direction::Error, code, Bytes::new()));
        }

        if code == codes::MSP2_SENSOR_GPS {
            self.inject_gps(&mut state, &frame.payload);
            return None;
        }
        if code == codes::MSP_SET_RAW_RC {
            state.replies.insert(codes::MSP_RC, frame.payload.clone());
            state.stats.replies += 1;
            return Some(Frame::new(frame.version, Direction::Response, code, Bytes::new()));
        }

        let payload = match state.replies.get(&code) {
            Some(payload) => payload.clone(),
            None => match self.registry.get(code) {
                Some(spec) => encode_payload(&spec.schema, &FieldValues::new()).unwrap_or_default(),
                None => {
                    debug!(code = code.get(), "unknown command, rejecting");
                    state.stats.rejections += 1;
                    return Some(Frame::new(frame.version, Direction::Error, code, Bytes::new()));
                }
            },
        };
        let payload = self.perturb(&mut state, code, payload);
        let payload = match state.truncated.get(&code) {
            Some(&len) if len < payload.len() => payload.slice(..len),
            _ => payload,
        };
        state.stats.replies += 1;
        Some(Frame::new(frame.version, Direction::Response, code, payload))
    }

    fn inject_gps(&self, state: &mut FcState, payload: &[u8]) {
        let Ok(spec) = self.registry.lookup_by_code(codes::MSP2_SENSOR_GPS) else {
            return;
        };
        let values = msp_schema::decode_payload(&spec.schema, payload).values;
        let field = |name: &str| values.get(name).copied().unwrap_or(0);
        let north = field("ned_vel_north") as f64;
        let east = field("ned_vel_east") as f64;
        let raw_gps: FieldValues = [
            ("fix_type", field("fix_type")),
            ("num_sat", field("satellites_in_view")),
            ("latitude", field("latitude")),
            ("longitude", field("longitude")),
            // cm to m
            ("altitude", (field("msl_altitude") / 100).clamp(0, u16::MAX as i64)),
            ("speed", (north.hypot(east).round() as i64).clamp(0, u16::MAX as i64)),
            // centidegrees to decidegrees
            ("ground_course", field("ground_course") / 10),
            ("hdop", field("hdop")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        match self.registry.encode("MSP_RAW_GPS", &raw_gps) {
            Ok((code, bytes)) => {
                state.replies.insert(code, bytes);
            }
            Err(err) => debug!(error = %err, "gps injection not mirrored"),
        }
        state.stats.gps_injections += 1;
        state.last_gps = Some(values);
    }

    fn perturb(&self, state: &mut FcState, code: CommandCode, payload: Bytes) -> Bytes {
        let Some(noise) = state.noise.as_mut() else {
            return payload;
        };
        if code != codes::MSP_ATTITUDE && code != codes::MSP_RAW_IMU {
            return payload;
        }
        let Some(spec) = self.registry.get(code) else {
            return payload;
        };
        let mut values = msp_schema::decode_payload(&spec.schema, &payload).values;
        for value in values.values_mut() {
            let delta = noise.rng.gen_range(-noise.amplitude..=noise.amplitude);
            *value = (*value + delta).clamp(i16::MIN as i64, i16::MAX as i64);
        }
        encode_payload(&spec.schema, &values).unwrap_or(payload)
    }
}

#[cfg(test)]
mod tests {
    use msp_wire::ProtocolVersion;

    use super::*;
    use crate::gps::GpsSample;

    fn request(code: CommandCode, payload: impl Into<Bytes>) -> Frame {
        Frame::new(ProtocolVersion::V1, Direction::Request, code, payload)
    }

    #[test]
    fn answers_identity_queries() {
        let fc = SimulatedFc::new(Registry::builtin());
        let reply = fc.handle(&request(codes::MSP_FC_VARIANT, Bytes::new())).unwrap();
        assert_eq!(reply.direction, Direction::Response);
        assert_eq!(&reply.payload[..], b"BTFL");
        let reply = fc.handle(&request(codes::MSP_API_VERSION, Bytes::new())).unwrap();
        assert_eq!(&reply.payload[..], &[0, 1, 46]);
    }

    #[test]
    fn unknown_codes_are_rejected() {
        let fc = SimulatedFc::new(Registry::builtin());
        let reply = fc.handle(&request(CommandCode(77), Bytes::new())).unwrap();
        assert!(reply.is_error());
        assert_eq!(fc.stats().rejections, 1);
    }

    #[test]
    fn gps_injection_is_mirrored_into_raw_gps() {
        let registry = Registry::builtin();
        let fc = SimulatedFc::new(Arc::clone(&registry));
        let sample = GpsSample::at(45.50496682273918, -73.61319383049725)
            .with_altitude_cm(5000)
            .with_velocity_ned_cm_s(300, 400, 0)
            .with_ground_course_cdeg(9050);
        let (code, payload) = registry.encode("MSP2_SENSOR_GPS", &sample.to_fields()).unwrap();
        let gps = Frame::new(ProtocolVersion::V2, Direction::Request, code, payload);
        assert!(fc.handle(&gps).is_none());
        assert_eq!(fc.stats().gps_injections, 1);

        let reply = fc.handle(&request(codes::MSP_RAW_GPS, Bytes::new())).unwrap();
        let record = registry.decode(codes::MSP_RAW_GPS, reply.payload).unwrap();
        assert_eq!(record.get("latitude"), Some(455_049_668));
        assert_eq!(record.get("longitude"), Some(-736_131_938));
        assert_eq!(record.get("altitude"), Some(50));
        assert_eq!(record.get("speed"), Some(500));
        assert_eq!(record.get("ground_course"), Some(905));
        assert_eq!(record.get("num_sat"), Some(10));
    }

    #[test]
    fn set_raw_rc_feeds_rc_reply() {
        let registry = Registry::builtin();
        let fc = SimulatedFc::new(Arc::clone(&registry));
        let channels: FieldValues = (1..=8)
            .map(|i| (format!("channel_{i}"), 1000 + i * 100))
            .collect();
        let (code, payload) = registry.encode("MSP_SET_RAW_RC", &channels).unwrap();
        let ack = fc.handle(&request(code, payload)).unwrap();
        assert!(ack.payload.is_empty());
        let rc = fc.handle(&request(codes::MSP_RC, Bytes::new())).unwrap();
        let record = registry.decode(codes::MSP_RC, rc.payload).unwrap();
        assert_eq!(record.get("channel_8"), Some(1800));
    }

    #[test]
    fn truncation_silence_and_noise() {
        let fc = SimulatedFc::new(Registry::builtin()).with_noise(7, 3);
        fc.truncate(codes::MSP_ATTITUDE, 2);
        let reply = fc.handle(&request(codes::MSP_ATTITUDE, Bytes::new())).unwrap();
        assert_eq!(reply.payload.len(), 2);

        let imu = fc.handle(&request(codes::MSP_RAW_IMU, Bytes::new())).unwrap();
        assert_eq!(imu.payload.len(), 18);
        for pair in imu.payload.chunks(2) {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            assert!((-3..=3).contains(&value));
        }

        fc.silence(codes::MSP_STATUS);
        assert!(fc.handle(&request(codes::MSP_STATUS, Bytes::new())).is_none());
    }
}

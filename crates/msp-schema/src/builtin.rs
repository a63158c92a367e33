//! ---
//! msp_section: "02-message-registry"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Built-in MSP and MSP2 command table."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
//! Commands understood out of the box.
//!
//! Codes follow the Betaflight/INAV numbering. Commands with an empty field
//! list carry text or variable-length data and are read through
//! [`Record::text`](crate::Record::text) or the raw payload.
use std::sync::Arc;

use msp_wire::CommandCode;
use once_cell::sync::Lazy;

use crate::field::{FieldDef, FieldKind, Schema};
use crate::registry::{CommandSpec, Registry};

use FieldKind::{I16, I32, U16, U32, U8};

/// Well-known command codes.
pub mod codes {
    use msp_wire::CommandCode;

    #[allow(missing_docs)]
    pub const MSP_API_VERSION: CommandCode = CommandCode(1);
    #[allow(missing_docs)]
    pub const MSP_FC_VARIANT: CommandCode = CommandCode(2);
    #[allow(missing_docs)]
    pub const MSP_FC_VERSION: CommandCode = CommandCode(3);
    #[allow(missing_docs)]
    pub const MSP_BOARD_INFO: CommandCode = CommandCode(4);
    #[allow(missing_docs)]
    pub const MSP_BUILD_INFO: CommandCode = CommandCode(5);
    #[allow(missing_docs)]
    pub const MSP_NAME: CommandCode = CommandCode(10);
    #[allow(missing_docs)]
    pub const MSP_BATTERY_CONFIG: CommandCode = CommandCode(32);
    #[allow(missing_docs)]
    pub const MSP_STATUS: CommandCode = CommandCode(101);
    #[allow(missing_docs)]
    pub const MSP_RAW_IMU: CommandCode = CommandCode(102);
    #[allow(missing_docs)]
    pub const MSP_MOTOR: CommandCode = CommandCode(104);
    #[allow(missing_docs)]
    pub const MSP_RC: CommandCode = CommandCode(105);
    #[allow(missing_docs)]
    pub const MSP_RAW_GPS: CommandCode = CommandCode(106);
    #[allow(missing_docs)]
    pub const MSP_COMP_GPS: CommandCode = CommandCode(107);
    #[allow(missing_docs)]
    pub const MSP_ATTITUDE: CommandCode = CommandCode(108);
    #[allow(missing_docs)]
    pub const MSP_ALTITUDE: CommandCode = CommandCode(109);
    #[allow(missing_docs)]
    pub const MSP_ANALOG: CommandCode = CommandCode(110);
    #[allow(missing_docs)]
    pub const MSP_BOXNAMES: CommandCode = CommandCode(116);
    #[allow(missing_docs)]
    pub const MSP_BATTERY_STATE: CommandCode = CommandCode(130);
    #[allow(missing_docs)]
    pub const MSP_STATUS_EX: CommandCode = CommandCode(150);
    #[allow(missing_docs)]
    pub const MSP_UID: CommandCode = CommandCode(160);
    #[allow(missing_docs)]
    pub const MSP_SET_RAW_RC: CommandCode = CommandCode(200);
    #[allow(missing_docs)]
    pub const MSP_ACC_TRIM: CommandCode = CommandCode(240);
    #[allow(missing_docs)]
    pub const MSP2_SENSOR_GPS: CommandCode = CommandCode(0x1F03);
}

type Row = (CommandCode, &'static str, &'static [(&'static str, FieldKind, f64)]);

const STATUS_FIELDS: [(&str, FieldKind, f64); 6] = [
    ("cycle_time", U16, 1.0),
    ("i2c_errors", U16, 1.0),
    ("sensors", U16, 1.0),
    ("mode_flags", U32, 1.0),
    ("pid_profile", U8, 1.0),
    ("cpu_load", U16, 1.0),
];

const STATUS_EX_FIELDS: [(&str, FieldKind, f64); 8] = [
    STATUS_FIELDS[0],
    STATUS_FIELDS[1],
    STATUS_FIELDS[2],
    STATUS_FIELDS[3],
    STATUS_FIELDS[4],
    STATUS_FIELDS[5],
    ("pid_profile_count", U8, 1.0),
    ("rate_profile", U8, 1.0),
];

const CHANNELS: [(&str, FieldKind, f64); 8] = [
    ("channel_1", U16, 1.0),
    ("channel_2", U16, 1.0),
    ("channel_3", U16, 1.0),
    ("channel_4", U16, 1.0),
    ("channel_5", U16, 1.0),
    ("channel_6", U16, 1.0),
    ("channel_7", U16, 1.0),
    ("channel_8", U16, 1.0),
];

static TABLE: &[Row] = &[
    (
        codes::MSP_API_VERSION,
        "MSP_API_VERSION",
        &[("protocol_version", U8, 1.0), ("api_major", U8, 1.0), ("api_minor", U8, 1.0)],
    ),
    (codes::MSP_FC_VARIANT, "MSP_FC_VARIANT", &[]),
    (
        codes::MSP_FC_VERSION,
        "MSP_FC_VERSION",
        &[("major", U8, 1.0), ("minor", U8, 1.0), ("patch", U8, 1.0)],
    ),
    (codes::MSP_BOARD_INFO, "MSP_BOARD_INFO", &[]),
    (codes::MSP_BUILD_INFO, "MSP_BUILD_INFO", &[]),
    (codes::MSP_NAME, "MSP_NAME", &[]),
    (
        codes::MSP_BATTERY_CONFIG,
        "MSP_BATTERY_CONFIG",
        &[
            ("vbat_min_cell", U8, 0.1),
            ("vbat_max_cell", U8, 0.1),
            ("vbat_warning_cell", U8, 0.1),
            ("capacity", U16, 1.0),
            ("voltage_meter_source", U8, 1.0),
            ("current_meter_source", U8, 1.0),
            ("vbat_min_cell_precise", U16, 0.01),
            ("vbat_max_cell_precise", U16, 0.01),
            ("vbat_warning_cell_precise", U16, 0.01),
        ],
    ),
    (codes::MSP_STATUS, "MSP_STATUS", &STATUS_FIELDS),
    (
        codes::MSP_RAW_IMU,
        "MSP_RAW_IMU",
        &[
            ("acc_x", I16, 1.0),
            ("acc_y", I16, 1.0),
            ("acc_z", I16, 1.0),
            ("gyro_x", I16, 1.0),
            ("gyro_y", I16, 1.0),
            ("gyro_z", I16, 1.0),
            ("mag_x", I16, 1.0),
            ("mag_y", I16, 1.0),
            ("mag_z", I16, 1.0),
        ],
    ),
    (
        codes::MSP_MOTOR,
        "MSP_MOTOR",
        &[
            ("motor_1", U16, 1.0),
            ("motor_2", U16, 1.0),
            ("motor_3", U16, 1.0),
            ("motor_4", U16, 1.0),
            ("motor_5", U16, 1.0),
            ("motor_6", U16, 1.0),
            ("motor_7", U16, 1.0),
            ("motor_8", U16, 1.0),
        ],
    ),
    (codes::MSP_RC, "MSP_RC", &CHANNELS),
    (
        codes::MSP_RAW_GPS,
        "MSP_RAW_GPS",
        &[
            ("fix_type", U8, 1.0),
            ("num_sat", U8, 1.0),
            ("latitude", I32, 1e-7),
            ("longitude", I32, 1e-7),
            ("altitude", U16, 1.0),
            ("speed", U16, 1.0),
            ("ground_course", U16, 0.1),
            ("hdop", U16, 0.01),
        ],
    ),
    (
        codes::MSP_COMP_GPS,
        "MSP_COMP_GPS",
        &[
            ("distance_to_home", U16, 1.0),
            ("direction_to_home", U16, 1.0),
            ("update", U8, 1.0),
        ],
    ),
    (
        codes::MSP_ATTITUDE,
        "MSP_ATTITUDE",
        &[("roll", I16, 0.1), ("pitch", I16, 0.1), ("yaw", I16, 1.0)],
    ),
    (
        codes::MSP_ALTITUDE,
        "MSP_ALTITUDE",
        &[("altitude", I32, 0.01), ("vario", I16, 0.01)],
    ),
    (
        codes::MSP_ANALOG,
        "MSP_ANALOG",
        &[
            ("vbat", U8, 0.1),
            ("mah_drawn", U16, 1.0),
            ("rssi", U16, 1.0),
            ("amperage", I16, 0.01),
            ("voltage", U16, 0.01),
        ],
    ),
    (codes::MSP_BOXNAMES, "MSP_BOXNAMES", &[]),
    (
        codes::MSP_BATTERY_STATE,
        "MSP_BATTERY_STATE",
        &[
            ("cell_count", U8, 1.0),
            ("capacity", U16, 1.0),
            ("vbat", U8, 0.1),
            ("mah_drawn", U16, 1.0),
            ("amperage", U16, 0.01),
            ("battery_state", U8, 1.0),
            ("voltage", U16, 0.01),
        ],
    ),
    (codes::MSP_STATUS_EX, "MSP_STATUS_EX", &STATUS_EX_FIELDS),
    (
        codes::MSP_UID,
        "MSP_UID",
        &[("uid_0", U32, 1.0), ("uid_1", U32, 1.0), ("uid_2", U32, 1.0)],
    ),
    (codes::MSP_SET_RAW_RC, "MSP_SET_RAW_RC", &CHANNELS),
    (
        codes::MSP_ACC_TRIM,
        "MSP_ACC_TRIM",
        &[("pitch", I16, 1.0), ("roll", I16, 1.0)],
    ),
    // <BHIBBHHHHiiiiiiHHHBBBBB
    (
        codes::MSP2_SENSOR_GPS,
        "MSP2_SENSOR_GPS",
        &[
            ("instance", U8, 1.0),
            ("gps_week", U16, 1.0),
            ("ms_tow", U32, 1.0),
            ("fix_type", U8, 1.0),
            ("satellites_in_view", U8, 1.0),
            ("horizontal_pos_accuracy", U16, 1.0),
            ("vertical_pos_accuracy", U16, 1.0),
            ("horizontal_vel_accuracy", U16, 1.0),
            ("hdop", U16, 0.01),
            ("longitude", I32, 1e-7),
            ("latitude", I32, 1e-7),
            ("msl_altitude", I32, 0.01),
            ("ned_vel_north", I32, 1.0),
            ("ned_vel_east", I32, 1.0),
            ("ned_vel_down", I32, 1.0),
            ("ground_course", U16, 0.01),
            ("true_yaw", U16, 0.01),
            ("year", U16, 1.0),
            ("month", U8, 1.0),
            ("day", U8, 1.0),
            ("hour", U8, 1.0),
            ("min", U8, 1.0),
            ("sec", U8, 1.0),
        ],
    ),
];

static BUILTIN: Lazy<Arc<Registry>> = Lazy::new(|| {
    let registry = TABLE
        .iter()
        .fold(Registry::builder(), |builder, (code, name, fields)| {
            let schema = Schema::new(
                fields
                    .iter()
                    .map(|(field, kind, scale)| FieldDef::new(*field, *kind).scaled(*scale))
                    .collect(),
            );
            builder.command(CommandSpec::new(*code, *name, schema))
        })
        .build()
        .unwrap_or_else(|err| panic!("built-in command table is inconsistent: {err}"));
    Arc::new(registry)
});

pub(crate) fn shared() -> Arc<Registry> {
    Arc::clone(&BUILTIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{decode_payload, encode_payload, FieldValues};

    #[test]
    fn every_builtin_resolves_both_ways() {
        let registry = Registry::builtin();
        assert_eq!(registry.len(), TABLE.len());
        for spec in registry.iter() {
            assert_eq!(registry.lookup_by_name(&spec.name), Ok(spec.code));
            assert_eq!(registry.lookup_by_code(spec.code).unwrap().name, spec.name);
        }
    }

    #[test]
    fn sensor_gps_matches_packed_layout() {
        let registry = Registry::builtin();
        let spec = registry.spec_by_name("MSP2_SENSOR_GPS").unwrap();
        let names: Vec<&str> = spec.schema.fields().iter().map(|f| f.name.as_str()).collect();
        let reference = Schema::from_layout("<BHIBBHHHHiiiiiiHHHBBBBB", &names).unwrap();
        let kinds = |schema: &Schema| schema.fields().iter().map(|f| f.kind).collect::<Vec<_>>();
        assert_eq!(kinds(&spec.schema), kinds(&reference));
        assert_eq!(spec.schema.wire_len(), 52);
    }

    #[test]
    fn raw_gps_scales_coordinates() {
        let registry = Registry::builtin();
        let spec = registry.spec_by_name("msp_raw_gps").unwrap();
        let values: FieldValues = [
            ("fix_type".to_string(), 2),
            ("num_sat".to_string(), 12),
            ("latitude".to_string(), 473_977_420),
            ("longitude".to_string(), 85_455_940),
            ("ground_course".to_string(), 1805),
        ]
        .into_iter()
        .collect();
        let bytes = encode_payload(&spec.schema, &values).unwrap();
        assert_eq!(bytes.len(), 16);
        let decoded = decode_payload(&spec.schema, &bytes);
        assert_eq!(decoded.values["latitude"], 473_977_420);

        let record = registry.decode(codes::MSP_RAW_GPS, bytes).unwrap();
        let lat = record.scaled("latitude").unwrap();
        assert!((lat - 47.397742).abs() < 1e-9);
        assert!((record.scaled("ground_course").unwrap() - 180.5).abs() < 1e-9);
    }

    #[test]
    fn text_replies_decode_as_text() {
        let registry = Registry::builtin();
        let record = registry
            .decode(codes::MSP_FC_VARIANT, bytes::Bytes::from_static(b"BTFL"))
            .unwrap();
        assert!(record.values.is_empty());
        assert!(!record.partial);
        assert_eq!(record.text(), "BTFL");
    }
}

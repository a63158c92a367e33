//! ---
//! msp_section: "05-simulation"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Builder for MSP2_SENSOR_GPS injection payloads."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use chrono::{DateTime, Datelike, Timelike, Utc};
use msp_schema::FieldValues;

/// GPS week value meaning "not available".
pub const GPS_WEEK_UNKNOWN: i64 = 0xFFFF;

/// Degrees to the 1e-7 fixed-point units used on the wire, truncating toward zero.
pub fn degrees_to_e7(degrees: f64) -> i64 {
    (degrees * 1e7).trunc() as i64
}

/// One GPS fix destined for `MSP2_SENSOR_GPS`.
///
/// Positions are held in degrees and converted on [`to_fields`](Self::to_fields);
/// every other quantity is already in wire units.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsSample {
    pub instance: u8,
    pub fix_type: u8,
    pub satellites: u8,
    pub latitude: f64,
    pub longitude: f64,
    /// Mean sea level altitude in centimetres.
    pub msl_altitude_cm: i32,
    /// North, east, down velocity in cm/s.
    pub velocity_ned_cm_s: [i32; 3],
    /// Course over ground in centidegrees.
    pub ground_course_cdeg: u16,
    pub horizontal_accuracy_cm: u16,
    pub vertical_accuracy_cm: u16,
    pub hdop: u16,
    pub time: DateTime<Utc>,
}

impl GpsSample {
    /// Healthy 3D fix at the given position, stamped with the current time.
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            instance: 1,
            fix_type: 3,
            satellites: 10,
            latitude,
            longitude,
            msl_altitude_cm: 5000,
            velocity_ned_cm_s: [0; 3],
            ground_course_cdeg: 0,
            horizontal_accuracy_cm: 10,
            vertical_accuracy_cm: 10,
            hdop: 100,
            time: Utc::now(),
        }
    }

    pub fn with_altitude_cm(mut self, altitude: i32) -> Self {
        self.msl_altitude_cm = altitude;
        self
    }

    pub fn with_velocity_ned_cm_s(mut self, north: i32, east: i32, down: i32) -> Self {
        self.velocity_ned_cm_s = [north, east, down];
        self
    }

    pub fn with_ground_course_cdeg(mut self, course: u16) -> Self {
        self.ground_course_cdeg = course;
        self
    }

    pub fn with_fix(mut self, fix_type: u8, satellites: u8) -> Self {
        self.fix_type = fix_type;
        self.satellites = satellites;
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Field values keyed by the `MSP2_SENSOR_GPS` schema names.
    pub fn to_fields(&self) -> FieldValues {
        let [north, east, down] = self.velocity_ned_cm_s;
        let time = self.time;
        [
            ("instance", i64::from(self.instance)),
            ("gps_week", GPS_WEEK_UNKNOWN),
            ("ms_tow", 0),
            ("fix_type", i64::from(self.fix_type)),
            ("satellites_in_view", i64::from(self.satellites)),
            ("horizontal_pos_accuracy", i64::from(self.horizontal_accuracy_cm)),
            ("vertical_pos_accuracy", i64::from(self.vertical_accuracy_cm)),
            ("horizontal_vel_accuracy", 0),
            ("hdop", i64::from(self.hdop)),
            ("longitude", degrees_to_e7(self.longitude)),
            ("latitude", degrees_to_e7(self.latitude)),
            ("msl_altitude", i64::from(self.msl_altitude_cm)),
            ("ned_vel_north", i64::from(north)),
            ("ned_vel_east", i64::from(east)),
            ("ned_vel_down", i64::from(down)),
            ("ground_course", i64::from(self.ground_course_cdeg)),
            ("true_yaw", 0),
            ("year", i64::from(time.year())),
            ("month", i64::from(time.month())),
            ("day", i64::from(time.day())),
            ("hour", i64::from(time.hour())),
            ("min", i64::from(time.minute())),
            ("sec", i64::from(time.second())),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use msp_schema::Registry;

    use super::*;

    #[test]
    fn fixed_point_truncates_toward_zero() {
        assert_eq!(degrees_to_e7(45.50496682273918), 455_049_668);
        assert_eq!(degrees_to_e7(-73.61319383049725), -736_131_938);
        assert_eq!(degrees_to_e7(0.0), 0);
    }

    #[test]
    fn sample_encodes_to_sensor_gps_payload() {
        let time = Utc.with_ymd_and_hms(2026, 10, 18, 12, 34, 56).unwrap();
        let sample = GpsSample::at(45.50496682273918, -73.61319383049725).with_time(time);
        let fields = sample.to_fields();
        assert_eq!(fields["gps_week"], 0xFFFF);
        assert_eq!(fields["year"], 2026);
        assert_eq!(fields["sec"], 56);

        let registry = Registry::builtin();
        let (_, payload) = registry.encode("MSP2_SENSOR_GPS", &fields).unwrap();
        assert_eq!(payload.len(), 52);
        let record = registry.decode(msp_schema::codes::MSP2_SENSOR_GPS, payload).unwrap();
        assert_eq!(record.get("latitude"), Some(455_049_668));
        assert_eq!(record.get("msl_altitude"), Some(5000));
        assert_eq!(record.get("hour"), Some(12));
        assert!(!record.partial);
    }
}

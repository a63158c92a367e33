//! ---
//! msp_section: "01-wire-protocol"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Frame codec for the MSP V1 and V2 wire formats."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
//! Checksums used by the two frame layouts.

const DVB_S2_POLY: u8 = 0xD5;

static DVB_S2_TABLE: [u8; 256] = build_dvb_s2_table();

const fn build_dvb_s2_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ DVB_S2_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Fold a single byte into a running CRC-8/DVB-S2 value.
#[inline]
pub fn crc8_dvb_s2(crc: u8, byte: u8) -> u8 {
    DVB_S2_TABLE[(crc ^ byte) as usize]
}

/// CRC-8/DVB-S2 over `data`, as carried by V2 frames.
pub fn crc8_dvb_s2_slice(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, &byte| crc8_dvb_s2(crc, byte))
}

/// Running XOR checksum used by V1 frames.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &byte| acc ^ byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dvb_s2_check_value() {
        assert_eq!(crc8_dvb_s2_slice(b"123456789"), 0xBC);
    }

    #[test]
    fn dvb_s2_matches_bitwise_reference() {
        fn bitwise(data: &[u8]) -> u8 {
            let mut crc = 0u8;
            for &byte in data {
                crc ^= byte;
                for _ in 0..8 {
                    crc = if crc & 0x80 != 0 {
                        (crc << 1) ^ DVB_S2_POLY
                    } else {
                        crc << 1
                    };
                }
            }
            crc
        }
        let data: Vec<u8> = (0..=255u8).rev().collect();
        assert_eq!(crc8_dvb_s2_slice(&data), bitwise(&data));
    }

    #[test]
    fn xor_of_len_and_command() {
        assert_eq!(xor_checksum(&[0x00, 0x66]), 0x66);
        assert_eq!(xor_checksum(&[]), 0);
    }
}

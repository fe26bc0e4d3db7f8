//! Motion MCU command builders and telemetry decoding.
//!
//! Commands are built as v1 frames; the motion MCU negotiates v2 only for
//! time-sync traffic. Telemetry is the 21-byte `STATE` payload sent at the
//! firmware's own rate.

use crate::frame::encode_frame;
use crate::types::MotionCmd;

// ─── Command builders ───────────────────────────────────────────────

/// `SET_TWIST{v_mm_s:i16, w_mrad_s:i16}`: refreshes the MCU command
/// watchdog, so the supervisor sends it every tick even at zero.
pub fn build_set_twist(seq: u8, v_mm_s: i16, w_mrad_s: i16) -> Vec<u8> {
    let mut payload = [0u8; 4];
    payload[..2].copy_from_slice(&v_mm_s.to_le_bytes());
    payload[2..].copy_from_slice(&w_mrad_s.to_le_bytes());
    encode_frame(MotionCmd::SetTwist as u8, seq, &payload)
}

/// `STOP{reason:u8}`: controlled stop.
pub fn build_stop(seq: u8, reason: u8) -> Vec<u8> {
    encode_frame(MotionCmd::Stop as u8, seq, &[reason])
}

/// `ESTOP`: immediate output cut, latched until CLEAR_FAULTS.
pub fn build_estop(seq: u8) -> Vec<u8> {
    encode_frame(MotionCmd::Estop as u8, seq, &[])
}

/// `CLEAR_FAULTS{mask:u16}`: clears the masked fault bits.
pub fn build_clear_faults(seq: u8, mask: u16) -> Vec<u8> {
    encode_frame(MotionCmd::ClearFaults as u8, seq, &mask.to_le_bytes())
}

/// `SET_CONFIG{param_id:u8, value:[u8;4]}`: firmware tunable write.
pub fn build_set_config(seq: u8, param_id: u8, value: [u8; 4]) -> Vec<u8> {
    let mut payload = [0u8; 5];
    payload[0] = param_id;
    payload[1..].copy_from_slice(&value);
    encode_frame(MotionCmd::SetConfig as u8, seq, &payload)
}

// ─── Telemetry ──────────────────────────────────────────────────────

/// Decoded `STATE` (0x80) telemetry payload, 21 bytes on the wire:
/// `<hhhhhh H H H B`: speeds, gyro, accel xyz, battery, faults, range,
/// range status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatePayload {
    pub speed_l_mm_s: i16,
    pub speed_r_mm_s: i16,
    pub gyro_z_mrad_s: i16,
    pub accel_x_mg: i16,
    pub accel_y_mg: i16,
    pub accel_z_mg: i16,
    pub battery_mv: u16,
    pub fault_flags: u16,
    pub range_mm: u16,
    pub range_status: u8,
}

impl StatePayload {
    pub const WIRE_LEN: usize = 21;

    /// Decode from a telemetry payload. Longer payloads are tolerated
    /// (forward compatibility); shorter ones are rejected.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::WIRE_LEN {
            return None;
        }
        let i16_at = |i: usize| i16::from_le_bytes([data[i], data[i + 1]]);
        let u16_at = |i: usize| u16::from_le_bytes([data[i], data[i + 1]]);
        Some(Self {
            speed_l_mm_s: i16_at(0),
            speed_r_mm_s: i16_at(2),
            gyro_z_mrad_s: i16_at(4),
            accel_x_mg: i16_at(6),
            accel_y_mg: i16_at(8),
            accel_z_mg: i16_at(10),
            battery_mv: u16_at(12),
            fault_flags: u16_at(14),
            range_mm: u16_at(16),
            range_status: data[18],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{parse_frame, ProtocolVersion};

    #[test]
    fn set_twist_payload_layout() {
        let wire = build_set_twist(3, 200, -150);
        let pkt = parse_frame(&wire, ProtocolVersion::V1).unwrap();
        assert_eq!(pkt.pkt_type, 0x10);
        assert_eq!(pkt.payload, vec![200, 0, 0x6A, 0xFF]);
    }

    #[test]
    fn clear_faults_mask() {
        let wire = build_clear_faults(0, 0xFFFF);
        let pkt = parse_frame(&wire, ProtocolVersion::V1).unwrap();
        assert_eq!(pkt.pkt_type, 0x14);
        assert_eq!(pkt.payload, vec![0xFF, 0xFF]);
    }

    #[test]
    fn set_config_layout() {
        let wire = build_set_config(9, 4, [1, 2, 3, 4]);
        let pkt = parse_frame(&wire, ProtocolVersion::V1).unwrap();
        assert_eq!(pkt.pkt_type, 0x15);
        assert_eq!(pkt.payload, vec![4, 1, 2, 3, 4]);
    }

    #[test]
    fn state_payload_parse() {
        let mut data = Vec::new();
        for v in [100i16, -100, 50, 10, -10, 1000] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.extend_from_slice(&7400u16.to_le_bytes()); // battery
        data.extend_from_slice(&0x0002u16.to_le_bytes()); // faults: ESTOP
        data.extend_from_slice(&450u16.to_le_bytes()); // range
        data.push(0); // range status OK
        data.extend_from_slice(&[0, 0]); // trailing padding tolerated

        let tel = StatePayload::parse(&data).unwrap();
        assert_eq!(tel.speed_l_mm_s, 100);
        assert_eq!(tel.speed_r_mm_s, -100);
        assert_eq!(tel.accel_z_mg, 1000);
        assert_eq!(tel.battery_mv, 7400);
        assert_eq!(tel.fault_flags, 0x0002);
        assert_eq!(tel.range_mm, 450);
        assert_eq!(tel.range_status, 0);
    }

    #[test]
    fn state_payload_too_short() {
        assert!(StatePayload::parse(&[0u8; 20]).is_none());
    }
}

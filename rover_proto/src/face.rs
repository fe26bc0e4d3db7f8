//! Face MCU command builders and telemetry decoding.
//!
//! Scaling conventions for `SET_STATE`:
//! intensity `[0,1] → u8` via `*255`, gaze `float → i8` via `*32`
//! (the MCU maps the i8 back onto its physical gaze range).

use crate::frame::encode_frame;
use crate::types::{FaceCmd, FaceFlags};

// ─── Command builders ───────────────────────────────────────────────

/// `SET_STATE{mood, intensity_u8, gaze_x_i8, gaze_y_i8, brightness_u8}`.
pub fn build_set_state(
    seq: u8,
    mood_id: u8,
    intensity: f32,
    gaze_x: f32,
    gaze_y: f32,
    brightness: f32,
) -> Vec<u8> {
    let intensity_u8 = (intensity * 255.0).clamp(0.0, 255.0) as u8;
    let gaze_x_i8 = (gaze_x * 32.0).clamp(-128.0, 127.0) as i8;
    let gaze_y_i8 = (gaze_y * 32.0).clamp(-128.0, 127.0) as i8;
    let brightness_u8 = (brightness * 255.0).clamp(0.0, 255.0) as u8;
    let payload = [
        mood_id,
        intensity_u8,
        gaze_x_i8 as u8,
        gaze_y_i8 as u8,
        brightness_u8,
    ];
    encode_frame(FaceCmd::SetState as u8, seq, &payload)
}

/// `GESTURE{gesture_id:u8, duration_ms:u16}`.
pub fn build_gesture(seq: u8, gesture_id: u8, duration_ms: u16) -> Vec<u8> {
    let mut payload = [0u8; 3];
    payload[0] = gesture_id;
    payload[1..].copy_from_slice(&duration_ms.to_le_bytes());
    encode_frame(FaceCmd::Gesture as u8, seq, &payload)
}

/// `SET_SYSTEM{mode:u8, phase:u8, param:u8}`: full-screen overlay.
pub fn build_set_system(seq: u8, mode: u8, phase: u8, param: u8) -> Vec<u8> {
    encode_frame(FaceCmd::SetSystem as u8, seq, &[mode, phase, param])
}

/// `SET_TALKING{talking:u8, energy:u8}`: mouth animation drive.
pub fn build_set_talking(seq: u8, talking: bool, energy: u8) -> Vec<u8> {
    encode_frame(
        FaceCmd::SetTalking as u8,
        seq,
        &[u8::from(talking), energy],
    )
}

/// `SET_FLAGS{flags:u8}`: renderer feature toggles, masked to 7 bits.
pub fn build_set_flags(seq: u8, flags: FaceFlags) -> Vec<u8> {
    encode_frame(FaceCmd::SetFlags as u8, seq, &[flags.bits()])
}

/// `SET_CONV_STATE{phase:u8}`: border animation phase.
pub fn build_set_conv_state(seq: u8, phase: u8) -> Vec<u8> {
    encode_frame(FaceCmd::SetConvState as u8, seq, &[phase])
}

// ─── Telemetry payloads ─────────────────────────────────────────────

/// `FACE_STATUS` (0x90): current render state mirror.
/// Flags: bit0 touch active, bit1 talking, bit2 PTT listening.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaceStatusPayload {
    pub mood_id: u8,
    pub active_gesture: u8,
    pub system_mode: u8,
    pub flags: u8,
}

impl FaceStatusPayload {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        Some(Self {
            mood_id: data[0],
            active_gesture: data[1],
            system_mode: data[2],
            flags: data[3],
        })
    }

    #[inline]
    pub fn touch_active(&self) -> bool {
        self.flags & 0x01 != 0
    }

    #[inline]
    pub fn talking(&self) -> bool {
        self.flags & 0x02 != 0
    }

    #[inline]
    pub fn ptt_listening(&self) -> bool {
        self.flags & 0x04 != 0
    }
}

/// `TOUCH_EVENT` (0x91): `{event_type:u8, x:u16, y:u16}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchEventPayload {
    pub event_type: u8,
    pub x: u16,
    pub y: u16,
}

impl TouchEventPayload {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 5 {
            return None;
        }
        Some(Self {
            event_type: data[0],
            x: u16::from_le_bytes([data[1], data[2]]),
            y: u16::from_le_bytes([data[3], data[4]]),
        })
    }
}

/// `BUTTON_EVENT` (0x92): `{button_id, event_type, state, reserved}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonEventPayload {
    pub button_id: u8,
    pub event_type: u8,
    pub state: u8,
}

impl ButtonEventPayload {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        Some(Self {
            button_id: data[0],
            event_type: data[1],
            state: data[2],
        })
    }
}

/// `HEARTBEAT` (0x93): uptime + USB link counters.
///
/// The firmware grew this payload over time; older builds send only the
/// 16-byte base, so the USB block and line-state tail are optional and
/// default to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub uptime_ms: u32,
    pub status_tx_count: u32,
    pub touch_tx_count: u32,
    pub button_tx_count: u32,
    pub usb_tx_calls: u32,
    pub usb_tx_bytes_queued: u32,
    pub usb_rx_bytes: u32,
    pub usb_rx_errors: u32,
    pub usb_dtr: bool,
    pub usb_rts: bool,
    pub ptt_listening: bool,
}

impl HeartbeatPayload {
    const BASE_LEN: usize = 16;
    const USB_LEN: usize = 48;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::BASE_LEN {
            return None;
        }
        let u32_at = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);

        let mut hb = Self {
            uptime_ms: u32_at(0),
            status_tx_count: u32_at(4),
            touch_tx_count: u32_at(8),
            button_tx_count: u32_at(12),
            ..Self::default()
        };

        if data.len() >= Self::BASE_LEN + Self::USB_LEN {
            hb.usb_tx_calls = u32_at(16);
            hb.usb_tx_bytes_queued = u32_at(24);
            hb.usb_rx_bytes = u32_at(52);
            hb.usb_rx_errors = u32_at(56);
        }

        let tail = Self::BASE_LEN + Self::USB_LEN;
        if data.len() >= tail + 4 {
            hb.usb_dtr = data[tail] != 0;
            hb.usb_rts = data[tail + 1] != 0;
            hb.ptt_listening = data[tail + 2] != 0;
        }

        Some(hb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{parse_frame, ProtocolVersion};

    #[test]
    fn set_state_scaling() {
        let wire = build_set_state(1, 2, 0.8, 0.5, -0.3, 0.78);
        let pkt = parse_frame(&wire, ProtocolVersion::V1).unwrap();
        assert_eq!(pkt.pkt_type, 0x20);
        assert_eq!(pkt.payload[0], 2); // mood
        assert_eq!(pkt.payload[1], 204); // 0.8 * 255
        assert_eq!(pkt.payload[2] as i8, 16); // 0.5 * 32
        assert_eq!(pkt.payload[3] as i8, -9); // -0.3 * 32
        assert_eq!(pkt.payload[4], 198); // 0.78 * 255
    }

    #[test]
    fn set_state_clamps() {
        let wire = build_set_state(0, 0, 2.0, 9.0, -9.0, 2.0);
        let pkt = parse_frame(&wire, ProtocolVersion::V1).unwrap();
        assert_eq!(pkt.payload[1], 255);
        assert_eq!(pkt.payload[2] as i8, 127);
        assert_eq!(pkt.payload[3] as i8, -128);
        assert_eq!(pkt.payload[4], 255);
    }

    #[test]
    fn gesture_layout() {
        let wire = build_gesture(5, 10, 350);
        let pkt = parse_frame(&wire, ProtocolVersion::V1).unwrap();
        assert_eq!(pkt.pkt_type, 0x21);
        assert_eq!(pkt.payload, vec![10, 0x5E, 0x01]);
    }

    #[test]
    fn set_flags_masks_to_seven_bits() {
        let wire = build_set_flags(0, FaceFlags::all());
        let pkt = parse_frame(&wire, ProtocolVersion::V1).unwrap();
        assert_eq!(pkt.payload, vec![0x7F]);
    }

    #[test]
    fn face_status_flags() {
        let st = FaceStatusPayload::parse(&[4, 0xFF, 0, 0b0000_0101]).unwrap();
        assert_eq!(st.mood_id, 4);
        assert!(st.touch_active());
        assert!(!st.talking());
        assert!(st.ptt_listening());
    }

    #[test]
    fn button_event_parse() {
        let evt = ButtonEventPayload::parse(&[0, 2, 1, 0]).unwrap();
        assert_eq!(evt.button_id, 0);
        assert_eq!(evt.event_type, 2);
        assert_eq!(evt.state, 1);
        assert!(ButtonEventPayload::parse(&[0, 2]).is_none());
    }

    #[test]
    fn heartbeat_base_only() {
        let mut data = Vec::new();
        for v in [1000u32, 5, 2, 1] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let hb = HeartbeatPayload::parse(&data).unwrap();
        assert_eq!(hb.uptime_ms, 1000);
        assert_eq!(hb.button_tx_count, 1);
        assert!(!hb.usb_dtr);
    }

    #[test]
    fn heartbeat_with_tail() {
        let mut data = vec![0u8; 64];
        data[..4].copy_from_slice(&42u32.to_le_bytes());
        data.extend_from_slice(&[1, 1, 1, 0]);
        let hb = HeartbeatPayload::parse(&data).unwrap();
        assert_eq!(hb.uptime_ms, 42);
        assert!(hb.usb_dtr);
        assert!(hb.ptt_listening);
    }
}

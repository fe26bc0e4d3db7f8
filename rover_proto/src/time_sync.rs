//! TIME_SYNC and protocol-version negotiation packets.
//!
//! A v2-capable host issues `SET_PROTOCOL_VERSION(2)` once after opening a
//! port; the MCU may acknowledge with `PROTOCOL_VERSION_ACK` (0x87).
//! TIME_SYNC requests carry a host-side ping sequence that the MCU echoes
//! back with its microsecond boot clock.

use crate::frame::{encode_frame, encode_frame_v2, ProtocolVersion};
use crate::types::{SET_PROTOCOL_VERSION, TIME_SYNC_REQ};

/// `SET_PROTOCOL_VERSION{version:u8}`: always sent as a v1 frame so a
/// freshly-reset MCU can parse it.
pub fn build_set_protocol_version(seq: u8, version: u8) -> Vec<u8> {
    encode_frame(SET_PROTOCOL_VERSION, seq, &[version])
}

/// `TIME_SYNC_REQ{ping_seq:u32, reserved:u32}`.
pub fn build_time_sync_req(
    seq: u32,
    ping_seq: u32,
    version: ProtocolVersion,
    t_src_us: u64,
) -> Vec<u8> {
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&ping_seq.to_le_bytes());
    match version {
        ProtocolVersion::V2 => encode_frame_v2(TIME_SYNC_REQ, seq, t_src_us, &payload),
        ProtocolVersion::V1 => encode_frame(TIME_SYNC_REQ, (seq & 0xFF) as u8, &payload),
    }
}

/// Decoded `TIME_SYNC_RESP` payload: `{ping_seq:u32, t_src_us:u64}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncResp {
    pub ping_seq: u32,
    pub t_src_us: u64,
}

impl TimeSyncResp {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }
        Some(Self {
            ping_seq: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            t_src_us: u64::from_le_bytes([
                data[4], data[5], data[6], data[7], data[8], data[9], data[10], data[11],
            ]),
        })
    }
}

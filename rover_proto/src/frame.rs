//! COBS + CRC16 frame codec with v1/v2 envelope support.
//!
//! The CRC is CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF) computed over
//! `type ‖ envelope ‖ payload` and appended little-endian before COBS
//! encoding. The COBS layer, including the trailing `0x00` delimiter, is
//! handled by `corncobs`.

use crc::{Crc, CRC_16_IBM_3740};
use thiserror::Error;

/// CRC-16/CCITT-FALSE, the variant both MCU firmwares compute.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// v2 envelope header size: type(1) + seq(4) + t_src_us(8).
const V2_HEADER_LEN: usize = 13;

/// Smallest decodable packet: type + seq + crc16 (v1).
const MIN_PACKET_LEN: usize = 4;

/// Negotiated envelope version for one serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// u8 sequence, no source timestamp.
    #[default]
    V1,
    /// u32 sequence + u64 microsecond source timestamp.
    V2,
}

/// Frame-level decode failure. Each variant maps to a per-port counter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Decoded packet shorter than the minimum envelope + CRC.
    #[error("packet too short: {len} bytes")]
    TooShort { len: usize },

    /// CRC over the decoded body did not match the trailing CRC.
    #[error("CRC mismatch: recv=0x{recv:04X} calc=0x{calc:04X}")]
    CrcMismatch { recv: u16, calc: u16 },

    /// COBS decoding failed (corrupt or truncated frame).
    #[error("COBS decode error")]
    CobsDecodeError,
}

/// A decoded packet, envelope fields normalized across versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    pub pkt_type: u8,
    pub seq: u32,
    pub payload: Vec<u8>,
    /// v2 only: MCU monotonic timestamp (µs since boot). Zero for v1.
    pub t_src_us: u64,
    /// Host receive time (monotonic ns), stamped by the transport.
    pub t_rx_ns: u64,
}

/// Compute the wire CRC over a packet body.
#[inline]
pub fn crc16(body: &[u8]) -> u16 {
    CRC16.checksum(body)
}

/// Build a v1 wire-ready frame: `COBS(type ‖ seq:u8 ‖ payload ‖ crc16)` + `0x00`.
pub fn encode_frame(pkt_type: u8, seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(2 + payload.len() + 2);
    raw.push(pkt_type);
    raw.push(seq);
    raw.extend_from_slice(payload);
    finish(raw)
}

/// Build a v2 wire-ready frame with u32 seq and u64 source timestamp.
pub fn encode_frame_v2(pkt_type: u8, seq: u32, t_src_us: u64, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(V2_HEADER_LEN + payload.len() + 2);
    raw.push(pkt_type);
    raw.extend_from_slice(&seq.to_le_bytes());
    raw.extend_from_slice(&t_src_us.to_le_bytes());
    raw.extend_from_slice(payload);
    finish(raw)
}

/// Append the CRC and COBS-encode (corncobs emits the 0x00 terminator).
fn finish(mut raw: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&raw);
    raw.extend_from_slice(&crc.to_le_bytes());

    let mut out = vec![0u8; corncobs::max_encoded_len(raw.len())];
    let n = corncobs::encode_buf(&raw, &mut out);
    out.truncate(n);
    out
}

/// Parse one COBS frame (including its trailing `0x00` delimiter).
///
/// The v2 envelope is only assumed when the negotiated version is `V2`
/// and the body is long enough to carry the 13-byte header; short v2
/// bodies fall back to the v1 layout, matching the firmware's behavior
/// during version negotiation.
pub fn parse_frame(frame: &[u8], version: ProtocolVersion) -> Result<ParsedPacket, FrameError> {
    let mut raw = vec![0u8; frame.len()];
    let n = corncobs::decode_buf(frame, &mut raw).map_err(|_| FrameError::CobsDecodeError)?;
    raw.truncate(n);

    if raw.len() < MIN_PACKET_LEN {
        return Err(FrameError::TooShort { len: raw.len() });
    }

    let (body, crc_bytes) = raw.split_at(raw.len() - 2);
    let recv = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let calc = crc16(body);
    if recv != calc {
        return Err(FrameError::CrcMismatch { recv, calc });
    }

    if version == ProtocolVersion::V2 && body.len() >= V2_HEADER_LEN {
        let seq = u32::from_le_bytes([body[1], body[2], body[3], body[4]]);
        let t_src_us = u64::from_le_bytes([
            body[5], body[6], body[7], body[8], body[9], body[10], body[11], body[12],
        ]);
        return Ok(ParsedPacket {
            pkt_type: body[0],
            seq,
            payload: body[V2_HEADER_LEN..].to_vec(),
            t_src_us,
            t_rx_ns: 0,
        });
    }

    Ok(ParsedPacket {
        pkt_type: body[0],
        seq: u32::from(body[1]),
        payload: body[2..].to_vec(),
        t_src_us: 0,
        t_rx_ns: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_roundtrip() {
        let wire = encode_frame(0x10, 7, &[0xC8, 0x00, 0x00, 0x00]);
        assert_eq!(*wire.last().unwrap(), 0x00);

        let pkt = parse_frame(&wire, ProtocolVersion::V1).unwrap();
        assert_eq!(pkt.pkt_type, 0x10);
        assert_eq!(pkt.seq, 7);
        assert_eq!(pkt.payload, vec![0xC8, 0x00, 0x00, 0x00]);
        assert_eq!(pkt.t_src_us, 0);
    }

    #[test]
    fn v2_roundtrip() {
        let wire = encode_frame_v2(0x86, 0x01020304, 123_456_789, &[1, 2, 3]);
        let pkt = parse_frame(&wire, ProtocolVersion::V2).unwrap();
        assert_eq!(pkt.pkt_type, 0x86);
        assert_eq!(pkt.seq, 0x01020304);
        assert_eq!(pkt.t_src_us, 123_456_789);
        assert_eq!(pkt.payload, vec![1, 2, 3]);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let wire = encode_frame(0x12, 255, &[]);
        let pkt = parse_frame(&wire, ProtocolVersion::V1).unwrap();
        assert_eq!(pkt.pkt_type, 0x12);
        assert_eq!(pkt.seq, 255);
        assert!(pkt.payload.is_empty());
    }

    #[test]
    fn single_bit_flip_fails_crc() {
        let wire = encode_frame(0x10, 1, &[10, 20, 30, 40]);
        // Flip one bit in every encoded position (excluding the delimiter,
        // which would instead break COBS framing).
        for i in 0..wire.len() - 1 {
            for bit in 0..8 {
                let mut corrupted = wire.clone();
                corrupted[i] ^= 1 << bit;
                let result = parse_frame(&corrupted, ProtocolVersion::V1);
                assert!(result.is_err(), "flip at byte {i} bit {bit} was accepted");
            }
        }
    }

    #[test]
    fn too_short_rejected() {
        // A valid COBS frame whose decoded body is under 4 bytes.
        let mut out = vec![0u8; corncobs::max_encoded_len(2)];
        let n = corncobs::encode_buf(&[0x10, 0x01], &mut out);
        out.truncate(n);
        assert_eq!(
            parse_frame(&out, ProtocolVersion::V1),
            Err(FrameError::TooShort { len: 2 })
        );
    }

    #[test]
    fn v2_port_still_parses_short_v1_body() {
        // Version ACKs arrive on a v2-negotiated port in v1 envelope.
        let wire = encode_frame(0x87, 3, &[2]);
        let pkt = parse_frame(&wire, ProtocolVersion::V2).unwrap();
        assert_eq!(pkt.pkt_type, 0x87);
        assert_eq!(pkt.seq, 3);
        assert_eq!(pkt.payload, vec![2]);
    }

    #[test]
    fn crc_is_ccitt_false() {
        // Reference value for the CCITT-FALSE variant.
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }
}

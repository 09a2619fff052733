//! Frame types and the CRC-8/COBS wire encoding.

use crc::{Algorithm, Crc};

/// Custom CRC-8 matching the wire format: polynomial `0x07`, initial
/// value `0x00`, no reflection, no final xor.
const CRC8_SCALEFX: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0x07,
    init: 0x00,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0x00,
    residue: 0x00,
};

fn crc8(bytes: &[u8]) -> u8 {
    Crc::<u8>::new(&CRC8_SCALEFX).checksum(bytes)
}

pub const TRIGGER_ON: u8 = 0x01;
pub const TRIGGER_OFF: u8 = 0x02;
pub const SERVO_SET: u8 = 0x10;
pub const SERVO_SETTINGS: u8 = 0x11;
pub const SERVO_RECOIL: u8 = 0x12;
pub const SMOKE_HEAT: u8 = 0x20;
pub const INIT: u8 = 0xF0;
pub const SHUTDOWN: u8 = 0xF1;
pub const KEEPALIVE: u8 = 0xF2;
pub const INIT_READY: u8 = 0xF3;
pub const STATUS: u8 = 0xF4;

/// Maximum in-flight COBS-decode buffer before a missing terminator
/// causes the partial frame to be discarded.
pub const MAX_FRAME_BUFFER: usize = 256;

/// A decoded, CRC-verified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: u8,
    pub payload: Vec<u8>,
}

/// Build the pre-COBS byte sequence `type ∥ length ∥ payload ∥ crc8` for
/// `frame_type` and `payload`.
pub fn build_payload(frame_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + payload.len() + 1);
    buf.push(frame_type);
    buf.push(payload.len() as u8);
    buf.extend_from_slice(payload);
    let crc = crc8(&buf);
    buf.push(crc);
    buf
}

/// COBS-encode `raw` and append the `0x00` frame terminator.
pub fn encode_frame(raw: &[u8]) -> Vec<u8> {
    let mut encoded = cobs::encode_vec(raw);
    encoded.push(0x00);
    encoded
}

/// Full encode: build the CRC-protected payload then COBS-frame it. This
/// is what [`super::Framer::send`] writes to the wire.
pub fn encode(frame_type: u8, payload: &[u8]) -> Vec<u8> {
    encode_frame(&build_payload(frame_type, payload))
}

/// Decode one COBS-framed (terminator already stripped) byte sequence
/// into a validated [`Frame`]. Returns `None` on CRC mismatch or a
/// malformed length field.
pub fn decode_frame(cobs_encoded: &[u8]) -> Option<Frame> {
    let raw = cobs::decode_vec(cobs_encoded).ok()?;
    if raw.len() < 3 {
        return None;
    }
    let frame_type = raw[0];
    let length = raw[1] as usize;
    if raw.len() != 2 + length + 1 {
        return None;
    }
    let payload = &raw[2..2 + length];
    let received_crc = raw[2 + length];
    let expected_crc = crc8(&raw[..2 + length]);
    if received_crc != expected_crc {
        return None;
    }
    Some(Frame { frame_type, payload: payload.to_vec() })
}

/// Helper constructors for the outbound command frames.
pub mod commands {
    use super::*;

    pub fn trigger_on(rpm: u16) -> (u8, Vec<u8>) {
        (TRIGGER_ON, rpm.to_le_bytes().to_vec())
    }

    pub fn trigger_off(fan_delay_ms: u16) -> (u8, Vec<u8>) {
        (TRIGGER_OFF, fan_delay_ms.to_le_bytes().to_vec())
    }

    pub fn servo_set(id: u8, pulse_us: u16) -> (u8, Vec<u8>) {
        let mut payload = vec![id];
        payload.extend_from_slice(&pulse_us.to_le_bytes());
        (SERVO_SET, payload)
    }

    pub fn servo_settings(
        id: u8,
        min_us: u16,
        max_us: u16,
        max_speed: u16,
        accel: u16,
        decel: u16,
    ) -> (u8, Vec<u8>) {
        let mut payload = vec![id];
        for field in [min_us, max_us, max_speed, accel, decel] {
            payload.extend_from_slice(&field.to_le_bytes());
        }
        (SERVO_SETTINGS, payload)
    }

    pub fn servo_recoil(id: u8, jerk_us: u16, variance_us: u16) -> (u8, Vec<u8>) {
        let mut payload = vec![id];
        payload.extend_from_slice(&jerk_us.to_le_bytes());
        payload.extend_from_slice(&variance_us.to_le_bytes());
        (SERVO_RECOIL, payload)
    }

    pub fn smoke_heat(on: bool) -> (u8, Vec<u8>) {
        (SMOKE_HEAT, vec![on as u8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_on_900_matches_reference_bytes() {
        let (frame_type, payload) = commands::trigger_on(900);
        assert_eq!(frame_type, TRIGGER_ON);
        assert_eq!(payload, vec![0x84, 0x03]);
        let built = build_payload(frame_type, &payload);
        assert_eq!(built, vec![0x01, 0x02, 0x84, 0x03, crc8(&[0x01, 0x02, 0x84, 0x03])]);
    }

    #[test]
    fn encode_decode_round_trip_recovers_type_and_payload() {
        let (frame_type, payload) = commands::servo_set(2, 1530);
        let wire = encode(frame_type, &payload);
        // Strip the terminator before decoding, as `Framer` does once it
        // has found a complete frame in the input stream.
        let body = &wire[..wire.len() - 1];
        let decoded = decode_frame(body).unwrap();
        assert_eq!(decoded.frame_type, frame_type);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn corrupted_payload_fails_crc_check() {
        let wire = encode(SMOKE_HEAT, &[1]);
        let mut body = wire[..wire.len() - 1].to_vec();
        // Flip a bit inside the COBS-encoded body; after decode the CRC
        // byte will no longer match.
        let last = body.len() - 1;
        body[last] ^= 0xFF;
        assert!(decode_frame(&body).is_none());
    }
}

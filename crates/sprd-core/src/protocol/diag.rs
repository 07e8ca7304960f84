//! Diagnostics wire framing.
//!
//! The cellular diagnostics dialect frames `[command][payload]` with a
//! little-endian CRC16 (poly 0x8408, LSB-first, init 0xFFFF, final XOR
//! 0xFFFF) and the same HDLC escaping as FDL2. Unlike the FDL2 decoder,
//! a CRC mismatch here is a hard failure and the frame is discarded.

use super::bsl::FrameError;
use super::constants::{HDLC_ESCAPE, HDLC_XOR, TAG_HDLC};
use super::crc::crc16_diag;

/// Encode a diagnostics frame.
pub fn encode(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(3 + payload.len());
    raw.push(cmd);
    raw.extend_from_slice(payload);
    let crc = crc16_diag(&raw);
    raw.extend_from_slice(&crc.to_le_bytes());

    let mut buf = Vec::with_capacity(raw.len() + 4);
    buf.push(TAG_HDLC);
    for &b in &raw {
        if b == TAG_HDLC || b == HDLC_ESCAPE {
            buf.push(HDLC_ESCAPE);
            buf.push(b ^ HDLC_XOR);
        } else {
            buf.push(b);
        }
    }
    buf.push(TAG_HDLC);
    buf
}

/// Decode a diagnostics frame, validating the trailing CRC.
///
/// Returns the unescaped `[command][payload]` block with the CRC bytes
/// stripped.
pub fn decode(frame: &[u8]) -> Result<Vec<u8>, FrameError> {
    if frame.len() < 4 {
        return Err(FrameError::TooShort {
            expected: 4,
            actual: frame.len(),
        });
    }
    if frame[0] != TAG_HDLC || frame[frame.len() - 1] != TAG_HDLC {
        return Err(FrameError::MissingTag);
    }

    let mut unescaped = Vec::with_capacity(frame.len());
    let mut escaped = false;
    for &b in &frame[1..frame.len() - 1] {
        if escaped {
            unescaped.push(b ^ HDLC_XOR);
            escaped = false;
        } else if b == HDLC_ESCAPE {
            escaped = true;
        } else {
            unescaped.push(b);
        }
    }
    if escaped {
        return Err(FrameError::DanglingEscape);
    }
    if unescaped.len() < 3 {
        return Err(FrameError::TooShort {
            expected: 3,
            actual: unescaped.len(),
        });
    }

    let (body, crc_bytes) = unescaped.split_at(unescaped.len() - 2);
    let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let computed = crc16_diag(body);
    if received != computed {
        return Err(FrameError::CrcMismatch { received, computed });
    }

    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::DIAG_CMD_VERSION;

    #[test]
    fn version_frame_exact_bytes() {
        // CRC-16/X-25 of a single zero byte is 0xF078, appended LE.
        let frame = encode(DIAG_CMD_VERSION, &[]);
        assert_eq!(frame, [0x7E, 0x00, 0x78, 0xF0, 0x7E]);
    }

    #[test]
    fn round_trip_with_escaped_bytes() {
        let payload = [0x7E, 0x7D, 0x55, 0xAA];
        let frame = encode(0x26, &payload);
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded[0], 0x26);
        assert_eq!(&decoded[1..], &payload);
    }

    #[test]
    fn corrupt_crc_is_rejected() {
        // Valid VERSION frame with the command byte flipped: the CRC no
        // longer matches and the frame must be discarded.
        let frame = [0x7E, 0x01, 0x78, 0xF0, 0x7E];
        assert!(matches!(
            decode(&frame),
            Err(FrameError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn missing_delimiter_is_rejected() {
        assert!(matches!(
            decode(&[0x00, 0x78, 0xF0, 0x7E]),
            Err(FrameError::MissingTag)
        ));
        assert!(matches!(
            decode(&[0x7E, 0x00]),
            Err(FrameError::TooShort { .. })
        ));
    }
}

//! BSL wire framing for the BROM/FDL1 and FDL2 dialects.
//!
//! The BROM and FDL1 speak a fixed-header packet format tagged `0xAE`;
//! FDL2 switches to an HDLC-style tag-delimited framing with byte
//! escaping and a trailing CRC16.

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use thiserror::Error;

use super::constants::{HDLC_ESCAPE, HDLC_XOR, TAG_BROM, TAG_HDLC};
use super::crc::crc16_hdlc;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame too short: expected at least {expected}, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("Dangling escape byte at end of frame")]
    DanglingEscape,
    #[error("CRC mismatch: received 0x{received:04X}, computed 0x{computed:04X}")]
    CrcMismatch { received: u16, computed: u16 },
    #[error("Missing HDLC frame delimiter")]
    MissingTag,
}

/// Encode a command in the BROM/FDL1 framing (tag `0xAE`).
///
/// The data header carries the command code followed by two size/address
/// fields: 32-bit mode writes address then size as u32, 64-bit mode
/// writes size then address as u64 (the order the BROM expects). An
/// optional u32 checksum field sits between the header and the payload;
/// no trailing checksum is ever appended.
pub fn encode_brom(
    cmd: u16,
    address: u64,
    size: u64,
    data: &[u8],
    wide: bool,
    checksum: Option<u32>,
) -> Vec<u8> {
    let data_header = if wide { 20 } else { 12 };
    let extra = if checksum.is_some() { 4 } else { 0 };
    let payload_len = data_header + extra + data.len();

    let mut buf = Vec::with_capacity(8 + payload_len);

    // Packet header: tag, LE payload length, flow id, 2 reserved bytes
    buf.push(TAG_BROM);
    buf.write_u32::<LittleEndian>(payload_len as u32).unwrap();
    buf.push(super::constants::BROM_FLOW_ID);
    buf.write_u16::<LittleEndian>(0).unwrap();

    // Data header
    buf.write_u32::<LittleEndian>(cmd as u32).unwrap();
    if wide {
        buf.write_u64::<LittleEndian>(size).unwrap();
        buf.write_u64::<LittleEndian>(address).unwrap();
    } else {
        buf.write_u32::<LittleEndian>(address as u32).unwrap();
        buf.write_u32::<LittleEndian>(size as u32).unwrap();
    }

    if let Some(ck) = checksum {
        buf.write_u32::<LittleEndian>(ck).unwrap();
    }

    buf.extend_from_slice(data);
    buf
}

/// Encode a command in the FDL2 HDLC framing (tag `0x7E`).
///
/// The framed block is `[u16 BE command][u16 BE length][payload]` with a
/// CRC16-CCITT appended big-endian. In escaped mode every `0x7E`/`0x7D`
/// inside the block is replaced by `0x7D, byte ^ 0x20`; bypass mode
/// frames the block verbatim.
pub fn encode_hdlc(cmd: u16, payload: &[u8], bypass: bool) -> Vec<u8> {
    let mut raw = Vec::with_capacity(6 + payload.len());
    raw.write_u16::<BigEndian>(cmd).unwrap();
    raw.write_u16::<BigEndian>(payload.len() as u16).unwrap();
    raw.extend_from_slice(payload);
    let crc = crc16_hdlc(&raw);
    raw.write_u16::<BigEndian>(crc).unwrap();

    if bypass {
        let mut buf = Vec::with_capacity(raw.len() + 2);
        buf.push(TAG_HDLC);
        buf.extend_from_slice(&raw);
        buf.push(TAG_HDLC);
        return buf;
    }

    let mut buf = Vec::with_capacity(raw.len() + 8);
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

/// Decode an FDL2 HDLC frame.
///
/// Strips the leading/trailing tag bytes if present and, in escaped
/// mode, reverses the escape transform. The embedded CRC is returned as
/// part of the block and is not revalidated here.
pub fn decode_hdlc(input: &[u8], bypass: bool) -> Result<Vec<u8>, FrameError> {
    if input.len() < 2 {
        return Err(FrameError::TooShort {
            expected: 2,
            actual: input.len(),
        });
    }

    let start = usize::from(input[0] == TAG_HDLC);
    let end = if input[input.len() - 1] == TAG_HDLC {
        input.len() - 1
    } else {
        input.len()
    };
    let body = &input[start..end];

    if bypass {
        return Ok(body.to_vec());
    }

    let mut decoded = Vec::with_capacity(body.len());
    let mut escaped = false;
    for &b in body {
        if escaped {
            decoded.push(b ^ HDLC_XOR);
            escaped = false;
        } else if b == HDLC_ESCAPE {
            escaped = true;
        } else {
            decoded.push(b);
        }
    }
    if escaped {
        return Err(FrameError::DanglingEscape);
    }
    Ok(decoded)
}

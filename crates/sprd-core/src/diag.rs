//! Diagnostics-mode client.
//!
//! Talks to a booted device over the cellular diagnostics dialect:
//! NV-item read/write, IMEI access in the legacy nibble-packed format,
//! and an AT-command passthrough. Independent of the download state
//! machine; connects on its own port.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::diag;
use crate::protocol::{
    FrameError, DIAG_CMD_AT_COMMAND, DIAG_CMD_NV_READ, DIAG_CMD_NV_WRITE, DIAG_CMD_VERSION,
    NV_ID_IMEI_SLOT1, NV_ID_IMEI_SLOT2,
};
use crate::transport::{SerialTransport, TransportError};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes of prefix (command, NV id, length) stripped from NV read
/// responses.
const NV_RESPONSE_PREFIX: usize = 3;

#[derive(Error, Debug)]
pub enum DiagError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("No response to command 0x{0:02X}")]
    NoResponse(u8),

    #[error("Response command 0x{actual:02X} does not match request 0x{expected:02X}")]
    CommandMismatch { expected: u8, actual: u8 },

    #[error("Invalid IMEI {0:?}: expected 15 decimal digits")]
    InvalidImei(String),
}

/// Decode the legacy nibble-packed IMEI layout.
///
/// The first digit sits in the high nibble of byte 0 (the low nibble is
/// a flag); bytes 1..8 carry two digits each, low nibble first. Filler
/// nibbles of 0xF are dropped and the result is capped at 15 digits.
pub fn decode_imei(data: &[u8]) -> String {
    let mut digits = String::with_capacity(15);
    let Some(&first) = data.first() else {
        return digits;
    };
    push_digit(&mut digits, first >> 4);
    for &b in data.iter().take(8).skip(1) {
        push_digit(&mut digits, b & 0x0F);
        push_digit(&mut digits, b >> 4);
    }
    digits.truncate(15);
    digits
}

fn push_digit(out: &mut String, nibble: u8) {
    // 0xF is filler, not a digit
    if nibble != 0x0F {
        out.push(char::from(b'0' + (nibble % 10)));
    }
}

/// Encode a 15-digit IMEI into the nibble-packed layout: digit 1 in the
/// high nibble of byte 0 over the flag nibble 0xA, then two digits per
/// byte, missing trailing digit padded with 0xF.
pub fn encode_imei(imei: &str) -> Result<[u8; 8], DiagError> {
    if imei.len() != 15 || !imei.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DiagError::InvalidImei(imei.to_string()));
    }
    let digit = |i: usize| imei.as_bytes()[i] - b'0';

    let mut data = [0u8; 8];
    data[0] = (digit(0) << 4) | 0x0A;
    for i in 1..8 {
        let idx = (i - 1) * 2 + 1;
        let low = digit(idx);
        let high = if idx + 1 < 15 { digit(idx + 1) } else { 0x0F };
        data[i] = (high << 4) | low;
    }
    Ok(data)
}

/// Diagnostics session over a serial transport.
pub struct DiagClient<T> {
    transport: T,
    connected: bool,
}

impl<T: SerialTransport> DiagClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Open the port and handshake with a VERSION query.
    pub fn connect(&mut self, path: &str, baud: u32) -> Result<(), DiagError> {
        self.transport.open(path, baud)?;
        match self.send_command(DIAG_CMD_VERSION, &[]) {
            Ok(_) => {
                self.connected = true;
                tracing::info!(path, "Diagnostics connection established");
                Ok(())
            }
            Err(e) => {
                self.transport.close();
                self.connected = false;
                Err(e)
            }
        }
    }

    pub fn close(&mut self) {
        self.transport.close();
        self.connected = false;
    }

    /// One framed request/response exchange. The response must echo the
    /// request command; the returned buffer is `[command][payload]`.
    pub fn send_command(&mut self, cmd: u8, payload: &[u8]) -> Result<Vec<u8>, DiagError> {
        let frame = diag::encode(cmd, payload);
        self.transport.write(&frame)?;

        let resp = self.transport.read(4096, RESPONSE_TIMEOUT)?;
        if resp.is_empty() {
            return Err(DiagError::NoResponse(cmd));
        }
        let decoded = diag::decode(&resp)?;
        if decoded.first() != Some(&cmd) {
            return Err(DiagError::CommandMismatch {
                expected: cmd,
                actual: decoded.first().copied().unwrap_or(0),
            });
        }
        Ok(decoded)
    }

    /// Read an NV item; the 3-byte response prefix is stripped.
    pub fn read_nv_item(&mut self, nv_id: u16, length: u16) -> Result<Vec<u8>, DiagError> {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&nv_id.to_le_bytes());
        payload.extend_from_slice(&length.to_le_bytes());

        let resp = self.send_command(DIAG_CMD_NV_READ, &payload)?;
        if resp.len() < NV_RESPONSE_PREFIX + 1 {
            return Err(DiagError::NoResponse(DIAG_CMD_NV_READ));
        }
        Ok(resp[NV_RESPONSE_PREFIX..].to_vec())
    }

    pub fn write_nv_item(&mut self, nv_id: u16, data: &[u8]) -> Result<(), DiagError> {
        let mut payload = Vec::with_capacity(2 + data.len());
        payload.extend_from_slice(&nv_id.to_le_bytes());
        payload.extend_from_slice(data);
        self.send_command(DIAG_CMD_NV_WRITE, &payload)?;
        Ok(())
    }

    /// Read the IMEI for SIM slot 1 or 2.
    pub fn read_imei(&mut self, slot: u8) -> Result<String, DiagError> {
        let raw = self.read_nv_item(imei_nv_id(slot), 8)?;
        Ok(decode_imei(&raw))
    }

    /// Write a 15-digit IMEI to SIM slot 1 or 2.
    pub fn write_imei(&mut self, imei: &str, slot: u8) -> Result<(), DiagError> {
        let encoded = encode_imei(imei)?;
        self.write_nv_item(imei_nv_id(slot), &encoded)
    }

    /// Run one AT command through the diagnostics passthrough.
    pub fn send_at_command(&mut self, command: &str) -> Result<String, DiagError> {
        let mut line = command.to_string();
        if !line.ends_with('\r') {
            line.push('\r');
        }
        let resp = self.send_command(DIAG_CMD_AT_COMMAND, line.as_bytes())?;
        Ok(String::from_utf8_lossy(&resp[1..]).trim().to_string())
    }
}

fn imei_nv_id(slot: u8) -> u16 {
    if slot == 1 {
        NV_ID_IMEI_SLOT1
    } else {
        NV_ID_IMEI_SLOT2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::diag;
    use crate::transport::MockTransport;

    const IMEI: &str = "352099001761481";

    #[test]
    fn imei_round_trip() {
        let packed = encode_imei(IMEI).unwrap();
        assert_eq!(decode_imei(&packed), IMEI);
        // flag nibble in byte 0
        assert_eq!(packed[0] & 0x0F, 0x0A);
        // 15 digits leave the last high nibble as filler
        assert_eq!(packed[7] >> 4, 0x0F);
    }

    #[test]
    fn imei_round_trip_various() {
        for imei in ["000000000000000", "999999999999999", "123456789012345"] {
            let packed = encode_imei(imei).unwrap();
            assert_eq!(decode_imei(&packed), imei);
        }
    }

    #[test]
    fn encode_rejects_bad_input() {
        assert!(matches!(
            encode_imei("12345"),
            Err(DiagError::InvalidImei(_))
        ));
        assert!(matches!(
            encode_imei("35209900176148X"),
            Err(DiagError::InvalidImei(_))
        ));
    }

    #[test]
    fn connect_handshakes_with_version() {
        let mut client = DiagClient::new(MockTransport::new());
        // Device echoes the VERSION command with some payload.
        client
            .transport
            .queue_response(&diag::encode(DIAG_CMD_VERSION, b"SPRD3"));

        client.connect("/dev/ttyUSB1", 115_200).unwrap();
        assert!(client.is_connected());
    }

    #[test]
    fn connect_fails_without_response() {
        let mut client = DiagClient::new(MockTransport::new());
        let err = client.connect("/dev/ttyUSB1", 115_200).unwrap_err();
        assert!(matches!(err, DiagError::NoResponse(_)));
        assert!(!client.is_connected());
        assert!(!client.transport.is_open());
    }

    #[test]
    fn nv_read_strips_response_prefix() {
        let mut client = DiagClient::new(MockTransport::new());
        // response body: two prefix bytes after the command, then the item
        let mut body = vec![0x00, 0x05];
        body.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        client
            .transport
            .queue_response(&diag::encode(DIAG_CMD_NV_READ, &body));

        let item = client.read_nv_item(0x0005, 3).unwrap();
        assert_eq!(item, [0xAA, 0xBB, 0xCC]);

        // request carried LE id and length
        let writes = client.transport.get_writes();
        let sent = diag::decode(&writes[0]).unwrap();
        assert_eq!(sent, [DIAG_CMD_NV_READ, 0x05, 0x00, 0x03, 0x00]);
    }

    #[test]
    fn mismatched_response_command_is_rejected() {
        let mut client = DiagClient::new(MockTransport::new());
        client
            .transport
            .queue_response(&diag::encode(DIAG_CMD_NV_WRITE, &[]));

        assert!(matches!(
            client.send_command(DIAG_CMD_NV_READ, &[]),
            Err(DiagError::CommandMismatch {
                expected: DIAG_CMD_NV_READ,
                actual: DIAG_CMD_NV_WRITE,
            })
        ));
    }

    #[test]
    fn at_passthrough_appends_carriage_return() {
        let mut client = DiagClient::new(MockTransport::new());
        client
            .transport
            .queue_response(&diag::encode(DIAG_CMD_AT_COMMAND, b"OK\r\n"));

        let reply = client.send_at_command("AT+CGSN").unwrap();
        assert_eq!(reply, "OK");

        let writes = client.transport.get_writes();
        let sent = diag::decode(&writes[0]).unwrap();
        assert_eq!(&sent[1..], b"AT+CGSN\r");
    }
}

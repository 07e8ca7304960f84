//! Checksum primitives shared by the wire framings.
//!
//! Three distinct algorithms are in play:
//! - CRC16-CCITT MSB-first (poly 0x1021, init 0) for FDL2 HDLC frames,
//! - CRC16 LSB-first (poly 0x8408, init 0xFFFF, final XOR 0xFFFF) for
//!   diagnostics frames,
//! - the proprietary Spreadtrum checksum used for data verification once
//!   FDL1 has taken over.

/// CRC16-CCITT, MSB-first, polynomial 0x1021, initial value 0.
pub fn crc16_hdlc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// CRC16, LSB-first, polynomial 0x8408 (reversed 0x1021), initial value
/// 0xFFFF, final XOR 0xFFFF. Used by the diagnostics framing.
pub fn crc16_diag(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in data {
        crc ^= b as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }
    crc ^ 0xFFFF
}

/// Spreadtrum proprietary checksum.
///
/// Ones'-complement fold over little-endian 16-bit words (odd trailing
/// byte added alone), folded to 16 bits, inverted, then byte-swapped.
pub fn sprd_checksum(data: &[u8]) -> u16 {
    // Wide accumulator: the word sum exceeds 32 bits past ~128 KiB.
    let mut ctr: u64 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        ctr += u64::from(u16::from_le_bytes([pair[0], pair[1]]));
    }
    if let [last] = chunks.remainder() {
        ctr += u64::from(*last);
    }

    while ctr > 0xFFFF {
        ctr = (ctr >> 16) + (ctr & 0xFFFF);
    }
    (!(ctr as u16)).swap_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdlc_crc_known_vectors() {
        // XModem check value
        assert_eq!(crc16_hdlc(b"123456789"), 0x31C3);
        assert_eq!(crc16_hdlc(&[]), 0);
        assert_eq!(crc16_hdlc(&[0, 0, 0, 0]), 0);
    }

    #[test]
    fn diag_crc_known_vectors() {
        // X-25 check value
        assert_eq!(crc16_diag(b"123456789"), 0x906E);
        assert_eq!(crc16_diag(&[0x00]), 0xF078);
    }

    #[test]
    fn crcs_are_order_sensitive() {
        let a = [1u8, 2, 3, 4];
        let b = [1u8, 3, 2, 4];
        assert_ne!(crc16_hdlc(&a), crc16_hdlc(&b));
        assert_ne!(crc16_diag(&a), crc16_diag(&b));
    }

    #[test]
    fn sprd_checksum_fold_and_swap() {
        // 0x0201 + 0x03 = 0x0204; inverted 0xFDFB; swapped 0xFBFD
        assert_eq!(sprd_checksum(&[0x01, 0x02, 0x03]), 0xFBFD);
        assert_eq!(sprd_checksum(&[]), 0xFFFF);
        assert_eq!(sprd_checksum(&[0xFF, 0xFF, 0xFF, 0xFF]), 0x0000);
    }

    #[test]
    fn sprd_checksum_large_buffer() {
        // 128 Ki words of 0xFFFF sum to 0x1_FFFE_0000 and fold back
        // down to 0xFFFF.
        assert_eq!(sprd_checksum(&vec![0xFF; 256 * 1024]), 0x0000);
    }
}

//! Response status byte naming.
//!
//! Devices answer every command with a status byte; anything other than
//! ACK is reported to the caller with its known name attached.

use super::constants::*;

/// Look up the well-known name for a BSL response code.
pub fn response_name(code: u8) -> &'static str {
    match code {
        BSL_REP_ACK => "ACK",
        BSL_REP_VER => "VER",
        BSL_REP_INVALID_CMD => "INVALID_CMD",
        BSL_REP_UNKNOWN_CMD => "UNKNOWN_CMD",
        BSL_REP_OPERATION_FAILED => "OPERATION_FAILED",
        BSL_REP_NOT_SUPPORT_BAUDRATE => "NOT_SUPPORT_BAUDRATE",
        BSL_REP_DOWN_NOT_START => "DOWN_NOT_START",
        BSL_REP_DOWN_MULTI_START => "DOWN_MULTI_START",
        BSL_REP_DOWN_EARLY_END => "DOWN_EARLY_END",
        BSL_REP_DOWN_DEST_ERROR => "DOWN_DEST_ERROR",
        BSL_REP_DOWN_SIZE_ERROR => "DOWN_SIZE_ERROR",
        BSL_REP_VERIFY_ERROR => "VERIFY_ERROR",
        BSL_REP_NOT_VERIFY => "NOT_VERIFY",
        BSL_REP_READ_FLASH => "READ_FLASH",
        BSL_REP_READ_CHIP_TYPE => "READ_CHIP_TYPE",
        BSL_REP_INCOMPATIBLE_PARTITION => "INCOMPATIBLE_PARTITION",
        BSL_REP_ERROR_CHECKSUM => "ERROR_CHECKSUM",
        BSL_REP_CHECKSUM_DIFF => "CHECKSUM_DIFF",
        BSL_REP_WRITE_ERROR => "WRITE_ERROR",
        BSL_REP_FLASH_WRITTEN_PROTECTION => "FLASH_WRITTEN_PROTECTION",
        BSL_REP_PARTITION_TABLE => "PARTITION_TABLE",
        BSL_REP_UNSUPPORTED_COMMAND => "UNSUPPORTED_COMMAND",
        BSL_REP_LOG => "LOG",
        _ => "UNKNOWN",
    }
}

/// A status byte counts as success if it is ACK or the all-clear zero
/// some FDL builds answer with.
pub fn is_ack(code: u8) -> bool {
    code == BSL_REP_ACK || code == 0x00
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_names() {
        assert_eq!(response_name(0x80), "ACK");
        assert_eq!(response_name(0x84), "OPERATION_FAILED");
        assert_eq!(response_name(0xBA), "PARTITION_TABLE");
        assert_eq!(response_name(0x42), "UNKNOWN");
    }

    #[test]
    fn ack_accepts_zero() {
        assert!(is_ack(0x80));
        assert!(is_ack(0x00));
        assert!(!is_ack(0x84));
    }
}

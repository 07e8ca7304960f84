//! Protocol constants for the Spreadtrum BSL download protocol.
//!
//! Command and response codes match the vendor BSL command set spoken by
//! the BROM, FDL1 and FDL2 stages.

// ============================================================================
// Frame Tags
// ============================================================================

/// Packet tag for the BROM/FDL1 framing.
pub const TAG_BROM: u8 = 0xAE;

/// HDLC frame delimiter for the FDL2 and diagnostics framings.
pub const TAG_HDLC: u8 = 0x7E;

/// HDLC escape byte.
pub const HDLC_ESCAPE: u8 = 0x7D;

/// XOR mask applied to an escaped byte.
pub const HDLC_XOR: u8 = 0x20;

/// Flow id carried in the BROM packet header.
pub const BROM_FLOW_ID: u8 = 0xFF;

// ============================================================================
// Sync Bytes
// ============================================================================

/// Single sync byte sent to the BROM until it echoes back.
pub const BROM_SYNC: [u8; 1] = [0x7E];

/// Longer sync pattern used after FDL1 takes over.
pub const FDL1_SYNC: [u8; 4] = [0x7E, 0x7E, 0x7E, 0x7E];

/// Maximum BROM sync attempts.
pub const BROM_SYNC_ATTEMPTS: u32 = 100;

/// Maximum FDL1 resync attempts.
pub const FDL1_SYNC_ATTEMPTS: u32 = 10;

// ============================================================================
// Size Constants
// ============================================================================

/// Chunk size for loader (FDL1/FDL2) downloads.
pub const LOADER_CHUNK: usize = 4096;

/// Chunk size for partition reads/writes and image flashing.
pub const FLASH_CHUNK: usize = 64 * 1024;

/// Partition table record size (72-byte UTF-16 name + u32 size).
pub const PARTITION_RECORD_SIZE: usize = 76;

// ============================================================================
// BSL Commands (Host -> Device)
// ============================================================================

pub const BSL_CMD_CONNECT: u16 = 0x00;
pub const BSL_CMD_START_DATA: u16 = 0x01;
pub const BSL_CMD_MID_DATA: u16 = 0x02;
pub const BSL_CMD_END_DATA: u16 = 0x03;
pub const BSL_CMD_EXEC_DATA: u16 = 0x04;
pub const BSL_CMD_NORMAL_RESET: u16 = 0x05;
pub const BSL_CMD_READ_FLASH: u16 = 0x06;
pub const BSL_CMD_READ_CHIP_TYPE: u16 = 0x07;
pub const BSL_CMD_CHANGE_BAUD: u16 = 0x09;
pub const BSL_CMD_ERASE_FLASH: u16 = 0x0A;
pub const BSL_CMD_REPARTITION: u16 = 0x0B;
pub const BSL_CMD_READ_START: u16 = 0x10;
pub const BSL_CMD_READ_MIDST: u16 = 0x11;
pub const BSL_CMD_READ_END: u16 = 0x12;
pub const BSL_CMD_KEEP_CHARGE: u16 = 0x13;
pub const BSL_CMD_POWER_OFF: u16 = 0x17;
pub const BSL_CMD_DISABLE_TRANSCODE: u16 = 0x21;
pub const BSL_CMD_READ_PARTITION: u16 = 0x2D;
pub const BSL_CMD_UNLOCK: u16 = 0x30;
pub const BSL_CMD_READ_EFUSE: u16 = 0x60;
pub const BSL_CMD_CHECK_BAUD: u16 = 0x7E;
pub const BSL_CMD_END_PROCESS: u16 = 0x7F;

// ============================================================================
// BSL Responses (Device -> Host)
// ============================================================================

pub const BSL_REP_ACK: u8 = 0x80;
pub const BSL_REP_VER: u8 = 0x81;
pub const BSL_REP_INVALID_CMD: u8 = 0x82;
pub const BSL_REP_UNKNOWN_CMD: u8 = 0x83;
pub const BSL_REP_OPERATION_FAILED: u8 = 0x84;
pub const BSL_REP_NOT_SUPPORT_BAUDRATE: u8 = 0x85;
pub const BSL_REP_DOWN_NOT_START: u8 = 0x86;
pub const BSL_REP_DOWN_MULTI_START: u8 = 0x87;
pub const BSL_REP_DOWN_EARLY_END: u8 = 0x88;
pub const BSL_REP_DOWN_DEST_ERROR: u8 = 0x89;
pub const BSL_REP_DOWN_SIZE_ERROR: u8 = 0x8A;
pub const BSL_REP_VERIFY_ERROR: u8 = 0x8B;
pub const BSL_REP_NOT_VERIFY: u8 = 0x8C;
pub const BSL_REP_READ_FLASH: u8 = 0x93;
pub const BSL_REP_READ_CHIP_TYPE: u8 = 0x94;
pub const BSL_REP_INCOMPATIBLE_PARTITION: u8 = 0x96;
pub const BSL_REP_ERROR_CHECKSUM: u8 = 0xA0;
pub const BSL_REP_CHECKSUM_DIFF: u8 = 0xA1;
pub const BSL_REP_WRITE_ERROR: u8 = 0xA2;
pub const BSL_REP_FLASH_WRITTEN_PROTECTION: u8 = 0xB3;
pub const BSL_REP_PARTITION_TABLE: u8 = 0xBA;
pub const BSL_REP_UNSUPPORTED_COMMAND: u8 = 0xFE;
pub const BSL_REP_LOG: u8 = 0xFF;

// ============================================================================
// Diagnostics Commands
// ============================================================================

pub const DIAG_CMD_VERSION: u8 = 0x00;
pub const DIAG_CMD_IMEI_READ: u8 = 0x01;
pub const DIAG_CMD_IMEI_WRITE: u8 = 0x02;
pub const DIAG_CMD_NV_READ: u8 = 0x26;
pub const DIAG_CMD_NV_WRITE: u8 = 0x27;
pub const DIAG_CMD_RESTART: u8 = 0x29;
pub const DIAG_CMD_POWER_OFF: u8 = 0x3E;
pub const DIAG_CMD_AT_COMMAND: u8 = 0x4B;

/// NV item ids holding the IMEI for SIM slots 1 and 2.
pub const NV_ID_IMEI_SLOT1: u16 = 0x0005;
pub const NV_ID_IMEI_SLOT2: u16 = 0x0179;

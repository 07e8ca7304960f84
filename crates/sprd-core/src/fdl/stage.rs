//! Device stage tracking.

use std::fmt;

/// Connection stages of a download-mode session.
///
/// The stage determines which wire dialect and checksum the client
/// speaks; transitions only move forward until disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStage {
    Disconnected,
    /// Synchronized with the boot ROM.
    ConnectedRom,
    /// FDL1 executed and re-synchronized.
    Fdl1Loaded,
    /// FDL2 executed; full flashing command set available.
    Fdl2Loaded,
    Error,
}

impl fmt::Display for DeviceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStage::Disconnected => write!(f, "Disconnected"),
            DeviceStage::ConnectedRom => write!(f, "BROM"),
            DeviceStage::Fdl1Loaded => write!(f, "FDL1"),
            DeviceStage::Fdl2Loaded => write!(f, "FDL2"),
            DeviceStage::Error => write!(f, "Error"),
        }
    }
}

/// Frame checksum variant, tied 1:1 to the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    /// CRC16-CCITT, spoken by the boot ROM.
    Crc16,
    /// Spreadtrum ones'-complement checksum, spoken by the loaders.
    Proprietary,
}

impl DeviceStage {
    pub fn checksum_mode(self) -> ChecksumMode {
        match self {
            DeviceStage::Fdl1Loaded | DeviceStage::Fdl2Loaded => ChecksumMode::Proprietary,
            _ => ChecksumMode::Crc16,
        }
    }

    /// Whether commands are framed in the BROM dialect at this stage.
    pub fn uses_brom_framing(self) -> bool {
        !matches!(self, DeviceStage::Fdl1Loaded | DeviceStage::Fdl2Loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_follows_stage() {
        assert_eq!(DeviceStage::ConnectedRom.checksum_mode(), ChecksumMode::Crc16);
        assert_eq!(DeviceStage::Fdl1Loaded.checksum_mode(), ChecksumMode::Proprietary);
        assert_eq!(DeviceStage::Fdl2Loaded.checksum_mode(), ChecksumMode::Proprietary);
    }

    #[test]
    fn framing_follows_stage() {
        assert!(DeviceStage::ConnectedRom.uses_brom_framing());
        assert!(!DeviceStage::Fdl2Loaded.uses_brom_framing());
    }
}

//! Built-in chipset database.
//!
//! Maps the chip identifier reported by the BROM to the load addresses
//! FDL1/FDL2 must be placed at, plus per-platform quirks. Extended
//! identifiers carry the base chip id in their upper 16 bits, so lookup
//! falls back to `id >> 16` when the full id has no entry.

/// Storage medium behind the flash commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Emmc,
    Ufs,
    NorNand,
    SpiNor,
}

/// Rough platform class, used for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipCategory {
    FeaturePhone,
    Smartphone,
    FiveG,
    Wearable,
    Iot,
}

#[derive(Debug, Clone, Copy)]
pub struct ChipInfo {
    pub name: &'static str,
    pub fdl1_addr: u32,
    pub fdl2_addr: u32,
    /// Exec address for signature bypass (0 if not needed).
    pub exec_addr: u32,
    /// Whether the BROM refuses unsigned loaders without an exploit.
    pub requires_exploit: bool,
    pub storage: StorageType,
    pub category: ChipCategory,
}

const fn chip(
    name: &'static str,
    fdl1_addr: u32,
    fdl2_addr: u32,
    storage: StorageType,
    category: ChipCategory,
) -> ChipInfo {
    ChipInfo {
        name,
        fdl1_addr,
        fdl2_addr,
        exec_addr: 0,
        requires_exploit: false,
        storage,
        category,
    }
}

const fn exploit_chip(
    name: &'static str,
    fdl1_addr: u32,
    fdl2_addr: u32,
    exec_addr: u32,
    storage: StorageType,
    category: ChipCategory,
) -> ChipInfo {
    ChipInfo {
        name,
        fdl1_addr,
        fdl2_addr,
        exec_addr,
        requires_exploit: true,
        storage,
        category,
    }
}

use ChipCategory::*;
use StorageType::*;

static CHIPS: &[(u32, ChipInfo)] = &[
    // SC6xxx feature phone series
    (0x6500, chip("SC6500", 0x4000_4000, 0x1400_0000, NorNand, FeaturePhone)),
    (0x6530, chip("SC6530", 0x4000_4000, 0x1400_0000, NorNand, FeaturePhone)),
    (0x6531, chip("SC6531", 0x4000_4000, 0x1400_0000, NorNand, FeaturePhone)),
    (0x6533, chip("SC6533", 0x4000_4000, 0x1400_0000, NorNand, FeaturePhone)),
    (0x6600, chip("SC6600", 0x4000_4000, 0x1400_0000, NorNand, FeaturePhone)),
    (0x6610, chip("SC6610", 0x4000_4000, 0x1400_0000, NorNand, FeaturePhone)),
    (0x6620, chip("SC6620", 0x4000_4000, 0x1400_0000, NorNand, FeaturePhone)),
    (0x6800, chip("SC6800", 0x4000_4000, 0x1400_0000, NorNand, FeaturePhone)),
    (0x6531_0001, chip("SC6531E-FM", 0x4000_4000, 0x1400_0000, NorNand, FeaturePhone)),
    (0x6531_0002, chip("SC6531DA", 0x4000_4000, 0x1400_0000, NorNand, FeaturePhone)),
    (0x6531_0003, chip("SC6531H", 0x4000_4000, 0x1400_0000, NorNand, FeaturePhone)),
    // SC77xx legacy 3G/4G
    (0x7701, chip("SC7701", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x7702, chip("SC7702", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x7710, chip("SC7710", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x7715, chip("SC7715", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x7720, chip("SC7720", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x7727, chip("SC7727S", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x7730, chip("SC7730", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x7731, chip("SC7731", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x7731_0002, chip("SC7731E", 0x5500, 0x9EFF_FE00, Emmc, Smartphone)),
    (0x7731_0005, chip("SC7731EF", 0x5500, 0x9EFF_FE00, Emmc, Smartphone)),
    // SC85xx
    (0x8521, chip("SC8521E", 0x5500, 0x9EFF_FE00, Emmc, Wearable)),
    (0x8541, chip("SC8541E", 0x5500, 0x9EFF_FE00, Emmc, Smartphone)),
    (0x8551, chip("SC8551E", 0x5500, 0x9EFF_FE00, Emmc, Smartphone)),
    (0x8581, exploit_chip("SC8581", 0x6500_0800, 0x9EFF_FE00, 0x6501_2F48, Emmc, Smartphone)),
    (0x8581_0001, exploit_chip("SC8581A", 0x6500_0800, 0x9EFF_FE00, 0x6501_2F48, Emmc, Smartphone)),
    (0x8581_0002, exploit_chip("UIS8581", 0x5500, 0x9EFF_FE00, 0x6501_2F48, Emmc, Iot)),
    // SC96xx / SC98xx
    (0x9600, chip("SC9600", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x9620, chip("SC9620", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x9820, chip("SC9820", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x9820_0002, chip("SC9820E", 0x5500, 0x9EFF_FE00, Emmc, Smartphone)),
    (0x9830, chip("SC9830", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x9832, chip("SC9832", 0x5000, 0x8A80_0000, Emmc, Smartphone)),
    (0x9832_0002, chip("SC9832E", 0x5500, 0x9EFF_FE00, Emmc, Smartphone)),
    (0x9850, exploit_chip("SC9850", 0x6500_0000, 0x8C80_0000, 0x6501_2000, Emmc, Smartphone)),
    (0x9853, exploit_chip("SC9853i", 0x6500_0800, 0x9EFF_FE00, 0x6501_2F48, Emmc, Smartphone)),
    (0x9860, exploit_chip("SC9860", 0x6500_0000, 0x8C80_0000, 0x6501_2000, Emmc, Smartphone)),
    (0x9861, exploit_chip("SC9861", 0x6500_0000, 0x8C80_0000, 0x6501_2000, Emmc, Smartphone)),
    (0x9863, exploit_chip("SC9863A", 0x6500_0800, 0x9EFF_FE00, 0x6501_2F48, Emmc, Smartphone)),
    // Unisoc T series (4G)
    (0x0310, chip("T310", 0x5500, 0x9EFF_FE00, Emmc, Smartphone)),
    (0x0312, chip("UMS312", 0x5500, 0x9EFF_FE00, Emmc, Smartphone)),
    (0x0606, chip("T606", 0x5500, 0x9EFF_FE00, Emmc, Smartphone)),
    (0x9230, chip("UMS9230", 0x5500, 0x9EFF_FE00, Emmc, Smartphone)),
    (0x0610, exploit_chip("T610", 0x6500_0800, 0x9EFF_FE00, 0x6501_2F48, Emmc, Smartphone)),
    (0x0612, exploit_chip("T612", 0x6500_0800, 0x9EFF_FE00, 0x6501_2F48, Emmc, Smartphone)),
    (0x0616, exploit_chip("T616", 0x6500_0800, 0x9EFF_FE00, 0x6501_2F48, Emmc, Smartphone)),
    (0x0618, exploit_chip("T618", 0x6500_0800, 0x9EFF_FE00, 0x6501_2F48, Emmc, Smartphone)),
    (0x0512, exploit_chip("UMS512", 0x6500_0800, 0x9EFF_FE00, 0x6501_2F48, Emmc, Smartphone)),
    (0x0700, exploit_chip("T700", 0x6500_0800, 0xB4FF_FE00, 0x6501_2F48, Emmc, Smartphone)),
    (0x0760, exploit_chip("T760", 0x6500_0800, 0xB4FF_FE00, 0x6501_2F48, Emmc, Smartphone)),
    (0x0770, exploit_chip("T770", 0x6500_0800, 0xB4FF_FE00, 0x6501_2F48, Emmc, Smartphone)),
    // Unisoc T series (5G)
    (0x0820, chip("T820", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    (0x0900, chip("T900", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    (0x0740, chip("T740", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    (0x0750, chip("T750", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    (0x0765, chip("T765", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    (0x7510, chip("T7510", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    (0x7520, chip("T7520", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    (0x7525, chip("T7525", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    (0x7530, chip("T7530", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    (0x7560, chip("T7560", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    (0x7570, chip("T7570", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    (0x8000, chip("T8000", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    (0x8200, chip("T8200", 0x5500, 0x9F00_0000, Ufs, FiveG)),
    // 4G feature phones T1xx / W series
    (0x0107, chip("T107", 0x6200, 0x8010_0000, Emmc, FeaturePhone)),
    (0x0117, chip("T117", 0x6200, 0x8010_0000, Emmc, FeaturePhone)),
    (0x9107, chip("UMS9107", 0x6200, 0x8010_0000, Emmc, FeaturePhone)),
    (0x9117, chip("UMS9117", 0x6200, 0x8010_0000, Emmc, FeaturePhone)),
    (0x0217, chip("W217", 0x4000_4000, 0x1400_0000, NorNand, FeaturePhone)),
    // Wearable and IoT
    (0x6121, chip("UWS6121", 0x5500, 0x9EFF_FE00, SpiNor, Wearable)),
    (0x6152, chip("UWS6152", 0x5500, 0x9EFF_FE00, SpiNor, Wearable)),
    (0x7862_0001, chip("UIS7862", 0x5500, 0x9EFF_FE00, Emmc, Iot)),
    (0x8910_0001, chip("UIS8910DM", 0x5500, 0x9EFF_FE00, Emmc, Iot)),
];

fn find(id: u32) -> Option<&'static ChipInfo> {
    CHIPS.iter().find(|(k, _)| *k == id).map(|(_, v)| v)
}

/// Look up a chip by identifier, falling back to the base id in the
/// upper 16 bits for extended identifiers.
pub fn chip_info(chip_id: u32) -> Option<&'static ChipInfo> {
    find(chip_id).or_else(|| {
        if chip_id > 0xFFFF {
            find(chip_id >> 16)
        } else {
            None
        }
    })
}

/// Display name for a chip id, `Unknown (0x...)` if absent.
pub fn chip_name(chip_id: u32) -> String {
    match chip_info(chip_id) {
        Some(info) => info.name.to_string(),
        None => format!("Unknown (0x{chip_id:x})"),
    }
}

pub fn requires_exploit(chip_id: u32) -> bool {
    chip_info(chip_id).is_some_and(|c| c.requires_exploit)
}

pub fn exec_address(chip_id: u32) -> u32 {
    chip_info(chip_id).map_or(0, |c| c.exec_addr)
}

/// Default storage assumption when the chip is unknown.
pub fn storage_type(chip_id: u32) -> StorageType {
    chip_info(chip_id).map_or(StorageType::Emmc, |c| c.storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_lookup() {
        let info = chip_info(0x9863).unwrap();
        assert_eq!(info.name, "SC9863A");
        assert!(info.requires_exploit);
        assert_eq!(info.exec_addr, 0x6501_2F48);
    }

    #[test]
    fn extended_id_prefers_full_match() {
        // 0x65310002 has its own entry distinct from base 0x6531
        assert_eq!(chip_info(0x6531_0002).unwrap().name, "SC6531DA");
        assert_eq!(chip_info(0x6531).unwrap().name, "SC6531");
    }

    #[test]
    fn extended_id_falls_back_to_base() {
        // 0x98630001 has no entry; base 0x9863 catches it
        assert_eq!(chip_info(0x9863_0001).unwrap().name, "SC9863A");
    }

    #[test]
    fn unknown_chip() {
        assert!(chip_info(0x1234).is_none());
        assert_eq!(chip_name(0x1234), "Unknown (0x1234)");
        assert!(!requires_exploit(0x1234));
        assert_eq!(storage_type(0x1234), StorageType::Emmc);
    }
}

//! Android boot image inspection.
//!
//! Parses the `ANDROID!` header, tolerating the Spreadtrum secure-boot
//! wrapper (`SPRD-SECUREFLAG` prefix) by re-scanning for the real magic,
//! and sniffs the ramdisk compression format from its leading bytes.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

pub const BOOT_MAGIC: &[u8; 8] = b"ANDROID!";
pub const SPRD_SECURE_FLAG: &[u8] = b"SPRD-SECUREFLAG";

#[derive(Error, Debug)]
pub enum BootError {
    #[error("Data too short for a boot image: {0} bytes")]
    TooShort(usize),
    #[error("ANDROID! magic not found after secure header")]
    MagicNotFound,
    #[error("Invalid boot magic {0:?}")]
    BadMagic(String),
}

/// Ramdisk compression format, detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Unknown,
    Gzip,
    Lz4,
    Lz4Legacy,
    Bzip2,
    Xz,
    Lzma,
    Cpio,
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CompressionFormat::Unknown => "Unknown",
            CompressionFormat::Gzip => "GZip",
            CompressionFormat::Lz4 => "LZ4",
            CompressionFormat::Lz4Legacy => "LZ4 (legacy)",
            CompressionFormat::Bzip2 => "BZip2",
            CompressionFormat::Xz => "XZ",
            CompressionFormat::Lzma => "LZMA",
            CompressionFormat::Cpio => "CPIO (uncompressed)",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct BootHeader {
    pub kernel_size: u32,
    pub kernel_addr: u32,
    pub ramdisk_size: u32,
    pub ramdisk_addr: u32,
    pub second_size: u32,
    pub second_addr: u32,
    pub tags_addr: u32,
    pub page_size: u32,
    pub header_version: u32,
    pub os_version: u32,
    pub name: String,
    pub cmdline: String,
    pub extra_cmdline: String,
    pub id: [u32; 8],
    pub base_addr: u32,
}

#[derive(Debug, Clone)]
pub struct BootImageInfo {
    pub header: BootHeader,
    pub has_sprd_secure_header: bool,
    pub kernel_offset: usize,
    pub ramdisk_offset: usize,
    pub second_offset: usize,
    pub ramdisk_format: CompressionFormat,
}

/// Parse a boot image from its raw bytes.
pub fn parse(data: &[u8]) -> Result<BootImageInfo, BootError> {
    if data.len() < 1024 {
        return Err(BootError::TooShort(data.len()));
    }

    let mut offset = 0;
    let has_sprd_secure_header = data.starts_with(SPRD_SECURE_FLAG);
    if has_sprd_secure_header {
        offset = data
            .windows(BOOT_MAGIC.len())
            .position(|w| w == BOOT_MAGIC)
            .ok_or(BootError::MagicNotFound)?;
    }

    if data.len() < offset + 1632 {
        return Err(BootError::TooShort(data.len()));
    }
    if &data[offset..offset + 8] != BOOT_MAGIC {
        return Err(BootError::BadMagic(
            String::from_utf8_lossy(&data[offset..offset + 8]).into_owned(),
        ));
    }

    let header = parse_header(&data[offset..]);
    let page_size = if header.page_size > 0 {
        header.page_size as usize
    } else {
        4096
    };
    let kernel_pages = (header.kernel_size as usize).div_ceil(page_size);
    let ramdisk_pages = (header.ramdisk_size as usize).div_ceil(page_size);

    let kernel_offset = offset + page_size;
    let ramdisk_offset = kernel_offset + page_size * kernel_pages;
    let second_offset = ramdisk_offset + page_size * ramdisk_pages;

    let ramdisk_end = (ramdisk_offset + header.ramdisk_size as usize).min(data.len());
    let ramdisk_format = if ramdisk_offset < data.len() {
        detect_compression(&data[ramdisk_offset..ramdisk_end])
    } else {
        CompressionFormat::Unknown
    };

    Ok(BootImageInfo {
        header,
        has_sprd_secure_header,
        kernel_offset,
        ramdisk_offset,
        second_offset,
        ramdisk_format,
    })
}

fn ascii_field(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .chars()
        .filter(|&c| c != '\0')
        .collect()
}

fn parse_header(data: &[u8]) -> BootHeader {
    let kernel_addr = LittleEndian::read_u32(&data[12..16]);
    let mut id = [0u32; 8];
    for (i, slot) in id.iter_mut().enumerate() {
        *slot = LittleEndian::read_u32(&data[576 + i * 4..580 + i * 4]);
    }

    BootHeader {
        kernel_size: LittleEndian::read_u32(&data[8..12]),
        kernel_addr,
        ramdisk_size: LittleEndian::read_u32(&data[16..20]),
        ramdisk_addr: LittleEndian::read_u32(&data[20..24]),
        second_size: LittleEndian::read_u32(&data[24..28]),
        second_addr: LittleEndian::read_u32(&data[28..32]),
        tags_addr: LittleEndian::read_u32(&data[32..36]),
        page_size: LittleEndian::read_u32(&data[36..40]),
        header_version: LittleEndian::read_u32(&data[40..44]),
        os_version: LittleEndian::read_u32(&data[44..48]),
        name: ascii_field(&data[48..64]),
        cmdline: ascii_field(&data[64..64 + 512]),
        extra_cmdline: ascii_field(&data[608..608 + 1024]),
        id,
        base_addr: kernel_addr.saturating_sub(0x8000),
    }
}

/// Sniff a compression format from leading magic bytes.
pub fn detect_compression(data: &[u8]) -> CompressionFormat {
    if data.len() < 4 {
        return CompressionFormat::Unknown;
    }
    match data {
        [0x1F, 0x8B, ..] => CompressionFormat::Gzip,
        [0x04, 0x22, 0x4D, 0x18, ..] => CompressionFormat::Lz4,
        [0x02, 0x21, 0x4C, 0x18, ..] => CompressionFormat::Lz4Legacy,
        [0x42, 0x5A, 0x68, ..] => CompressionFormat::Bzip2,
        [0xFD, 0x37, 0x7A, 0x58, ..] => CompressionFormat::Xz,
        [0x5D, 0x00, 0x00, ..] => CompressionFormat::Lzma,
        _ if data.len() >= 6 && (&data[..6] == b"070701" || &data[..6] == b"070702") => {
            CompressionFormat::Cpio
        }
        _ => CompressionFormat::Unknown,
    }
}

/// Render the packed `os_version` field as a human-readable string.
pub fn android_version(os_version: u32) -> String {
    if os_version == 0 {
        return "Unknown".to_string();
    }
    let major = (os_version >> 25) & 0x7F;
    let minor = (os_version >> 18) & 0x7F;
    let patch = (os_version >> 11) & 0x7F;
    let year = ((os_version >> 4) & 0x7F) + 2000;
    let month = os_version & 0x0F;
    format!("Android {major}.{minor}.{patch} ({year}-{month:02})")
}

//! PAC firmware container.
//!
//! A PAC file is a 2124-byte header followed by payload data and a file
//! table of 2580-byte entries. Strings are UTF-16LE. The table only
//! stores 32-bit data offsets, so containers beyond 4 GiB need the
//! offsets reconstructed from the low words (see `entry`).

mod entry;

pub use entry::PacEntry;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::descriptor::FirmwareDescriptor;

pub const PAC_MAGIC: u32 = 0xFFFA_FFFA;

const PAC_HEADER_LEN: usize = 2124;
const PAC_MAGIC_OFFSET: usize = 2116;
const PAC_ENTRY_LEN: usize = 2580;
const EXTRACT_CHUNK: usize = 1024 * 1024;

const VERSION_BP_R1: &str = "BP_R1.0.0";
const VERSION_BP_R2: &str = "BP_R2.0.1";

#[derive(Error, Debug)]
pub enum PacError {
    #[error("Invalid PAC magic 0x{0:08X} (expected 0xFFFAFFFA)")]
    BadMagic(u32),
    #[error("PAC header truncated: {0} bytes")]
    TruncatedHeader(usize),
    #[error("PAC file table truncated: expected {expected} bytes, got {actual}")]
    TruncatedTable { expected: usize, actual: usize },
    #[error("No entry with id {0:?} in container")]
    NoSuchEntry(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode a NUL-terminated UTF-16LE string from a fixed-size field.
pub(crate) fn read_utf16(field: &[u8]) -> String {
    let units: Vec<u16> = field
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Container format revision, from the header version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacVersion {
    BpR1,
    BpR2,
}

#[derive(Debug, Clone)]
pub struct PacHeader {
    pub version_string: String,
    pub version: PacVersion,
    pub product_name: String,
    pub firmware_version: String,
    pub file_count: i32,
    pub table_offset: u32,
}

/// An opened PAC container with its file table resolved.
pub struct PacArchive<R> {
    reader: R,
    header: PacHeader,
    entries: Vec<PacEntry>,
    pac_size: u64,
    descriptor: Option<FirmwareDescriptor>,
}

impl PacArchive<File> {
    pub fn open_path(path: &Path) -> Result<Self, PacError> {
        let file = File::open(path)?;
        Self::open(file)
    }
}

impl<R: Read + Seek> PacArchive<R> {
    pub fn open(mut reader: R) -> Result<Self, PacError> {
        let pac_size = reader.seek(SeekFrom::End(0))?;

        let mut header_buf = vec![0u8; PAC_HEADER_LEN];
        reader.seek(SeekFrom::Start(0))?;
        read_exact_or(&mut reader, &mut header_buf)
            .map_err(|_| PacError::TruncatedHeader(pac_size.min(PAC_HEADER_LEN as u64) as usize))?;

        let magic = LittleEndian::read_u32(&header_buf[PAC_MAGIC_OFFSET..PAC_MAGIC_OFFSET + 4]);
        if magic != PAC_MAGIC {
            return Err(PacError::BadMagic(magic));
        }

        let version_string = read_utf16(&header_buf[0..48]);
        let version = match version_string.as_str() {
            VERSION_BP_R1 => PacVersion::BpR1,
            VERSION_BP_R2 => PacVersion::BpR2,
            other => {
                tracing::warn!(version = %other, "Unknown PAC version, parsing as BP_R2");
                PacVersion::BpR2
            }
        };

        let header = PacHeader {
            version_string,
            version,
            product_name: read_utf16(&header_buf[52..52 + 512]),
            firmware_version: read_utf16(&header_buf[564..564 + 512]),
            file_count: LittleEndian::read_i32(&header_buf[1076..1080]),
            table_offset: LittleEndian::read_u32(&header_buf[1080..1084]),
        };

        tracing::info!(
            version = %header.version_string,
            product = %header.product_name,
            firmware = %header.firmware_version,
            files = header.file_count,
            "Opened PAC container"
        );

        let mut entries = Self::read_table(&mut reader, &header)?;
        entry::reconstruct_offsets(&mut entries, pac_size);

        Ok(Self {
            reader,
            header,
            entries,
            pac_size,
            descriptor: None,
        })
    }

    fn read_table(reader: &mut R, header: &PacHeader) -> Result<Vec<PacEntry>, PacError> {
        let count = header.file_count.max(0) as usize;
        let total = count * PAC_ENTRY_LEN;
        let mut buf = vec![0u8; total];
        reader.seek(SeekFrom::Start(u64::from(header.table_offset)))?;
        read_exact_or(reader, &mut buf).map_err(|actual| PacError::TruncatedTable {
            expected: total,
            actual,
        })?;

        buf.chunks_exact(PAC_ENTRY_LEN).map(PacEntry::parse).collect()
    }

    pub fn header(&self) -> &PacHeader {
        &self.header
    }

    pub fn size(&self) -> u64 {
        self.pac_size
    }

    /// Attach a pre-parsed firmware descriptor; callers consult it for
    /// loader-address and file-selection overrides.
    pub fn set_descriptor(&mut self, descriptor: FirmwareDescriptor) {
        self.descriptor = Some(descriptor);
    }

    pub fn descriptor(&self) -> Option<&FirmwareDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn entries(&self) -> &[PacEntry] {
        &self.entries
    }

    pub fn find(&self, id: &str) -> Option<&PacEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Read from inside an entry's payload region.
    pub fn read_at(&mut self, id: &str, offset: u64, buf: &mut [u8]) -> Result<(), PacError> {
        let entry = self
            .find(id)
            .ok_or_else(|| PacError::NoSuchEntry(id.to_string()))?;
        let start = entry.real_offset + offset;
        self.reader.seek(SeekFrom::Start(start))?;
        self.reader.read_exact(buf)?;
        Ok(())
    }

    /// Read an entry's declared file contents in full.
    pub fn read_entry(&mut self, id: &str) -> Result<Vec<u8>, PacError> {
        let size = self
            .find(id)
            .ok_or_else(|| PacError::NoSuchEntry(id.to_string()))?
            .file_size as usize;
        let mut buf = vec![0u8; size];
        self.read_at(id, 0, &mut buf)?;
        Ok(buf)
    }

    /// Extract every participating entry into a directory.
    pub fn extract_to(&mut self, dest: &Path) -> Result<(), PacError> {
        std::fs::create_dir_all(dest)?;

        let targets: Vec<(String, String, u64, u64)> = self
            .entries
            .iter()
            .filter(|e| e.participates())
            .map(|e| (e.id.clone(), e.name.clone(), e.real_offset, e.real_size))
            .collect();

        let mut chunk = vec![0u8; EXTRACT_CHUNK];
        for (id, name, offset, size) in targets {
            tracing::info!(id = %id, file = %name, bytes = size, "Extracting entry");
            let mut out = File::create(dest.join(&name))?;
            let mut done: u64 = 0;
            while done < size {
                let take = ((size - done) as usize).min(EXTRACT_CHUNK);
                self.reader.seek(SeekFrom::Start(offset + done))?;
                self.reader.read_exact(&mut chunk[..take])?;
                out.write_all(&chunk[..take])?;
                done += take as u64;
            }
        }
        Ok(())
    }
}

/// `read_exact` that reports how many bytes were actually available.
fn read_exact_or<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(filled),
            Ok(n) => filled += n,
            Err(_) => return Err(filled),
        }
    }
    Ok(())
}

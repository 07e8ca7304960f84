//! Android sparse image expansion.
//!
//! Sparse images carry a 28-byte header followed by chunk records (RAW,
//! FILL, DONT_CARE, CRC32). The expander walks the chunk list once and
//! yields dense output in caller-sized slices, so an image larger than
//! memory never has to be materialized.

use std::io;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

pub const SPARSE_MAGIC: u32 = 0xED26_FF3A;

const FILE_HEADER_LEN: usize = 28;
const CHUNK_HEADER_LEN: usize = 12;

const CHUNK_RAW: u16 = 0xCAC1;
const CHUNK_FILL: u16 = 0xCAC2;
const CHUNK_DONT_CARE: u16 = 0xCAC3;
const CHUNK_CRC32: u16 = 0xCAC4;

#[derive(Error, Debug)]
pub enum SparseError {
    #[error("Not a sparse image")]
    NotSparse,
    #[error("Sparse header too short: {0} bytes")]
    HeaderTooShort(usize),
    #[error("Unknown sparse chunk type 0x{0:04X}")]
    UnknownChunkType(u16),
    #[error("IO error reading sparse image: {0}")]
    Io(#[from] io::Error),
}

/// Parsed sparse file header.
#[derive(Debug, Clone, Copy)]
pub struct SparseHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub file_header_size: u16,
    pub chunk_header_size: u16,
    pub block_size: u32,
    pub total_blocks: u32,
    pub total_chunks: u32,
    pub image_checksum: u32,
}

impl SparseHeader {
    pub fn parse(data: &[u8]) -> Result<Self, SparseError> {
        if data.len() < FILE_HEADER_LEN {
            return Err(SparseError::HeaderTooShort(data.len()));
        }
        if LittleEndian::read_u32(&data[0..4]) != SPARSE_MAGIC {
            return Err(SparseError::NotSparse);
        }
        Ok(Self {
            major_version: LittleEndian::read_u16(&data[4..6]),
            minor_version: LittleEndian::read_u16(&data[6..8]),
            file_header_size: LittleEndian::read_u16(&data[8..10]),
            chunk_header_size: LittleEndian::read_u16(&data[10..12]),
            block_size: LittleEndian::read_u32(&data[12..16]),
            total_blocks: LittleEndian::read_u32(&data[16..20]),
            total_chunks: LittleEndian::read_u32(&data[20..24]),
            image_checksum: LittleEndian::read_u32(&data[24..28]),
        })
    }

    /// Size of the dense image this file expands to.
    pub fn unsparsed_size(&self) -> u64 {
        u64::from(self.total_blocks) * u64::from(self.block_size)
    }
}

/// Check the 4-byte magic without parsing the full header.
pub fn is_sparse(prefix: &[u8]) -> bool {
    prefix.len() >= 4 && LittleEndian::read_u32(&prefix[0..4]) == SPARSE_MAGIC
}

/// Lazy sparse expander over a random-access source.
///
/// `read_at` fills the buffer from the given absolute file offset. Each
/// iterator item is exactly `target_size` bytes except possibly the
/// last.
pub struct SparseStream<F> {
    read_at: F,
    header: SparseHeader,
    offset: u64,
    chunks_read: u32,
    pending: Vec<u8>,
    target_size: usize,
    failed: bool,
}

impl<F> SparseStream<F>
where
    F: FnMut(u64, &mut [u8]) -> io::Result<()>,
{
    pub fn new(mut read_at: F, target_size: usize) -> Result<Self, SparseError> {
        let mut header_buf = [0u8; FILE_HEADER_LEN];
        read_at(0, &mut header_buf)?;
        let header = SparseHeader::parse(&header_buf)?;
        Ok(Self {
            read_at,
            offset: u64::from(header.file_header_size),
            header,
            chunks_read: 0,
            pending: Vec::new(),
            target_size,
            failed: false,
        })
    }

    pub fn header(&self) -> &SparseHeader {
        &self.header
    }

    /// Pull one chunk record into the pending buffer.
    fn read_chunk(&mut self) -> Result<(), SparseError> {
        let mut hdr = [0u8; CHUNK_HEADER_LEN];
        (self.read_at)(self.offset, &mut hdr)?;
        self.offset += CHUNK_HEADER_LEN as u64;
        self.chunks_read += 1;

        let chunk_type = LittleEndian::read_u16(&hdr[0..2]);
        let chunk_blocks = LittleEndian::read_u32(&hdr[4..8]);
        let data_size = chunk_blocks as usize * self.header.block_size as usize;

        match chunk_type {
            CHUNK_RAW => {
                let start = self.pending.len();
                self.pending.resize(start + data_size, 0);
                (self.read_at)(self.offset, &mut self.pending[start..])?;
                self.offset += data_size as u64;
            }
            CHUNK_FILL => {
                let mut fill = [0u8; 4];
                (self.read_at)(self.offset, &mut fill)?;
                self.offset += 4;
                self.pending
                    .extend(fill.iter().cycle().take(data_size).copied());
            }
            CHUNK_DONT_CARE => {
                // Reads back as zeros on freshly erased flash.
                let start = self.pending.len();
                self.pending.resize(start + data_size, 0);
            }
            CHUNK_CRC32 => {
                self.offset += 4;
            }
            other => return Err(SparseError::UnknownChunkType(other)),
        }
        Ok(())
    }
}

impl<F> Iterator for SparseStream<F>
where
    F: FnMut(u64, &mut [u8]) -> io::Result<()>,
{
    type Item = Result<Vec<u8>, SparseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while self.pending.len() < self.target_size && self.chunks_read < self.header.total_chunks
        {
            if let Err(e) = self.read_chunk() {
                self.failed = true;
                return Some(Err(e));
            }
        }
        if self.pending.is_empty() {
            return None;
        }
        let take = self.pending.len().min(self.target_size);
        let rest = self.pending.split_off(take);
        let out = std::mem::replace(&mut self.pending, rest);
        Some(Ok(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(block_size: u32, total_blocks: u32, total_chunks: u32) -> Vec<u8> {
        let mut h = vec![0u8; FILE_HEADER_LEN];
        LittleEndian::write_u32(&mut h[0..4], SPARSE_MAGIC);
        LittleEndian::write_u16(&mut h[4..6], 1);
        LittleEndian::write_u16(&mut h[8..10], FILE_HEADER_LEN as u16);
        LittleEndian::write_u16(&mut h[10..12], CHUNK_HEADER_LEN as u16);
        LittleEndian::write_u32(&mut h[12..16], block_size);
        LittleEndian::write_u32(&mut h[16..20], total_blocks);
        LittleEndian::write_u32(&mut h[20..24], total_chunks);
        h
    }

    fn chunk_header(chunk_type: u16, blocks: u32, extra: u32) -> Vec<u8> {
        let mut h = vec![0u8; CHUNK_HEADER_LEN];
        LittleEndian::write_u16(&mut h[0..2], chunk_type);
        LittleEndian::write_u32(&mut h[4..8], blocks);
        LittleEndian::write_u32(&mut h[8..12], CHUNK_HEADER_LEN as u32 + extra);
        h
    }

    fn expand(image: Vec<u8>, target: usize) -> Vec<Vec<u8>> {
        let stream = SparseStream::new(
            move |off, buf: &mut [u8]| {
                let off = off as usize;
                buf.copy_from_slice(&image[off..off + buf.len()]);
                Ok(())
            },
            target,
        )
        .unwrap();
        stream.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn detects_magic() {
        assert!(is_sparse(&SPARSE_MAGIC.to_le_bytes()));
        assert!(!is_sparse(&[0xED, 0x26]));
        assert!(!is_sparse(&[0, 0, 0, 0]));
    }

    #[test]
    fn expands_raw_fill_dontcare_and_skips_crc() {
        // block size 4: one RAW block, one FILL block, one DONT_CARE
        // block, one CRC32 record
        let mut image = header_bytes(4, 3, 4);
        image.extend(chunk_header(CHUNK_RAW, 1, 4));
        image.extend([0xDE, 0xAD, 0xBE, 0xEF]);
        image.extend(chunk_header(CHUNK_FILL, 1, 4));
        image.extend(0xA1B2C3D4u32.to_le_bytes());
        image.extend(chunk_header(CHUNK_DONT_CARE, 1, 0));
        image.extend(chunk_header(CHUNK_CRC32, 0, 4));
        image.extend([0u8; 4]);

        let slices = expand(image, 12);
        let dense: Vec<u8> = slices.into_iter().flatten().collect();
        assert_eq!(&dense[0..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&dense[4..8], &0xA1B2C3D4u32.to_le_bytes());
        assert_eq!(&dense[8..12], &[0, 0, 0, 0]);
        assert_eq!(dense.len(), 12);
    }

    #[test]
    fn slices_to_target_size_with_short_tail() {
        let mut image = header_bytes(4, 3, 1);
        image.extend(chunk_header(CHUNK_RAW, 3, 12));
        image.extend((0u8..12).collect::<Vec<_>>());

        let slices = expand(image, 5);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0], [0, 1, 2, 3, 4]);
        assert_eq!(slices[1], [5, 6, 7, 8, 9]);
        assert_eq!(slices[2], [10, 11]);
    }

    #[test]
    fn unknown_chunk_type_fails() {
        let mut image = header_bytes(4, 1, 1);
        image.extend(chunk_header(0xCAFE, 1, 0));

        let mut stream = SparseStream::new(
            move |off, buf: &mut [u8]| {
                let off = off as usize;
                buf.copy_from_slice(&image[off..off + buf.len()]);
                Ok(())
            },
            16,
        )
        .unwrap();
        assert!(matches!(
            stream.next(),
            Some(Err(SparseError::UnknownChunkType(0xCAFE)))
        ));
        assert!(stream.next().is_none());
    }

    #[test]
    fn header_reports_unsparsed_size() {
        let h = SparseHeader::parse(&header_bytes(4096, 256, 1)).unwrap();
        assert_eq!(h.unsparsed_size(), 1024 * 1024);
        assert!(matches!(
            SparseHeader::parse(&[0u8; 28]),
            Err(SparseError::NotSparse)
        ));
    }
}

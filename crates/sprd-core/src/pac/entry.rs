//! PAC file-table entries and 64-bit offset reconstruction.

use byteorder::{ByteOrder, LittleEndian};

use super::{read_utf16, PacError, PAC_ENTRY_LEN};

/// One row of the PAC file table.
///
/// The on-disk entry only stores the low 32 bits of the data offset;
/// `real_offset`/`real_size` are reconstructed from the low words of the
/// whole table once it has been read.
#[derive(Debug, Clone)]
pub struct PacEntry {
    pub id: String,
    pub name: String,
    pub file_size: u32,
    pub flag: i32,
    pub data_offset_low: u32,
    pub checksum: u32,
    pub real_offset: u64,
    pub real_size: u64,
}

impl PacEntry {
    pub(super) fn parse(record: &[u8]) -> Result<Self, PacError> {
        if record.len() < PAC_ENTRY_LEN {
            return Err(PacError::TruncatedTable {
                expected: PAC_ENTRY_LEN,
                actual: record.len(),
            });
        }
        Ok(Self {
            id: read_utf16(&record[4..4 + 512]),
            name: read_utf16(&record[516..516 + 512]),
            file_size: LittleEndian::read_u32(&record[1540..1544]),
            flag: LittleEndian::read_i32(&record[1544..1548]),
            data_offset_low: LittleEndian::read_u32(&record[1552..1556]),
            checksum: LittleEndian::read_u32(&record[1560..1564]),
            real_offset: 0,
            real_size: 0,
        })
    }

    /// Whether this entry carries payload bytes in the container.
    pub fn participates(&self) -> bool {
        self.file_size > 0 && self.data_offset_low > 0
    }
}

const WORD: u64 = 1 << 32;

/// Gap between two low offsets, modulo 2^32.
fn low_gap(start: u32, end_low: u64) -> u64 {
    end_low.wrapping_sub(u64::from(start)) & (WORD - 1)
}

/// Reconstruct 64-bit offsets and sizes for containers larger than
/// 4 GiB.
///
/// Participating entries are laid out back to back; each full offset is
/// the current position with its low word replaced by the stored value,
/// bumped by 2^32 when that would move backwards. Sizes come from the
/// low-word gap to the next participant (the container tail for the
/// last one). A `Super` entry can itself exceed 4 GiB: when the summed
/// gaps leave more than 2 GiB of the container unaccounted for, whole
/// 4 GiB wraps are folded back into its size.
pub(super) fn reconstruct_offsets(entries: &mut [PacEntry], pac_size: u64) {
    let idx: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.participates())
        .map(|(i, _)| i)
        .collect();

    let lows: Vec<u32> = idx.iter().map(|&i| entries[i].data_offset_low).collect();

    let end_low = |pos: usize| -> u64 {
        if pos + 1 < lows.len() {
            u64::from(lows[pos + 1])
        } else {
            pac_size & (WORD - 1)
        }
    };

    let mut cur: u64 = 0;
    for (pos, &i) in idx.iter().enumerate() {
        let low = u64::from(lows[pos]);
        let mut offset = (cur & !(WORD - 1)) | low;
        if offset < cur {
            offset += WORD;
        }

        let gap = low_gap(lows[pos], end_low(pos));
        let mut size = gap;

        if entries[i].id == "Super" {
            // Sum every participant's low-word gap plus a fixed 1 MiB
            // of container overhead; if far more of the file remains
            // unaccounted for, the gap wrapped around 4 GiB boundaries.
            let mut expected: u64 = 1024 * 1024;
            for qpos in 0..lows.len() {
                if qpos == pos {
                    expected += gap;
                } else {
                    expected += low_gap(lows[qpos], end_low(qpos));
                }
            }
            if pac_size > expected + 0x8000_0000 {
                let missing = pac_size - expected;
                let wraps = (missing + 0x8000_0000) / WORD;
                size += wraps * WORD;
                tracing::debug!(entry = %entries[i].id, size, "Expanded entry past 4 GiB");
            }
        }

        entries[i].real_offset = offset;
        entries[i].real_size = size;
        cur = offset + size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, size: u32, low: u32) -> PacEntry {
        PacEntry {
            id: id.to_string(),
            name: format!("{id}.img"),
            file_size: size,
            flag: 0,
            data_offset_low: low,
            checksum: 0,
            real_offset: 0,
            real_size: 0,
        }
    }

    #[test]
    fn small_container_offsets_pass_through() {
        let mut entries = vec![
            entry("FDL", 0x1000, 0x800),
            entry("FDL2", 0x2000, 0x1800),
            entry("boot", 0x4000, 0x3800),
        ];
        reconstruct_offsets(&mut entries, 0x7800);

        assert_eq!(entries[0].real_offset, 0x800);
        assert_eq!(entries[0].real_size, 0x1000);
        assert_eq!(entries[1].real_offset, 0x1800);
        assert_eq!(entries[1].real_size, 0x2000);
        assert_eq!(entries[2].real_offset, 0x3800);
        assert_eq!(entries[2].real_size, 0x4000);
    }

    #[test]
    fn non_participants_are_skipped() {
        let mut entries = vec![
            entry("empty", 0, 0x800),
            entry("boot", 0x1000, 0x800),
            entry("virtual", 0x10, 0),
        ];
        reconstruct_offsets(&mut entries, 0x1800);

        assert_eq!(entries[0].real_size, 0);
        assert_eq!(entries[1].real_offset, 0x800);
        assert_eq!(entries[1].real_size, 0x1000);
        assert_eq!(entries[2].real_size, 0);
    }

    #[test]
    fn offsets_past_4gib_get_upper_bits() {
        // Second entry's low offset is below the first's, so the gap
        // wraps and the entry lands in the next 4 GiB window.
        let pac_size = 0x1_0000_2000;
        let mut entries = vec![
            entry("big", 0xFFFF_F000, 0x2000),
            entry("tail", 0x1000, 0x1000),
        ];
        reconstruct_offsets(&mut entries, pac_size);

        assert_eq!(entries[0].real_offset, 0x2000);
        assert_eq!(entries[0].real_size, 0xFFFF_F000);
        assert_eq!(entries[1].real_offset, 0x1_0000_1000);
        assert_eq!(entries[1].real_size, 0x1000);
    }

    #[test]
    fn super_entry_absorbs_wrapped_size() {
        // Container of ~8 GiB where the low-word gaps only explain a
        // few MiB: the Super entry gains two 4 GiB wraps.
        let pac_size: u64 = 8 * 1024 * 1024 * 1024 + 0x3000;
        let mut entries = vec![
            entry("boot", 0x1000, 0x1000),
            entry("Super", 0xFFFF_FFFF, 0x2000),
        ];
        reconstruct_offsets(&mut entries, pac_size);

        let gap = low_gap(0x2000, pac_size & 0xFFFF_FFFF);
        assert_eq!(entries[1].real_offset, 0x2000);
        assert_eq!(entries[1].real_size, gap + 2 * (1u64 << 32));
    }

    #[test]
    fn super_entry_without_shortfall_is_untouched() {
        let mut entries = vec![
            entry("boot", 0x1000, 0x1000),
            entry("Super", 0x4000, 0x2000),
        ];
        reconstruct_offsets(&mut entries, 0x6000);
        assert_eq!(entries[1].real_size, 0x4000);
    }
}

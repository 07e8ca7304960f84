//! Download-mode client.
//!
//! Drives a device from boot ROM synchronization through loader
//! download into the full flashing command set. The dialect and
//! checksum follow the current [`DeviceStage`]; every operation is
//! built from the same send-one-frame / await-one-response primitive.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::exploit::{ExploitError, ExploitStrategy, MemoryWriter};
use super::stage::DeviceStage;
use crate::config::FlashConfig;
use crate::events::{FlashEvent, FlashObserver, FrameDirection};
use crate::pac::{read_utf16, PacArchive, PacError};
use crate::protocol::*;
use crate::sparse::{self, SparseError, SparseHeader, SparseStream};
use crate::transport::{SerialTransport, TransportError};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const READ_SLICE_TIMEOUT: Duration = Duration::from_millis(100);
const BROM_SYNC_READ_TIMEOUT: Duration = Duration::from_millis(50);
const EXEC_SETTLE: Duration = Duration::from_millis(200);
const RESYNC_WAIT: Duration = Duration::from_millis(100);
const BAUD_SETTLE: Duration = Duration::from_millis(100);

const NV_PARTITIONS: &[&str] = &["nv_w", "nv_c", "fixnv", "runtimenv", "prodnv", "phasecheck"];
const CALIBRATION_PARTITIONS: &[&str] = &["proinfo", "persist", "misc", "metadata"];
const FRP_PARTITIONS: &[&str] = &["persist", "frp", "config"];
const FALLBACK_PARTITIONS: &[&str] = &[
    "boot", "recovery", "system", "vendor", "userdata", "cache", "misc", "vbmeta",
];

const DM_VERITY_FLAG_OFFSET: usize = 0x7B;
const VBMETA_FALLBACK_SIZE: u64 = 256 * 1024;
const DRY_RUN_CHIP_ID: u32 = 0x9863;

#[derive(Error, Debug)]
pub enum FdlError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Device returned 0x{code:02X} ({name})")]
    Status { code: u8, name: &'static str },

    #[error("Operation requires stage {required}, device is at {actual}")]
    StagePrecondition {
        required: DeviceStage,
        actual: DeviceStage,
    },

    #[error("Timed out waiting for {operation}")]
    Timeout { operation: &'static str },

    #[error(transparent)]
    Exploit(#[from] ExploitError),

    #[error("Partition {0:?} not found")]
    PartitionNotFound(String),

    #[error("Container error: {0}")]
    Pac(#[from] PacError),

    #[error("Sparse image error: {0}")]
    Sparse(#[from] SparseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of the device's partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub name: String,
    /// Size in bytes; 0 means "present, size unknown".
    pub size: u64,
}

/// Download-mode session over a serial transport.
pub struct FdlClient<T, O> {
    transport: T,
    observer: Arc<O>,
    config: FlashConfig,
    stage: DeviceStage,
    chip_id: u32,
    transcode_bypass: bool,
    current_baud: u32,
    exploit: Option<Box<dyn ExploitStrategy>>,
}

impl<T, O> FdlClient<T, O>
where
    T: SerialTransport,
    O: FlashObserver,
{
    pub fn new(transport: T, config: FlashConfig, observer: Arc<O>) -> Self {
        let current_baud = config.initial_baud_rate;
        Self {
            transport,
            observer,
            config,
            stage: DeviceStage::Disconnected,
            chip_id: 0,
            transcode_bypass: false,
            current_baud,
            exploit: None,
        }
    }

    /// Install the signature-bypass strategy used for chips that
    /// require one.
    pub fn set_exploit(&mut self, exploit: Box<dyn ExploitStrategy>) {
        self.exploit = Some(exploit);
    }

    pub fn set_chip_id(&mut self, chip_id: u32) {
        self.chip_id = chip_id;
        tracing::info!(
            chip_id = %format!("0x{chip_id:x}"),
            name = %crate::chips::chip_name(chip_id),
            "Chip id set"
        );
    }

    pub fn stage(&self) -> DeviceStage {
        self.stage
    }

    pub fn chip_id(&self) -> u32 {
        self.chip_id
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Open the port and synchronize with the boot ROM.
    pub fn connect(&mut self, path: &str) -> Result<(), FdlError> {
        if self.config.dry_run {
            tracing::info!(path, "[dry-run] Simulating BROM connection");
            self.set_stage(DeviceStage::ConnectedRom);
            return Ok(());
        }

        tracing::info!(path, baud = self.config.initial_baud_rate, "Connecting");
        self.transport.open(path, self.config.initial_baud_rate)?;
        self.current_baud = self.config.initial_baud_rate;

        if let Err(e) = self.sync_brom() {
            self.transport.close();
            self.set_stage(DeviceStage::Disconnected);
            return Err(e);
        }

        self.set_stage(DeviceStage::ConnectedRom);
        tracing::info!("Connected to device (BROM mode)");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.transport.close();
        self.set_stage(DeviceStage::Disconnected);
        self.transcode_bypass = false;
        tracing::info!("Disconnected");
    }

    /// Repeatedly poke the ROM with a single sync byte until it echoes.
    fn sync_brom(&mut self) -> Result<(), FdlError> {
        tracing::debug!("Synchronizing with BROM");
        for _ in 0..BROM_SYNC_ATTEMPTS {
            self.transport.write(&BROM_SYNC)?;
            let resp = self.transport.read(1, BROM_SYNC_READ_TIMEOUT)?;
            if resp.first() == Some(&TAG_HDLC) {
                tracing::debug!("BROM synchronized");
                return Ok(());
            }
        }
        Err(FdlError::Timeout {
            operation: "BROM sync",
        })
    }

    /// Re-synchronize after FDL1 starts, then CONNECT in the new
    /// dialect.
    fn sync_fdl1(&mut self) -> Result<(), FdlError> {
        tracing::debug!("Synchronizing with FDL1");
        for _ in 0..FDL1_SYNC_ATTEMPTS {
            self.transport.write(&FDL1_SYNC)?;
            let resp = self.transport.read(1, READ_SLICE_TIMEOUT)?;
            if matches!(resp.first(), Some(&TAG_HDLC) | Some(&BSL_REP_ACK)) {
                match self.request(BSL_CMD_CONNECT, &[]) {
                    Ok((status, _)) if is_ack(status) => {
                        tracing::debug!("FDL1 synchronized");
                        return Ok(());
                    }
                    // Non-ack or silence: the loader may still be
                    // booting, keep resyncing within the attempt bound.
                    Ok(_) | Err(FdlError::Timeout { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            std::thread::sleep(RESYNC_WAIT);
        }
        Err(FdlError::Timeout {
            operation: "FDL1 sync",
        })
    }

    // ------------------------------------------------------------------
    // Loader download
    // ------------------------------------------------------------------

    /// Download and execute FDL1, then re-synchronize with it.
    pub fn load_fdl1(&mut self, data: &[u8], address: u32) -> Result<(), FdlError> {
        self.require_stage(DeviceStage::ConnectedRom)?;
        tracing::info!(address = %format!("0x{address:x}"), len = data.len(), "Loading FDL1");

        if self.chip_id != 0 && crate::chips::requires_exploit(self.chip_id) {
            tracing::warn!("Chip requires signature bypass");
            match self.exploit.take() {
                Some(exploit) => {
                    let result = exploit.apply(self.chip_id, self);
                    self.exploit = Some(exploit);
                    result?;
                    tracing::info!("Signature bypass applied");
                }
                None if self.config.dry_run => {
                    tracing::warn!("[dry-run] No signature bypass installed, continuing");
                }
                None => {
                    return Err(ExploitError(
                        "chip requires a signature bypass but none is installed".into(),
                    )
                    .into());
                }
            }
        }

        self.download_and_exec(address, data)?;
        self.set_stage(DeviceStage::Fdl1Loaded);
        self.settle(EXEC_SETTLE);

        if !self.config.dry_run {
            if let Err(e) = self.sync_fdl1() {
                self.set_stage(DeviceStage::Error);
                return Err(e);
            }
        }
        tracing::info!("FDL1 loaded");
        Ok(())
    }

    /// Download and execute FDL2. Requires FDL1; fails fast otherwise.
    pub fn load_fdl2(&mut self, data: &[u8], address: u32) -> Result<(), FdlError> {
        self.require_stage(DeviceStage::Fdl1Loaded)?;
        tracing::info!(address = %format!("0x{address:x}"), len = data.len(), "Loading FDL2");
        tracing::debug!(mode = ?self.stage.checksum_mode(), "Checksum mode");

        if self.config.fdl2_baud_rate != 0 && self.config.fdl2_baud_rate != self.current_baud {
            let baud = self.config.fdl2_baud_rate;
            if let Err(e) = self.change_baud_rate(baud) {
                // Soft failure: stay at the current rate.
                tracing::warn!(baud, error = %e, "Baud renegotiation failed, keeping current rate");
            }
        }

        self.download_and_exec(address, data)?;
        self.set_stage(DeviceStage::Fdl2Loaded);
        self.settle(EXEC_SETTLE);

        match self.disable_transcode() {
            Ok(()) => tracing::info!("High-speed mode enabled (transcode disabled)"),
            // Soft failure: frames simply stay escaped.
            Err(e) => tracing::warn!(error = %e, "Transcode disable failed, staying escaped"),
        }

        tracing::info!("FDL2 loaded");
        Ok(())
    }

    /// Generic start / mid-chunks / end / exec sequence in the dialect
    /// of the current stage.
    fn download_and_exec(&mut self, address: u32, data: &[u8]) -> Result<(), FdlError> {
        self.download_data(address, data)?;

        if self.stage.uses_brom_framing() {
            self.send_brom(BSL_CMD_EXEC_DATA, u64::from(address), 0, &[], false, None)?;
        } else {
            self.command(BSL_CMD_EXEC_DATA, &address.to_le_bytes())?;
        }
        Ok(())
    }

    /// Start / mid-chunks / end without the exec step (also the exploit
    /// memory-write primitive).
    fn download_data(&mut self, address: u32, data: &[u8]) -> Result<(), FdlError> {
        let total = data.len() as u64;
        if self.stage.uses_brom_framing() {
            self.send_brom(BSL_CMD_START_DATA, u64::from(address), total, &[], false, None)?;
            for (i, chunk) in data.chunks(LOADER_CHUNK).enumerate() {
                let offset = (i * LOADER_CHUNK) as u64;
                self.send_brom(
                    BSL_CMD_MID_DATA,
                    u64::from(address) + offset,
                    chunk.len() as u64,
                    chunk,
                    false,
                    None,
                )?;
                self.progress("loader download", None, offset + chunk.len() as u64, total);
            }
            self.send_brom(BSL_CMD_END_DATA, u64::from(address), total, &[], false, None)?;
        } else {
            let mut start = Vec::with_capacity(8);
            start.extend_from_slice(&address.to_le_bytes());
            start.extend_from_slice(&(data.len() as u32).to_le_bytes());
            self.command(BSL_CMD_START_DATA, &start)?;
            for (i, chunk) in data.chunks(LOADER_CHUNK).enumerate() {
                self.command(BSL_CMD_MID_DATA, chunk)?;
                let done = (i * LOADER_CHUNK + chunk.len()) as u64;
                self.progress("loader download", None, done, total);
            }
            self.command(BSL_CMD_END_DATA, &[])?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Partition operations (FDL2)
    // ------------------------------------------------------------------

    /// Read the device partition table, falling back to a fixed list of
    /// well-known names (size 0) when the response is absent or short.
    pub fn read_partition_table(&mut self) -> Result<Vec<PartitionEntry>, FdlError> {
        self.require_stage(DeviceStage::Fdl2Loaded)?;
        if self.config.dry_run {
            return Ok(dry_run_partition_table());
        }

        tracing::debug!("Reading partition table");
        let (status, payload) = match self.request(BSL_CMD_READ_PARTITION, &[]) {
            Ok(resp) => resp,
            Err(FdlError::Timeout { .. }) => {
                tracing::warn!("No partition table response, using well-known names");
                return Ok(fallback_partition_table());
            }
            Err(e) => return Err(e),
        };
        if status != BSL_REP_PARTITION_TABLE || payload.len() < PARTITION_RECORD_SIZE {
            tracing::warn!(
                status = %format!("0x{status:02X}"),
                len = payload.len(),
                "Partition table unavailable, using well-known names"
            );
            return Ok(fallback_partition_table());
        }

        let mut partitions = Vec::new();
        for record in payload.chunks_exact(PARTITION_RECORD_SIZE) {
            let name = read_utf16(&record[..72]);
            if name.is_empty() {
                continue;
            }
            let size = u64::from(u32::from_le_bytes([
                record[72], record[73], record[74], record[75],
            ]));
            partitions.push(PartitionEntry { name, size });
        }
        Ok(partitions)
    }

    /// Read `size` bytes from a partition as a stream of DATA frames.
    pub fn read_partition(
        &mut self,
        name: &str,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, FdlError> {
        self.require_stage(DeviceStage::Fdl2Loaded)?;
        if self.config.dry_run {
            tracing::info!(name, size, "[dry-run] Simulating partition read");
            return Ok(vec![0u8; size as usize]);
        }

        tracing::info!(name, size, "Reading partition");
        let wide = offset > u64::from(u32::MAX) || size > u64::from(u32::MAX);
        let mut payload = name_payload(name);
        extend_len_field(&mut payload, size, wide);
        extend_len_field(&mut payload, offset, wide);
        self.command(BSL_CMD_READ_START, &payload)?;

        let mut data = Vec::with_capacity(size as usize);
        while (data.len() as u64) < size {
            let (status, chunk) = self.receive()?;
            if status != BSL_REP_READ_FLASH {
                return Err(FdlError::Status {
                    code: status,
                    name: response_name(status),
                });
            }
            data.extend_from_slice(&chunk);
            self.progress("partition read", Some(name), data.len() as u64, size);
        }
        self.command(BSL_CMD_READ_END, &[])?;

        data.truncate(size as usize);
        Ok(data)
    }

    /// Write a buffer to a named partition.
    pub fn write_partition(&mut self, name: &str, data: &[u8]) -> Result<(), FdlError> {
        self.require_stage(DeviceStage::Fdl2Loaded)?;
        tracing::info!(name, len = data.len(), "Writing partition");

        let total = data.len() as u64;
        let wide = total > u64::from(u32::MAX);
        let mut payload = name_payload(name);
        extend_len_field(&mut payload, total, wide);
        self.command(BSL_CMD_START_DATA, &payload)?;

        for (i, chunk) in data.chunks(FLASH_CHUNK).enumerate() {
            self.command(BSL_CMD_MID_DATA, chunk)?;
            let done = (i * FLASH_CHUNK + chunk.len()) as u64;
            self.progress("partition write", Some(name), done, total);
        }
        self.command(BSL_CMD_END_DATA, &[])
    }

    /// Erase a named partition.
    pub fn erase_partition(&mut self, name: &str) -> Result<(), FdlError> {
        self.require_stage(DeviceStage::Fdl2Loaded)?;
        tracing::info!(name, "Erasing partition");
        self.command(BSL_CMD_ERASE_FLASH, &name_payload(name))
    }

    /// Erase `userdata` and `cache`; both must succeed.
    pub fn factory_reset(&mut self) -> Result<(), FdlError> {
        tracing::info!("Performing factory reset");
        let userdata = self.erase_partition("userdata");
        let cache = self.erase_partition("cache");
        userdata.and(cache)
    }

    /// Flash one container entry, expanding sparse images on the fly.
    pub fn flash_image<R: Read + Seek>(
        &mut self,
        pac: &mut PacArchive<R>,
        id: &str,
    ) -> Result<(), FdlError> {
        self.require_stage(DeviceStage::Fdl2Loaded)?;
        let entry = pac
            .find(id)
            .ok_or_else(|| PacError::NoSuchEntry(id.to_string()))?
            .clone();

        let is_sparse = entry.real_size >= 28 && {
            let mut header = [0u8; 28];
            pac.read_at(id, 0, &mut header)?;
            sparse::is_sparse(&header)
        };
        let total = if is_sparse {
            let mut header = [0u8; 28];
            pac.read_at(id, 0, &mut header)?;
            SparseHeader::parse(&header)?.unsparsed_size()
        } else {
            entry.real_size
        };

        tracing::info!(
            id = %entry.id,
            file = %entry.name,
            bytes = total,
            sparse = is_sparse,
            "Flashing image"
        );

        let wide = total > u64::from(u32::MAX) || entry.real_offset > u64::from(u32::MAX);
        let mut payload = name_payload(&entry.id);
        extend_len_field(&mut payload, total, wide);
        self.command(BSL_CMD_START_DATA, &payload)?;

        if is_sparse {
            let stream = SparseStream::new(
                |off, buf: &mut [u8]| {
                    pac.read_at(id, off, buf).map_err(std::io::Error::other)
                },
                FLASH_CHUNK,
            )?;
            let mut done: u64 = 0;
            for chunk in stream {
                let chunk = chunk?;
                self.command(BSL_CMD_MID_DATA, &chunk)?;
                done += chunk.len() as u64;
                self.progress("flash", Some(&entry.id), done, total);
            }
        } else {
            let mut chunk = vec![0u8; FLASH_CHUNK];
            let mut done: u64 = 0;
            while done < total {
                let take = ((total - done) as usize).min(FLASH_CHUNK);
                pac.read_at(id, done, &mut chunk[..take])?;
                self.command(BSL_CMD_MID_DATA, &chunk[..take])?;
                done += take as u64;
                self.progress("flash", Some(&entry.id), done, total);
            }
        }

        self.command(BSL_CMD_END_DATA, &[])
    }

    // ------------------------------------------------------------------
    // Service operations
    // ------------------------------------------------------------------

    /// Back up NV partitions present in the table into `dest`.
    pub fn backup_nv(&mut self, dest: &Path) -> Result<Vec<PathBuf>, FdlError> {
        let fallback = u64::from(self.config.nv_fallback_size);
        self.backup_partitions(dest, NV_PARTITIONS, fallback)
    }

    /// Back up calibration partitions present in the table into `dest`.
    pub fn backup_calibration(&mut self, dest: &Path) -> Result<Vec<PathBuf>, FdlError> {
        let fallback = u64::from(self.config.calibration_fallback_size);
        self.backup_partitions(dest, CALIBRATION_PARTITIONS, fallback)
    }

    fn backup_partitions(
        &mut self,
        dest: &Path,
        candidates: &[&str],
        fallback_size: u64,
    ) -> Result<Vec<PathBuf>, FdlError> {
        self.require_stage(DeviceStage::Fdl2Loaded)?;
        std::fs::create_dir_all(dest)?;

        let table = self.read_partition_table()?;
        let mut saved = Vec::new();
        for candidate in candidates {
            let Some(part) = table
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(candidate))
                .cloned()
            else {
                continue;
            };
            let size = if part.size > 0 { part.size } else { fallback_size };
            let data = self.read_partition(&part.name, 0, size)?;
            let path = dest.join(format!("{}.bin", part.name));
            std::fs::write(&path, data)?;
            tracing::info!(partition = %part.name, path = %path.display(), "Backed up");
            saved.push(path);
        }

        if saved.is_empty() {
            tracing::warn!("No matching partitions found to back up");
        }
        Ok(saved)
    }

    /// Erase FRP-related partitions; every erase must succeed.
    pub fn frp_bypass(&mut self) -> Result<(), FdlError> {
        self.require_stage(DeviceStage::Fdl2Loaded)?;
        tracing::info!("Starting FRP bypass");

        let table = self.read_partition_table()?;
        let targets: Vec<String> = table
            .iter()
            .filter(|p| {
                FRP_PARTITIONS
                    .iter()
                    .any(|f| p.name.eq_ignore_ascii_case(f))
            })
            .map(|p| p.name.clone())
            .collect();
        if targets.is_empty() {
            return Err(FdlError::PartitionNotFound("persist/frp/config".into()));
        }

        let mut result = Ok(());
        for name in targets {
            match self.erase_partition(&name) {
                Ok(()) => tracing::info!(partition = %name, "Erased"),
                Err(e) => {
                    tracing::error!(partition = %name, error = %e, "Erase failed");
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Toggle the dm-verity flag byte in `vbmeta`.
    pub fn patch_dm_verity(&mut self, enable: bool) -> Result<(), FdlError> {
        self.require_stage(DeviceStage::Fdl2Loaded)?;
        tracing::info!(enable, "Patching dm-verity");

        let table = self.read_partition_table()?;
        let vbmeta = table
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case("vbmeta"))
            .cloned()
            .ok_or_else(|| FdlError::PartitionNotFound("vbmeta".into()))?;

        let size = if vbmeta.size > 0 {
            vbmeta.size
        } else {
            VBMETA_FALLBACK_SIZE
        };
        let mut data = self.read_partition(&vbmeta.name, 0, size)?;
        if data.len() <= DM_VERITY_FLAG_OFFSET {
            return Err(FdlError::Frame(FrameError::TooShort {
                expected: DM_VERITY_FLAG_OFFSET + 1,
                actual: data.len(),
            }));
        }
        data[DM_VERITY_FLAG_OFFSET] = if enable { 0 } else { 1 };
        self.write_partition(&vbmeta.name, &data)
    }

    /// Attempt a bootloader unlock.
    pub fn unlock_bootloader(&mut self) -> Result<(), FdlError> {
        self.require_stage(DeviceStage::Fdl2Loaded)?;
        tracing::info!("Attempting bootloader unlock");
        self.command(BSL_CMD_UNLOCK, &[])
    }

    /// Read one eFuse block.
    pub fn read_efuse(&mut self, block: u32) -> Result<Vec<u8>, FdlError> {
        self.require_stage(DeviceStage::Fdl2Loaded)?;
        if self.config.dry_run {
            return Ok(vec![0xFF; 32]);
        }
        let (status, payload) = self.request(BSL_CMD_READ_EFUSE, &block.to_le_bytes())?;
        self.require_ack(status)?;
        Ok(payload)
    }

    /// Query the chip identifier.
    pub fn read_chip_type(&mut self) -> Result<u32, FdlError> {
        if self.config.dry_run {
            return Ok(DRY_RUN_CHIP_ID);
        }
        let (status, payload) = self.request(BSL_CMD_READ_CHIP_TYPE, &[])?;
        if status != BSL_REP_READ_CHIP_TYPE && !is_ack(status) {
            return Err(FdlError::Status {
                code: status,
                name: response_name(status),
            });
        }
        if payload.len() < 4 {
            return Err(FrameError::TooShort {
                expected: 4,
                actual: payload.len(),
            }
            .into());
        }
        Ok(u32::from_le_bytes([
            payload[0], payload[1], payload[2], payload[3],
        ]))
    }

    /// Renegotiate the line speed with the device, then verify.
    pub fn change_baud_rate(&mut self, baud: u32) -> Result<(), FdlError> {
        if self.config.dry_run {
            self.current_baud = baud;
            return Ok(());
        }
        tracing::info!(baud, "Changing baud rate");
        self.command(BSL_CMD_CHANGE_BAUD, &baud.to_le_bytes())?;

        std::thread::sleep(BAUD_SETTLE);
        self.transport.set_baud_rate(baud)?;
        self.transport.flush()?;

        if let Err(e) = self.command(BSL_CMD_CHECK_BAUD, &[]) {
            // The device never confirmed; drop the port back to the
            // rate it is still listening on.
            self.transport.set_baud_rate(self.current_baud)?;
            return Err(e);
        }
        self.current_baud = baud;
        Ok(())
    }

    /// Ask the loader to stop HDLC escaping; subsequent frames use the
    /// bypass sub-mode.
    pub fn disable_transcode(&mut self) -> Result<(), FdlError> {
        self.command(BSL_CMD_DISABLE_TRANSCODE, &[])?;
        self.transcode_bypass = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    fn require_stage(&self, required: DeviceStage) -> Result<(), FdlError> {
        if self.stage != required {
            return Err(FdlError::StagePrecondition {
                required,
                actual: self.stage,
            });
        }
        Ok(())
    }

    fn require_ack(&self, status: u8) -> Result<(), FdlError> {
        if !is_ack(status) {
            return Err(FdlError::Status {
                code: status,
                name: response_name(status),
            });
        }
        Ok(())
    }

    /// BROM-dialect exchange: header carries address/size, the trailing
    /// byte of the raw response is the status.
    fn send_brom(
        &mut self,
        cmd: u16,
        address: u64,
        size: u64,
        data: &[u8],
        wide: bool,
        checksum: Option<u32>,
    ) -> Result<(), FdlError> {
        if self.config.dry_run {
            tracing::debug!(cmd = %format!("0x{cmd:02X}"), address, size, "[dry-run] BROM frame");
            return Ok(());
        }

        let frame = encode_brom(cmd, address, size, data, wide, checksum);
        self.observer.on_event(&FlashEvent::Frame {
            direction: FrameDirection::Tx,
            command: cmd,
            length: frame.len(),
        });
        self.transport.write(&frame)?;

        let resp = self.transport.read(32, RESPONSE_TIMEOUT)?;
        let Some(&status) = resp.last() else {
            return Err(FdlError::Timeout {
                operation: "BROM response",
            });
        };
        self.observer.on_event(&FlashEvent::StatusReceived {
            code: status,
            name: response_name(status).to_string(),
        });
        self.require_ack(status)
    }

    /// HDLC-dialect exchange returning the response status and payload.
    fn request(&mut self, cmd: u16, payload: &[u8]) -> Result<(u8, Vec<u8>), FdlError> {
        if self.config.dry_run {
            tracing::debug!(cmd = %format!("0x{cmd:02X}"), len = payload.len(), "[dry-run] frame");
            return Ok((BSL_REP_ACK, Vec::new()));
        }

        let frame = encode_hdlc(cmd, payload, self.transcode_bypass);
        self.observer.on_event(&FlashEvent::Frame {
            direction: FrameDirection::Tx,
            command: cmd,
            length: frame.len(),
        });
        self.transport.write(&frame)?;
        self.receive()
    }

    /// HDLC-dialect exchange that must come back as a plain ACK.
    fn command(&mut self, cmd: u16, payload: &[u8]) -> Result<(), FdlError> {
        let (status, _) = self.request(cmd, payload)?;
        self.require_ack(status)
    }

    /// Receive and parse one HDLC response frame.
    fn receive(&mut self) -> Result<(u8, Vec<u8>), FdlError> {
        let frame = self.read_frame(RESPONSE_TIMEOUT)?;
        self.observer.on_event(&FlashEvent::Frame {
            direction: FrameDirection::Rx,
            command: 0,
            length: frame.len(),
        });

        let block = decode_hdlc(&frame, self.transcode_bypass)?;
        if block.len() < 4 {
            return Err(FrameError::TooShort {
                expected: 4,
                actual: block.len(),
            }
            .into());
        }
        let code = u16::from_be_bytes([block[0], block[1]]);
        let len = u16::from_be_bytes([block[2], block[3]]) as usize;
        let payload_end = (4 + len).min(block.len());
        let status = code as u8;

        self.observer.on_event(&FlashEvent::StatusReceived {
            code: status,
            name: response_name(status).to_string(),
        });
        Ok((status, block[4..payload_end].to_vec()))
    }

    /// Accumulate bytes between HDLC tag delimiters.
    fn read_frame(&mut self, timeout: Duration) -> Result<Vec<u8>, FdlError> {
        let deadline = Instant::now() + timeout;
        let mut buf: Vec<u8> = Vec::new();
        let mut in_frame = false;

        loop {
            let bytes = self.transport.read(512, READ_SLICE_TIMEOUT)?;
            for b in bytes {
                if b == TAG_HDLC {
                    if in_frame && buf.len() > 1 {
                        buf.push(b);
                        return Ok(buf);
                    }
                    in_frame = true;
                    buf.clear();
                    buf.push(b);
                } else if in_frame {
                    buf.push(b);
                }
            }
            if Instant::now() >= deadline {
                return Err(FdlError::Timeout {
                    operation: "response frame",
                });
            }
        }
    }

    fn set_stage(&mut self, stage: DeviceStage) {
        if self.stage != stage {
            self.observer.on_event(&FlashEvent::StageChanged {
                from: self.stage,
                to: stage,
            });
            self.stage = stage;
        }
    }

    fn progress(&self, operation: &str, partition: Option<&str>, current: u64, total: u64) {
        self.observer.on_event(&FlashEvent::Progress {
            operation: operation.to_string(),
            partition: partition.map(str::to_string),
            current,
            total,
        });
    }

    fn settle(&self, duration: Duration) {
        if !self.config.dry_run {
            std::thread::sleep(duration);
        }
    }
}

impl<T, O> MemoryWriter for FdlClient<T, O>
where
    T: SerialTransport,
    O: FlashObserver,
{
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), ExploitError> {
        self.download_data(address, data)
            .map_err(|e| ExploitError(e.to_string()))
    }
}

fn name_payload(name: &str) -> Vec<u8> {
    let mut payload = name.as_bytes().to_vec();
    payload.push(0);
    payload
}

/// Append a size/offset field, 4 bytes normally, 8 in wide mode.
fn extend_len_field(payload: &mut Vec<u8>, value: u64, wide: bool) {
    if wide {
        payload.extend_from_slice(&value.to_le_bytes());
    } else {
        payload.extend_from_slice(&(value as u32).to_le_bytes());
    }
}

fn fallback_partition_table() -> Vec<PartitionEntry> {
    FALLBACK_PARTITIONS
        .iter()
        .map(|name| PartitionEntry {
            name: (*name).to_string(),
            size: 0,
        })
        .collect()
}

fn dry_run_partition_table() -> Vec<PartitionEntry> {
    vec![
        PartitionEntry {
            name: "splloader".into(),
            size: 512 * 1024,
        },
        PartitionEntry {
            name: "boot".into(),
            size: 32 * 1024 * 1024,
        },
        PartitionEntry {
            name: "vbmeta".into(),
            size: 1024 * 1024,
        },
        PartitionEntry {
            name: "super".into(),
            size: 4 * 1024 * 1024 * 1024,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::fdl::exploit::testing::ScriptedExploit;
    use crate::transport::MockTransport;

    fn client(config: FlashConfig) -> FdlClient<MockTransport, NullObserver> {
        FdlClient::new(MockTransport::new(), config, Arc::new(NullObserver))
    }

    fn mock(client: &FdlClient<MockTransport, NullObserver>) -> &MockTransport {
        &client.transport
    }

    fn utf16_name(name: &str) -> [u8; 72] {
        let mut field = [0u8; 72];
        for (i, unit) in name.encode_utf16().enumerate() {
            field[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        field
    }

    #[test]
    fn connect_syncs_with_brom_echo() {
        let mut c = client(FlashConfig::default());
        mock(&c).queue_response(&[TAG_HDLC]);
        c.connect("/dev/ttyUSB0").unwrap();
        assert_eq!(c.stage(), DeviceStage::ConnectedRom);
        assert_eq!(mock(&c).get_writes()[0], BROM_SYNC);
    }

    #[test]
    fn connect_timeout_closes_transport() {
        let mut c = client(FlashConfig::default());
        // No echo queued: 100 attempts read back empty.
        let err = c.connect("/dev/ttyUSB0").unwrap_err();
        assert!(matches!(err, FdlError::Timeout { .. }));
        assert_eq!(c.stage(), DeviceStage::Disconnected);
        assert!(!mock(&c).is_open());
    }

    #[test]
    fn load_fdl2_before_fdl1_fails_without_io() {
        let mut c = client(FlashConfig::default());
        mock(&c).queue_response(&[TAG_HDLC]);
        c.connect("/dev/ttyUSB0").unwrap();
        mock(&c).clear_writes();

        let err = c.load_fdl2(&[0u8; 16], 0x9EFF_FE00).unwrap_err();
        assert!(matches!(
            err,
            FdlError::StagePrecondition {
                required: DeviceStage::Fdl1Loaded,
                actual: DeviceStage::ConnectedRom,
            }
        ));
        assert!(mock(&c).get_writes().is_empty());
    }

    #[test]
    fn load_fdl1_runs_brom_sequence_and_resyncs() {
        let mut c = client(FlashConfig::default());
        mock(&c).queue_response(&[TAG_HDLC]);
        c.connect("/dev/ttyUSB0").unwrap();
        mock(&c).clear_writes();

        // START, MID, END, EXEC acks in the BROM dialect
        for _ in 0..4 {
            mock(&c).queue_response(&[BSL_REP_ACK]);
        }
        // FDL1 resync echo, then CONNECT ack frame
        mock(&c).queue_response(&[TAG_HDLC]);
        mock(&c).queue_status(u16::from(BSL_REP_ACK));

        c.load_fdl1(&[0xAB; 100], 0x5500).unwrap();
        assert_eq!(c.stage(), DeviceStage::Fdl1Loaded);

        let writes = mock(&c).get_writes();
        // 4 BROM frames + sync pattern + CONNECT frame
        assert_eq!(writes.len(), 6);
        assert!(writes[..4].iter().all(|w| w[0] == TAG_BROM));
        assert_eq!(writes[4], FDL1_SYNC);
        assert_eq!(writes[5], encode_hdlc(BSL_CMD_CONNECT, &[], false));
    }

    #[test]
    fn exploit_runs_before_fdl1_when_required() {
        let mut c = client(FlashConfig::default());
        c.set_chip_id(0x9863); // requires signature bypass
        c.set_exploit(Box::new(ScriptedExploit::new(true)));
        mock(&c).queue_response(&[TAG_HDLC]);
        c.connect("/dev/ttyUSB0").unwrap();
        mock(&c).clear_writes();

        // Exploit fails before any download command is framed; its own
        // memory write never happens since failure comes first.
        let err = c.load_fdl1(&[0u8; 16], 0x6500_0800).unwrap_err();
        assert!(matches!(err, FdlError::Exploit(_)));
        assert!(mock(&c).get_writes().is_empty());
    }

    #[test]
    fn missing_exploit_for_flagged_chip_is_an_error() {
        let mut c = client(FlashConfig::default());
        c.set_chip_id(0x9863);
        mock(&c).queue_response(&[TAG_HDLC]);
        c.connect("/dev/ttyUSB0").unwrap();

        assert!(matches!(
            c.load_fdl1(&[0u8; 16], 0x6500_0800),
            Err(FdlError::Exploit(_))
        ));
    }

    #[test]
    fn partition_table_parses_records() {
        let mut c = client(FlashConfig::default());
        c.stage = DeviceStage::Fdl2Loaded;

        let mut payload = Vec::new();
        payload.extend_from_slice(&utf16_name("boot"));
        payload.extend_from_slice(&0x0200_0000u32.to_le_bytes());
        payload.extend_from_slice(&utf16_name("vbmeta"));
        payload.extend_from_slice(&0x0010_0000u32.to_le_bytes());
        mock(&c).queue_response(&encode_hdlc(
            u16::from(BSL_REP_PARTITION_TABLE),
            &payload,
            false,
        ));

        let table = c.read_partition_table().unwrap();
        assert_eq!(
            table,
            vec![
                PartitionEntry {
                    name: "boot".into(),
                    size: 0x0200_0000,
                },
                PartitionEntry {
                    name: "vbmeta".into(),
                    size: 0x0010_0000,
                },
            ]
        );
    }

    #[test]
    fn short_partition_table_falls_back_to_known_names() {
        let mut c = client(FlashConfig::default());
        c.stage = DeviceStage::Fdl2Loaded;
        mock(&c).queue_response(&encode_hdlc(
            u16::from(BSL_REP_PARTITION_TABLE),
            &[0u8; 10],
            false,
        ));

        let table = c.read_partition_table().unwrap();
        assert_eq!(table.len(), FALLBACK_PARTITIONS.len());
        assert!(table.iter().all(|p| p.size == 0));
        assert_eq!(table[0].name, "boot");
    }

    #[test]
    fn read_partition_accumulates_data_frames() {
        let mut c = client(FlashConfig::default());
        c.stage = DeviceStage::Fdl2Loaded;

        mock(&c).queue_ack(); // READ_START
        mock(&c).queue_response(&encode_hdlc(u16::from(BSL_REP_READ_FLASH), b"hell", false));
        mock(&c).queue_response(&encode_hdlc(u16::from(BSL_REP_READ_FLASH), b"o!", false));
        mock(&c).queue_ack(); // READ_END

        let data = c.read_partition("misc", 0, 6).unwrap();
        assert_eq!(data, b"hello!");
    }

    #[test]
    fn read_partition_aborts_on_wrong_frame_type() {
        let mut c = client(FlashConfig::default());
        c.stage = DeviceStage::Fdl2Loaded;

        mock(&c).queue_ack();
        mock(&c).queue_status(u16::from(BSL_REP_OPERATION_FAILED));

        let err = c.read_partition("misc", 0, 6).unwrap_err();
        assert!(matches!(
            err,
            FdlError::Status {
                code: 0x84,
                name: "OPERATION_FAILED",
            }
        ));
    }

    #[test]
    fn non_ack_status_is_named_failure() {
        let mut c = client(FlashConfig::default());
        c.stage = DeviceStage::Fdl2Loaded;
        mock(&c).queue_status(u16::from(BSL_REP_FLASH_WRITTEN_PROTECTION));

        let err = c.erase_partition("userdata").unwrap_err();
        assert!(matches!(
            err,
            FdlError::Status {
                code: 0xB3,
                name: "FLASH_WRITTEN_PROTECTION",
            }
        ));
    }

    #[test]
    fn factory_reset_requires_both_erases() {
        let mut c = client(FlashConfig::default());
        c.stage = DeviceStage::Fdl2Loaded;
        mock(&c).queue_ack(); // userdata
        mock(&c).queue_status(u16::from(BSL_REP_OPERATION_FAILED)); // cache

        assert!(c.factory_reset().is_err());
    }

    #[test]
    fn dry_run_walks_full_sequence_without_transport() {
        let config = FlashConfig {
            dry_run: true,
            ..FlashConfig::default()
        };
        let mut c = client(config);

        c.connect("simulated").unwrap();
        c.load_fdl1(&[1u8; 8192], 0x5500).unwrap();
        c.load_fdl2(&[2u8; 8192], 0x9EFF_FE00).unwrap();
        c.factory_reset().unwrap();
        assert_eq!(c.read_chip_type().unwrap(), DRY_RUN_CHIP_ID);

        let table = c.read_partition_table().unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table[3].name, "super");

        assert_eq!(c.stage(), DeviceStage::Fdl2Loaded);
        assert!(mock(&c).get_writes().is_empty());
    }

    #[test]
    fn chip_type_query_decodes_le_id() {
        let mut c = client(FlashConfig::default());
        c.stage = DeviceStage::Fdl2Loaded;
        mock(&c).queue_response(&encode_hdlc(
            u16::from(BSL_REP_READ_CHIP_TYPE),
            &0x9863u32.to_le_bytes(),
            false,
        ));
        assert_eq!(c.read_chip_type().unwrap(), 0x9863);
    }

    #[test]
    fn dm_verity_patch_flips_flag_byte() {
        let mut c = client(FlashConfig::default());
        c.stage = DeviceStage::Fdl2Loaded;

        let mut payload = Vec::new();
        payload.extend_from_slice(&utf16_name("vbmeta"));
        payload.extend_from_slice(&256u32.to_le_bytes());
        mock(&c).queue_response(&encode_hdlc(
            u16::from(BSL_REP_PARTITION_TABLE),
            &payload,
            false,
        ));
        mock(&c).queue_ack(); // READ_START
        mock(&c).queue_response(&encode_hdlc(u16::from(BSL_REP_READ_FLASH), &[0u8; 256], false));
        mock(&c).queue_ack(); // READ_END
        mock(&c).queue_ack(); // START_DATA
        mock(&c).queue_ack(); // MID_DATA
        mock(&c).queue_ack(); // END_DATA

        c.patch_dm_verity(false).unwrap();

        // writes: table query, read start/end, write start, data, end
        let writes = mock(&c).get_writes();
        assert_eq!(writes.len(), 6);
        let data_frame = decode_hdlc(&writes[4], false).unwrap();
        assert_eq!(
            u16::from_be_bytes([data_frame[0], data_frame[1]]),
            BSL_CMD_MID_DATA
        );
        assert_eq!(data_frame[4 + DM_VERITY_FLAG_OFFSET], 1);
    }

    #[test]
    fn nv_backup_writes_partition_files() {
        let mut c = client(FlashConfig::default());
        c.stage = DeviceStage::Fdl2Loaded;

        let mut payload = Vec::new();
        payload.extend_from_slice(&utf16_name("fixnv"));
        payload.extend_from_slice(&4u32.to_le_bytes());
        mock(&c).queue_response(&encode_hdlc(
            u16::from(BSL_REP_PARTITION_TABLE),
            &payload,
            false,
        ));
        mock(&c).queue_ack(); // READ_START
        mock(&c).queue_response(&encode_hdlc(
            u16::from(BSL_REP_READ_FLASH),
            &[0xAA, 0xBB, 0xCC, 0xDD],
            false,
        ));
        mock(&c).queue_ack(); // READ_END

        let dest = std::env::temp_dir().join(format!("nv-backup-test-{}", std::process::id()));
        let saved = c.backup_nv(&dest).unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].ends_with("fixnv.bin"));
        assert_eq!(std::fs::read(&saved[0]).unwrap(), [0xAA, 0xBB, 0xCC, 0xDD]);
        std::fs::remove_dir_all(&dest).ok();
    }

    #[test]
    fn efuse_read_returns_payload() {
        let mut c = client(FlashConfig::default());
        c.stage = DeviceStage::Fdl2Loaded;
        mock(&c).queue_response(&encode_hdlc(
            u16::from(BSL_REP_ACK),
            &[0x11, 0x22, 0x33, 0x44],
            false,
        ));

        assert_eq!(c.read_efuse(0).unwrap(), [0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn absent_table_response_falls_back_to_known_names() {
        let mut c = client(FlashConfig::default());
        c.stage = DeviceStage::Fdl2Loaded;

        // No queued response at all: degrade to the well-known list
        // instead of surfacing the timeout.
        let table = c.read_partition_table().unwrap();
        assert!(table.iter().any(|p| p.name == "boot"));
        assert!(table.iter().all(|p| p.size == 0));
    }

    #[test]
    fn fdl1_sync_outlives_a_connect_timeout() {
        let mut c = client(FlashConfig::default());
        // One sync echo, then silence on CONNECT: the bounded resync
        // loop must run to its own exhaustion, not abort on the first
        // missing response.
        mock(&c).queue_response(&[TAG_HDLC]);

        let err = c.sync_fdl1().unwrap_err();
        assert!(matches!(
            err,
            FdlError::Timeout {
                operation: "FDL1 sync"
            }
        ));
    }

    #[test]
    fn failed_baud_check_restores_previous_rate() {
        let mut c = client(FlashConfig::default());
        mock(&c).queue_ack(); // CHANGE_BAUD
        mock(&c).queue_status(u16::from(BSL_REP_OPERATION_FAILED)); // CHECK_BAUD

        let err = c.change_baud_rate(921_600).unwrap_err();
        assert!(matches!(err, FdlError::Status { .. }));
        assert_eq!(mock(&c).current_baud(), 115_200);
        assert_eq!(c.current_baud, 115_200);
    }

    #[test]
    fn frp_bypass_needs_a_known_partition() {
        let mut c = client(FlashConfig::default());
        c.stage = DeviceStage::Fdl2Loaded;

        // Table without persist/frp/config entries
        let mut payload = Vec::new();
        payload.extend_from_slice(&utf16_name("boot"));
        payload.extend_from_slice(&1024u32.to_le_bytes());
        mock(&c).queue_response(&encode_hdlc(
            u16::from(BSL_REP_PARTITION_TABLE),
            &payload,
            false,
        ));

        assert!(matches!(
            c.frp_bypass(),
            Err(FdlError::PartitionNotFound(_))
        ));
    }
}

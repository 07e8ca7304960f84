use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use sprd_core::boot;
use sprd_core::chips;
use sprd_core::config::FlashConfig;
use sprd_core::descriptor::FirmwareDescriptor;
use sprd_core::diag::DiagClient;
use sprd_core::events::TracingObserver;
use sprd_core::fdl::FdlClient;
use sprd_core::pac::PacArchive;
use sprd_core::protocol::diag;
use sprd_core::protocol::{DIAG_CMD_NV_READ, DIAG_CMD_NV_WRITE, DIAG_CMD_VERSION};
use sprd_core::transport::MockTransport;

#[derive(Parser, Debug)]
#[command(author, version, about = "Spreadtrum/Unisoc Download Mode Tool (Pure Rust)", long_about = None)]
struct Args {
    /// Serial port of the device in download mode
    #[arg(long, global = true, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Simulate all device exchanges instead of opening a port
    #[arg(long, global = true)]
    dry_run: bool,

    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flash firmware from a PAC container
    Flash {
        /// Path to the .pac file
        pac: PathBuf,
        /// Flash only these entry ids (default: every participating entry)
        #[arg(long)]
        only: Vec<String>,
        /// Chip id used to pick loader addresses (hex with 0x prefix)
        #[arg(long, value_parser = parse_chip_id, default_value = "0x9863")]
        chip: u32,
    },
    /// Extract every file from a PAC container to a directory
    Extract {
        /// Path to the .pac file
        pac: PathBuf,
        /// Destination directory
        out: PathBuf,
    },
    /// Read a partition to a file
    ReadPartition {
        name: String,
        /// Bytes to read (defaults to the table-reported size)
        #[arg(long)]
        size: Option<u64>,
        /// Output file (defaults to <name>.bin)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write a file to a partition
    WritePartition { name: String, file: PathBuf },
    /// Erase a partition
    ErasePartition { name: String },
    /// Erase userdata and cache
    FactoryReset,
    /// Back up NV and calibration partitions
    NvBackup {
        /// Destination directory
        #[arg(default_value = "nv_backup")]
        out: PathBuf,
    },
    /// Unlock the bootloader
    UnlockBl,
    /// Erase FRP lock partitions
    FrpBypass,
    /// Read the IMEI over the diagnostics port
    ReadImei {
        #[arg(long, default_value_t = 1)]
        slot: u8,
    },
    /// Write an IMEI over the diagnostics port
    WriteImei {
        imei: String,
        #[arg(long, default_value_t = 1)]
        slot: u8,
    },
    /// Inspect an Android boot image
    InfoBoot { image: PathBuf },
}

fn parse_chip_id(s: &str) -> Result<u32, String> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"));
    match digits {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("invalid chip id {s:?}: {e}"))
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(args) {
        tracing::error!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => FlashConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => FlashConfig::default(),
    };
    config.dry_run |= args.dry_run;

    match args.command {
        Command::Flash { pac, only, chip } => cmd_flash(&args.port, config, &pac, &only, chip),
        Command::Extract { pac, out } => cmd_extract(&pac, &out),
        Command::ReadPartition { name, size, out } => {
            cmd_read_partition(&args.port, config, &name, size, out)
        }
        Command::WritePartition { name, file } => {
            cmd_write_partition(&args.port, config, &name, &file)
        }
        Command::ErasePartition { name } => {
            let mut client = connect_fdl2(&args.port, config)?;
            client.erase_partition(&name)?;
            info!(%name, "Partition erased");
            Ok(())
        }
        Command::FactoryReset => {
            let mut client = connect_fdl2(&args.port, config)?;
            client.factory_reset()?;
            info!("Factory reset complete");
            Ok(())
        }
        Command::NvBackup { out } => {
            let mut client = connect_fdl2(&args.port, config)?;
            let mut saved = client.backup_nv(&out)?;
            saved.extend(client.backup_calibration(&out)?);
            for path in &saved {
                println!("{}", path.display());
            }
            info!(count = saved.len(), "Backup complete");
            Ok(())
        }
        Command::UnlockBl => {
            let mut client = connect_fdl2(&args.port, config)?;
            client.unlock_bootloader()?;
            info!("Bootloader unlocked");
            Ok(())
        }
        Command::FrpBypass => {
            let mut client = connect_fdl2(&args.port, config)?;
            client.frp_bypass()?;
            info!("FRP partitions erased");
            Ok(())
        }
        Command::ReadImei { slot } => {
            // Canned NV response: 2 prefix bytes then the packed IMEI.
            let mut body = vec![0x00, 0x00];
            body.extend_from_slice(&sprd_core::diag::encode_imei("352099001761481")?);
            let canned = diag::encode(DIAG_CMD_NV_READ, &body);
            let mut client = diag_client(&args.port, config, &[canned])?;
            let imei = client.read_imei(slot)?;
            println!("{imei}");
            Ok(())
        }
        Command::WriteImei { imei, slot } => {
            let canned = diag::encode(DIAG_CMD_NV_WRITE, &[0x00]);
            let mut client = diag_client(&args.port, config, &[canned])?;
            client.write_imei(&imei, slot)?;
            info!(slot, "IMEI written");
            Ok(())
        }
        Command::InfoBoot { image } => cmd_info_boot(&image),
    }
}

/// Build a download-mode client and bring it to the BROM stage.
///
/// The raw serial backend is an external collaborator; this driver ships
/// only the mock, so device commands require `--dry-run`.
fn rom_client(
    port: &str,
    config: FlashConfig,
) -> Result<FdlClient<MockTransport, TracingObserver>> {
    if !config.dry_run {
        bail!("no serial backend is compiled into this build; pass --dry-run to simulate");
    }
    let mut client = FdlClient::new(MockTransport::new(), config, Arc::new(TracingObserver));
    client.connect(port)?;
    Ok(client)
}

/// Bring a client all the way to FDL2 with canned loaders.
fn connect_fdl2(
    port: &str,
    config: FlashConfig,
) -> Result<FdlClient<MockTransport, TracingObserver>> {
    let mut client = rom_client(port, config)?;
    load_loaders(&mut client, &[], &[], 0x9863, None)?;
    Ok(client)
}

/// Download both stage loaders. Descriptor-carried addresses take
/// precedence over the chip database.
fn load_loaders(
    client: &mut FdlClient<MockTransport, TracingObserver>,
    fdl1: &[u8],
    fdl2: &[u8],
    chip: u32,
    descriptor: Option<&FirmwareDescriptor>,
) -> Result<()> {
    let info = chips::chip_info(chip)
        .with_context(|| format!("unknown chip id 0x{chip:X}"))?;
    client.set_chip_id(chip);
    info!(chip = info.name, "Loading stage loaders");

    let fdl1_addr = descriptor
        .and_then(|d| d.fdl1.as_ref())
        .map_or(info.fdl1_addr, |l| l.address);
    let fdl2_addr = descriptor
        .and_then(|d| d.fdl2.as_ref())
        .map_or(info.fdl2_addr, |l| l.address);

    client.load_fdl1(fdl1, fdl1_addr)?;
    client.load_fdl2(fdl2, fdl2_addr)?;
    Ok(())
}

fn cmd_flash(
    port: &str,
    config: FlashConfig,
    pac_path: &PathBuf,
    only: &[String],
    chip: u32,
) -> Result<()> {
    let mut pac = PacArchive::open_path(pac_path)
        .with_context(|| format!("opening {}", pac_path.display()))?;
    info!(
        product = %pac.header().product_name,
        version = %pac.header().firmware_version,
        files = pac.entries().len(),
        "Container opened"
    );

    let fdl1 = pac.read_entry("FDL").context("container has no FDL entry")?;
    let fdl2 = pac
        .read_entry("FDL2")
        .context("container has no FDL2 entry")?;

    let mut client = rom_client(port, config)?;
    load_loaders(&mut client, &fdl1, &fdl2, chip, pac.descriptor())?;
    client.read_partition_table()?;

    let targets: Vec<String> = pac
        .entries()
        .iter()
        .filter(|e| e.participates())
        .filter(|e| !e.id.starts_with("FDL"))
        .filter(|e| only.is_empty() || only.iter().any(|id| id.eq_ignore_ascii_case(&e.id)))
        .map(|e| e.id.clone())
        .collect();
    if targets.is_empty() {
        bail!("nothing to flash");
    }

    for id in &targets {
        info!(%id, "Flashing");
        client.flash_image(&mut pac, id)?;
    }
    client.disconnect();
    info!(count = targets.len(), "Flash complete");
    Ok(())
}

fn cmd_extract(pac_path: &PathBuf, out: &PathBuf) -> Result<()> {
    let mut pac = PacArchive::open_path(pac_path)
        .with_context(|| format!("opening {}", pac_path.display()))?;
    pac.extract_to(out)?;
    info!(dest = %out.display(), "Extraction complete");
    Ok(())
}

fn cmd_read_partition(
    port: &str,
    config: FlashConfig,
    name: &str,
    size: Option<u64>,
    out: Option<PathBuf>,
) -> Result<()> {
    let mut client = connect_fdl2(port, config)?;
    let size = match size {
        Some(s) => s,
        None => {
            let table = client.read_partition_table()?;
            let entry = table
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name))
                .with_context(|| format!("partition {name:?} not in table; pass --size"))?;
            entry.size
        }
    };

    let data = client.read_partition(name, 0, size)?;
    let out = out.unwrap_or_else(|| PathBuf::from(format!("{name}.bin")));
    fs::write(&out, &data).with_context(|| format!("writing {}", out.display()))?;
    info!(name, bytes = data.len(), dest = %out.display(), "Partition saved");
    Ok(())
}

fn cmd_write_partition(
    port: &str,
    config: FlashConfig,
    name: &str,
    file: &PathBuf,
) -> Result<()> {
    let data = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let mut client = connect_fdl2(port, config)?;
    client.write_partition(name, &data)?;
    info!(name, bytes = data.len(), "Partition written");
    Ok(())
}

fn diag_client(
    port: &str,
    config: FlashConfig,
    responses: &[Vec<u8>],
) -> Result<DiagClient<MockTransport>> {
    if !config.dry_run {
        bail!("no serial backend is compiled into this build; pass --dry-run to simulate");
    }
    warn!("diagnostics exchanges are simulated in this build");
    let transport = MockTransport::new();
    // Canned handshake so dry runs exercise the full exchange path.
    transport.queue_response(&diag::encode(DIAG_CMD_VERSION, b"SPRD3"));
    for resp in responses {
        transport.queue_response(resp);
    }
    let mut client = DiagClient::new(transport);
    client.connect(port, config.initial_baud_rate)?;
    Ok(client)
}

fn cmd_info_boot(image: &PathBuf) -> Result<()> {
    let data = fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let info = boot::parse(&data)?;

    println!("Boot image: {}", image.display());
    if info.has_sprd_secure_header {
        println!("  secure header:  SPRD-SECUREFLAG");
    }
    println!("  kernel:         {} bytes @ 0x{:08X}", info.header.kernel_size, info.header.kernel_addr);
    println!(
        "  ramdisk:        {} bytes @ 0x{:08X} ({})",
        info.header.ramdisk_size, info.header.ramdisk_addr, info.ramdisk_format
    );
    if info.header.second_size > 0 {
        println!("  second:         {} bytes @ 0x{:08X}", info.header.second_size, info.header.second_addr);
    }
    println!("  page size:      {}", info.header.page_size);
    println!("  base address:   0x{:08X}", info.header.base_addr);
    if info.header.os_version != 0 {
        println!("  os version:     {}", boot::android_version(info.header.os_version));
    }
    if !info.header.cmdline.is_empty() {
        println!("  cmdline:        {}", info.header.cmdline);
    }
    Ok(())
}

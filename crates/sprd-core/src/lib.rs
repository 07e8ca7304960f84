//! Sprd-Core: Spreadtrum/Unisoc download-mode flashing in Rust.
//!
//! This crate implements the BSL (Boot Support Loader) protocol used by
//! Spreadtrum boot ROMs and FDL loaders for firmware flashing and
//! recovery, plus the surrounding firmware-handling machinery.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: BROM/HDLC/diagnostics framings, CRCs, status codes
//! - **Transport**: Serial port abstraction (mock for testing)
//! - **FDL**: Stage machine and client, loader download, partition and
//!   service operations
//! - **PAC**: Firmware container parsing and extraction
//! - **Sparse**: Android sparse image expansion
//! - **Boot**: Android boot image inspection
//! - **Diag**: Diagnostics-mode client (NV items, IMEI, AT passthrough)
//! - **Chips**: Platform identification database
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use sprd_core::config::FlashConfig;
//! use sprd_core::events::TracingObserver;
//! use sprd_core::fdl::FdlClient;
//! use sprd_core::transport::MockTransport;
//! use std::sync::Arc;
//!
//! let mut client = FdlClient::new(
//!     MockTransport::new(),
//!     FlashConfig::default(),
//!     Arc::new(TracingObserver),
//! );
//! client.connect("/dev/ttyUSB0").expect("connect failed");
//! ```

pub mod boot;
pub mod chips;
pub mod config;
pub mod descriptor;
pub mod diag;
pub mod events;
pub mod fdl;
pub mod pac;
pub mod protocol;
pub mod sparse;
pub mod transport;

// Re-exports for convenience
pub use boot::{BootHeader, BootImageInfo, CompressionFormat};
pub use chips::{ChipCategory, ChipInfo, StorageType, chip_info, chip_name};
pub use config::FlashConfig;
pub use descriptor::{DescriptorFile, DescriptorPartition, FirmwareDescriptor, LoaderInfo};
pub use diag::{DiagClient, DiagError};
pub use events::{FlashEvent, FlashObserver, LogLevel, NullObserver, TracingObserver};
pub use fdl::{DeviceStage, ExploitStrategy, FdlClient, FdlError, PartitionEntry};
pub use pac::{PacArchive, PacEntry, PacError, PacHeader, PacVersion};
pub use sparse::{SparseHeader, SparseStream, is_sparse};
pub use transport::{MockTransport, SerialTransport, TransportError};

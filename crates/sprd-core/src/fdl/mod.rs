//! Download state machine: stages, loader download, partition and
//! service operations.

pub mod client;
pub mod exploit;
pub mod stage;

pub use client::{FdlClient, FdlError, PartitionEntry};
pub use exploit::{ExploitError, ExploitStrategy, MemoryWriter};
pub use stage::{ChecksumMode, DeviceStage};

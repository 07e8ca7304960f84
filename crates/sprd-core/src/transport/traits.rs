//! Serial transport layer abstraction.
//!
//! Defines the `SerialTransport` trait for the byte-stream link to the
//! device, allowing different implementations (OS serial backend, mock).
//! The core never touches OS primitives directly; a concrete backend is
//! injected by the embedding application.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open {path}: {message}")]
    OpenFailed { path: String, message: String },

    #[error("Port is not open")]
    NotOpen,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Failed to set baud rate {baud}")]
    SetBaudFailed { baud: u32 },

    #[error("Device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract serial transport interface.
///
/// The protocol is strictly sequential request/response; implementations
/// are owned exclusively by one client instance and are never shared
/// across simultaneous operations.
pub trait SerialTransport {
    /// Open the port at the given baud rate.
    fn open(&mut self, path: &str, baud: u32) -> Result<(), TransportError>;

    /// Read up to `max_len` bytes, waiting at most `timeout`.
    ///
    /// A short (possibly empty) buffer on expiry is not an error; the
    /// caller decides whether an empty read means timeout.
    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Write raw bytes, returning the number written.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Reconfigure the line speed without reopening.
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError>;

    /// Discard any buffered input/output.
    fn flush(&mut self) -> Result<(), TransportError>;

    /// Close the port. Safe to call multiple times.
    fn close(&mut self);

    /// Whether the port is currently open.
    fn is_open(&self) -> bool;
}

//! Event system for UI decoupling.
//!
//! Allows CLI/GUI frontends to subscribe to flashing events without
//! tight coupling to the core logic.

use std::fmt;

use crate::fdl::DeviceStage;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted during a flashing session.
#[derive(Debug, Clone)]
pub enum FlashEvent {
    /// Device stage changed.
    StageChanged { from: DeviceStage, to: DeviceStage },
    /// Progress update for the current transfer.
    Progress {
        operation: String,
        partition: Option<String>,
        current: u64,
        total: u64,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Status byte received from the device.
    StatusReceived { code: u8, name: String },
    /// Frame sent/received on the wire.
    Frame {
        direction: FrameDirection,
        command: u16,
        length: usize,
    },
    /// Error occurred.
    Error { message: String },
    /// Current operation completed successfully.
    Complete,
}

/// Wire frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDirection::Tx => write!(f, "TX"),
            FrameDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving flash events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait FlashObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &FlashEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl FlashObserver for NullObserver {
    fn on_event(&self, _event: &FlashEvent) {
        // Do nothing
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FlashObserver for TracingObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::StageChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Stage changed");
            }
            FlashEvent::Progress {
                operation,
                partition,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(
                    operation = %operation,
                    partition = %partition.as_deref().unwrap_or("-"),
                    progress = %format!("{}%", pct),
                    "Progress"
                );
            }
            FlashEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            FlashEvent::StatusReceived { code, name } => {
                tracing::debug!(code = %format!("0x{:02X}", code), name = %name, "Status received");
            }
            FlashEvent::Frame {
                direction,
                command,
                length,
            } => {
                tracing::trace!(
                    dir = %direction,
                    cmd = %format!("0x{:02X}", command),
                    len = length,
                    "Frame"
                );
            }
            FlashEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            FlashEvent::Complete => {
                tracing::info!("Operation complete");
            }
        }
    }
}

//! Signature-bypass seam.
//!
//! Some boot ROMs verify loader signatures; those chips need a
//! chip-specific payload written into memory before FDL1 executes. The
//! payload itself lives outside this crate; the client only provides
//! the memory-write primitive and the injection point.

use thiserror::Error;

#[derive(Error, Debug)]
#[error("Exploit failed: {0}")]
pub struct ExploitError(pub String);

/// Memory-write callback handed to an exploit strategy.
pub trait MemoryWriter {
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), ExploitError>;
}

/// A chip-specific signature bypass.
pub trait ExploitStrategy {
    fn name(&self) -> &str;

    /// Apply the bypass through the given writer. Failure aborts the
    /// stage-1 load.
    fn apply(&self, chip_id: u32, writer: &mut dyn MemoryWriter) -> Result<(), ExploitError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::Cell;

    /// Records whether it ran; fails on request.
    pub struct ScriptedExploit {
        pub fail: bool,
        pub applied: Cell<bool>,
    }

    impl ScriptedExploit {
        pub fn new(fail: bool) -> Self {
            Self {
                fail,
                applied: Cell::new(false),
            }
        }
    }

    impl ExploitStrategy for ScriptedExploit {
        fn name(&self) -> &str {
            "scripted"
        }

        fn apply(
            &self,
            _chip_id: u32,
            writer: &mut dyn MemoryWriter,
        ) -> Result<(), ExploitError> {
            self.applied.set(true);
            if self.fail {
                return Err(ExploitError("scripted failure".into()));
            }
            writer.write_memory(0x6501_2F48, &[0xDE, 0xAD])
        }
    }
}

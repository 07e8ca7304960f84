//! Wire protocol module - BSL and diagnostics framings.

pub mod bsl;
pub mod constants;
pub mod crc;
pub mod diag;
pub mod status;

pub use bsl::{FrameError, decode_hdlc, encode_brom, encode_hdlc};
pub use constants::*;
pub use crc::{crc16_diag, crc16_hdlc, sprd_checksum};
pub use status::{is_ack, response_name};

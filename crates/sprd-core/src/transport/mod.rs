//! Serial transport layer.

pub mod mock;
pub mod traits;

pub use mock::MockTransport;
pub use traits::{SerialTransport, TransportError};

//! Transport abstraction for the byte stream under the engine.
//!
//! The engine only needs to write bytes; received bytes and link loss are
//! pushed into it by whoever owns the read side (see
//! [`SerialTransport::spawn_reader`]). Tests use [`MockTransport`].

pub mod error;
pub mod mock;
pub mod sync_port;
pub mod traits;

pub use error::PortError;
pub use mock::MockTransport;
pub use sync_port::{LinkEvent, SerialTransport};
pub use traits::*;

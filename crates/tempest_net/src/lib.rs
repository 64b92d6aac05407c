//! Raw HTTP/2 stream-creation flood.
//!
//! Builds frames by hand (no protocol library), runs a minimal SETTINGS
//! exchange and then opens and closes streams as fast as the transport
//! accepts them until the peer severs the connection.

pub mod detector;
pub mod driver;
pub mod error;
pub mod flood;
pub mod frame;
pub mod handshake;
pub mod transport;

pub use detector::{CancellationFlag, FailureDetector};
pub use error::{Error, Result};
pub use transport::{ConnectOptions, TransportBuilder};

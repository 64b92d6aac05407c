use std::io;
use std::net::SocketAddr;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection before the SETTINGS exchange finished.
    #[error("peer closed the connection during the handshake")]
    HandshakeIncomplete,

    #[error("client stream identifiers exhausted after {last}")]
    StreamIdsExhausted { last: u32 },
}

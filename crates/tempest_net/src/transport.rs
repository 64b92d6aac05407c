use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::SocketAddr;
use tokio::net::{TcpSocket, TcpStream};

use crate::error::{Error, Result};

/// Socket options applied before the connection is opened.
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    /// Disable Nagle's algorithm so tiny frames leave immediately.
    pub nodelay: bool,
    /// Optional local address to bind before connecting.
    pub local_addr: Option<SocketAddr>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            local_addr: None,
        }
    }
}

pub struct TransportBuilder;

impl TransportBuilder {
    /// Opens a TCP connection to the peer with the socket configured up front.
    pub async fn connect(addr: SocketAddr, options: ConnectOptions) -> Result<TcpStream> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(options.nodelay)?;
        socket.set_nonblocking(true)?; // tokio drives the connect

        if let Some(local) = options.local_addr {
            socket.bind(&SockAddr::from(local))?;
        }

        let std_stream: std::net::TcpStream = socket.into();
        let socket = TcpSocket::from_std_stream(std_stream);
        socket
            .connect(addr)
            .await
            .map_err(|source| Error::Connect { addr, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_with_nodelay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, accepted) = tokio::join!(
            TransportBuilder::connect(addr, ConnectOptions::default()),
            listener.accept()
        );
        let client = client.unwrap();
        accepted.unwrap();

        assert!(client.nodelay().unwrap());
        assert_eq!(client.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn refused_connection_names_the_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TransportBuilder::connect(addr, ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connect { addr: a, .. } if a == addr));
    }
}

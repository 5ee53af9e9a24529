//! Destination dialing

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Capability to open an outbound connection to a destination
///
/// Injected into the connection handler so tests can substitute a
/// canned backend without opening real sockets. The returned socket
/// address is the local address of the dialed connection, reported to
/// the client as the bind address.
pub trait Dialer: Clone + Send + Sync + 'static {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `destination` in `host:port` form
    fn dial(
        &self,
        destination: &str,
    ) -> impl Future<Output = io::Result<(Self::Conn, SocketAddr)>> + Send;
}

/// Dialer backed by the operating system's TCP stack
///
/// Domain names are resolved by the connect call itself; each resolved
/// address is tried in turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Conn = TcpStream;

    async fn dial(&self, destination: &str) -> io::Result<(TcpStream, SocketAddr)> {
        let stream = TcpStream::connect(destination).await?;
        let local_addr = stream.local_addr()?;
        Ok((stream, local_addr))
    }
}

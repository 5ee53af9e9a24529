//! Data Relay Module
//!
//! Bidirectional byte copying between the client and the dialed
//! backend, as two independently scheduled tasks.

use std::fmt;
use std::io;

use tokio::io::{copy, split, AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::server::RequestLogger;
use crate::Result;

/// Direction of one relay half
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::ClientToBackend => "from client to backend",
            Direction::BackendToClient => "from backend to client",
        };
        f.write_str(name)
    }
}

/// One spawned copy direction, aborted when dropped
///
/// The drop guard is what lets a cancelled handler tear down both
/// halves without waiting on them.
struct CopyTask {
    handle: JoinHandle<()>,
}

impl CopyTask {
    fn spawn<R, W>(
        mut reader: R,
        mut writer: W,
        direction: Direction,
        results: mpsc::Sender<(Direction, io::Result<u64>)>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let result = copy(&mut reader, &mut writer).await;
            let _ = results.send((direction, result)).await;
        });
        Self { handle }
    }
}

impl Drop for CopyTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Relay bytes both ways until one direction reaches end of stream or
/// fails
///
/// Whichever direction finishes first ends the relay; both connections
/// are dropped (closed) on return. A copy failure is reported with its
/// direction.
pub async fn relay<C, B>(client: C, backend: B, logger: &RequestLogger) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (client_read, client_write) = split(client);
    let (backend_read, backend_write) = split(backend);
    let (results_tx, mut results_rx) = mpsc::channel(2);

    let _upload = CopyTask::spawn(
        client_read,
        backend_write,
        Direction::ClientToBackend,
        results_tx.clone(),
    );
    let _download = CopyTask::spawn(
        backend_read,
        client_write,
        Direction::BackendToClient,
        results_tx,
    );

    match results_rx.recv().await {
        Some((direction, Ok(bytes))) => {
            logger.debug(format!("relay finished, {bytes} bytes {direction}"));
            Ok(())
        }
        Some((direction, Err(err))) => {
            Err(anyhow::Error::new(err).context(format!("relaying data {direction}")))
        }
        // Both tasks went away without reporting; nothing left to relay.
        None => Ok(()),
    }
}

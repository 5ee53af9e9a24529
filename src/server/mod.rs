//! SOCKS5 Listening Server
//!
//! Binds the listening socket for a given settings value and serves
//! accepted connections until told to stop. Listener lifecycle is owned
//! by the supervisor; this module only runs one bound listener.

use std::io;
use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info};

use crate::config::Socks5Settings;
use crate::connection::{ClientConn, TcpDialer};
use crate::protocol::Credentials;
use crate::Result;

/// Protocol log line sink
///
/// Lifecycle logging always goes to tracing directly; per-request
/// protocol lines go through here so settings can switch them off.
/// Error lines are always forwarded.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    enabled: bool,
}

impl RequestLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn info(&self, line: impl AsRef<str>) {
        if self.enabled {
            info!("{}", line.as_ref());
        }
    }

    pub fn debug(&self, line: impl AsRef<str>) {
        if self.enabled {
            debug!("{}", line.as_ref());
        }
    }

    pub fn error(&self, line: impl AsRef<str>) {
        error!("{}", line.as_ref());
    }
}

/// A bound SOCKS5 listener and its per-connection configuration
pub struct Server {
    listener: TcpListener,
    credentials: Option<Credentials>,
    logger: RequestLogger,
}

impl Server {
    /// Bind a listener for `settings`
    ///
    /// A bind failure is a startup error for the caller to retry, not a
    /// crash.
    pub async fn bind(settings: &Socks5Settings) -> Result<Self> {
        let listener = TcpListener::bind(settings.listening_address)
            .await
            .with_context(|| format!("binding to {}", settings.listening_address))?;
        let credentials =
            Credentials::from_settings(settings.username.as_deref(), settings.password.as_deref());
        let logger = RequestLogger::new(settings.log_requests);
        Ok(Self {
            listener,
            credentials,
            logger,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve connections until `stop` fires, the shutdown
    /// context is cancelled, or the listener fails
    ///
    /// Connection tasks subscribe to the shutdown context themselves;
    /// closing the listener does not touch established relays.
    pub async fn serve(self, shutdown: broadcast::Sender<()>, mut stop: oneshot::Receiver<()>) -> Result<()> {
        let mut cancel = shutdown.subscribe();
        loop {
            tokio::select! {
                biased;
                _ = cancel.recv() => {
                    debug!("listener cancelled by shutdown");
                    return Ok(());
                }
                _ = &mut stop => {
                    debug!("listener closing");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.context("accepting connection")?;
                    self.logger.debug(format!("accepted connection from {peer}"));

                    let conn = ClientConn::new(
                        stream,
                        TcpDialer,
                        self.credentials.clone(),
                        self.logger.clone(),
                    );
                    let conn_shutdown = shutdown.subscribe();
                    let logger = self.logger.clone();
                    tokio::spawn(async move {
                        if let Err(err) = conn.run(conn_shutdown).await {
                            logger.error(format!("connection from {peer}: {err:#}"));
                        }
                    });
                }
            }
        }
    }
}

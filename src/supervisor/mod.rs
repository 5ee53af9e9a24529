//! Service Lifecycle Supervision
//!
//! Owns the listening service: builds it from the current settings,
//! restarts it when settings change, and recovers from bind failures
//! and crashes with exponential backoff. Only this loop ever holds a
//! live listener, so lifecycle transitions are serialized by
//! construction.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::Socks5Settings;
use crate::server::Server;
use crate::Result;

/// Lifecycle status of the listening service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Stopped,
    Starting,
    Running,
    Crashed,
    Stopping,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Stopped => "stopped",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Crashed => "crashed",
            Status::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Shared view of the supervised service
///
/// Mutated only by the supervising loop, under the lock; settings are
/// replaced wholesale on a restart, never partially edited while a
/// listener is live.
#[derive(Debug, Clone)]
pub struct ServiceState {
    pub status: Status,
    pub settings: Socks5Settings,
}

/// Timing knobs for the supervising loop
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// First delay after a failed start, doubling on each consecutive failure
    pub backoff_initial: Duration,
    /// How long the listener must serve before it counts as stable
    pub stability_window: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            backoff_initial: Duration::from_secs(10),
            stability_window: Duration::from_secs(1),
        }
    }
}

/// Exponential backoff between failed start attempts
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration) -> Self {
        Self {
            initial,
            current: initial,
        }
    }

    /// Delay to apply now, doubling the one after it
    fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

enum SupervisorCommand {
    Start,
    Stop(oneshot::Sender<()>),
    UpdateSettings(Socks5Settings),
}

/// Why serving mode was left
enum Exit {
    Stopped,
    Shutdown,
}

/// How a backoff wait ended
enum BackoffOutcome {
    Elapsed,
    Stopped(oneshot::Sender<()>),
    Shutdown,
}

/// Handle for controlling and observing the supervising loop
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<SupervisorCommand>,
    state: Arc<Mutex<ServiceState>>,
}

impl SupervisorHandle {
    /// Ask the loop to start serving with its current settings
    pub async fn start(&self) -> Result<()> {
        self.commands
            .send(SupervisorCommand::Start)
            .await
            .map_err(|_| anyhow!("supervisor is gone"))
    }

    /// Ask the loop to stop serving and wait until it fully has
    pub async fn stop(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(SupervisorCommand::Stop(done_tx))
            .await
            .map_err(|_| anyhow!("supervisor is gone"))?;
        done_rx.await.map_err(|_| anyhow!("supervisor is gone"))?;
        Ok(())
    }

    /// Replace the service settings, restarting the listener if one is live
    pub async fn update_settings(&self, settings: Socks5Settings) -> Result<()> {
        self.commands
            .send(SupervisorCommand::UpdateSettings(settings))
            .await
            .map_err(|_| anyhow!("supervisor is gone"))
    }

    /// Current lifecycle status
    pub fn status(&self) -> Status {
        self.state.lock().unwrap().status
    }

    /// Current settings
    pub fn settings(&self) -> Socks5Settings {
        self.state.lock().unwrap().settings.clone()
    }
}

/// The supervising loop
pub struct Supervisor {
    commands: mpsc::Receiver<SupervisorCommand>,
    state: Arc<Mutex<ServiceState>>,
    shutdown: broadcast::Sender<()>,
    options: SupervisorOptions,
}

impl Supervisor {
    /// Create a loop and its control handle
    pub fn new(
        settings: Socks5Settings,
        shutdown: broadcast::Sender<()>,
        options: SupervisorOptions,
    ) -> (Self, SupervisorHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let state = Arc::new(Mutex::new(ServiceState {
            status: Status::Stopped,
            settings,
        }));
        let handle = SupervisorHandle {
            commands: commands_tx,
            state: Arc::clone(&state),
        };
        let supervisor = Self {
            commands: commands_rx,
            state,
            shutdown,
            options,
        };
        (supervisor, handle)
    }

    fn set_status(&self, status: Status) {
        let mut state = self.state.lock().unwrap();
        if state.status != status {
            debug!("socks5 service {} -> {}", state.status, status);
            state.status = status;
        }
    }

    fn settings(&self) -> Socks5Settings {
        self.state.lock().unwrap().settings.clone()
    }

    fn set_settings(&self, settings: Socks5Settings) {
        self.state.lock().unwrap().settings = settings;
    }

    /// Run until the shutdown context is cancelled
    pub async fn run(mut self) {
        let mut cancel = self.shutdown.subscribe();
        loop {
            // Stopped: idle until told to start. Cancellation always
            // wins over pending commands.
            tokio::select! {
                biased;
                _ = cancel.recv() => break,
                command = self.commands.recv() => match command {
                    Some(SupervisorCommand::Start) => {
                        if let Exit::Shutdown = self.serve_until_stopped().await {
                            break;
                        }
                    }
                    Some(SupervisorCommand::Stop(done)) => {
                        let _ = done.send(());
                    }
                    Some(SupervisorCommand::UpdateSettings(settings)) => {
                        self.set_settings(settings);
                    }
                    None => break,
                },
            }
        }
        self.set_status(Status::Stopped);
        info!("socks5 supervisor exiting");
    }

    /// Serve, restarting on failure and on settings changes, until a
    /// stop command or shutdown
    async fn serve_until_stopped(&mut self) -> Exit {
        let mut cancel = self.shutdown.subscribe();
        let mut backoff = Backoff::new(self.options.backoff_initial);

        loop {
            self.set_status(Status::Starting);
            let settings = self.settings();

            let server = match Server::bind(&settings).await {
                Ok(server) => server,
                Err(err) => {
                    error!("starting socks5 server: {err:#}");
                    match self.wait_backoff(backoff.next(), &mut cancel).await {
                        BackoffOutcome::Elapsed => continue,
                        BackoffOutcome::Stopped(done) => {
                            self.set_status(Status::Stopped);
                            let _ = done.send(());
                            return Exit::Stopped;
                        }
                        BackoffOutcome::Shutdown => return Exit::Shutdown,
                    }
                }
            };

            match server.local_addr() {
                Ok(addr) => info!("socks5 server listening on {addr}"),
                Err(err) => debug!("listening address unavailable: {err}"),
            }

            let (stop_tx, stop_rx) = oneshot::channel();
            let mut serve_task = tokio::spawn(server.serve(self.shutdown.clone(), stop_rx));

            let stability = sleep(self.options.stability_window);
            tokio::pin!(stability);
            let mut stabilized = false;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.recv() => {
                        let _ = stop_tx.send(());
                        let _ = serve_task.await;
                        return Exit::Shutdown;
                    }
                    _ = &mut stability, if !stabilized => {
                        stabilized = true;
                        backoff.reset();
                        self.set_status(Status::Running);
                    }
                    joined = &mut serve_task => {
                        self.set_status(Status::Crashed);
                        match joined {
                            Ok(Ok(())) => error!("socks5 server stopped unexpectedly"),
                            Ok(Err(err)) => error!("socks5 server failed: {err:#}"),
                            Err(err) => error!("socks5 server task panicked: {err}"),
                        }
                        match self.wait_backoff(backoff.next(), &mut cancel).await {
                            BackoffOutcome::Elapsed => {}
                            BackoffOutcome::Stopped(done) => {
                                self.set_status(Status::Stopped);
                                let _ = done.send(());
                                return Exit::Stopped;
                            }
                            BackoffOutcome::Shutdown => return Exit::Shutdown,
                        }
                        // Rebuild the listener.
                        break;
                    }
                    command = self.commands.recv() => match command {
                        Some(SupervisorCommand::Stop(done)) => {
                            self.set_status(Status::Stopping);
                            let _ = stop_tx.send(());
                            let _ = serve_task.await;
                            self.set_status(Status::Stopped);
                            let _ = done.send(());
                            return Exit::Stopped;
                        }
                        Some(SupervisorCommand::UpdateSettings(settings)) => {
                            info!("socks5 settings changed, restarting listener");
                            let _ = stop_tx.send(());
                            let _ = serve_task.await;
                            self.set_settings(settings);
                            // Rebuild with the new settings.
                            break;
                        }
                        Some(SupervisorCommand::Start) => {
                            debug!("socks5 server already started");
                        }
                        None => {
                            let _ = stop_tx.send(());
                            let _ = serve_task.await;
                            return Exit::Shutdown;
                        }
                    },
                }
            }
        }
    }

    /// Wait out a backoff delay, still answering commands and shutdown
    async fn wait_backoff(
        &mut self,
        delay: Duration,
        cancel: &mut broadcast::Receiver<()>,
    ) -> BackoffOutcome {
        info!("retrying socks5 server in {}", humantime::format_duration(delay));
        let timer = sleep(delay);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                biased;
                _ = cancel.recv() => return BackoffOutcome::Shutdown,
                _ = &mut timer => return BackoffOutcome::Elapsed,
                command = self.commands.recv() => match command {
                    Some(SupervisorCommand::Stop(done)) => return BackoffOutcome::Stopped(done),
                    Some(SupervisorCommand::UpdateSettings(settings)) => {
                        // Retry immediately with the new settings.
                        self.set_settings(settings);
                        return BackoffOutcome::Elapsed;
                    }
                    Some(SupervisorCommand::Start) => {}
                    None => return BackoffOutcome::Shutdown,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(10));
        assert_eq!(backoff.next(), Duration::from_secs(10));
        assert_eq!(backoff.next(), Duration::from_secs(20));
        assert_eq!(backoff.next(), Duration::from_secs(40));
        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_secs(10));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let mut backoff = Backoff::new(Duration::MAX / 2);
        backoff.next();
        assert_eq!(backoff.next(), Duration::MAX);
    }

    #[test]
    fn status_display_names() {
        assert_eq!(Status::Stopped.to_string(), "stopped");
        assert_eq!(Status::Starting.to_string(), "starting");
        assert_eq!(Status::Running.to_string(), "running");
        assert_eq!(Status::Crashed.to_string(), "crashed");
        assert_eq!(Status::Stopping.to_string(), "stopping");
    }
}

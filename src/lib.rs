//! tunsocks Library
//!
//! SOCKS5 proxy service for a VPN gateway container. Implements the
//! RFC 1928 wire protocol with RFC 1929 username/password
//! authentication (CONNECT only), and the supervising lifecycle that
//! keeps the listening service alive across settings changes and
//! failures.

pub mod config;
pub mod connection;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod supervisor;

pub use config::{Config, Socks5Settings};
pub use server::Server;
pub use shutdown::ShutdownCoordinator;
pub use supervisor::{Status, Supervisor, SupervisorHandle, SupervisorOptions};

/// Common error type for the proxy service
pub type Result<T> = anyhow::Result<T>;

//! Connection Handling Module
//!
//! One handler per accepted client connection, with the outbound
//! dialing capability injected.

pub mod dialer;
pub mod handler;

pub use dialer::{Dialer, TcpDialer};
pub use handler::ClientConn;

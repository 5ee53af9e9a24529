//! SOCKS5 Protocol Implementation
//!
//! Wire-level codec for RFC 1928 plus the RFC 1929 username/password
//! sub-negotiation.

pub mod codec;
pub mod constants;
pub mod error;
pub mod types;
pub mod userpass;

pub use error::ProtocolError;
pub use types::{AddrType, AuthMethod, Command, ReplyCode, Request};
pub use userpass::Credentials;

//! Typed SOCKS5 protocol failures

use std::io;

use thiserror::Error;

use crate::protocol::types::ReplyCode;

/// Failures produced while decoding or encoding protocol frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("socks version {0} is not supported")]
    VersionNotSupported(u8),

    #[error("no method identifiers were offered")]
    NoMethodIdentifiers,

    #[error("no valid method identifier: offered {offered}; required {required}")]
    NoValidMethodIdentifier { offered: String, required: String },

    #[error("request socks version mismatch: expected {expected}, received {received}")]
    RequestVersionMismatch { expected: u8, received: u8 },

    #[error("command {0:#04x} is not supported")]
    CommandNotSupported(u8),

    #[error("address type {0:#04x} is not supported")]
    AddressTypeNotSupported(u8),

    #[error("domain name is {0} bytes long, maximum is 255")]
    DomainNameTooLong(usize),

    #[error("unexpected ip version for address {address}")]
    IpVersionUnexpected { address: String },

    #[error("authentication version {0} is not supported")]
    SubnegotiationVersionNotSupported(u8),

    #[error("username is not valid")]
    UsernameNotValid,

    #[error("password is not valid")]
    PasswordNotValid,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Reply code to answer the client with for this failure
    ///
    /// Only meaningful for failures raised after negotiation completed,
    /// when the client expects a request reply frame.
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            ProtocolError::CommandNotSupported(_) => ReplyCode::CommandNotSupported,
            ProtocolError::AddressTypeNotSupported(_) => ReplyCode::AddressTypeNotSupported,
            _ => ReplyCode::GeneralServerFailure,
        }
    }
}

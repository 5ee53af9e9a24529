//! SOCKS5 Protocol Types

use std::fmt;

use crate::protocol::constants::*;

/// Authentication methods negotiated during the SOCKS5 greeting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuthRequired,
    Gssapi,
    UsernamePassword,
    NoAcceptable,
}

impl AuthMethod {
    /// Get the method identifier byte for this method
    pub fn code(self) -> u8 {
        match self {
            AuthMethod::NoAuthRequired => SOCKS5_AUTH_NONE,
            AuthMethod::Gssapi => SOCKS5_AUTH_GSSAPI,
            AuthMethod::UsernamePassword => SOCKS5_AUTH_USERPASS,
            AuthMethod::NoAcceptable => SOCKS5_AUTH_NO_ACCEPTABLE,
        }
    }

    /// Create from a method identifier byte
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            SOCKS5_AUTH_NONE => Some(AuthMethod::NoAuthRequired),
            SOCKS5_AUTH_GSSAPI => Some(AuthMethod::Gssapi),
            SOCKS5_AUTH_USERPASS => Some(AuthMethod::UsernamePassword),
            SOCKS5_AUTH_NO_ACCEPTABLE => Some(AuthMethod::NoAcceptable),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthMethod::NoAuthRequired => "no authentication required",
            AuthMethod::Gssapi => "GSSAPI",
            AuthMethod::UsernamePassword => "username/password",
            AuthMethod::NoAcceptable => "no acceptable method",
        };
        f.write_str(name)
    }
}

/// Human-readable name for a method identifier offered by a client
pub fn method_name(code: u8) -> String {
    match AuthMethod::from_code(code) {
        Some(method) => method.to_string(),
        None => format!("unknown method ({code})"),
    }
}

/// SOCKS5 request commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

impl Command {
    /// Get the command code for this command
    pub fn code(self) -> u8 {
        match self {
            Command::Connect => SOCKS5_CMD_CONNECT,
            Command::Bind => SOCKS5_CMD_BIND,
            Command::UdpAssociate => SOCKS5_CMD_UDP_ASSOCIATE,
        }
    }

    /// Create from a command code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            SOCKS5_CMD_CONNECT => Some(Command::Connect),
            SOCKS5_CMD_BIND => Some(Command::Bind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(Command::UdpAssociate),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Connect => "CONNECT",
            Command::Bind => "BIND",
            Command::UdpAssociate => "UDP ASSOCIATE",
        };
        f.write_str(name)
    }
}

/// Address types carried in request and reply frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrType {
    Ipv4,
    DomainName,
    Ipv6,
}

impl AddrType {
    /// Get the address type tag for this type
    pub fn code(self) -> u8 {
        match self {
            AddrType::Ipv4 => SOCKS5_ADDR_IPV4,
            AddrType::DomainName => SOCKS5_ADDR_DOMAIN,
            AddrType::Ipv6 => SOCKS5_ADDR_IPV6,
        }
    }

    /// Create from an address type tag
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            SOCKS5_ADDR_IPV4 => Some(AddrType::Ipv4),
            SOCKS5_ADDR_DOMAIN => Some(AddrType::DomainName),
            SOCKS5_ADDR_IPV6 => Some(AddrType::Ipv6),
            _ => None,
        }
    }
}

/// Reply codes defined by RFC 1928 section 6
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Succeeded,
    GeneralServerFailure,
    ConnectionNotAllowedByRuleset,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
}

impl ReplyCode {
    /// Get the reply code byte
    pub fn code(self) -> u8 {
        match self {
            ReplyCode::Succeeded => SOCKS5_REPLY_SUCCESS,
            ReplyCode::GeneralServerFailure => SOCKS5_REPLY_GENERAL_FAILURE,
            ReplyCode::ConnectionNotAllowedByRuleset => SOCKS5_REPLY_CONNECTION_NOT_ALLOWED,
            ReplyCode::NetworkUnreachable => SOCKS5_REPLY_NETWORK_UNREACHABLE,
            ReplyCode::HostUnreachable => SOCKS5_REPLY_HOST_UNREACHABLE,
            ReplyCode::ConnectionRefused => SOCKS5_REPLY_CONNECTION_REFUSED,
            ReplyCode::TtlExpired => SOCKS5_REPLY_TTL_EXPIRED,
            ReplyCode::CommandNotSupported => SOCKS5_REPLY_COMMAND_NOT_SUPPORTED,
            ReplyCode::AddressTypeNotSupported => SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED,
        }
    }
}

/// A decoded client request
///
/// The destination address is kept in its textual form: dotted decimal
/// for IPv4, the canonical textual form for IPv6, the name verbatim for
/// domain names. Name resolution is the dialer's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub destination_address: String,
    pub destination_port: u16,
    pub address_type: AddrType,
}

impl Request {
    /// Destination in `host:port` form suitable for dialing
    pub fn destination(&self) -> String {
        match self.address_type {
            AddrType::Ipv6 => format!("[{}]:{}", self.destination_address, self.destination_port),
            _ => format!("{}:{}", self.destination_address, self.destination_port),
        }
    }
}

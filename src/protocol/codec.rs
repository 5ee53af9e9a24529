//! Wire codec for the SOCKS5 exchange
//!
//! Pure frame-level reads and writes over any async byte stream. The
//! functions here hold no state beyond the frame currently in flight,
//! so they work equally on a `TcpStream` and on an in-memory pipe.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::constants::*;
use crate::protocol::error::ProtocolError;
use crate::protocol::types::{method_name, AddrType, AuthMethod, Command, ReplyCode, Request};

/// Read the client greeting and check that `required` is among the
/// offered method identifiers.
///
/// The negotiation reply is not written here. The caller must answer
/// with [`send_negotiation_reply`] in every path, including failure,
/// before closing the connection.
pub async fn verify_first_negotiation<R>(
    reader: &mut R,
    required: AuthMethod,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;
    let version = header[0];
    let method_count = header[1];

    if version != SOCKS5_VERSION {
        return Err(ProtocolError::VersionNotSupported(version));
    }
    if method_count == 0 {
        return Err(ProtocolError::NoMethodIdentifiers);
    }

    let mut methods = vec![0u8; method_count as usize];
    reader.read_exact(&mut methods).await?;

    if methods.iter().any(|&code| code == required.code()) {
        return Ok(());
    }

    let offered = methods
        .iter()
        .map(|&code| method_name(code))
        .collect::<Vec<_>>()
        .join(", ");
    Err(ProtocolError::NoValidMethodIdentifier {
        offered,
        required: required.to_string(),
    })
}

/// Write the negotiation reply selecting `method`
pub async fn send_negotiation_reply<W>(writer: &mut W, method: AuthMethod) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[SOCKS5_VERSION, method.code()]).await
}

/// Decode the request frame that follows a completed negotiation
pub async fn decode_request<R>(reader: &mut R) -> Result<Request, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let version = header[0];
    let command_code = header[1];
    // header[2] is the reserved byte, read and discarded
    let addr_type_code = header[3];

    if version != SOCKS5_VERSION {
        return Err(ProtocolError::RequestVersionMismatch {
            expected: SOCKS5_VERSION,
            received: version,
        });
    }

    let command =
        Command::from_code(command_code).ok_or(ProtocolError::CommandNotSupported(command_code))?;
    let address_type = AddrType::from_code(addr_type_code)
        .ok_or(ProtocolError::AddressTypeNotSupported(addr_type_code))?;

    let destination_address = read_address(reader, address_type).await?;
    let destination_port = read_port(reader).await?;

    Ok(Request {
        command,
        destination_address,
        destination_port,
        address_type,
    })
}

/// Read an address field of the given type, returning its textual form
pub(crate) async fn read_address<R>(
    reader: &mut R,
    address_type: AddrType,
) -> Result<String, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    match address_type {
        AddrType::Ipv4 => {
            let mut octets = [0u8; 4];
            reader.read_exact(&mut octets).await?;
            Ok(Ipv4Addr::from(octets).to_string())
        }
        AddrType::Ipv6 => {
            let mut octets = [0u8; 16];
            reader.read_exact(&mut octets).await?;
            Ok(Ipv6Addr::from(octets).to_string())
        }
        AddrType::DomainName => {
            let mut length = [0u8; 1];
            reader.read_exact(&mut length).await?;
            let mut name = vec![0u8; length[0] as usize];
            reader.read_exact(&mut name).await?;
            Ok(String::from_utf8_lossy(&name).into_owned())
        }
    }
}

/// Read a big-endian port field
pub(crate) async fn read_port<R>(reader: &mut R) -> Result<u16, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut port = [0u8; 2];
    reader.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}

/// Write the 3-byte failure reply for `code`
pub async fn encode_failure_reply<W>(writer: &mut W, code: ReplyCode) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&[SOCKS5_VERSION, code.code(), SOCKS5_RESERVED])
        .await
}

/// Encode and write the success reply carrying the bind address
///
/// The whole frame is assembled before anything is written, so an
/// address that cannot be encoded leaves the stream untouched.
pub async fn encode_success_reply<W>(
    writer: &mut W,
    address_type: AddrType,
    address: &str,
    port: u16,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = vec![
        SOCKS5_VERSION,
        ReplyCode::Succeeded.code(),
        SOCKS5_RESERVED,
        address_type.code(),
    ];

    match address_type {
        AddrType::Ipv4 => {
            let ip: Ipv4Addr = address.parse().map_err(|_| ProtocolError::IpVersionUnexpected {
                address: address.to_string(),
            })?;
            frame.extend_from_slice(&ip.octets());
        }
        AddrType::Ipv6 => {
            let ip: Ipv6Addr = address.parse().map_err(|_| ProtocolError::IpVersionUnexpected {
                address: address.to_string(),
            })?;
            frame.extend_from_slice(&ip.octets());
        }
        AddrType::DomainName => {
            if address.len() > SOCKS5_MAX_DOMAIN_LEN {
                return Err(ProtocolError::DomainNameTooLong(address.len()));
            }
            frame.push(address.len() as u8);
            frame.extend_from_slice(address.as_bytes());
        }
    }

    frame.extend_from_slice(&port.to_be_bytes());
    writer.write_all(&frame).await?;
    Ok(())
}

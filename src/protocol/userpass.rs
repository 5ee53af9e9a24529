//! RFC 1929 username/password sub-negotiation

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::constants::*;
use crate::protocol::error::ProtocolError;

/// Credentials a client must present when username/password
/// authentication is configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Build credentials from settings fields
    ///
    /// Returns `None` when both fields are empty, which selects
    /// no-authentication mode for the whole listener.
    pub fn from_settings(username: Option<&str>, password: Option<&str>) -> Option<Self> {
        let username = username.unwrap_or_default();
        let password = password.unwrap_or_default();
        if username.is_empty() && password.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Run the server side of the RFC 1929 exchange
///
/// A failure status is written before every error return; RFC 1929
/// requires the connection to be closed right after, which is the
/// caller's job. The username is checked before any password bytes are
/// read.
pub async fn negotiate<S>(stream: &mut S, credentials: &Credentials) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    let version = header[0];
    let username_len = header[1] as usize;

    if version != SOCKS5_USERPASS_VERSION {
        send_status(stream, SOCKS5_USERPASS_FAILURE).await?;
        return Err(ProtocolError::SubnegotiationVersionNotSupported(version));
    }

    let mut username = vec![0u8; username_len];
    stream.read_exact(&mut username).await?;
    // TODO: evaluate a constant-time comparison for credentials.
    if username != credentials.username.as_bytes() {
        send_status(stream, SOCKS5_USERPASS_FAILURE).await?;
        return Err(ProtocolError::UsernameNotValid);
    }

    let mut password_len = [0u8; 1];
    stream.read_exact(&mut password_len).await?;
    let mut password = vec![0u8; password_len[0] as usize];
    stream.read_exact(&mut password).await?;
    if password != credentials.password.as_bytes() {
        send_status(stream, SOCKS5_USERPASS_FAILURE).await?;
        return Err(ProtocolError::PasswordNotValid);
    }

    send_status(stream, SOCKS5_USERPASS_SUCCESS).await?;
    Ok(())
}

async fn send_status<W>(writer: &mut W, status: u8) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[SOCKS5_USERPASS_VERSION, status]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    // These tests assert on the exact reply bytes because clients key off
    // them. The comparison itself is plain byte equality rather than
    // constant-time, so success and failure timing differ; changing that
    // is a behavior change, not a refactor.

    fn test_credentials() -> Credentials {
        Credentials {
            username: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    fn auth_frame(username: &[u8], password: &[u8]) -> Vec<u8> {
        let mut frame = vec![SOCKS5_USERPASS_VERSION, username.len() as u8];
        frame.extend_from_slice(username);
        frame.push(password.len() as u8);
        frame.extend_from_slice(password);
        frame
    }

    #[tokio::test]
    async fn matching_credentials_succeed() {
        let (mut client, mut server) = duplex(256);
        let handle = tokio::spawn(async move {
            client.write_all(&auth_frame(b"user", b"pass")).await.unwrap();
            let mut reply = [0u8; 2];
            client.read_exact(&mut reply).await.unwrap();
            reply
        });

        negotiate(&mut server, &test_credentials()).await.unwrap();
        assert_eq!(handle.await.unwrap(), [0x01, 0x00]);
    }

    #[tokio::test]
    async fn wrong_password_fails_after_failure_reply() {
        let (mut client, mut server) = duplex(256);
        let handle = tokio::spawn(async move {
            client.write_all(&auth_frame(b"user", b"wrong")).await.unwrap();
            let mut reply = [0u8; 2];
            client.read_exact(&mut reply).await.unwrap();
            reply
        });

        let result = negotiate(&mut server, &test_credentials()).await;
        assert!(matches!(result, Err(ProtocolError::PasswordNotValid)));
        assert_eq!(handle.await.unwrap(), [0x01, 0x01]);
    }

    #[tokio::test]
    async fn wrong_username_fails_before_password_is_read() {
        let (mut client, mut server) = duplex(256);
        let handle = tokio::spawn(async move {
            // Only the version, length and username go out; the server
            // must fail without waiting for password bytes.
            client.write_all(&[SOCKS5_USERPASS_VERSION, 4]).await.unwrap();
            client.write_all(b"eve!").await.unwrap();
            let mut reply = [0u8; 2];
            client.read_exact(&mut reply).await.unwrap();
            reply
        });

        let result = negotiate(&mut server, &test_credentials()).await;
        assert!(matches!(result, Err(ProtocolError::UsernameNotValid)));
        assert_eq!(handle.await.unwrap(), [0x01, 0x01]);
    }

    #[tokio::test]
    async fn unsupported_subnegotiation_version_is_rejected() {
        let (mut client, mut server) = duplex(256);
        let handle = tokio::spawn(async move {
            client.write_all(&[0x02, 4]).await.unwrap();
            let mut reply = [0u8; 2];
            client.read_exact(&mut reply).await.unwrap();
            reply
        });

        let result = negotiate(&mut server, &test_credentials()).await;
        assert!(matches!(
            result,
            Err(ProtocolError::SubnegotiationVersionNotSupported(2))
        ));
        assert_eq!(handle.await.unwrap(), [0x01, 0x01]);
    }

    #[test]
    fn credentials_require_at_least_one_field() {
        assert!(Credentials::from_settings(None, None).is_none());
        assert!(Credentials::from_settings(Some(""), Some("")).is_none());

        let only_user = Credentials::from_settings(Some("user"), None).unwrap();
        assert_eq!(only_user.username, "user");
        assert_eq!(only_user.password, "");

        let both = Credentials::from_settings(Some("user"), Some("pass")).unwrap();
        assert_eq!(both.password, "pass");
    }
}

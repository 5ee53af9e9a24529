//! Per-connection SOCKS5 handling

use std::net::SocketAddr;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;

use crate::connection::Dialer;
use crate::protocol::codec;
use crate::protocol::userpass;
use crate::protocol::{AddrType, AuthMethod, Command, Credentials, ReplyCode};
use crate::relay;
use crate::server::RequestLogger;
use crate::Result;

/// Handler owning one accepted client connection end to end
///
/// Drives the connection through negotiation, authentication, request
/// handling and the data relay. Both the client connection and any
/// dialed backend connection are closed when the handler returns, on
/// every path.
pub struct ClientConn<S, D> {
    stream: S,
    dialer: D,
    credentials: Option<Credentials>,
    logger: RequestLogger,
}

impl<S, D> ClientConn<S, D>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    D: Dialer,
{
    /// Create a handler for an accepted connection
    pub fn new(stream: S, dialer: D, credentials: Option<Credentials>, logger: RequestLogger) -> Self {
        Self {
            stream,
            dialer,
            credentials,
            logger,
        }
    }

    /// Service the connection to completion
    ///
    /// Cancellation through the shutdown channel closes the connection
    /// and returns without error; protocol and relay failures come back
    /// as errors after the client has received its reply frame.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        tokio::select! {
            result = self.process() => result,
            // Dropping the in-flight future closes both connections; the
            // abort guards inside the relay stop its copy tasks.
            _ = shutdown.recv() => Ok(()),
        }
    }

    /// The method clients must offer, derived from configuration
    fn required_method(&self) -> AuthMethod {
        if self.credentials.is_some() {
            AuthMethod::UsernamePassword
        } else {
            AuthMethod::NoAuthRequired
        }
    }

    async fn process(mut self) -> Result<()> {
        let required = self.required_method();

        match codec::verify_first_negotiation(&mut self.stream, required).await {
            Ok(()) => {
                codec::send_negotiation_reply(&mut self.stream, required)
                    .await
                    .context("replying to negotiation")?;
            }
            Err(err) => {
                // RFC 1928 wants an answer before the connection closes.
                if let Err(write_err) =
                    codec::send_negotiation_reply(&mut self.stream, AuthMethod::NoAcceptable).await
                {
                    self.logger.debug(format!("writing negotiation reply: {write_err}"));
                }
                return Err(err.into());
            }
        }

        match required {
            AuthMethod::NoAuthRequired => {}
            AuthMethod::UsernamePassword => {
                let credentials = match &self.credentials {
                    Some(credentials) => credentials.clone(),
                    None => unreachable!("username/password selected without credentials"),
                };
                userpass::negotiate(&mut self.stream, &credentials).await?;
            }
            AuthMethod::Gssapi | AuthMethod::NoAcceptable => {
                unreachable!("auth method {required} can never be selected")
            }
        }

        self.handle_request().await
    }

    async fn handle_request(mut self) -> Result<()> {
        let request = match codec::decode_request(&mut self.stream).await {
            Ok(request) => request,
            Err(err) => {
                self.send_failure(err.reply_code()).await;
                return Err(err.into());
            }
        };

        if request.command != Command::Connect {
            self.send_failure(ReplyCode::CommandNotSupported).await;
            return Err(
                crate::protocol::ProtocolError::CommandNotSupported(request.command.code()).into(),
            );
        }

        let destination = request.destination();
        self.logger.info(format!("CONNECT {destination}"));

        let (backend, local_addr) = match self.dialer.dial(&destination).await {
            Ok(dialed) => dialed,
            Err(err) => {
                self.send_failure(ReplyCode::GeneralServerFailure).await;
                return Err(
                    anyhow::Error::new(err).context(format!("dialing {destination}")),
                );
            }
        };

        let bind_type = match local_addr {
            SocketAddr::V4(_) => AddrType::Ipv4,
            SocketAddr::V6(_) => AddrType::Ipv6,
        };
        codec::encode_success_reply(
            &mut self.stream,
            bind_type,
            &local_addr.ip().to_string(),
            local_addr.port(),
        )
        .await
        .context("replying to request")?;

        relay::relay(self.stream, backend, &self.logger).await
    }

    /// Send a failure reply; write errors are logged, never escalated,
    /// since the connection is already being torn down
    async fn send_failure(&mut self, code: ReplyCode) {
        if let Err(err) = codec::encode_failure_reply(&mut self.stream, code).await {
            self.logger.debug(format!("writing failure reply: {err}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolError;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::time::timeout;

    #[derive(Clone)]
    struct MockDialer {
        backend: Arc<Mutex<Option<DuplexStream>>>,
        local_addr: SocketAddr,
        dialed: Arc<AtomicBool>,
    }

    impl MockDialer {
        fn with_backend(backend: DuplexStream) -> Self {
            Self {
                backend: Arc::new(Mutex::new(Some(backend))),
                local_addr: "10.0.0.9:4242".parse().unwrap(),
                dialed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn without_backend() -> Self {
            Self {
                backend: Arc::new(Mutex::new(None)),
                local_addr: "10.0.0.9:4242".parse().unwrap(),
                dialed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Dialer for MockDialer {
        type Conn = DuplexStream;

        async fn dial(&self, _destination: &str) -> io::Result<(DuplexStream, SocketAddr)> {
            self.dialed.store(true, Ordering::SeqCst);
            let conn = self
                .backend
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no backend"))?;
            Ok((conn, self.local_addr))
        }
    }

    fn spawn_handler(
        stream: DuplexStream,
        dialer: MockDialer,
        credentials: Option<Credentials>,
    ) -> (
        tokio::task::JoinHandle<Result<()>>,
        broadcast::Sender<()>,
    ) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let conn = ClientConn::new(stream, dialer, credentials, RequestLogger::new(false));
        (tokio::spawn(conn.run(shutdown_rx)), shutdown_tx)
    }

    #[tokio::test]
    async fn no_auth_connect_relays_both_ways() {
        let (mut client, server_side) = duplex(1024);
        let (backend_near, mut backend_far) = duplex(1024);
        let dialer = MockDialer::with_backend(backend_near);
        let (handle, _shutdown) = spawn_handler(server_side, dialer, None);

        client.write_all(&[0x05, 1, 0x00]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        assert_eq!(choice, [0x05, 0x00]);

        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);
        assert_eq!(&reply[4..8], &[10, 0, 0, 9]);
        assert_eq!(u16::from_be_bytes([reply[8], reply[9]]), 4242);

        client.write_all(b"ping").await.unwrap();
        let mut at_backend = [0u8; 4];
        backend_far.read_exact(&mut at_backend).await.unwrap();
        assert_eq!(&at_backend, b"ping");

        backend_far.write_all(b"pong").await.unwrap();
        let mut at_client = [0u8; 4];
        client.read_exact(&mut at_client).await.unwrap();
        assert_eq!(&at_client, b"pong");

        drop(client);
        let result = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn bind_command_is_rejected_without_dialing() {
        let (mut client, server_side) = duplex(1024);
        let dialer = MockDialer::without_backend();
        let dialed = dialer.dialed.clone();
        let (handle, _shutdown) = spawn_handler(server_side, dialer, None);

        client.write_all(&[0x05, 1, 0x00]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();

        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
            .await
            .unwrap();
        let mut reply = [0u8; 3];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x07, 0x00]);

        let result = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::CommandNotSupported(0x02))
        ));
        assert!(!dialed.load(Ordering::SeqCst));

        // The connection is closed after the failure reply.
        let mut rest = [0u8; 1];
        assert_eq!(client.read(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_required_method_gets_no_acceptable_reply() {
        let (mut client, server_side) = duplex(1024);
        let dialer = MockDialer::without_backend();
        let credentials = Credentials::from_settings(Some("user"), Some("pass"));
        let (handle, _shutdown) = spawn_handler(server_side, dialer, credentials);

        client.write_all(&[0x05, 1, 0x00]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        assert_eq!(choice, [0x05, 0xFF]);

        let result = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::NoValidMethodIdentifier { .. })
        ));
    }

    #[tokio::test]
    async fn authenticated_connect_requires_matching_credentials() {
        let (mut client, server_side) = duplex(1024);
        let (backend_near, mut backend_far) = duplex(1024);
        let dialer = MockDialer::with_backend(backend_near);
        let credentials = Credentials::from_settings(Some("user"), Some("pass"));
        let (handle, _shutdown) = spawn_handler(server_side, dialer, credentials);

        client.write_all(&[0x05, 1, 0x02]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        assert_eq!(choice, [0x05, 0x02]);

        client.write_all(&[0x01, 4]).await.unwrap();
        client.write_all(b"user").await.unwrap();
        client.write_all(&[4]).await.unwrap();
        client.write_all(b"pass").await.unwrap();
        let mut status = [0u8; 2];
        client.read_exact(&mut status).await.unwrap();
        assert_eq!(status, [0x01, 0x00]);

        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x00);

        client.write_all(b"hello").await.unwrap();
        let mut at_backend = [0u8; 5];
        backend_far.read_exact(&mut at_backend).await.unwrap();
        assert_eq!(&at_backend, b"hello");

        drop(client);
        let result = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn dial_failure_sends_general_failure_reply() {
        let (mut client, server_side) = duplex(1024);
        let dialer = MockDialer::without_backend();
        let (handle, _shutdown) = spawn_handler(server_side, dialer, None);

        client.write_all(&[0x05, 1, 0x00]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();

        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
            .await
            .unwrap();
        let mut reply = [0u8; 3];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x01, 0x00]);

        let result = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn shutdown_mid_relay_closes_cleanly() {
        let (mut client, server_side) = duplex(1024);
        let (backend_near, mut backend_far) = duplex(1024);
        let dialer = MockDialer::with_backend(backend_near);
        let (handle, shutdown) = spawn_handler(server_side, dialer, None);

        client.write_all(&[0x05, 1, 0x00]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();

        // Mid-relay traffic, then cancel.
        client.write_all(b"data").await.unwrap();
        let mut at_backend = [0u8; 4];
        backend_far.read_exact(&mut at_backend).await.unwrap();

        shutdown.send(()).unwrap();
        let result = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(result.is_ok());

        // Both sides observe the closed connection.
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
        assert_eq!(backend_far.read(&mut buf).await.unwrap(), 0);
    }
}

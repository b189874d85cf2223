//! Low-level SMTP stream handling.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};

use crate::config::TlsVersion;
use crate::error::{Error, Result};

/// Opens the byte stream a connection runs on.
///
/// The default [`TcpConnector`] dials TCP; tests plug in scripted streams.
pub trait Connector: Send + Sync {
    /// Stream type produced.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Opens a stream to `host:port`.
    fn connect(&self, host: &str, port: u16)
    -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Connects over plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        TcpStream::connect((host, port)).await
    }
}

/// SMTP stream, plaintext or TLS over any byte stream.
pub enum SmtpStream<S> {
    /// Plaintext stream.
    Plain(S),
    /// TLS-encrypted stream.
    Tls(Box<TlsStream<S>>),
}

impl<S> SmtpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Upgrades a plaintext stream to TLS.
    ///
    /// Used both for implicit TLS right after connecting and for STARTTLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already TLS, the hostname is not a
    /// valid server name, or the handshake fails.
    pub async fn upgrade_to_tls(self, host: &str, version: TlsVersion) -> Result<Self> {
        let plain = match self {
            Self::Plain(stream) => stream,
            Self::Tls(_) => return Err(Error::InvalidState("Stream is already TLS".into())),
        };

        let connector = create_tls_connector(version);
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::Configuration(format!("Invalid hostname: {host}")))?;

        let tls = connector
            .connect(server_name, plain)
            .await
            .map_err(handshake_error)?;
        tracing::debug!(host, ?version, "TLS session established");
        Ok(Self::Tls(Box::new(tls)))
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl<S> AsyncRead for SmtpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl<S> AsyncWrite for SmtpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl<S> std::fmt::Debug for SmtpStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SmtpStream::Plain"),
            Self::Tls(_) => f.write_str("SmtpStream::Tls"),
        }
    }
}

/// Surfaces the TLS alert or certificate failure behind a handshake error.
fn handshake_error(error: io::Error) -> Error {
    let tls = error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .cloned();
    tls.map_or(Error::Io(error), Error::Tls)
}

/// Creates a TLS connector with the webpki root certificates.
fn create_tls_connector(version: TlsVersion) -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let builder = match version {
        TlsVersion::Any => ClientConfig::builder(),
        TlsVersion::Tls12 => {
            ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
        }
        TlsVersion::Tls13 => {
            ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        }
    };
    let config = builder
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_plain_passthrough() {
        let mock = Builder::new().write(b"NOOP\r\n").read(b"250 OK\r\n").build();
        let mut stream = SmtpStream::Plain(mock);
        assert!(!stream.is_tls());

        stream.write_all(b"NOOP\r\n").await.unwrap();
        let mut buf = [0u8; 8];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"250 OK\r\n");
    }

    #[tokio::test]
    async fn test_invalid_server_name() {
        let stream = SmtpStream::Plain(Builder::new().build());
        let result = stream.upgrade_to_tls("not a host!", TlsVersion::Any).await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_handshake_error_keeps_tls_cause() {
        let rejected = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::General("bad record".into()),
        );
        assert!(matches!(handshake_error(rejected), Error::Tls(_)));

        let closed = io::Error::new(io::ErrorKind::UnexpectedEof, "tls handshake eof");
        assert!(matches!(handshake_error(closed), Error::Io(_)));
    }

    #[tokio::test]
    async fn test_garbage_handshake_fails() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        server.write_all(b"garbage\r\n").await.unwrap();
        drop(server);

        let result = SmtpStream::Plain(client)
            .upgrade_to_tls("test", TlsVersion::Any)
            .await;
        assert!(matches!(result, Err(Error::Tls(_) | Error::Io(_))));
    }

    #[test]
    fn test_connectors_for_each_version() {
        for version in [TlsVersion::Any, TlsVersion::Tls12, TlsVersion::Tls13] {
            let _ = create_tls_connector(version);
        }
    }
}

//! SMTP connection engine.

use std::fmt;
use std::future::Future;
use std::io;

use base64::Engine;
use mailwright_mime::{Mail, RecipientType};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;

use super::stream::{Connector, SmtpStream, TcpConnector};
use super::{Extension, ServerInfo};
use crate::command::{Command, data_payload};
use crate::config::{AuthMethod, Config, Greeting, StartTlsPolicy};
use crate::error::{Error, ExpectedCodes, Result};
use crate::parser::{is_last_reply_line, parse_reply, Reply};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No socket.
    Disconnected,
    /// Socket open, banner not yet accepted.
    Connected,
    /// HELO/EHLO accepted.
    Greeted,
    /// STARTTLS done and greeting re-run.
    TlsUpgraded,
    /// AUTH accepted.
    Authenticated,
    /// Idle, ready to send.
    Ready,
    /// A mail transaction is in progress.
    Sending,
    /// QUIT sent, socket dropped.
    Closed,
}

/// An SMTP client connection.
///
/// Created from a [`Config`] (or a DSN), then driven through
/// [`connect`](Self::connect), any number of [`send`](Self::send) calls and
/// [`close`](Self::close). One command is in flight at a time.
pub struct SmtpConnection<C: Connector = TcpConnector> {
    config: Config,
    connector: C,
    stream: Option<BufReader<SmtpStream<C::Stream>>>,
    state: State,
    server_info: ServerInfo,
}

impl SmtpConnection<TcpConnector> {
    /// Creates a TCP connection for `config`. Nothing is opened yet.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, TcpConnector)
    }

    /// Creates a TCP connection from a DSN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the DSN is invalid.
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        Ok(Self::new(Config::from_dsn(dsn)?))
    }
}

impl<C: Connector> SmtpConnection<C> {
    /// Creates a connection that opens its stream through `connector`.
    #[must_use]
    pub fn with_connector(config: Config, connector: C) -> Self {
        Self {
            config,
            connector,
            stream: None,
            state: State::Disconnected,
            server_info: ServerInfo::default(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn server(&self) -> String {
        self.config.server()
    }

    /// Returns true while a stream is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Returns the banner text after the 220 code.
    #[must_use]
    pub fn banner(&self) -> Option<&str> {
        self.server_info.banner.as_deref()
    }

    /// Returns the raw capability lines from the last EHLO.
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.server_info.capabilities
    }

    /// Returns the parsed extensions from the last EHLO.
    #[must_use]
    pub const fn extensions(&self) -> &std::collections::HashSet<Extension> {
        &self.server_info.extensions
    }

    /// Returns everything learned during greeting.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Connects, greets, negotiates STARTTLS and authenticates.
    ///
    /// Does nothing if already connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] ("Connect failed") wrapping the cause.
    /// The stream is dropped without sending QUIT.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        match self.open().await {
            Ok(()) => {
                self.set_state(State::Ready);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(server = %self.server(), error = %e, "connect failed");
                self.stream = None;
                self.set_state(State::Disconnected);
                Err(Error::transport("Connect failed", e))
            }
        }
    }

    /// Sends a message: envelope, DATA and the dot-stuffed payload.
    ///
    /// Recipients are taken from To, Cc and Bcc in that order. Bcc never
    /// appears in the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] ("Sending message failed") wrapping the
    /// cause. The outcome of a failed delivery is unknown.
    pub async fn send<M: Mail + ?Sized>(&mut self, mail: &M) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::transport(
                "Sending message failed",
                Error::InvalidState("Not connected".into()),
            ));
        }

        self.set_state(State::Sending);
        let result = self.transaction(mail).await;
        if self.is_connected() {
            self.set_state(State::Ready);
        }
        result.map_err(|e| Error::transport("Sending message failed", e))
    }

    /// Sends QUIT and drops the stream. Failures are ignored.
    pub async fn close(&mut self) {
        let Some(mut reader) = self.stream.take() else {
            return;
        };

        tracing::debug!(">>> QUIT");
        let io_timeout = self.config.io_timeout;
        let stream = reader.get_mut();
        let quit = async {
            stream.write_all(&Command::Quit.serialize()).await?;
            stream.flush().await?;
            stream.shutdown().await
        };
        match timeout(io_timeout, quit).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "ignoring close failure"),
            Err(_) => tracing::debug!("ignoring close timeout"),
        }
        self.set_state(State::Closed);
    }

    async fn open(&mut self) -> Result<()> {
        let host = self.config.host.clone();
        let port = self.config.port;
        tracing::debug!(host = %host, port, scheme = %self.config.scheme, "connecting");

        let socket = timeout(self.config.connect_timeout, self.connector.connect(&host, port))
            .await
            .map_err(|_| Error::timed_out("Connect"))??;

        let mut stream = SmtpStream::Plain(socket);
        if self.config.scheme.is_tls() {
            stream = timeout(
                self.config.connect_timeout,
                stream.upgrade_to_tls(&host, self.config.tls),
            )
            .await
            .map_err(|_| Error::timed_out("TLS handshake"))??;
        }
        self.stream = Some(BufReader::new(stream));
        self.server_info = ServerInfo::default();
        self.set_state(State::Connected);

        let banner = self.expect(ExpectedCodes::READY).await?;
        self.server_info.banner = banner.first_line().map(str::to_string);

        self.greet().await?;
        self.set_state(State::Greeted);

        let upgrade = match self.config.starttls {
            StartTlsPolicy::Auto => self.server_info.supports_starttls(),
            StartTlsPolicy::Always => true,
            StartTlsPolicy::Never => false,
        };
        if upgrade && !self.config.scheme.is_tls() {
            self.starttls().await?;
        }

        if self.config.credentials.is_some() {
            self.authenticate().await?;
            self.set_state(State::Authenticated);
        }

        Ok(())
    }

    async fn greet(&mut self) -> Result<()> {
        self.server_info.clear_capabilities();
        let hostname = self.config.helo.clone();

        match self.config.scheme.greeting() {
            Greeting::Helo => {
                self.command(&Command::Helo { hostname }, ExpectedCodes::OK)
                    .await?;
            }
            Greeting::Ehlo => {
                let reply = self
                    .command(&Command::Ehlo { hostname }, ExpectedCodes::OK)
                    .await?;
                for line in reply.lines.iter().skip(1) {
                    tracing::debug!("+++ {line}");
                    self.server_info.add_capability(line);
                }
            }
        }
        Ok(())
    }

    async fn starttls(&mut self) -> Result<()> {
        self.command(&Command::StartTls, ExpectedCodes::READY).await?;

        let reader = self
            .stream
            .take()
            .ok_or_else(|| Error::InvalidState("Not connected".into()))?;
        tracing::debug!("*** enabling TLS");
        let upgrade = reader
            .into_inner()
            .upgrade_to_tls(&self.config.host, self.config.tls);
        let stream = timeout(self.config.io_timeout, upgrade)
            .await
            .map_err(|_| Error::timed_out("TLS handshake"))??;
        self.stream = Some(BufReader::new(stream));

        self.greet().await?;
        self.set_state(State::TlsUpgraded);
        Ok(())
    }

    async fn authenticate(&mut self) -> Result<()> {
        let Some(credentials) = self.config.credentials.clone() else {
            return Ok(());
        };
        match self.config.auth {
            AuthMethod::Plain => {
                let token = encode(&format!(
                    "\0{}\0{}",
                    credentials.username, credentials.password
                ));
                let auth = Command::Auth {
                    mechanism: AuthMethod::Plain,
                    initial_response: Some(token),
                };
                self.command(&auth, ExpectedCodes::AUTHENTICATED).await?;
            }
            AuthMethod::Login => {
                let auth = Command::Auth {
                    mechanism: AuthMethod::Login,
                    initial_response: None,
                };
                self.command(&auth, ExpectedCodes::CHALLENGE).await?;
                self.command(
                    &Command::AuthResponse(encode(&credentials.username)),
                    ExpectedCodes::CHALLENGE,
                )
                .await?;
                self.command(
                    &Command::AuthResponse(encode(&credentials.password)),
                    ExpectedCodes::AUTHENTICATED,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn transaction<M: Mail + ?Sized>(&mut self, mail: &M) -> Result<()> {
        let message = mail.message();
        let from = message.from.clone().ok_or_else(|| {
            Error::Messaging(mailwright_mime::Error::messaging("No sender defined"))
        })?;
        let header = mail.header_string()?;
        let body = mail.body()?;

        self.command(&Command::MailFrom { from }, ExpectedCodes::OK)
            .await?;
        for kind in [RecipientType::To, RecipientType::Cc, RecipientType::Bcc] {
            for to in message.recipients(kind) {
                let rcpt = Command::RcptTo { to: to.clone() };
                self.command(&rcpt, ExpectedCodes::RECIPIENT).await?;
            }
        }
        self.command(&Command::Data, ExpectedCodes::START_DATA)
            .await?;

        let payload = data_payload(&header, &body, self.config.dot_stuffing);
        tracing::trace!(bytes = payload.len(), ">>> message data");
        self.write(&payload).await?;
        self.expect(ExpectedCodes::OK).await?;
        Ok(())
    }

    async fn command(&mut self, command: &Command, expected: ExpectedCodes) -> Result<Reply> {
        tracing::debug!(">>> {command}");
        self.write(&command.serialize()).await?;
        self.expect(expected).await
    }

    async fn expect(&mut self, expected: ExpectedCodes) -> Result<Reply> {
        let lines = self.read_lines().await?;
        let reply = parse_reply(&lines)?;
        let code = reply.code;
        if !expected.contains(code) {
            return Err(Error::Protocol {
                expected,
                code,
                line: lines.last().cloned().unwrap_or_default(),
            });
        }
        Ok(reply)
    }

    async fn read_lines(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                continue;
            }
            tracing::debug!("<<< {line}");

            let is_last = is_last_reply_line(&line);
            lines.push(line);

            if is_last {
                return Ok(lines);
            }
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let io_timeout = self.config.io_timeout;
        let reader = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::InvalidState("Not connected".into()))?;

        let mut line = String::new();
        let read = with_timeout(io_timeout, "Read", reader.read_line(&mut line)).await?;
        if read == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Connection closed by server",
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let io_timeout = self.config.io_timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::InvalidState("Not connected".into()))?
            .get_mut();

        with_timeout(io_timeout, "Write", async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "state transition");
            self.state = state;
        }
    }
}

fn encode(value: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(value)
}

async fn with_timeout<T>(
    limit: std::time::Duration,
    what: &str,
    future: impl Future<Output = io::Result<T>>,
) -> Result<T> {
    timeout(limit, future)
        .await
        .map_err(|_| Error::timed_out(what))?
        .map_err(Error::from)
}

impl<C: Connector> fmt::Debug for SmtpConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConnection")
            .field("server", &self.server())
            .field("scheme", &self.config.scheme)
            .field("state", &self.state)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
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
    use crate::config::ConfigBuilder;
    use crate::config::Scheme;
    use mailwright_mime::{Address, Message};
    use std::sync::Mutex;
    use tokio_test::io::{Builder, Mock};

    /// Hands out one prepared mock stream.
    struct MockConnector(Mutex<Option<Mock>>);

    impl MockConnector {
        fn new(mock: Mock) -> Self {
            Self(Mutex::new(Some(mock)))
        }
    }

    impl Connector for MockConnector {
        type Stream = Mock;

        async fn connect(&self, _host: &str, _port: u16) -> io::Result<Mock> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "used"))
        }
    }

    fn connection(dsn: &str, mock: Mock) -> SmtpConnection<MockConnector> {
        SmtpConnection::with_connector(Config::from_dsn(dsn).unwrap(), MockConnector::new(mock))
    }

    #[test]
    fn test_initially_disconnected() {
        let conn = SmtpConnection::from_dsn("smtp://test").unwrap();
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), State::Disconnected);
        assert_eq!(conn.server(), "test:25");
        assert_eq!(conn.banner(), None);
    }

    #[tokio::test]
    async fn test_helo_dialog() {
        let mock = Builder::new()
            .read(b"220 test (mreue101) ESMTP Service ready\r\n")
            .write(b"HELO tester\r\n")
            .read(b"250 test Hello tester\r\n")
            .write(b"QUIT\r\n")
            .build();
        let mut conn = connection("smtp://test?helo=tester", mock);

        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.state(), State::Ready);
        assert_eq!(conn.banner(), Some("test (mreue101) ESMTP Service ready"));
        assert!(conn.capabilities().is_empty());

        conn.close().await;
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"HELO tester\r\n")
            .read(b"250 hi\r\n")
            .build();
        let mut conn = connection("smtp://test?helo=tester", mock);
        conn.connect().await.unwrap();
        conn.connect().await.unwrap();
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_multiline_banner() {
        let mock = Builder::new()
            .read(b"220-first banner line\r\n220 second\r\n")
            .write(b"HELO tester\r\n")
            .read(b"250 hi\r\n")
            .build();
        let mut conn = connection("smtp://test?helo=tester", mock);
        conn.connect().await.unwrap();
        assert_eq!(conn.banner(), Some("first banner line"));
    }

    #[tokio::test]
    async fn test_reply_without_separator_ends_reply() {
        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"HELO tester\r\n")
            .read(b"250x hi\r\n")
            .write(b"QUIT\r\n")
            .build();
        let mut conn = connection("smtp://test?helo=tester", mock);
        conn.connect().await.unwrap();
        assert_eq!(conn.state(), State::Ready);
        conn.close().await;
    }

    #[tokio::test]
    async fn test_rejected_banner() {
        let mock = Builder::new().read(b"500 I do not like you\r\n").build();
        let mut conn = connection("smtp://test?helo=tester", mock);

        let err = conn.connect().await.unwrap_err();
        assert_eq!(err.to_string(), "Connect failed");
        assert_eq!(err.reply_code(), Some(500));
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), State::Disconnected);
    }

    #[tokio::test]
    async fn test_send_message() {
        let mut message = Message::new();
        message.from = Some(Address::new("from@example.com").unwrap());
        message.add_recipient(RecipientType::To, Address::new("to@example.com").unwrap());
        message.add_recipient(RecipientType::Bcc, Address::new("bcc@example.com").unwrap());
        message.set_body("Hello\n.\n");
        let header = message.header_string();
        let mut data = header.replace('\n', "\r\n");
        data.push_str("\r\nHello\r\n..\r\n.\r\n");

        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"EHLO tester\r\n")
            .read(b"250 hi\r\n")
            .write(b"MAIL FROM: <from@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO: <to@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO: <bcc@example.com>\r\n")
            .read(b"251 forwarding\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(data.as_bytes())
            .read(b"250 queued\r\n")
            .build();
        let mut conn = connection("esmtp://test?helo=tester", mock);

        conn.connect().await.unwrap();
        conn.send(&message).await.unwrap();
        assert_eq!(conn.state(), State::Ready);
        assert!(!data.contains("bcc@example.com"));
    }

    #[tokio::test]
    async fn test_send_rejected_recipient() {
        let mut message = Message::new();
        message.from = Some(Address::new("from@example.com").unwrap());
        message.add_recipient(RecipientType::To, Address::new("nobody@example.com").unwrap());

        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"HELO tester\r\n")
            .read(b"250 hi\r\n")
            .write(b"MAIL FROM: <from@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO: <nobody@example.com>\r\n")
            .read(b"550 No such user\r\n")
            .build();
        let mut conn = connection("smtp://test?helo=tester", mock);
        conn.connect().await.unwrap();

        let err = conn.send(&message).await.unwrap_err();
        assert_eq!(err.to_string(), "Sending message failed");
        assert!(err.is_permanent());
        match err {
            Error::Transport { source, .. } => assert_eq!(
                source.to_string(),
                "Expected 250 or 251, have 550 [\"550 No such user\"]"
            ),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(conn.state(), State::Ready);
    }

    #[tokio::test]
    async fn test_send_without_sender() {
        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"HELO tester\r\n")
            .read(b"250 hi\r\n")
            .build();
        let mut conn = connection("smtp://test?helo=tester", mock);
        conn.connect().await.unwrap();

        let err = conn.send(&Message::new()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport { ref source, .. } if matches!(**source, Error::Messaging(_))
        ));
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let config = ConfigBuilder::new("test").scheme(Scheme::Smtp).build();
        let mut conn = SmtpConnection::with_connector(config, MockConnector::new(Builder::new().build()));
        let err = conn.send(&Message::new()).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(conn.state(), State::Disconnected);
    }

    #[tokio::test]
    async fn test_close_when_disconnected() {
        let mut conn = connection("smtp://test", Builder::new().build());
        conn.close().await;
        assert_eq!(conn.state(), State::Disconnected);
    }
}

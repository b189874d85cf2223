//! Transports: anything that can deliver a [`Mail`].

use std::future::Future;
use std::io;

use mailwright_mime::encoding::encode_word;
use mailwright_mime::Mail;

use crate::connection::{Connector, SmtpConnection};
use crate::error::{Error, Result};

/// Delivers messages.
pub trait Transport {
    /// Prepares the transport for sending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the transport cannot be reached.
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Delivers one message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if delivery fails.
    fn send<M: Mail + Sync + ?Sized>(
        &mut self,
        message: &M,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Releases the transport. Never fails.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

impl<C: Connector> Transport for SmtpConnection<C> {
    async fn connect(&mut self) -> Result<()> {
        Self::connect(self).await
    }

    async fn send<M: Mail + Sync + ?Sized>(&mut self, message: &M) -> Result<()> {
        Self::send(self, message).await
    }

    async fn close(&mut self) {
        Self::close(self).await;
    }
}

/// The local mail submission facility, e.g. a sendmail binary.
pub trait MailSubmit: Send + Sync {
    /// Submits one message.
    ///
    /// `headers` is the header block without `To` and `Subject` and without
    /// a trailing newline. `parameters` are passed through verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error if submission fails.
    fn submit(
        &self,
        recipients: &str,
        subject: &str,
        body: &[u8],
        headers: &str,
        parameters: Option<&str>,
    ) -> io::Result<()>;
}

/// Delivers through a local [`MailSubmit`] instead of SMTP.
#[derive(Debug, Clone)]
pub struct LocalTransport<S> {
    submitter: S,
    parameters: Option<String>,
}

impl<S: MailSubmit> LocalTransport<S> {
    /// Creates a transport around `submitter`.
    #[must_use]
    pub const fn new(submitter: S) -> Self {
        Self {
            submitter,
            parameters: None,
        }
    }

    /// Sets the extra parameters handed to every submission.
    #[must_use]
    pub fn with_parameters(mut self, parameters: impl Into<String>) -> Self {
        self.parameters = Some(parameters.into());
        self
    }

    /// Returns the submitter.
    #[must_use]
    pub const fn submitter(&self) -> &S {
        &self.submitter
    }

    fn deliver<M: Mail + ?Sized>(&self, mail: &M) -> Result<()> {
        let message = mail.message();
        let charset = message.charset.as_deref().unwrap_or("utf-8");

        let Some(first) = message.to.first() else {
            return Err(Error::transport(
                "Sending message failed",
                Error::Messaging(mailwright_mime::Error::messaging("No recipients defined")),
            ));
        };
        let recipients = message
            .to
            .iter()
            .map(|address| address.format(charset))
            .collect::<Vec<_>>()
            .join(", ");

        let subject = encode_word(message.subject.as_deref().unwrap_or_default(), charset);
        let body = normalize_newlines(&mail.body()?);
        let headers = strip_headers(&mail.header_string()?, &["To", "Subject"]);

        tracing::debug!(to = %recipients, bytes = body.len(), "submitting locally");
        self.submitter
            .submit(
                &recipients,
                &subject,
                &body,
                headers.trim_end_matches('\n'),
                self.parameters.as_deref(),
            )
            .map_err(|e| Error::transport(format!("Could not send mail to {first}"), e.into()))
    }
}

impl<S: MailSubmit> Transport for LocalTransport<S> {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn send<M: Mail + Sync + ?Sized>(&mut self, message: &M) -> Result<()> {
        self.deliver(message)
    }

    async fn close(&mut self) {}
}

/// Converts CRLF and lone CR to LF.
fn normalize_newlines(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut bytes = body.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        if byte == b'\r' {
            bytes.next_if_eq(&b'\n');
            out.push(b'\n');
        } else {
            out.push(byte);
        }
    }
    out
}

/// Removes the named headers, including their continuation lines.
fn strip_headers(header: &str, names: &[&str]) -> String {
    let mut out = String::with_capacity(header.len());
    let mut skipping = false;
    for line in header.split_inclusive('\n') {
        if line.starts_with([' ', '\t']) {
            if !skipping {
                out.push_str(line);
            }
            continue;
        }
        skipping = line.split_once(':').is_some_and(|(name, _)| {
            names.iter().any(|n| n.eq_ignore_ascii_case(name.trim()))
        });
        if !skipping {
            out.push_str(line);
        }
    }
    out
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
    use mailwright_mime::{Address, Message, RecipientType};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Submission {
        recipients: String,
        subject: String,
        body: Vec<u8>,
        headers: String,
        parameters: Option<String>,
    }

    #[derive(Default)]
    struct Recorder {
        submissions: Mutex<Vec<Submission>>,
        fail: bool,
    }

    impl MailSubmit for Recorder {
        fn submit(
            &self,
            recipients: &str,
            subject: &str,
            body: &[u8],
            headers: &str,
            parameters: Option<&str>,
        ) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::other("sendmail exited with 1"));
            }
            self.submissions.lock().unwrap().push(Submission {
                recipients: recipients.to_string(),
                subject: subject.to_string(),
                body: body.to_vec(),
                headers: headers.to_string(),
                parameters: parameters.map(str::to_string),
            });
            Ok(())
        }
    }

    fn message() -> Message {
        let mut message = Message::new();
        message.from = Some(Address::new("from@example.com").unwrap());
        message.add_recipient(
            RecipientType::To,
            Address::new("a@example.com").unwrap().with_personal("Tim Tester"),
        );
        message.add_recipient(RecipientType::To, Address::new("b@example.com").unwrap());
        message.add_recipient(RecipientType::Cc, Address::new("c@example.com").unwrap());
        message.subject = Some("Hello".to_string());
        message.set_body("one\r\ntwo\rthree");
        message
    }

    #[tokio::test]
    async fn test_local_submission() {
        let mut transport = LocalTransport::new(Recorder::default()).with_parameters("-fbounce@example.com");
        transport.connect().await.unwrap();
        transport.send(&message()).await.unwrap();
        transport.close().await;

        let submissions = transport.submitter().submissions.lock().unwrap();
        let submission = &submissions[0];
        assert_eq!(submission.recipients, "Tim Tester <a@example.com>, b@example.com");
        assert_eq!(submission.subject, "=?utf-8?Q?Hello?=");
        assert_eq!(submission.body, b"one\ntwo\nthree");
        assert!(submission.headers.starts_with("From: from@example.com\nCc: c@example.com\n"));
        assert!(!submission.headers.contains("To:"));
        assert!(!submission.headers.contains("Subject:"));
        assert!(!submission.headers.ends_with('\n'));
        assert_eq!(submission.parameters.as_deref(), Some("-fbounce@example.com"));
    }

    #[tokio::test]
    async fn test_no_recipients() {
        let mut message = message();
        message.to.clear();
        let mut transport = LocalTransport::new(Recorder::default());

        let err = transport.send(&message).await.unwrap_err();
        match err {
            Error::Transport { source, .. } => {
                assert!(source.to_string().contains("No recipients defined"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_failure() {
        let mut transport = LocalTransport::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let err = transport.send(&message()).await.unwrap_err();
        assert_eq!(err.to_string(), "Could not send mail to Tim Tester <a@example.com>");
        assert!(matches!(err, Error::Transport { ref source, .. } if matches!(**source, Error::Io(_))));
    }

    #[test]
    fn test_strip_headers_with_continuations() {
        let header = "X-A: 1\nTo: a@example.com,\n\tb@example.com\nSubject: hi\nX-B: 2\n";
        assert_eq!(strip_headers(header, &["To", "Subject"]), "X-A: 1\nX-B: 2\n");
    }

    #[test]
    fn test_normalize_newlines() {
        assert_eq!(normalize_newlines(b"a\r\nb\rc\nd"), b"a\nb\nc\nd");
    }
}

//! SMTP command builder.

use std::fmt;

use mailwright_mime::Address;

use crate::config::{AuthMethod, DotStuffing};

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMethod,
        /// Initial response (optional, for SASL-IR)
        initial_response: Option<String>,
    },
    /// Answer to a 334 challenge (base64)
    AuthResponse(String),
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address
        from: Address,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Serializes the command to bytes.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        match self {
            Self::Helo { hostname } => {
                buf.extend_from_slice(b"HELO ");
                buf.extend_from_slice(hostname.as_bytes());
            }
            Self::Ehlo { hostname } => {
                buf.extend_from_slice(b"EHLO ");
                buf.extend_from_slice(hostname.as_bytes());
            }
            Self::StartTls => {
                buf.extend_from_slice(b"STARTTLS");
            }
            Self::Auth {
                mechanism,
                initial_response,
            } => {
                buf.extend_from_slice(b"AUTH ");
                buf.extend_from_slice(mechanism.as_str().as_bytes());
                if let Some(resp) = initial_response {
                    buf.push(b' ');
                    buf.extend_from_slice(resp.as_bytes());
                }
            }
            Self::AuthResponse(response) => {
                buf.extend_from_slice(response.as_bytes());
            }
            Self::MailFrom { from } => {
                buf.extend_from_slice(b"MAIL FROM: <");
                buf.extend_from_slice(from.address().as_bytes());
                buf.push(b'>');
            }
            Self::RcptTo { to } => {
                buf.extend_from_slice(b"RCPT TO: <");
                buf.extend_from_slice(to.address().as_bytes());
                buf.push(b'>');
            }
            Self::Data => {
                buf.extend_from_slice(b"DATA");
            }
            Self::Quit => {
                buf.extend_from_slice(b"QUIT");
            }
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// Trace form of the command, with credentials masked.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth {
                mechanism,
                initial_response: Some(_),
            } => write!(f, "AUTH {} ****", mechanism.as_str()),
            Self::AuthResponse(_) => f.write_str("****"),
            _ => {
                let line = self.serialize();
                f.write_str(String::from_utf8_lossy(&line).trim_end())
            }
        }
    }
}

/// Builds the DATA payload: header block, blank line, body.
///
/// Every line ends in CRLF and is dot-stuffed according to `stuffing`.
/// The terminating `.` line is appended.
#[must_use]
pub fn data_payload(header: &str, body: &[u8], stuffing: DotStuffing) -> Vec<u8> {
    let mut content = Vec::with_capacity(header.len() + body.len() + 8);
    content.extend_from_slice(header.as_bytes());
    if !header.ends_with('\n') {
        content.push(b'\n');
    }
    content.push(b'\n');
    content.extend_from_slice(body);

    let mut out = Vec::with_capacity(content.len() + content.len() / 32 + 8);
    let trimmed = content.strip_suffix(b"\n").unwrap_or(content.as_slice());
    for line in trimmed.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if stuffing.needs_escape(line) {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
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

    #[test]
    fn test_helo_command() {
        let cmd = Command::Helo {
            hostname: "client.example.com".to_string(),
        };
        assert_eq!(cmd.serialize(), b"HELO client.example.com\r\n");
    }

    #[test]
    fn test_ehlo_command() {
        let cmd = Command::Ehlo {
            hostname: "client.example.com".to_string(),
        };
        assert_eq!(cmd.serialize(), b"EHLO client.example.com\r\n");
    }

    #[test]
    fn test_starttls_command() {
        assert_eq!(Command::StartTls.serialize(), b"STARTTLS\r\n");
    }

    #[test]
    fn test_auth_plain() {
        let cmd = Command::Auth {
            mechanism: AuthMethod::Plain,
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(cmd.serialize(), b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n");
        assert_eq!(cmd.to_string(), "AUTH PLAIN ****");
    }

    #[test]
    fn test_auth_login() {
        let cmd = Command::Auth {
            mechanism: AuthMethod::Login,
            initial_response: None,
        };
        assert_eq!(cmd.serialize(), b"AUTH LOGIN\r\n");
        assert_eq!(cmd.to_string(), "AUTH LOGIN");

        let response = Command::AuthResponse("dXNlcg==".to_string());
        assert_eq!(response.serialize(), b"dXNlcg==\r\n");
        assert_eq!(response.to_string(), "****");
    }

    #[test]
    fn test_mail_from_command() {
        let cmd = Command::MailFrom {
            from: Address::parse("Sender <sender@example.com>").unwrap(),
        };
        assert_eq!(cmd.serialize(), b"MAIL FROM: <sender@example.com>\r\n");
        assert_eq!(cmd.to_string(), "MAIL FROM: <sender@example.com>");
    }

    #[test]
    fn test_rcpt_to_command() {
        let cmd = Command::RcptTo {
            to: Address::new("recipient@example.com").unwrap(),
        };
        assert_eq!(cmd.serialize(), b"RCPT TO: <recipient@example.com>\r\n");
    }

    #[test]
    fn test_data_and_quit() {
        assert_eq!(Command::Data.serialize(), b"DATA\r\n");
        assert_eq!(Command::Quit.serialize(), b"QUIT\r\n");
    }

    #[test]
    fn test_payload_normalizes_line_endings() {
        let payload = data_payload("Subject: Hi\n", b"one\ntwo\r\nthree", DotStuffing::DotLines);
        assert_eq!(payload, b"Subject: Hi\r\n\r\none\r\ntwo\r\nthree\r\n.\r\n");
    }

    #[test]
    fn test_payload_trailing_newline_not_doubled() {
        let payload = data_payload("A: b\n", b"text\n", DotStuffing::DotLines);
        assert_eq!(payload, b"A: b\r\n\r\ntext\r\n.\r\n");
    }

    #[test]
    fn test_payload_dot_lines() {
        let payload = data_payload("A: b\n", b".\n.x\n..\nend", DotStuffing::DotLines);
        assert_eq!(payload, b"A: b\r\n\r\n..\r\n.x\r\n...\r\nend\r\n.\r\n");
    }

    #[test]
    fn test_payload_rfc5321() {
        let payload = data_payload("A: b\n", b".\n.x\nx.", DotStuffing::Rfc5321);
        assert_eq!(payload, b"A: b\r\n\r\n..\r\n..x\r\nx.\r\n.\r\n");
    }
}

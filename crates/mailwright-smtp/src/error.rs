//! Error types for SMTP operations.

use std::fmt;
use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reply codes a command accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedCodes(pub &'static [u16]);

impl ExpectedCodes {
    /// 220 (banner, STARTTLS).
    pub const READY: Self = Self(&[220]);
    /// 235 (authentication succeeded).
    pub const AUTHENTICATED: Self = Self(&[235]);
    /// 250 (HELO, EHLO, MAIL FROM, end of data).
    pub const OK: Self = Self(&[250]);
    /// 250 or 251 (RCPT TO).
    pub const RECIPIENT: Self = Self(&[250, 251]);
    /// 334 (AUTH LOGIN challenge).
    pub const CHALLENGE: Self = Self(&[334]);
    /// 354 (DATA).
    pub const START_DATA: Self = Self(&[354]);

    /// Returns true if `code` is one of the accepted codes.
    #[must_use]
    pub fn contains(self, code: u16) -> bool {
        self.0.contains(&code)
    }
}

impl fmt::Display for ExpectedCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, code) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" or ")?;
            }
            write!(f, "{code}")?;
        }
        Ok(())
    }
}

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid DSN or configuration value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Server answered with a code the command does not accept.
    #[error("Expected {expected}, have {code} [\"{line}\"]")]
    Protocol {
        /// Accepted codes.
        expected: ExpectedCodes,
        /// Code received.
        code: u16,
        /// Raw reply line.
        line: String,
    },

    /// Reply line that is not `NNN text`.
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// Connect or send failed; `source` holds the cause.
    #[error("{context}")]
    Transport {
        /// What was being attempted.
        context: String,
        /// Underlying failure.
        source: Box<Error>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The message could not be serialized.
    #[error("Message error: {0}")]
    Messaging(#[from] mailwright_mime::Error),

    /// Invalid state for operation.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

impl Error {
    /// Wraps `source` in a transport error.
    #[must_use]
    pub fn transport(context: impl Into<String>, source: Self) -> Self {
        Self::Transport {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn timed_out(what: &str) -> Self {
        Self::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{what} timed out"),
        ))
    }

    /// Returns the reply code behind this error, looking through transport
    /// wrappers.
    #[must_use]
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            Self::Transport { source, .. } => source.reply_code(),
            _ => None,
        }
    }

    /// Returns true if the server rejected permanently (5xx).
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.reply_code().is_some_and(|code| (500..600).contains(&code))
    }

    /// Returns true if the server rejected temporarily (4xx).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.reply_code().is_some_and(|code| (400..500).contains(&code))
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
    use std::error::Error as _;

    #[test]
    fn test_protocol_display() {
        let error = Error::Protocol {
            expected: ExpectedCodes::RECIPIENT,
            code: 550,
            line: "550 No such user".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Expected 250 or 251, have 550 [\"550 No such user\"]"
        );
    }

    #[test]
    fn test_transport_keeps_cause() {
        let error = Error::transport(
            "Connect failed",
            Error::Protocol {
                expected: ExpectedCodes::READY,
                code: 421,
                line: "421 busy".to_string(),
            },
        );
        assert_eq!(error.to_string(), "Connect failed");
        assert!(error.source().is_some());
        assert_eq!(error.reply_code(), Some(421));
        assert!(error.is_transient());
        assert!(!error.is_permanent());
    }

    #[test]
    fn test_no_reply_code() {
        let error = Error::Configuration("bad".to_string());
        assert_eq!(error.reply_code(), None);
        assert!(!error.is_permanent());
    }

    #[test]
    fn test_expected_single() {
        assert_eq!(ExpectedCodes::OK.to_string(), "250");
        assert!(ExpectedCodes::RECIPIENT.contains(251));
        assert!(!ExpectedCodes::OK.contains(251));
    }
}

//! SMTP connection management.

mod client;
mod stream;

pub use client::{SmtpConnection, State};
pub use stream::{Connector, SmtpStream, TcpConnector};

use std::collections::HashSet;

use crate::config::AuthMethod;

/// An EHLO capability the engine acts on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// `STARTTLS`
    StartTls,
    /// `AUTH` with the mechanisms this client can use, in server order.
    Auth(Vec<AuthMethod>),
    /// `SIZE` with the optional limit in bytes.
    Size(Option<usize>),
    /// Anything else, verbatim.
    Other(String),
}

impl Extension {
    /// Parses one capability line (the EHLO reply text after the code).
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            return Self::Other(line.to_string());
        };
        if keyword.eq_ignore_ascii_case("STARTTLS") {
            Self::StartTls
        } else if keyword.eq_ignore_ascii_case("AUTH") {
            Self::Auth(words.filter_map(|word| word.parse().ok()).collect())
        } else if keyword.eq_ignore_ascii_case("SIZE") {
            Self::Size(words.next().and_then(|size| size.parse().ok()))
        } else {
            Self::Other(line.to_string())
        }
    }
}

/// What the server told us during greeting.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Banner text after the 220 code.
    pub banner: Option<String>,
    /// Raw capability lines from the last EHLO, in server order.
    pub capabilities: Vec<String>,
    /// Parsed extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => *size,
            _ => None,
        })
    }

    /// Returns supported authentication mechanisms.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMethod> {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::Auth(mechanisms) => Some(mechanisms.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub(crate) fn clear_capabilities(&mut self) {
        self.capabilities.clear();
        self.extensions.clear();
    }

    pub(crate) fn add_capability(&mut self, line: &str) {
        self.capabilities.push(line.to_string());
        self.extensions.insert(Extension::parse(line));
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

    #[test]
    fn test_capabilities() {
        let mut info = ServerInfo::default();
        info.add_capability("SIZE 69920427");
        info.add_capability("AUTH LOGIN PLAIN");
        info.add_capability("STARTTLS");

        assert_eq!(info.capabilities, vec!["SIZE 69920427", "AUTH LOGIN PLAIN", "STARTTLS"]);
        assert!(info.supports_starttls());
        assert_eq!(info.max_message_size(), Some(69_920_427));
        assert_eq!(
            info.auth_mechanisms(),
            vec![AuthMethod::Login, AuthMethod::Plain]
        );

        assert!(info.supports(&Extension::Size(Some(69_920_427))));

        info.clear_capabilities();
        assert!(info.capabilities.is_empty());
        assert!(!info.supports_starttls());
    }

    #[test]
    fn test_extension_parse() {
        assert_eq!(Extension::parse("starttls"), Extension::StartTls);
        assert_eq!(Extension::parse("SIZE"), Extension::Size(None));
        assert_eq!(
            Extension::parse("AUTH CRAM-MD5 login XOAUTH2 PLAIN"),
            Extension::Auth(vec![AuthMethod::Login, AuthMethod::Plain])
        );
        assert_eq!(
            Extension::parse("8BITMIME"),
            Extension::Other("8BITMIME".to_string())
        );
        assert_eq!(Extension::parse(""), Extension::Other(String::new()));
    }
}

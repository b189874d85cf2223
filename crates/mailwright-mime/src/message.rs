//! RFC 2822 message model.

use crate::address::Address;
use crate::content_type::ContentType;
use crate::encoding::{TransferEncoding, decode_body, decode_rfc2047, encode_rfc2047};
use crate::error::Result;
use crate::header::Headers;
use chrono::{DateTime, FixedOffset, Local};
use std::fmt;
use std::fmt::Write as _;

/// Recipient list selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecipientType {
    /// Primary recipients.
    To,
    /// Carbon copy recipients.
    Cc,
    /// Blind carbon copy recipients, never written to the header block.
    Bcc,
}

/// Message priority as carried by `X-Priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Priority {
    /// Priority 1.
    Highest = 1,
    /// Priority 2.
    High = 2,
    /// Priority 3.
    #[default]
    Normal = 3,
    /// Priority 4.
    Low = 4,
    /// Priority 5.
    Lowest = 5,
}

impl Priority {
    /// Converts a numeric priority.
    #[must_use]
    pub const fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Highest),
            2 => Some(Self::High),
            3 => Some(Self::Normal),
            4 => Some(Self::Low),
            5 => Some(Self::Lowest),
            _ => None,
        }
    }

    /// Returns the numeric priority.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Returns the label written next to the number.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Highest => "Highest",
            Self::High => "High",
            Self::Normal => "Normal",
            Self::Low => "Low",
            Self::Lowest => "Lowest",
        }
    }

    /// Parses an `X-Priority` value by its leading digit.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let digit = value.trim_start().chars().next()?.to_digit(10)?;
        u8::try_from(digit).ok().and_then(Self::from_value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.value(), self.label())
    }
}

/// Anything that can be handed to a transport.
pub trait Mail {
    /// Returns the envelope and header fields.
    fn message(&self) -> &Message;

    /// Serializes the header block, one `Name: value\n` line per header.
    ///
    /// # Errors
    ///
    /// Returns an error if content has to be loaded and loading fails.
    fn header_string(&self) -> Result<String>;

    /// Returns the body as it goes on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if content has to be loaded and loading fails.
    fn body(&self) -> Result<Vec<u8>>;
}

/// An RFC 2822 message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Custom headers, in insertion order.
    pub headers: Headers,
    /// Primary recipients.
    pub to: Vec<Address>,
    /// Carbon copy recipients.
    pub cc: Vec<Address>,
    /// Blind carbon copy recipients.
    pub bcc: Vec<Address>,
    /// Sender.
    pub from: Option<Address>,
    /// Subject, decoded.
    pub subject: Option<String>,
    /// Message-ID, including angle brackets.
    pub message_id: Option<String>,
    /// Date, defaults to the creation time.
    pub date: DateTime<FixedOffset>,
    /// Charset of text content, `None` for none.
    pub charset: Option<String>,
    /// Content transfer encoding of the body.
    pub encoding: Option<TransferEncoding>,
    /// Content type without parameters.
    pub content_type: String,
    /// MIME version.
    pub mime_version: String,
    /// Body as stored, i.e. still transfer-encoded.
    pub body: Vec<u8>,
    /// Priority.
    pub priority: Priority,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            headers: Headers::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            from: None,
            subject: None,
            message_id: None,
            date: Local::now().into(),
            charset: Some("utf-8".to_string()),
            encoding: Some(TransferEncoding::EightBit),
            content_type: "text/plain".to_string(),
            mime_version: "1.0".to_string(),
            body: Vec::new(),
            priority: Priority::Normal,
        }
    }
}

/// Content-Type line parameters for header serialization.
pub(crate) struct ContentHeader<'a> {
    pub content_type: &'a str,
    pub boundary: Option<&'a str>,
    pub charset: Option<&'a str>,
    pub encoding: Option<TransferEncoding>,
}

impl Message {
    /// Creates a new message with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a recipient.
    pub fn add_recipient(&mut self, kind: RecipientType, address: Address) {
        self.recipients_mut(kind).push(address);
    }

    /// Adds several recipients.
    pub fn add_recipients(
        &mut self,
        kind: RecipientType,
        addresses: impl IntoIterator<Item = Address>,
    ) {
        self.recipients_mut(kind).extend(addresses);
    }

    /// Returns the recipients of a kind.
    #[must_use]
    pub fn recipients(&self, kind: RecipientType) -> &[Address] {
        match kind {
            RecipientType::To => &self.to,
            RecipientType::Cc => &self.cc,
            RecipientType::Bcc => &self.bcc,
        }
    }

    fn recipients_mut(&mut self, kind: RecipientType) -> &mut Vec<Address> {
        match kind {
            RecipientType::To => &mut self.to,
            RecipientType::Cc => &mut self.cc,
            RecipientType::Bcc => &mut self.bcc,
        }
    }

    /// Sets a custom header, replacing existing values.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Gets a custom header value, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Sets the body as stored, without encoding it.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// Returns the stored body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the body decoded according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid for its encoding.
    pub fn decoded_body(&self) -> Result<Vec<u8>> {
        decode_body(&self.body, self.encoding)
    }

    /// Serializes the header block.
    #[must_use]
    pub fn header_string(&self) -> String {
        self.render_headers(
            false,
            &ContentHeader {
                content_type: &self.content_type,
                boundary: None,
                charset: self.charset.as_deref(),
                encoding: self.encoding,
            },
        )
    }

    /// Charset used for encoding header values.
    fn header_charset(&self) -> &str {
        self.charset
            .as_deref()
            .filter(|charset| !charset.is_empty())
            .unwrap_or("utf-8")
    }

    pub(crate) fn render_headers(&self, mime_first: bool, content: &ContentHeader<'_>) -> String {
        let charset = self.header_charset();
        let mut out = String::new();

        if mime_first {
            let _ = writeln!(out, "Mime-Version: {}", self.mime_version);
        }

        for (name, value) in &self.headers {
            match value {
                Some(value) => {
                    let _ = writeln!(out, "{name}: {}", encode_rfc2047(value, charset));
                }
                None => {
                    let _ = writeln!(out, "{name}:");
                }
            }
        }

        if let Some(from) = &self.from {
            let _ = writeln!(out, "From: {}", from.format(charset));
        }
        for (name, list) in [("To", &self.to), ("Cc", &self.cc)] {
            if !list.is_empty() {
                let joined = list
                    .iter()
                    .map(|address| address.format(charset))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(out, "{name}: {joined}");
            }
        }
        if let Some(subject) = self.subject.as_deref().filter(|s| !s.is_empty()) {
            let _ = writeln!(out, "Subject: {}", encode_rfc2047(subject, charset));
        }
        if let Some(message_id) = self.message_id.as_deref().filter(|s| !s.is_empty()) {
            let _ = writeln!(out, "Message-ID: {message_id}");
        }

        let _ = write!(out, "Content-Type: {}", content.content_type);
        if let Some(boundary) = content.boundary {
            let _ = write!(out, "; boundary=\"{boundary}\"");
        }
        match content.charset.filter(|c| !c.is_empty()) {
            Some(charset) => {
                let _ = writeln!(out, ";\n\tcharset=\"{charset}\"");
            }
            None => out.push('\n'),
        }

        if !mime_first {
            let _ = writeln!(out, "Mime-Version: {}", self.mime_version);
        }
        if let Some(encoding) = content.encoding {
            let _ = writeln!(out, "Content-Transfer-Encoding: {encoding}");
        }
        let _ = writeln!(out, "X-Priority: {}", self.priority);
        let _ = writeln!(out, "Date: {}", self.date.to_rfc2822());

        out
    }

    /// Fills the message from a raw header block.
    ///
    /// Known headers go to their fields, everything else is kept as a custom
    /// header with encoded words decoded. Recipient headers accumulate.
    ///
    /// Address entries that cannot be parsed are skipped.
    pub fn set_header_string(&mut self, raw: &str) {
        for (name, value) in &Headers::parse_raw(raw) {
            let Some(value) = value else {
                self.ingest_empty(name);
                continue;
            };

            match name.to_ascii_lowercase().as_str() {
                "from" => self.from = Address::parse_list_lossy(value).into_iter().next(),
                "to" => self.to.extend(Address::parse_list_lossy(value)),
                "cc" => self.cc.extend(Address::parse_list_lossy(value)),
                "bcc" => self.bcc.extend(Address::parse_list_lossy(value)),
                "subject" => self.subject = Some(decode_rfc2047(value)),
                "message-id" => self.message_id = Some(value.to_string()),
                "date" => match parse_date(value) {
                    Some(date) => self.date = date,
                    None => {
                        tracing::debug!(value, "keeping unparseable date as header");
                        self.headers.add(name, value);
                    }
                },
                "content-type" => {
                    let (content_type, charset) = split_content_type(value);
                    self.content_type = content_type;
                    if let Some(charset) = charset {
                        self.charset = Some(charset);
                    }
                }
                "mime-version" => self.mime_version = value.to_string(),
                "content-transfer-encoding" => {
                    self.encoding = Some(TransferEncoding::parse(value));
                }
                "x-priority" => {
                    if let Some(priority) = Priority::parse(value) {
                        self.priority = priority;
                    }
                }
                _ => self.headers.add(name, decode_rfc2047(value)),
            }
        }
    }

    fn ingest_empty(&mut self, name: &str) {
        match name.to_ascii_lowercase().as_str() {
            "subject" => self.subject = None,
            "message-id" => self.message_id = None,
            "from" | "to" | "cc" | "bcc" | "date" | "content-type" | "mime-version"
            | "content-transfer-encoding" | "x-priority" => {}
            _ => self.headers.add(name, ""),
        }
    }
}

impl Mail for Message {
    fn message(&self) -> &Message {
        self
    }

    fn header_string(&self) -> Result<String> {
        Ok(Self::header_string(self))
    }

    fn body(&self) -> Result<Vec<u8>> {
        Ok(self.body.clone())
    }
}

/// Splits a Content-Type value into its type and charset.
///
/// Unparseable values are kept verbatim as the type.
pub(crate) fn split_content_type(value: &str) -> (String, Option<String>) {
    ContentType::parse(value).map_or_else(
        |_| (value.trim().to_string(), None),
        |parsed| (parsed.mime_type(), parsed.charset().map(str::to_string)),
    )
}

/// Parses an RFC 2822 date, tolerating a trailing comment and a weekday that
/// does not match the date.
fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value
        .split_once('(')
        .map_or(value, |(date, _)| date)
        .trim();
    let without_weekday = value.split_once(',').map_or(value, |(_, rest)| rest).trim();
    DateTime::parse_from_rfc2822(without_weekday).ok()
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
    use chrono::{Datelike, Timelike};

    fn parse(raw: &str) -> Message {
        let mut message = Message::new();
        message.set_header_string(&format!("{raw}\n\n"));
        message
    }

    #[test]
    fn test_defaults() {
        let message = Message::new();
        assert_eq!(message.content_type, "text/plain");
        assert_eq!(message.charset.as_deref(), Some("utf-8"));
        assert_eq!(message.encoding, Some(TransferEncoding::EightBit));
        assert_eq!(message.mime_version, "1.0");
        assert_eq!(message.priority, Priority::Normal);
    }

    #[test]
    fn test_default_header_string() {
        let mut message = Message::new();
        message.set_header("X-Common-Header", "test");

        let expected = format!(
            "X-Common-Header: test\n\
             Content-Type: text/plain;\n\
             \tcharset=\"utf-8\"\n\
             Mime-Version: 1.0\n\
             Content-Transfer-Encoding: 8bit\n\
             X-Priority: 3 (Normal)\n\
             Date: {}\n",
            message.date.to_rfc2822()
        );
        assert_eq!(message.header_string(), expected);
    }

    #[test]
    fn test_header_string_addresses() {
        let mut message = Message::new();
        message.from = Some(Address::parse("Alex Kiesel <kiesel@example.com>").unwrap());
        message.add_recipient(RecipientType::To, Address::new("a@example.com").unwrap());
        message.add_recipient(RecipientType::To, Address::new("b@example.com").unwrap());
        message.add_recipient(RecipientType::Cc, Address::new("c@example.com").unwrap());
        message.add_recipient(RecipientType::Bcc, Address::new("d@example.com").unwrap());
        message.subject = Some("Hällo".to_string());
        message.message_id = Some("<1234@example.com>".to_string());

        let headers = message.header_string();
        assert!(headers.starts_with(
            "From: Alex Kiesel <kiesel@example.com>\n\
             To: a@example.com, b@example.com\n\
             Cc: c@example.com\n\
             Subject: =?utf-8?Q?H=C3=A4llo?=\n\
             Message-ID: <1234@example.com>\n\
             Content-Type: text/plain;"
        ));
        assert!(!headers.contains("d@example.com"));
    }

    #[test]
    fn test_header_string_without_charset_or_encoding() {
        let mut message = Message::new();
        message.charset = None;
        message.encoding = None;
        let headers = message.header_string();
        assert!(headers.starts_with("Content-Type: text/plain\nMime-Version: 1.0\nX-Priority"));
    }

    #[test]
    fn test_recipients() {
        for kind in [RecipientType::To, RecipientType::Cc, RecipientType::Bcc] {
            let mut message = Message::new();
            assert!(message.recipients(kind).is_empty());

            let first = Address::new("thekid@example.com").unwrap();
            let second = Address::new("alex@example.com").unwrap();
            message.add_recipients(kind, [first.clone(), second.clone()]);
            assert_eq!(message.recipients(kind), &[first, second]);
        }
    }

    #[test]
    fn test_header_case_insensitive() {
        let mut message = Message::new();
        assert_eq!(message.header("X-Common-Header"), None);
        message.set_header("X-Common-Header", "test");
        for variant in ["x-common-header", "X-COMMON-HEADER", "X-common-header"] {
            assert_eq!(message.header(variant), Some("test"));
        }
    }

    #[test]
    fn test_decoded_body() {
        let mut message = Message::new();
        message.set_body("Hello World");
        assert_eq!(message.body(), b"Hello World");

        message.encoding = Some(TransferEncoding::Base64);
        message.set_body("SGVsbG8gV29ybGQ=");
        assert_eq!(message.decoded_body().unwrap(), b"Hello World");

        message.encoding = Some(TransferEncoding::QuotedPrintable);
        message.set_body("Hello World=3D");
        assert_eq!(message.decoded_body().unwrap(), b"Hello World=");
    }

    #[test]
    fn test_parse_empty_header() {
        for raw in ["Header:", "Header: "] {
            let message = parse(raw);
            assert_eq!(message.headers.len(), 1);
            assert_eq!(message.headers.get_entry("Header"), Some(None));
        }
    }

    #[test]
    fn test_parse_continued_header() {
        for raw in ["Header: Line 1\n\tLine 2", "Header: Line 1\n Line 2"] {
            assert_eq!(parse(raw).header("Header"), Some("Line 1 Line 2"));
        }
    }

    #[test]
    fn test_parse_from() {
        let message = parse("From: a@example.com");
        assert_eq!(message.from, Some(Address::new("a@example.com").unwrap()));
    }

    #[test]
    fn test_parse_recipients() {
        let a = Address::new("a@example.com").unwrap();
        let b = Address::new("b@example.com").unwrap();

        assert_eq!(parse("To: a@example.com, b@example.com").to, vec![a.clone(), b.clone()]);
        assert_eq!(parse("Cc: a@example.com\nCc: b@example.com").cc, vec![a.clone(), b.clone()]);

        let named = parse("To: \"A, B\" <a@example.com>, \"B, A\" <b@example.com>");
        assert_eq!(named.to[0].personal.as_deref(), Some("A, B"));
        assert_eq!(named.to[1].personal.as_deref(), Some("B, A"));
        assert!(named.headers.is_empty());
    }

    #[test]
    fn test_parse_invalid_recipient_keeps_reading() {
        let mut message = Message::new();
        message.set_header_string(
            "From: Sender <from@example.com>\n\
             To: undisclosed-recipients:;\n\
             Cc: nobody, cc@example.com\n\
             Subject: Hi\n\
             X-Tag: kept\n\n",
        );

        assert!(message.to.is_empty());
        assert_eq!(message.cc.len(), 1);
        assert_eq!(message.cc[0].address(), "cc@example.com");
        assert_eq!(message.subject.as_deref(), Some("Hi"));
        assert_eq!(message.header("X-Tag"), Some("kept"));
        assert_eq!(
            message.from.as_ref().map(Address::address).as_deref(),
            Some("from@example.com")
        );
    }

    #[test]
    fn test_parse_subject() {
        assert_eq!(parse("Subject: Hello World").subject.as_deref(), Some("Hello World"));
        assert_eq!(
            parse("Subject: =?iso-8859-1?Q?Hello_World?=").subject.as_deref(),
            Some("Hello World")
        );
        assert_eq!(
            parse("Subject: =?utf-8?Q?H=C3=A4llo?=").subject.as_deref(),
            Some("Hällo")
        );
        assert_eq!(
            parse("Subject: =?utf-8?Q?H=C3=A4llo?=\n\t=?utf-8?Q?W=C3=B6rld?=")
                .subject
                .as_deref(),
            Some("HälloWörld")
        );
    }

    #[test]
    fn test_parse_content_fields() {
        for variant in ["Content-Type", "content-type", "CONTENT-TYPE"] {
            let message = parse(&format!("{variant}: text/html; charset=iso-8859-1"));
            assert_eq!(message.content_type, "text/html");
            assert_eq!(message.charset.as_deref(), Some("iso-8859-1"));
        }
        assert_eq!(parse("MIME-VERSION: 1.0").mime_version, "1.0");
        assert_eq!(
            parse("content-transfer-encoding: 7bit").encoding,
            Some(TransferEncoding::SevenBit)
        );
    }

    #[test]
    fn test_parse_message_id() {
        let message = parse("message-id: <20050329231145.62086.mail@mail.emailprovider.com>");
        assert_eq!(
            message.message_id.as_deref(),
            Some("<20050329231145.62086.mail@mail.emailprovider.com>")
        );
    }

    #[test]
    fn test_parse_priority() {
        for variant in ["X-Priority", "x-priority", "X-PRIORITY"] {
            assert_eq!(parse(&format!("{variant}: 1 (Highest)")).priority, Priority::Highest);
        }
        assert_eq!(parse("X-Priority: 9").priority, Priority::Normal);
    }

    #[test]
    fn test_parse_date_with_comment() {
        let message = parse("Date: Tue, 7 Jun 2005 12:34:34 -0600 (MDT)");
        assert_eq!(message.date.year(), 2005);
        assert_eq!(message.date.day(), 7);
        assert_eq!(message.date.hour(), 12);
        assert_eq!(message.date.offset().local_minus_utc(), -6 * 3600);

        // Weekday does not match the date
        let message = parse("DATE: Sat, 7 Jun 2005 12:34:34 -0600 (MDT)");
        assert_eq!(message.date.month(), 6);
    }

    #[test]
    fn test_parse_bad_date_kept() {
        let message = parse("Date: yesterday");
        assert_eq!(message.header("Date"), Some("yesterday"));
    }

    #[test]
    fn test_custom_header_decoded() {
        let message = parse("X-Note: =?utf-8?Q?Gr=C3=BC=C3=9Fe?=");
        assert_eq!(message.header("X-Note"), Some("Grüße"));
    }

    #[test]
    fn test_header_round_trip() {
        let mut message = Message::new();
        message.from = Some(Address::parse("Mücke <muecke@example.com>").unwrap());
        message.add_recipient(RecipientType::To, Address::parse("A <a@example.com>").unwrap());
        message.subject = Some("Grüße".to_string());
        message.priority = Priority::High;
        message.set_header("X-Mailer", "mailwright");

        let mut reparsed = Message::new();
        reparsed.set_header_string(&message.header_string());

        assert_eq!(reparsed.from, message.from);
        assert_eq!(reparsed.from.as_ref().unwrap().personal.as_deref(), Some("Mücke"));
        assert_eq!(reparsed.to, message.to);
        assert_eq!(reparsed.subject, message.subject);
        assert_eq!(reparsed.priority, Priority::High);
        assert_eq!(reparsed.header("X-Mailer"), Some("mailwright"));
        assert_eq!(reparsed.date, message.date.with_nanosecond(0).unwrap());
        assert_eq!(reparsed.content_type, "text/plain");
    }

    #[test]
    fn test_priority_display() {
        assert_eq!(Priority::Normal.to_string(), "3 (Normal)");
        assert_eq!(Priority::parse("5 (Lowest)"), Some(Priority::Lowest));
        assert_eq!(Priority::parse(""), None);
    }
}

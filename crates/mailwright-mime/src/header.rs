//! Email header handling.
//!
//! Headers are kept as an ordered multimap: names are matched
//! case-insensitively but keep the spelling they were added with, duplicates
//! are allowed and insertion order is preserved on output.

use crate::encoding::decode_rfc2047;
use std::fmt;

/// Collection of email headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Option<String>)>,
}

/// Normalizes a header value: blank values are stored as `None`.
fn normalize(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds a header value, keeping existing values of the same name.
    ///
    /// An empty value is stored as "present without value".
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), normalize(value.into())));
    }

    /// Sets a header value, replacing any existing values.
    ///
    /// The new value takes the position of the first existing occurrence, or
    /// is appended when the header was not present.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = normalize(value.into());

        match self.position(&name) {
            Some(index) => {
                self.entries[index] = (name.clone(), value);
                let mut seen = 0usize;
                self.entries.retain(|(existing, _)| {
                    if existing.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Gets the first non-empty value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .filter(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .find_map(|(_, value)| value.as_deref())
    }

    /// Gets the first entry for a header.
    ///
    /// Returns `None` when the header is missing and `Some(None)` when it is
    /// present with an empty value.
    #[must_use]
    pub fn get_entry(&self, name: &str) -> Option<Option<&str>> {
        self.position(name)
            .map(|index| self.entries[index].1.as_deref())
    }

    /// Gets all non-empty values for a header, in insertion order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .filter_map(|(_, value)| value.as_deref())
            .collect()
    }

    /// Checks whether a header is present, with or without a value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Removes all values for a header.
    ///
    /// Returns `true` if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    /// Returns an iterator over all headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    /// Returns the number of header entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks whether there are no headers.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses a raw header block and decodes RFC 2047 encoded words.
    ///
    /// See [`Headers::parse_raw`] for the line rules.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::parse_raw(text);
        for (_, value) in &mut headers.entries {
            if let Some(raw) = value.as_mut() {
                *raw = decode_rfc2047(raw);
            }
        }
        headers
    }

    /// Parses a raw header block without decoding encoded words.
    ///
    /// Headers are in the format:
    /// ```text
    /// Header-Name: value
    ///     continuation
    /// ```
    ///
    /// Parsing stops at the first empty line. Lines without a colon and
    /// continuation lines without a preceding header are skipped.
    #[must_use]
    pub fn parse_raw(text: &str) -> Self {
        let mut headers = Self::new();

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                break;
            }

            // Continuation line (starts with space or tab)
            if line.starts_with(' ') || line.starts_with('\t') {
                let continuation = line.trim();
                match headers.entries.last_mut() {
                    Some((_, value)) => {
                        let joined = match value.take() {
                            Some(previous) if !continuation.is_empty() => {
                                format!("{} {continuation}", previous.trim())
                            }
                            Some(previous) => previous,
                            None => continuation.to_string(),
                        };
                        *value = normalize(joined);
                    }
                    None => tracing::trace!(line, "continuation without header"),
                }
                continue;
            }

            match line.split_once(':') {
                Some((name, value)) => {
                    headers
                        .entries
                        .push((name.trim().to_string(), normalize(value.trim().to_string())));
                }
                None => tracing::trace!(line, "ignoring header line without colon"),
            }
        }

        headers
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            match value {
                Some(value) => writeln!(f, "{name}: {value}")?,
                None => writeln!(f, "{name}:")?,
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, Option<&'a str>);
    type IntoIter = Box<dyn Iterator<Item = Self::Item> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
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
    use proptest::prelude::*;

    #[test]
    fn test_headers_new() {
        let headers = Headers::new();
        assert!(headers.is_empty());
        assert_eq!(headers.len(), 0);
    }

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("X-Common-Header", "test");
        assert_eq!(headers.get("X-Common-Header"), Some("test"));
        assert_eq!(headers.get("x-common-header"), Some("test"));
        assert_eq!(headers.get("X-COMMON-HEADER"), Some("test"));
    }

    #[test]
    fn test_headers_keep_spelling_and_order() {
        let mut headers = Headers::new();
        headers.add("X-Zeta", "1");
        headers.add("x-alpha", "2");
        headers.add("X-Zeta", "3");

        let names: Vec<_> = headers.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["X-Zeta", "x-alpha", "X-Zeta"]);
        assert_eq!(headers.to_string(), "X-Zeta: 1\nx-alpha: 2\nX-Zeta: 3\n");
    }

    #[test]
    fn test_headers_set() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("Subject", "Hi");
        headers.add("To", "bob@example.com");
        assert_eq!(headers.get_all("To").len(), 2);

        headers.set("to", "charlie@example.com");
        assert_eq!(headers.get_all("To"), vec!["charlie@example.com"]);
        assert_eq!(headers.to_string(), "to: charlie@example.com\nSubject: Hi\n");
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.add("Subject", "Test");
        assert!(headers.contains("subject"));

        assert!(headers.remove("SUBJECT"));
        assert!(headers.get("Subject").is_none());
        assert!(!headers.remove("Subject"));
    }

    #[test]
    fn test_empty_value_is_present() {
        for raw in ["Header:", "Header: "] {
            let headers = Headers::parse(raw);
            assert_eq!(headers.get_entry("Header"), Some(None));
            assert_eq!(headers.get("Header"), None);
            assert!(headers.contains("Header"));
        }
        assert_eq!(Headers::new().get_entry("Header"), None);
    }

    #[test]
    fn test_get_skips_empty_values() {
        let headers = Headers::parse("X-Test:\nX-Test: second\n");
        assert_eq!(headers.get("X-Test"), Some("second"));
        assert_eq!(headers.get_entry("X-Test"), Some(None));
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            "\tcharset=utf-8\r\n",
            "\r\n",
            "X-Body: not a header\r\n"
        );

        let headers = Headers::parse(text);
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("To"), Some("recipient@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(headers.get("Content-Type"), Some("text/plain; charset=utf-8"));
        assert!(!headers.contains("X-Body"));
    }

    #[test]
    fn test_folded_plain_text() {
        let headers = Headers::parse("Header: Line 1\n\tLine 2");
        assert_eq!(headers.get("Header"), Some("Line 1 Line 2"));
    }

    #[test]
    fn test_encoded_subject() {
        let headers = Headers::parse("Subject: =?utf-8?Q?H=C3=A4llo?=");
        assert_eq!(headers.get("Subject"), Some("Hällo"));
    }

    #[test]
    fn test_folded_encoded_words_concatenate() {
        let headers = Headers::parse("Subject: =?utf-8?Q?H=C3=A4llo?=\n =?utf-8?Q?W=C3=B6rld?=\n");
        assert_eq!(headers.get("Subject"), Some("HälloWörld"));
    }

    #[test]
    fn test_parse_raw_keeps_encoded_words() {
        let headers = Headers::parse_raw("To: =?utf-8?B?QWxleCBLaWVzZWw?= <kiesel@example.com>");
        assert_eq!(
            headers.get("To"),
            Some("=?utf-8?B?QWxleCBLaWVzZWw?= <kiesel@example.com>")
        );
    }

    #[test]
    fn test_malformed_lines_ignored() {
        let headers = Headers::parse("\tdangling\nnot a header\nX-Ok: yes\n");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("X-Ok"), Some("yes"));
    }

    #[test]
    fn test_headers_display_empty_value() {
        let mut headers = Headers::new();
        headers.add("X-Empty", "");
        headers.add("X-Full", "value");
        assert_eq!(headers.to_string(), "X-Empty:\nX-Full: value\n");
    }

    proptest! {
        #[test]
        fn parse_never_panics(text in "\\PC{0,200}") {
            let _ = Headers::parse(&text);
        }

        #[test]
        fn display_parse_round_trip(
            entries in proptest::collection::vec(("X-[A-Za-z]{1,10}", "[a-zA-Z0-9 ,.;]{0,30}"), 0..8)
        ) {
            let mut headers = Headers::new();
            for (name, value) in &entries {
                headers.add(name.clone(), value.trim().to_string());
            }
            let reparsed = Headers::parse(&headers.to_string());
            prop_assert_eq!(reparsed, headers);
        }
    }
}

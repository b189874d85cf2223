//! Mail address parsing and formatting.

use crate::encoding::{decode_rfc2047, decode_word, encode_word};
use crate::error::{Error, Result};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Characters that force a display name to be encoded (RFC 5322 specials).
const SPECIALS: &str = "()<>[]:;@\\,.\"";

/// A mail address with an optional display name.
///
/// Two addresses are equal when their local part and domain are equal; the
/// display name is ignored.
#[derive(Debug, Clone, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address {
    /// Part before the `@`.
    pub localpart: String,
    /// Part after the `@`.
    pub domain: String,
    /// Display name.
    pub personal: Option<String>,
}

impl Address {
    /// Creates an address from a bare `localpart@domain` string.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid address.
    pub fn new(address: &str) -> Result<Self> {
        let (localpart, domain) = split_address(address)?;
        Ok(Self {
            localpart,
            domain,
            personal: None,
        })
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_personal(mut self, personal: impl Into<String>) -> Self {
        let personal = personal.into();
        self.personal = if personal.is_empty() {
            None
        } else {
            Some(personal)
        };
        self
    }

    /// Parses a single address.
    ///
    /// Accepted forms:
    /// - `Name <local@domain>` and `"Quoted, Name" <local@domain>`
    /// - `local@domain (Name)`
    /// - `local@domain`
    ///
    /// Display names may be RFC 2047 encoded.
    ///
    /// # Errors
    ///
    /// Returns an error if the text holds no address.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();

        let (address, personal) = if let Some((before, rest)) = text.rsplit_once('<') {
            let address = rest
                .split_once('>')
                .map_or(rest, |(inside, _)| inside);
            (address, before.trim())
        } else if let Some((address, rest)) = text.split_once('(') {
            let comment = rest.rsplit_once(')').map_or(rest, |(inside, _)| inside);
            (address, comment.trim())
        } else {
            (text, "")
        };

        let address = Self::new(address.trim())?;
        let personal = decode_rfc2047(unquote(personal).as_str());
        Ok(address.with_personal(personal.trim()))
    }

    /// Parses a comma separated address list.
    ///
    /// Commas inside quotes, encoded words, angle brackets and comments do
    /// not separate entries. Group syntax (`Team: a@example.com;`) yields the
    /// group members. Empty entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry is not a valid address.
    pub fn parse_list(text: &str) -> Result<Vec<Self>> {
        list_entries(text).map(Self::parse).collect()
    }

    /// Parses an address list, skipping entries that are not addresses.
    pub(crate) fn parse_list_lossy(text: &str) -> Vec<Self> {
        list_entries(text)
            .filter_map(|entry| match Self::parse(entry) {
                Ok(address) => Some(address),
                Err(e) => {
                    tracing::warn!(entry, error = %e, "skipping invalid address");
                    None
                }
            })
            .collect()
    }

    /// Returns the bare `localpart@domain` form.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}@{}", self.localpart, self.domain)
    }

    /// Formats the address for a header, encoding the display name in the
    /// given charset when it is not plain ASCII text.
    #[must_use]
    pub fn format(&self, charset: &str) -> String {
        match self.personal.as_deref() {
            None => self.address(),
            Some(personal) if is_plain(personal) => format!("{personal} <{}>", self.address()),
            Some(personal) => format!("{} <{}>", encode_word(personal, charset), self.address()),
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.localpart == other.localpart && self.domain == other.domain
    }
}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.localpart.hash(state);
        self.domain.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format("utf-8"))
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn is_plain(personal: &str) -> bool {
    personal.is_ascii()
        && !personal
            .chars()
            .any(|c| c.is_ascii_control() || SPECIALS.contains(c))
}

fn split_address(address: &str) -> Result<(String, String)> {
    let (localpart, domain) = address
        .rsplit_once('@')
        .ok_or_else(|| Error::InvalidAddress(address.to_string()))?;
    let localpart = localpart.trim();
    let domain = domain.trim();

    if localpart.is_empty() || domain.is_empty() || domain.contains(char::is_whitespace) {
        return Err(Error::InvalidAddress(address.to_string()));
    }
    Ok((localpart.to_string(), domain.to_string()))
}

fn unquote(text: &str) -> String {
    match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => text.to_string(),
    }
}

/// Yields the non-empty entries of an address list with group names and
/// group terminators removed.
fn list_entries(text: &str) -> impl Iterator<Item = &str> {
    split_list(text)
        .into_iter()
        .map(strip_group)
        .filter(|entry| !entry.is_empty())
}

/// Removes a leading `group-name:` and a trailing `;`.
fn strip_group(entry: &str) -> &str {
    let entry = entry.trim();
    let entry = match entry.find([':', '"', '<', '(', '@']) {
        Some(i) if entry[i..].starts_with(':') => &entry[i + 1..],
        _ => entry,
    };
    entry.trim().trim_end_matches(';').trim_end()
}

/// Splits an address list on top-level commas.
fn split_list(text: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut angle = 0usize;
    let mut comment = 0usize;
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];
        let Some(c) = rest.chars().next() else {
            break;
        };

        if !in_quotes && rest.starts_with("=?") {
            if let Some((_, consumed)) = decode_word(rest) {
                i += consumed;
                continue;
            }
        }

        match c {
            '\\' if in_quotes => {
                i += 1;
                if let Some(next) = text[i..].chars().next() {
                    i += next.len_utf8();
                }
                continue;
            }
            '"' if comment == 0 => in_quotes = !in_quotes,
            '<' if !in_quotes => angle += 1,
            '>' if !in_quotes => angle = angle.saturating_sub(1),
            '(' if !in_quotes => comment += 1,
            ')' if !in_quotes => comment = comment.saturating_sub(1),
            ',' if !in_quotes && angle == 0 && comment == 0 => {
                items.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += c.len_utf8();
    }
    items.push(&text[start..]);

    items
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
    use std::collections::HashSet;

    #[test]
    fn test_new_address() {
        let address = Address::new("kiesel@example.com").unwrap();
        assert_eq!(address.localpart, "kiesel");
        assert_eq!(address.domain, "example.com");
        assert!(address.personal.is_none());
    }

    #[test]
    fn test_parse_forms() {
        for text in [
            "Alex Kiesel <kiesel@example.com>",
            "kiesel@example.com (Alex Kiesel)",
            "\"Alex Kiesel\" <kiesel@example.com>",
            "=?iso-8859-1?Q?Alex_Kiesel?= <kiesel@example.com>",
            "=?utf-8?Q?Alex_Kiesel?= <kiesel@example.com>",
            "=?utf-8?B?QWxleCBLaWVzZWw?= <kiesel@example.com>",
        ] {
            let address = Address::parse(text).unwrap();
            assert_eq!(address.personal.as_deref(), Some("Alex Kiesel"), "{text}");
            assert_eq!(address.localpart, "kiesel");
            assert_eq!(address.domain, "example.com");
        }
    }

    #[test]
    fn test_parse_without_personal() {
        let address = Address::parse("kiesel@example.com").unwrap();
        assert_eq!(address.localpart, "kiesel");
        assert_eq!(address.domain, "example.com");
        assert!(address.personal.is_none());

        let address = Address::parse("<kiesel@example.com>").unwrap();
        assert!(address.personal.is_none());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            Address::parse("Alex Kiesel"),
            Err(Error::InvalidAddress(_))
        ));
        assert!(Address::parse("").is_err());
        assert!(Address::parse("@example.com").is_err());
        assert!(Address::parse("kiesel@").is_err());
    }

    #[test]
    fn test_format_plain_name() {
        let address = Address::new("kiesel@example.com")
            .unwrap()
            .with_personal("Alex Kiesel");
        assert_eq!(address.to_string(), "Alex Kiesel <kiesel@example.com>");
        assert_eq!(address.address(), "kiesel@example.com");
    }

    #[test]
    fn test_format_escapes_colons() {
        let address = Address::new("idev@example.com").unwrap().with_personal("I::Dev");
        assert_eq!(address.to_string(), "=?utf-8?Q?I=3A=3ADev?= <idev@example.com>");
    }

    #[test]
    fn test_format_umlauts() {
        let address = Address::new("muecke@example.com").unwrap().with_personal("Mücke");
        assert_eq!(address.format("utf-8"), "=?utf-8?Q?M=C3=BCcke?= <muecke@example.com>");
        assert_eq!(
            address.format("iso-8859-1"),
            "=?iso-8859-1?Q?M=FCcke?= <muecke@example.com>"
        );
    }

    #[test]
    fn test_format_round_trip() {
        let address = Address::new("muecke@example.com").unwrap().with_personal("Mücke, Jörg");
        let reparsed = Address::parse(&address.to_string()).unwrap();
        assert_eq!(reparsed.personal.as_deref(), Some("Mücke, Jörg"));
    }

    #[test]
    fn test_equality_ignores_personal() {
        let a = Address::parse("A <a@example.com>").unwrap();
        let b = Address::parse("B <a@example.com>").unwrap();
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_parse_list() {
        let list = Address::parse_list(
            "\"Kiesel, Alex\" <kiesel@example.com>, =?utf-8?Q?M=C3=BCcke=2C_J?= <m@example.com>,, \
             x@example.com (Doe, John)",
        )
        .unwrap();

        assert_eq!(list.len(), 3);
        assert_eq!(list[0].personal.as_deref(), Some("Kiesel, Alex"));
        assert_eq!(list[1].personal.as_deref(), Some("Mücke, J"));
        assert_eq!(list[2].personal.as_deref(), Some("Doe, John"));
    }

    #[test]
    fn test_parse_list_empty() {
        assert!(Address::parse_list("").unwrap().is_empty());
        assert!(Address::parse_list(" , ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_list_groups() {
        assert!(Address::parse_list("undisclosed-recipients:;").unwrap().is_empty());

        let list = Address::parse_list("Team: a@example.com, Bob <b@example.com>;, c@example.com")
            .unwrap();
        let bare: Vec<_> = list.iter().map(Address::address).collect();
        assert_eq!(bare, ["a@example.com", "b@example.com", "c@example.com"]);
        assert_eq!(list[1].personal.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_parse_list_lossy_skips_invalid() {
        assert!(Address::parse_list("nobody, a@example.com").is_err());

        let list = Address::parse_list_lossy("nobody, a@example.com");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].address(), "a@example.com");
    }
}

//! MIME encoding and decoding utilities.
//!
//! Supports Base64, Quoted-Printable, and RFC 2047 header encoding.

use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use encoding_rs::{Encoding, UTF_8};
use std::fmt;
use std::fmt::Write as _;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD.decode(data).map_err(Into::into)
}

/// Maximum line length for encoded bodies.
const MAX_LINE_LENGTH: usize = 76;

/// Encodes bytes using Quoted-Printable encoding (RFC 2045).
///
/// Every byte that is not printable ASCII is escaped, including `=`, CR and
/// LF, so arbitrary binary input survives a decode unchanged. Lines are broken
/// with soft line breaks (`=\r\n`) before they exceed 76 characters.
#[must_use]
pub fn encode_quoted_printable(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() + data.len() / 2);
    let mut line_length = 0;

    for (i, &byte) in data.iter().enumerate() {
        let is_last = i + 1 == data.len();
        let literal = match byte {
            b'!'..=b'<' | b'>'..=b'~' => true,
            // Whitespace may not end a line, keep room for one more escape
            b' ' | b'\t' => !is_last && line_length + 4 < MAX_LINE_LENGTH - 1,
            _ => false,
        };
        let width = if literal { 1 } else { 3 };

        if line_length + width > MAX_LINE_LENGTH - 1 {
            result.push_str("=\r\n");
            line_length = 0;
        }

        if literal {
            result.push(byte as char);
        } else {
            let _ = write!(result, "={byte:02X}");
        }
        line_length += width;
    }

    result
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Soft line breaks (`=\r\n` and `=\n`) are removed. An `=` that is not
/// followed by two hex digits is kept literally.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte == b'=' {
            match (data.get(i + 1), data.get(i + 2)) {
                (Some(&b'\r'), Some(&b'\n')) => {
                    i += 3;
                    continue;
                }
                (Some(&b'\n'), _) => {
                    i += 2;
                    continue;
                }
                (Some(&high), Some(&low)) => {
                    if let (Some(high), Some(low)) = (hex_value(high), hex_value(low)) {
                        result.push((high << 4) | low);
                        i += 3;
                        continue;
                    }
                }
                _ => {}
            }
        }
        result.push(byte);
        i += 1;
    }

    result
}

const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Encodes a body according to its transfer encoding.
///
/// Base64 output is wrapped at 76 columns. Identity encodings return the
/// input unchanged.
#[must_use]
pub fn encode_body(data: &[u8], encoding: Option<TransferEncoding>) -> Vec<u8> {
    match encoding {
        Some(TransferEncoding::Base64) => {
            let encoded = encode_base64(data);
            let mut wrapped = Vec::with_capacity(encoded.len() + encoded.len() / 38);
            for (i, chunk) in encoded.as_bytes().chunks(MAX_LINE_LENGTH).enumerate() {
                if i > 0 {
                    wrapped.extend_from_slice(b"\r\n");
                }
                wrapped.extend_from_slice(chunk);
            }
            wrapped
        }
        Some(TransferEncoding::QuotedPrintable) => encode_quoted_printable(data).into_bytes(),
        _ => data.to_vec(),
    }
}

/// Decodes a body according to its transfer encoding.
///
/// # Errors
///
/// Returns an error if a Base64 body is malformed.
pub fn decode_body(data: &[u8], encoding: Option<TransferEncoding>) -> Result<Vec<u8>> {
    match encoding {
        Some(TransferEncoding::Base64) => {
            // Remove whitespace for lenient parsing
            let cleaned: String = String::from_utf8_lossy(data)
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            decode_base64(&cleaned)
        }
        Some(TransferEncoding::QuotedPrintable) => Ok(decode_quoted_printable(data)),
        _ => Ok(data.to_vec()),
    }
}

/// Looks up a charset label, ignoring an RFC 2231 language suffix.
fn lookup_charset(charset: &str) -> &'static Encoding {
    let label = charset.split('*').next().unwrap_or(charset).trim();
    Encoding::for_label(label.as_bytes()).unwrap_or(UTF_8)
}

/// Transcodes UTF-8 text into the given charset.
///
/// Unknown charsets fall back to UTF-8.
#[must_use]
pub fn encode_charset(text: &str, charset: &str) -> Vec<u8> {
    let (bytes, _, _) = lookup_charset(charset).encode(text);
    bytes.into_owned()
}

/// Decodes bytes in the given charset into UTF-8 text.
///
/// Unknown charsets fall back to lossy UTF-8 decoding.
#[must_use]
pub fn decode_charset(bytes: &[u8], charset: &str) -> String {
    let (text, _) = lookup_charset(charset).decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Checks whether a header value needs RFC 2047 encoding.
fn needs_encoding(text: &str) -> bool {
    !text.is_ascii() || text.contains("=?") || text.chars().any(char::is_control)
}

/// Encodes a header value using RFC 2047 encoding if necessary.
///
/// Pure ASCII text is returned unchanged, anything else becomes a single
/// Q-encoded word in the given charset.
#[must_use]
pub fn encode_rfc2047(text: &str, charset: &str) -> String {
    if needs_encoding(text) {
        encode_word(text, charset)
    } else {
        text.to_string()
    }
}

/// Encodes text as a single RFC 2047 Q-encoded word.
///
/// Format: `=?charset?Q?encoded-text?=`
#[must_use]
pub fn encode_word(text: &str, charset: &str) -> String {
    let mut encoded = format!("=?{charset}?Q?");
    for byte in encode_charset(text, charset) {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'!' | b'*' | b'+' | b'-' | b'/' => {
                encoded.push(byte as char);
            }
            b' ' => encoded.push('_'),
            _ => {
                let _ = write!(encoded, "={byte:02X}");
            }
        }
    }
    encoded.push_str("?=");
    encoded
}

/// Decodes every RFC 2047 encoded word in a header value.
///
/// Whitespace between two adjacent encoded words is dropped, whitespace next
/// to plain text is kept. Malformed encoded words are left as they are.
#[must_use]
pub fn decode_rfc2047(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        if let Some((decoded, consumed)) = decode_word(candidate) {
            if !(after_word && before.chars().all(char::is_whitespace)) {
                result.push_str(before);
            }
            result.push_str(&decoded);
            rest = &candidate[consumed..];
            after_word = true;
        } else {
            result.push_str(before);
            result.push_str("=?");
            rest = &candidate[2..];
            after_word = false;
        }
    }

    result.push_str(rest);
    result
}

/// Decodes one encoded word at the start of `text`.
///
/// Returns the decoded text and the number of bytes consumed.
pub(crate) fn decode_word(text: &str) -> Option<(String, usize)> {
    let inner = text.strip_prefix("=?")?;
    let charset_end = inner.find('?')?;
    let charset = &inner[..charset_end];
    let after_charset = &inner[charset_end + 1..];

    let mut marker = after_charset.bytes();
    let encoding = marker.next()?;
    if marker.next()? != b'?' {
        return None;
    }
    let payload_area = &after_charset[2..];
    let payload_end = payload_area.find("?=")?;
    let payload = &payload_area[..payload_end];

    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }
    if payload.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match encoding.to_ascii_uppercase() {
        b'B' => STANDARD.decode(payload).ok()?,
        b'Q' => decode_q(payload.as_bytes()),
        _ => return None,
    };

    let consumed = 2 + charset_end + 1 + 2 + payload_end + 2;
    Some((decode_charset(&bytes, charset), consumed))
}

/// Decodes the Q encoding, which is Quoted-Printable with `_` for space.
fn decode_q(payload: &[u8]) -> Vec<u8> {
    let spaced: Vec<u8> = payload
        .iter()
        .map(|&b| if b == b'_' { b' ' } else { b })
        .collect();
    decode_quoted_printable(&spaced)
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
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("BASE64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse(" quoted-printable "),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::EightBit.to_string(), "8bit");
    }

    #[test]
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode_base64(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_quoted_printable_encode() {
        assert_eq!(encode_quoted_printable(b"Hello, World!"), "Hello, World!");
        assert_eq!(encode_quoted_printable(b"a=b"), "a=3Db");
        assert_eq!(encode_quoted_printable(b"trailing "), "trailing=20");

        let encoded = encode_quoted_printable("Héllo, Wørld!".as_bytes());
        assert!(encoded.contains("=C3"));
    }

    #[test]
    fn test_quoted_printable_line_length() {
        let encoded = encode_quoted_printable(&[b'x'; 200]);
        for line in encoded.split("\r\n") {
            assert!(line.len() <= MAX_LINE_LENGTH);
        }
        assert_eq!(decode_quoted_printable(encoded.as_bytes()), vec![b'x'; 200]);
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable(b"Hello, World!"), b"Hello, World!");
        assert_eq!(decode_quoted_printable(b"H=C3=A9llo"), "Héllo".as_bytes());
        assert_eq!(decode_quoted_printable(b"Hello World=3D"), b"Hello World=");
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=\nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_raw_equals_kept() {
        assert_eq!(decode_quoted_printable(b"a = b"), b"a = b");
        assert_eq!(decode_quoted_printable(b"end="), b"end=");
        assert_eq!(decode_quoted_printable(b"=zz"), b"=zz");
    }

    #[test]
    fn test_decode_body_policies() {
        let base64 = decode_body(b"SGVsbG8g\r\nV29ybGQ=", Some(TransferEncoding::Base64)).unwrap();
        assert_eq!(base64, b"Hello World");

        let qp = decode_body(b"T=C3=A4st", Some(TransferEncoding::QuotedPrintable)).unwrap();
        assert_eq!(qp, "Täst".as_bytes());

        for encoding in [
            None,
            Some(TransferEncoding::SevenBit),
            Some(TransferEncoding::EightBit),
        ] {
            assert_eq!(decode_body(b"Test", encoding).unwrap(), b"Test");
        }
    }

    #[test]
    fn test_decode_body_invalid_base64() {
        assert!(decode_body(b"!!!not base64", Some(TransferEncoding::Base64)).is_err());
    }

    #[test]
    fn test_encode_body_base64_wraps() {
        let encoded = encode_body(&[0u8; 120], Some(TransferEncoding::Base64));
        let text = String::from_utf8(encoded).unwrap();
        assert!(text.split("\r\n").all(|line| line.len() <= MAX_LINE_LENGTH));
        assert!(text.contains("\r\n"));
    }

    #[test]
    fn test_rfc2047_encode() {
        assert_eq!(encode_rfc2047("Hello", "utf-8"), "Hello");
        assert_eq!(encode_rfc2047("Héllo", "utf-8"), "=?utf-8?Q?H=C3=A9llo?=");
    }

    #[test]
    fn test_encode_word_charsets() {
        assert_eq!(encode_word("Mücke", "utf-8"), "=?utf-8?Q?M=C3=BCcke?=");
        assert_eq!(encode_word("Mücke", "iso-8859-1"), "=?iso-8859-1?Q?M=FCcke?=");
        assert_eq!(encode_word("I::Dev", "utf-8"), "=?utf-8?Q?I=3A=3ADev?=");
        assert_eq!(encode_word("Alex Kiesel", "utf-8"), "=?utf-8?Q?Alex_Kiesel?=");
    }

    #[test]
    fn test_rfc2047_decode() {
        assert_eq!(decode_rfc2047("Hello"), "Hello");
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?="), "Héllo");
        assert_eq!(decode_rfc2047("=?utf-8?Q?H=C3=A9llo?="), "Héllo");
        assert_eq!(decode_rfc2047("=?iso-8859-1?Q?Hello_World?="), "Hello World");
        assert_eq!(decode_rfc2047("=?iso-8859-1?Q?M=FCcke?="), "Mücke");
    }

    #[test]
    fn test_rfc2047_decode_raw_utf8_payload() {
        assert_eq!(decode_rfc2047("=?utf-8?Q?Hällo?="), "Hällo");
    }

    #[test]
    fn test_rfc2047_adjacent_words_concatenate() {
        assert_eq!(
            decode_rfc2047("=?utf-8?Q?H=C3=A4llo?= =?utf-8?Q?W=C3=B6rld?="),
            "HälloWörld"
        );
        assert_eq!(
            decode_rfc2047("Re: =?utf-8?Q?H=C3=A4llo?= there"),
            "Re: Hällo there"
        );
    }

    #[test]
    fn test_rfc2047_malformed_left_verbatim() {
        assert_eq!(decode_rfc2047("=?utf-8?X?abc?="), "=?utf-8?X?abc?=");
        assert_eq!(decode_rfc2047("price =? unknown"), "price =? unknown");
        assert_eq!(decode_rfc2047("=?utf-8?Q?unterminated"), "=?utf-8?Q?unterminated");
    }

    #[test]
    fn test_rfc2047_language_suffix() {
        assert_eq!(decode_rfc2047("=?utf-8*en?Q?Hi?="), "Hi");
    }

    proptest! {
        #[test]
        fn base64_body_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let encoded = encode_body(&data, Some(TransferEncoding::Base64));
            let decoded = decode_body(&encoded, Some(TransferEncoding::Base64)).unwrap();
            prop_assert_eq!(decoded, data);
        }

        #[test]
        fn quoted_printable_body_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let encoded = encode_body(&data, Some(TransferEncoding::QuotedPrintable));
            let decoded = decode_body(&encoded, Some(TransferEncoding::QuotedPrintable)).unwrap();
            prop_assert_eq!(decoded, data);
        }

        #[test]
        fn quoted_printable_escapes_survive(prefix in "[a-z =]{0,20}", suffix in "[a-z =]{0,20}") {
            let text = format!("{prefix}=3D{suffix}=");
            let encoded = encode_quoted_printable(text.as_bytes());
            prop_assert_eq!(decode_quoted_printable(encoded.as_bytes()), text.into_bytes());
        }

        #[test]
        fn encoded_word_round_trip(text in "\\PC{0,40}") {
            let word = encode_word(&text, "utf-8");
            prop_assert_eq!(decode_rfc2047(&word), text);
        }
    }
}

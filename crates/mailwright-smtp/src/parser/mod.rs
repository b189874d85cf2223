//! SMTP reply parser.

use crate::error::{Error, Result};

/// One complete server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit reply code.
    pub code: u16,
    /// Text of every line after the code, in order.
    pub lines: Vec<String>,
}

impl Reply {
    /// Returns the text of the first line.
    #[must_use]
    pub fn first_line(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }
}

/// Parses an SMTP reply from response lines.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK\r\n`
/// - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
///
/// # Errors
///
/// Returns [`Error::MalformedReply`] if a line does not start with a
/// three-digit code.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::MalformedReply("empty reply".into()));
    };
    let code = first
        .get(0..3)
        .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Error::MalformedReply(format!("invalid reply code: {first}")))?;

    // Text after "250-" or "250 "; a bare code carries no text
    let mut text = Vec::with_capacity(lines.len());
    for line in lines {
        match line.get(4..) {
            Some(rest) => text.push(rest.to_string()),
            _ if line.len() == 3 => text.push(String::new()),
            _ => return Err(Error::MalformedReply(line.clone())),
        }
    }

    Ok(Reply { code, lines: text })
}

/// Checks if a line ends a reply.
///
/// Every line but the last carries `-` after the code. Anything else in that
/// position, including a missing separator, ends the reply.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    line.as_bytes().get(3) != Some(&b'-')
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
    fn test_parse_single_line_reply() {
        let lines = vec!["250 OK".to_string()];
        let reply = parse_reply(&lines).unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.lines, vec!["OK"]);
        assert_eq!(reply.first_line(), Some("OK"));
    }

    #[test]
    fn test_parse_multi_line_reply() {
        let lines = vec![
            "250-First line".to_string(),
            "250-Second line".to_string(),
            "250 Last line".to_string(),
        ];
        let reply = parse_reply(&lines).unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(
            reply.lines,
            vec!["First line", "Second line", "Last line"]
        );
    }

    #[test]
    fn test_parse_greeting() {
        let lines = vec!["220 smtp.example.com ESMTP ready".to_string()];
        let reply = parse_reply(&lines).unwrap();
        assert_eq!(reply.code, 220);
        assert_eq!(reply.lines, vec!["smtp.example.com ESMTP ready"]);
    }

    #[test]
    fn test_is_last_reply_line() {
        assert!(is_last_reply_line("250 OK"));
        assert!(!is_last_reply_line("250-Continuing"));
        assert!(is_last_reply_line("250"));
        assert!(is_last_reply_line("250x"));
    }

    #[test]
    fn test_parse_error_empty() {
        assert!(parse_reply(&[]).is_err());
    }

    #[test]
    fn test_parse_error_too_short() {
        let lines = vec!["25".to_string()];
        assert!(parse_reply(&lines).is_err());
    }

    #[test]
    fn test_parse_trailing_separator() {
        let lines = vec!["250 ".to_string()];
        let reply = parse_reply(&lines).unwrap();
        assert_eq!(reply.lines, vec![""]);
    }

    #[test]
    fn test_parse_error_non_ascii_code() {
        let lines = vec!["22\u{e9} hi".to_string()];
        assert!(matches!(parse_reply(&lines), Err(Error::MalformedReply(_))));
    }

    #[test]
    fn test_parse_error_invalid_code() {
        let lines = vec!["ABC OK".to_string()];
        assert!(parse_reply(&lines).is_err());
    }
}

//! MIME content type handling.

use crate::error::{Error, Result};
use std::fmt;

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters in header order (e.g., charset=utf-8, boundary=xxx).
    pub parameters: Vec<(String, String)>,
}

impl ContentType {
    /// Returns a parameter value by case-insensitive name.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        find_parameter(&self.parameters, key)
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameter("charset")
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameter("boundary")
    }

    /// Returns `type/subtype` without parameters.
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="value 2"`
    ///
    /// # Errors
    ///
    /// Returns an error if the type or subtype is missing.
    pub fn parse(s: &str) -> Result<Self> {
        let (value, parameters) = split_parameters(s);

        let (main_type, sub_type) = value
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(s.to_string()))?;
        let main_type = main_type.trim().to_lowercase();
        let sub_type = sub_type.trim().to_lowercase();
        if main_type.is_empty() || sub_type.is_empty() {
            return Err(Error::InvalidContentType(s.to_string()));
        }

        Ok(Self {
            main_type,
            sub_type,
            parameters,
        })
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let main = &self.main_type;
        let sub = &self.sub_type;
        write!(f, "{main}/{sub}")?;

        for (key, value) in &self.parameters {
            if value.is_empty()
                || value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c))
            {
                write!(f, "; {key}={}", quote(value))?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }

        Ok(())
    }
}

/// Wraps a parameter value in double quotes, escaping `"` and `\`.
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Looks up a parameter by case-insensitive name.
pub(crate) fn find_parameter<'a>(parameters: &'a [(String, String)], key: &str) -> Option<&'a str> {
    parameters
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.as_str())
}

/// Splits a structured header value into its leading token and parameters.
///
/// Used for `Content-Type` and `Content-Disposition`. Semicolons inside
/// quoted strings do not separate parameters, parameter names are lowercased
/// and quoted values are unquoted. Malformed parameters are skipped.
pub(crate) fn split_parameters(value: &str) -> (&str, Vec<(String, String)>) {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                segments.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&value[start..]);

    let mut segments = segments.into_iter();
    let head = segments.next().unwrap_or_default().trim();
    let parameters = segments
        .filter_map(|segment| {
            let (key, raw) = segment.split_once('=')?;
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                return None;
            }
            Some((key, unquote(raw.trim())))
        })
        .collect();

    (head, parameters)
}

fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_string();
    };

    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                result.push(next);
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("Text/Plain; Charset=utf-8").unwrap();
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert_eq!(ct.charset(), Some("utf-8"));
    }

    #[test]
    fn test_content_type_parse_quoted() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"----=_Part_123\"").unwrap();
        assert_eq!(ct.mime_type(), "multipart/mixed");
        assert_eq!(ct.boundary(), Some("----=_Part_123"));
    }

    #[test]
    fn test_content_type_parse_folded() {
        let ct = ContentType::parse(
            "multipart/mixed; boundary=\"------=_Part_4711Test\"; charset=\"utf-8\"",
        )
        .unwrap();
        assert_eq!(ct.boundary(), Some("------=_Part_4711Test"));
        assert_eq!(ct.charset(), Some("utf-8"));
    }

    #[test]
    fn test_quoted_semicolon() {
        let ct = ContentType::parse("image/gif; name=\"a;b.gif\"; x=1").unwrap();
        assert_eq!(ct.parameter("name"), Some("a;b.gif"));
        assert_eq!(ct.parameter("X"), Some("1"));
    }

    #[test]
    fn test_content_type_parse_invalid() {
        assert!(ContentType::parse("").is_err());
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("text/").is_err());
    }

    #[test]
    fn test_content_type_display() {
        let ct = ContentType::parse("Text/Plain; charset=\"utf-8\"; format=flowed").unwrap();
        assert_eq!(ct.to_string(), "text/plain; charset=utf-8; format=flowed");

        let ct = ContentType::parse("multipart/mixed; boundary=\"a=b\"").unwrap();
        assert_eq!(ct.to_string(), "multipart/mixed; boundary=\"a=b\"");

        let ct = ContentType::parse(r#"image/gif; name="my \"best\" pic.gif""#).unwrap();
        assert_eq!(ct.parameter("name"), Some("my \"best\" pic.gif"));
        assert_eq!(ct.to_string(), r#"image/gif; name="my \"best\" pic.gif""#);
    }

    #[test]
    fn test_split_parameters_disposition() {
        let (head, params) = split_parameters("attachment; filename=\"test.gif\"");
        assert_eq!(head, "attachment");
        assert_eq!(find_parameter(&params, "filename"), Some("test.gif"));

        let (head, params) = split_parameters("inline");
        assert_eq!(head, "inline");
        assert!(params.is_empty());
    }
}

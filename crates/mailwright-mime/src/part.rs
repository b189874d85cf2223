//! MIME body parts.

use crate::content_type::{find_parameter, quote, split_parameters};
use crate::encoding::{TransferEncoding, decode_body, decode_rfc2047, encode_body, encode_rfc2047};
use crate::error::Result;
use crate::header::Headers;
use crate::message::split_content_type;
use rand::Rng;
use std::fmt;
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

/// Content disposition of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Disposition {
    /// Displayed as part of the message.
    #[default]
    Inline,
    /// Offered as a separate file.
    Attachment,
}

impl Disposition {
    /// Parses a disposition token. Anything but `attachment` is inline.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("attachment") {
            Self::Attachment
        } else {
            Self::Inline
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::Attachment => write!(f, "attachment"),
        }
    }
}

/// Generates a multipart boundary: `----=_Part_<unix-seconds><random hex>`.
#[must_use]
pub fn generate_boundary() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs());
    let token: u64 = rand::thread_rng().r#gen();
    format!("----=_Part_{seconds}{token:016x}")
}

/// A leaf MIME part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    /// Content type without parameters.
    pub content_type: String,
    /// Charset, `None` for binary content.
    pub charset: Option<String>,
    /// Name parameter of the content type.
    pub name: Option<String>,
    /// Filename parameter of the disposition.
    pub filename: Option<String>,
    /// Content transfer encoding of the body.
    pub encoding: Option<TransferEncoding>,
    /// Content disposition.
    pub disposition: Disposition,
    /// Content-ID, without angle brackets.
    pub content_id: Option<String>,
    /// Additional part headers.
    pub headers: Headers,
    /// Body as stored, i.e. still transfer-encoded.
    pub body: Vec<u8>,
    /// Part id within a loaded message (e.g. `1.2`).
    pub id: Option<String>,
}

impl Default for MimePart {
    fn default() -> Self {
        Self {
            content_type: "text/plain".to_string(),
            charset: Some("utf-8".to_string()),
            name: None,
            filename: None,
            encoding: None,
            disposition: Disposition::Inline,
            content_id: None,
            headers: Headers::new(),
            body: Vec::new(),
            id: None,
        }
    }
}

impl MimePart {
    /// Creates an inline part from an already encoded body.
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    /// Creates an attachment named `name`.
    ///
    /// The body is stored as given; pair it with the encoding it is in.
    #[must_use]
    pub fn attachment(
        body: impl Into<Vec<u8>>,
        content_type: impl Into<String>,
        encoding: Option<TransferEncoding>,
        name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            content_type: content_type.into(),
            name: Some(name.clone()),
            filename: Some(name),
            encoding,
            disposition: Disposition::Attachment,
            body: body.into(),
            ..Self::default()
        }
    }

    /// Sets the transfer encoding.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: TransferEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Stores `content`, encoding it with the part's transfer encoding.
    pub fn set_content(&mut self, content: &[u8]) {
        self.body = encode_body(content, self.encoding);
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

    /// Checks whether this part is an attachment (has a name or filename).
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
            || self.filename.as_deref().is_some_and(|f| !f.is_empty())
    }

    /// Checks whether this part is displayed inline.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        !self.is_attachment()
    }

    /// Assigns a random Content-ID and returns it.
    pub fn generate_content_id(&mut self) -> &str {
        let token: u128 = rand::thread_rng().r#gen();
        self.content_id.insert(format!("{token:032x}@mailwright"))
    }

    /// Serializes the part header block.
    #[must_use]
    pub fn header_string(&self) -> String {
        let mut out = format!("Content-Type: {}", self.content_type);
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            let name = encode_rfc2047(name, self.header_charset());
            let _ = write!(out, "; name={}", quote(&name));
        } else if let Some(charset) = self.charset.as_deref().filter(|c| !c.is_empty()) {
            let _ = write!(out, "; charset=\"{charset}\"");
        }
        out.push('\n');

        if let Some(encoding) = self.encoding {
            let _ = writeln!(out, "Content-Transfer-Encoding: {encoding}");
        }
        if let Some(filename) = self.filename.as_deref().filter(|f| !f.is_empty()) {
            let _ = writeln!(
                out,
                "Content-Disposition: {}; filename={}",
                self.disposition,
                quote(&encode_rfc2047(filename, self.header_charset()))
            );
        }
        if let Some(content_id) = &self.content_id {
            let _ = writeln!(out, "Content-ID: <{content_id}>");
        }
        let _ = write!(out, "{}", self.headers);
        out
    }

    fn header_charset(&self) -> &str {
        self.charset
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or("utf-8")
    }

    /// Fills the part metadata from a raw header block.
    ///
    /// Content headers go to their fields, everything else is kept as a
    /// custom header.
    pub fn set_header_string(&mut self, raw: &str) {
        for (name, value) in &Headers::parse_raw(raw) {
            let lower = name.to_ascii_lowercase();
            let Some(value) = value else {
                if !is_content_header(&lower) {
                    self.headers.add(name, "");
                }
                continue;
            };

            match lower.as_str() {
                "content-type" => {
                    let (content_type, charset) = split_content_type(value);
                    let (_, parameters) = split_parameters(value);
                    self.content_type = content_type;
                    self.charset = charset;
                    if let Some(name) = find_parameter(&parameters, "name") {
                        self.name = Some(decode_rfc2047(name));
                    }
                }
                "content-transfer-encoding" => {
                    self.encoding = Some(TransferEncoding::parse(value));
                }
                "content-disposition" => {
                    let (disposition, parameters) = split_parameters(value);
                    self.disposition = Disposition::parse(disposition);
                    if let Some(filename) = find_parameter(&parameters, "filename") {
                        self.filename = Some(decode_rfc2047(filename));
                    }
                }
                "content-id" => {
                    let id = value.trim().trim_start_matches('<').trim_end_matches('>');
                    self.content_id = Some(id.to_string());
                }
                _ => self.headers.add(name, decode_rfc2047(value)),
            }
        }
    }
}

fn is_content_header(lower: &str) -> bool {
    matches!(
        lower,
        "content-type" | "content-transfer-encoding" | "content-disposition" | "content-id"
    )
}

/// A multipart container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiPart {
    /// Content type without parameters.
    pub content_type: String,
    /// Boundary separating the children.
    pub boundary: String,
    /// Additional headers.
    pub headers: Headers,
    /// Children, in order.
    pub parts: Vec<Part>,
    /// Part id within a loaded message.
    pub id: Option<String>,
}

impl Default for MultiPart {
    fn default() -> Self {
        Self {
            content_type: "multipart/alternative".to_string(),
            boundary: generate_boundary(),
            headers: Headers::new(),
            parts: Vec::new(),
            id: None,
        }
    }
}

impl MultiPart {
    /// Creates an empty `multipart/alternative` container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a container holding `parts`.
    #[must_use]
    pub fn with_parts(parts: impl IntoIterator<Item = Part>) -> Self {
        Self {
            parts: parts.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Appends a part and returns a reference to it.
    pub fn add_part(&mut self, part: impl Into<Part>) -> &mut Part {
        let index = self.parts.len();
        self.parts.push(part.into());
        &mut self.parts[index]
    }

    /// Returns the part at `index`.
    #[must_use]
    pub fn part(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    /// Returns all parts.
    #[must_use]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Serializes the container header block.
    #[must_use]
    pub fn header_string(&self) -> String {
        format!(
            "Content-Type: {}; boundary=\"{}\"\n{}",
            self.content_type, self.boundary, self.headers
        )
    }

    /// Renders the children framed by the boundary.
    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        frame_parts(&self.boundary, &self.parts)
    }

    /// Fills the container metadata from a raw header block.
    pub fn set_header_string(&mut self, raw: &str) {
        for (name, value) in &Headers::parse_raw(raw) {
            let value = value.unwrap_or_default();
            if name.eq_ignore_ascii_case("content-type") {
                let (content_type, _) = split_content_type(value);
                let (_, parameters) = split_parameters(value);
                self.content_type = content_type;
                if let Some(boundary) = find_parameter(&parameters, "boundary") {
                    self.boundary = boundary.to_string();
                }
            } else if !name.eq_ignore_ascii_case("mime-version") {
                self.headers.add(name, decode_rfc2047(value));
            }
        }
    }
}

/// Renders parts framed by `--boundary` lines, closed by `--boundary--`.
pub(crate) fn frame_parts(boundary: &str, parts: &[Part]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(format!("--{boundary}\n").as_bytes());
        out.extend_from_slice(part.header_string().as_bytes());
        out.push(b'\n');
        let body = part.body();
        let trimmed_len = body.iter().rposition(|&b| b != b'\n').map_or(0, |i| i + 1);
        out.extend_from_slice(&body[..trimmed_len]);
        out.extend_from_slice(b"\n\n");
    }
    out.extend_from_slice(format!("--{boundary}--\n").as_bytes());
    out
}

/// A node of the part tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// A leaf part.
    Leaf(MimePart),
    /// A nested multipart container.
    Container(MultiPart),
}

impl Part {
    /// Returns the content type.
    #[must_use]
    pub fn content_type(&self) -> &str {
        match self {
            Self::Leaf(part) => &part.content_type,
            Self::Container(multi) => &multi.content_type,
        }
    }

    /// Returns the charset; containers have none.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        match self {
            Self::Leaf(part) => part.charset.as_deref(),
            Self::Container(_) => None,
        }
    }

    /// Returns the transfer encoding; containers have none.
    #[must_use]
    pub const fn encoding(&self) -> Option<TransferEncoding> {
        match self {
            Self::Leaf(part) => part.encoding,
            Self::Container(_) => None,
        }
    }

    /// Returns the boundary of a container.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        match self {
            Self::Leaf(_) => None,
            Self::Container(multi) => Some(&multi.boundary),
        }
    }

    /// Returns the part id assigned while loading.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Leaf(part) => part.id.as_deref(),
            Self::Container(multi) => multi.id.as_deref(),
        }
    }

    /// Checks whether the part is displayed inline. Containers always are.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        match self {
            Self::Leaf(part) => part.is_inline(),
            Self::Container(_) => true,
        }
    }

    /// Serializes the part header block.
    #[must_use]
    pub fn header_string(&self) -> String {
        match self {
            Self::Leaf(part) => part.header_string(),
            Self::Container(multi) => multi.header_string(),
        }
    }

    /// Returns the body as it goes on the wire.
    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        match self {
            Self::Leaf(part) => part.body.clone(),
            Self::Container(multi) => multi.body(),
        }
    }

    /// Returns the leaf part, if this is one.
    #[must_use]
    pub const fn as_leaf(&self) -> Option<&MimePart> {
        match self {
            Self::Leaf(part) => Some(part),
            Self::Container(_) => None,
        }
    }

    /// Returns the container, if this is one.
    #[must_use]
    pub const fn as_container(&self) -> Option<&MultiPart> {
        match self {
            Self::Leaf(_) => None,
            Self::Container(multi) => Some(multi),
        }
    }
}

impl From<MimePart> for Part {
    fn from(part: MimePart) -> Self {
        Self::Leaf(part)
    }
}

impl From<MultiPart> for Part {
    fn from(multi: MultiPart) -> Self {
        Self::Container(multi)
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
    fn test_mime_part_body() {
        let part = MimePart::new("Test", "text/plain");
        assert_eq!(part.body(), b"Test");
        assert_eq!(part.content_type, "text/plain");
        assert_eq!(part.charset.as_deref(), Some("utf-8"));
    }

    #[test]
    fn test_attachment_detection() {
        let part = MimePart::new("Test", "text/plain");
        assert!(!part.is_attachment());
        assert!(part.is_inline());

        let part = MimePart::attachment("Test", "text/plain", None, "test.txt");
        assert!(part.is_attachment());
        assert!(!part.is_inline());

        let mut part = MimePart::new("Test", "text/plain");
        part.filename = Some("notes.txt".to_string());
        assert!(part.is_attachment());
    }

    #[test]
    fn test_decoded_body() {
        let part = MimePart::new("VGVzdA==", "text/plain").with_encoding(TransferEncoding::Base64);
        assert_eq!(part.decoded_body().unwrap(), b"Test");

        let part = MimePart::new("T=C3=A4st", "text/plain")
            .with_encoding(TransferEncoding::QuotedPrintable);
        assert_eq!(part.decoded_body().unwrap(), "Täst".as_bytes());

        for encoding in [TransferEncoding::EightBit, TransferEncoding::SevenBit] {
            let part = MimePart::new("Test", "text/plain").with_encoding(encoding);
            assert_eq!(part.decoded_body().unwrap(), b"Test");
        }
    }

    #[test]
    fn test_set_content_encodes() {
        let mut part = MimePart::new("", "image/gif").with_encoding(TransferEncoding::Base64);
        part.set_content(b"GIF89a");
        assert_eq!(part.body(), b"R0lGODlh");
        assert_eq!(part.decoded_body().unwrap(), b"GIF89a");
    }

    #[test]
    fn test_header_string_text() {
        let part = MimePart::new("Test", "text/plain");
        assert_eq!(part.header_string(), "Content-Type: text/plain; charset=\"utf-8\"\n");
    }

    #[test]
    fn test_header_string_attachment() {
        let part = MimePart::attachment(
            "GIF89aXXXX",
            "image/gif",
            Some(TransferEncoding::EightBit),
            "test.gif",
        );
        assert_eq!(
            part.header_string(),
            "Content-Type: image/gif; name=\"test.gif\"\n\
             Content-Transfer-Encoding: 8bit\n\
             Content-Disposition: attachment; filename=\"test.gif\"\n"
        );
    }

    #[test]
    fn test_header_string_quotes_file_names() {
        let part = MimePart::attachment(
            "x",
            "text/plain",
            None,
            "annual report; \"final\".txt",
        );
        let header = part.header_string();
        assert!(header.starts_with(
            "Content-Type: text/plain; name=\"annual report; \\\"final\\\".txt\"\n"
        ));

        let mut parsed = MimePart::new("", "text/plain");
        parsed.set_header_string(&header);
        assert_eq!(parsed.content_type, "text/plain");
        assert_eq!(parsed.name.as_deref(), Some("annual report; \"final\".txt"));
        assert_eq!(parsed.filename.as_deref(), Some("annual report; \"final\".txt"));
        assert!(parsed.is_attachment());
    }

    #[test]
    fn test_header_string_content_id_and_custom() {
        let mut part = MimePart::new("x", "image/png");
        part.charset = None;
        part.content_id = Some("logo@example".to_string());
        part.headers.add("X-Extra", "1");
        assert_eq!(
            part.header_string(),
            "Content-Type: image/png\nContent-ID: <logo@example>\nX-Extra: 1\n"
        );
    }

    #[test]
    fn test_generate_content_id() {
        let mut part = MimePart::new("x", "image/png");
        let id = part.generate_content_id().to_string();
        assert!(id.ends_with("@mailwright"));
        assert_eq!(part.content_id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_set_header_string_consumes_content_headers() {
        for header in ["Content-Type", "Content-Transfer-Encoding", "Content-Disposition"] {
            let mut part = MimePart::default();
            part.set_header_string(&format!("{header}: Test\n\n"));
            assert!(part.headers.is_empty(), "{header}");
        }
    }

    #[test]
    fn test_set_header_string_fields() {
        let mut part = MimePart::default();
        part.set_header_string(
            "Content-Type: image/gif; name=\"test.gif\"\n\
             Content-Transfer-Encoding: base64\n\
             Content-Disposition: attachment;\n\tfilename=\"test.gif\"\n\
             Content-ID: <abc@host>\n\
             X-Other: kept\n",
        );
        assert_eq!(part.content_type, "image/gif");
        assert_eq!(part.charset, None);
        assert_eq!(part.name.as_deref(), Some("test.gif"));
        assert_eq!(part.filename.as_deref(), Some("test.gif"));
        assert_eq!(part.disposition, Disposition::Attachment);
        assert_eq!(part.encoding, Some(TransferEncoding::Base64));
        assert_eq!(part.content_id.as_deref(), Some("abc@host"));
        assert_eq!(part.headers.get("X-Other"), Some("kept"));
    }

    #[test]
    fn test_set_header_string_empty_and_continued() {
        let mut part = MimePart::default();
        part.set_header_string("Header:\n\n");
        assert_eq!(part.headers.get_entry("Header"), Some(None));

        let mut part = MimePart::default();
        part.set_header_string("Header: Line 1\n\tLine 2\n\n");
        assert_eq!(part.headers.get("Header"), Some("Line 1 Line 2"));
    }

    #[test]
    fn test_multipart_parts() {
        let text = MimePart::new("Text", "text/plain");
        let html = MimePart::new("<html/>", "text/html");
        let multi = MultiPart::with_parts([text.clone().into(), html.clone().into()]);

        assert_eq!(multi.parts(), &[Part::Leaf(text.clone()), Part::Leaf(html.clone())]);
        assert_eq!(multi.part(0), Some(&Part::Leaf(text)));
        assert_eq!(multi.part(1), Some(&Part::Leaf(html)));
        assert_eq!(multi.part(2), None);
        assert_eq!(multi.content_type, "multipart/alternative");
    }

    #[test]
    fn test_multipart_body_framing() {
        let mut multi = MultiPart::new();
        multi.boundary = "b1".to_string();
        multi.add_part(MimePart::new("Text\n\n", "text/plain"));
        multi.add_part(MimePart::new("<html/>", "text/html"));

        assert_eq!(
            String::from_utf8(multi.body()).unwrap(),
            "--b1\nContent-Type: text/plain; charset=\"utf-8\"\n\nText\n\n\
             --b1\nContent-Type: text/html; charset=\"utf-8\"\n\n<html/>\n\n--b1--\n"
        );
        assert_eq!(
            multi.header_string(),
            "Content-Type: multipart/alternative; boundary=\"b1\"\n"
        );
    }

    #[test]
    fn test_multipart_set_header_string() {
        let mut multi = MultiPart::new();
        multi.set_header_string("Content-Type: multipart/related; boundary=\"xyz\"\n\n");
        assert_eq!(multi.content_type, "multipart/related");
        assert_eq!(multi.boundary, "xyz");
    }

    #[test]
    fn test_boundary_format() {
        let boundary = generate_boundary();
        assert!(boundary.starts_with("----=_Part_"));
        assert_ne!(boundary, generate_boundary());
    }

    #[test]
    fn test_container_is_inline() {
        let part: Part = MultiPart::new().into();
        assert!(part.is_inline());
        assert!(part.boundary().is_some());
        assert!(part.as_container().is_some());
        assert!(part.as_leaf().is_none());
    }
}

//! MIME multipart message.

use crate::content_type::{find_parameter, split_parameters};
use crate::error::Result;
use crate::header::Headers;
use crate::message::{ContentHeader, Mail, Message};
use crate::part::{MimePart, Part, frame_parts, generate_boundary};
use crate::store::{MessageStore, load_parts};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock};

/// Preamble written before the first boundary.
const PREAMBLE: &str = "This is a multi-part message in MIME format.\n\n";

/// A message made of MIME parts.
///
/// Dereferences to [`Message`] for envelope and header fields. A message
/// with exactly one inline part is serialized as a simple message carrying
/// that part's content type.
#[derive(Clone)]
pub struct MimeMessage {
    message: Message,
    boundary: String,
    parts: Option<Vec<Part>>,
    loaded: OnceLock<Vec<Part>>,
    source: Option<Source>,
}

#[derive(Clone)]
struct Source {
    store: Arc<dyn MessageStore>,
    uid: u32,
}

impl fmt::Debug for MimeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MimeMessage")
            .field("message", &self.message)
            .field("boundary", &self.boundary)
            .field("parts", &self.parts.as_ref().or_else(|| self.loaded.get()))
            .field("uid", &self.source.as_ref().map(|source| source.uid))
            .finish()
    }
}

impl Default for MimeMessage {
    fn default() -> Self {
        let message = Message {
            content_type: "multipart/mixed".to_string(),
            encoding: None,
            ..Message::default()
        };
        Self {
            message,
            boundary: generate_boundary(),
            parts: None,
            loaded: OnceLock::new(),
            source: None,
        }
    }
}

impl MimeMessage {
    /// Creates an empty `multipart/mixed` message with a fresh boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message whose parts are loaded from `store` on first use.
    #[must_use]
    pub fn from_store(store: Arc<dyn MessageStore>, uid: u32) -> Self {
        Self {
            source: Some(Source { store, uid }),
            ..Self::default()
        }
    }

    /// Returns the boundary.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Replaces the boundary.
    pub fn set_boundary(&mut self, boundary: impl Into<String>) {
        self.boundary = boundary.into();
    }

    /// Returns the wrapped message.
    #[must_use]
    pub fn into_message(self) -> Message {
        self.message
    }

    /// Returns all parts, loading them from the store on first access.
    ///
    /// A failed load is retried on the next access.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn parts(&self) -> Result<&[Part]> {
        if let Some(parts) = &self.parts {
            return Ok(parts);
        }
        if let Some(parts) = self.loaded.get() {
            return Ok(parts);
        }

        let loaded = match &self.source {
            Some(source) => load_parts(source.store.as_ref(), source.uid)?,
            None => Vec::new(),
        };
        Ok(self.loaded.get_or_init(|| loaded))
    }

    /// Returns the part at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn part(&self, index: usize) -> Result<Option<&Part>> {
        Ok(self.parts()?.get(index))
    }

    fn parts_mut(&mut self) -> &mut Vec<Part> {
        let loaded = self.loaded.take();
        self.parts.get_or_insert_with(|| loaded.unwrap_or_default())
    }

    /// Appends a part and returns a reference to it.
    ///
    /// Adding a part before the parts were loaded disables loading.
    pub fn add_part(&mut self, part: impl Into<Part>) -> &mut Part {
        let parts = self.parts_mut();
        parts.push(part.into());
        let last = parts.len() - 1;
        &mut parts[last]
    }

    /// Replaces all parts with one `text/plain` part holding `text`.
    ///
    /// The part carries the message's transfer encoding.
    pub fn set_body(&mut self, text: impl Into<Vec<u8>>) -> &mut Part {
        let mut part = MimePart::new(text, "text/plain");
        part.encoding = self.message.encoding;
        let parts = self.parts_mut();
        parts.clear();
        parts.push(Part::Leaf(part));
        &mut parts[0]
    }

    /// Checks whether the message consists of exactly one inline part.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn is_simple(&self) -> Result<bool> {
        Ok(simple_part(self.parts()?).is_some())
    }

    /// Returns the effective content type, taking the collapse to a single
    /// part into account.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn content_type(&self) -> Result<&str> {
        Ok(simple_part(self.parts()?)
            .map_or(self.message.content_type.as_str(), Part::content_type))
    }

    /// Serializes the header block, `Mime-Version` first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn header_string(&self) -> Result<String> {
        let content = match simple_part(self.parts()?) {
            Some(part) => ContentHeader {
                content_type: part.content_type(),
                boundary: part.boundary(),
                charset: part.charset(),
                encoding: part.encoding(),
            },
            None => ContentHeader {
                content_type: &self.message.content_type,
                boundary: Some(&self.boundary),
                charset: self.message.charset.as_deref(),
                encoding: self.message.encoding,
            },
        };
        Ok(self.message.render_headers(true, &content))
    }

    /// Returns the composed body.
    ///
    /// A simple message returns its part's body, anything else the parts
    /// framed by the boundary after a short preamble.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn body(&self) -> Result<Vec<u8>> {
        let parts = self.parts()?;
        if let Some(part) = simple_part(parts) {
            return Ok(part.body());
        }

        let mut body = PREAMBLE.as_bytes().to_vec();
        body.extend_from_slice(&frame_parts(&self.boundary, parts));
        Ok(body)
    }

    /// Returns the body with the transfer encoding of a simple message
    /// removed. Multipart bodies are returned as composed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the body is malformed.
    pub fn decoded_body(&self) -> Result<Vec<u8>> {
        match simple_part(self.parts()?) {
            Some(Part::Leaf(part)) => part.decoded_body(),
            _ => self.body(),
        }
    }

    /// Fills the message from a raw header block, including the boundary.
    pub fn set_header_string(&mut self, raw: &str) {
        self.message.set_header_string(raw);

        let headers = Headers::parse_raw(raw);
        if let Some(content_type) = headers.get("Content-Type") {
            let (_, parameters) = split_parameters(content_type);
            if let Some(boundary) = find_parameter(&parameters, "boundary") {
                self.boundary = boundary.to_string();
            }
        }
    }
}

fn simple_part(parts: &[Part]) -> Option<&Part> {
    match parts {
        [part] if part.is_inline() => Some(part),
        _ => None,
    }
}

impl Deref for MimeMessage {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.message
    }
}

impl DerefMut for MimeMessage {
    fn deref_mut(&mut self) -> &mut Message {
        &mut self.message
    }
}

impl Mail for MimeMessage {
    fn message(&self) -> &Message {
        &self.message
    }

    fn header_string(&self) -> Result<String> {
        Self::header_string(self)
    }

    fn body(&self) -> Result<Vec<u8>> {
        Self::body(self)
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
    use crate::address::Address;
    use crate::encoding::TransferEncoding;
    use crate::message::RecipientType;
    use crate::part::MultiPart;
    use crate::store::PartStructure;
    use crate::store::tests::MemoryStore;
    use std::sync::atomic::Ordering;

    fn fixture() -> MimeMessage {
        let mut message = MimeMessage::new();
        message.set_boundary("------=_Part_4711Test");
        message
    }

    #[test]
    fn test_default_header_string() {
        let mut message = fixture();
        message.set_header("X-Common-Header", "test");

        let expected = format!(
            "Mime-Version: 1.0\n\
             X-Common-Header: test\n\
             Content-Type: multipart/mixed; boundary=\"------=_Part_4711Test\";\n\
             \tcharset=\"utf-8\"\n\
             X-Priority: 3 (Normal)\n\
             Date: {}\n",
            message.date.to_rfc2822()
        );
        assert_eq!(message.header_string().unwrap(), expected);
    }

    #[test]
    fn test_boundary_accessors() {
        let mut message = fixture();
        message.set_boundary("----=_Part_0815Test");
        assert_eq!(message.boundary(), "----=_Part_0815Test");
        assert!(MimeMessage::new().boundary().starts_with("----=_Part_"));
    }

    #[test]
    fn test_parts() {
        let mut message = fixture();
        assert!(message.parts().unwrap().is_empty());

        let first = message.add_part(MimePart::new("1", "text/plain")).clone();
        let second = message.add_part(MimePart::new("2", "text/plain")).clone();
        assert_eq!(message.parts().unwrap(), &[first.clone(), second.clone()]);
        assert_eq!(message.part(0).unwrap(), Some(&first));
        assert_eq!(message.part(1).unwrap(), Some(&second));
        assert_eq!(message.part(2).unwrap(), None);
    }

    #[test]
    fn test_set_body_replaces_parts() {
        let mut message = fixture();
        message.add_part(MimePart::new("old", "text/html"));
        message.set_body("Test");

        assert_eq!(
            message.part(0).unwrap(),
            Some(&Part::Leaf(MimePart::new("Test", "text/plain")))
        );
        assert_eq!(message.parts().unwrap().len(), 1);
    }

    #[test]
    fn test_set_body_uses_message_encoding() {
        let mut message = fixture();
        message.encoding = Some(TransferEncoding::QuotedPrintable);
        message.set_body("T=C3=A4st");
        assert_eq!(message.decoded_body().unwrap(), "Täst".as_bytes());
        assert!(
            message
                .header_string()
                .unwrap()
                .contains("Content-Transfer-Encoding: quoted-printable\n")
        );
    }

    #[test]
    fn test_two_parts_body() {
        let mut message = fixture();
        message.add_part(MimePart::new("Test", "text/plain"));
        message.add_part(MimePart::attachment(
            "GIF89aXXXX",
            "image/gif",
            Some(TransferEncoding::EightBit),
            "test.gif",
        ));

        assert_eq!(
            String::from_utf8(message.body().unwrap()).unwrap(),
            "This is a multi-part message in MIME format.\n\
             \n\
             --------=_Part_4711Test\n\
             Content-Type: text/plain; charset=\"utf-8\"\n\
             \n\
             Test\n\
             \n\
             --------=_Part_4711Test\n\
             Content-Type: image/gif; name=\"test.gif\"\n\
             Content-Transfer-Encoding: 8bit\n\
             Content-Disposition: attachment; filename=\"test.gif\"\n\
             \n\
             GIF89aXXXX\n\
             \n\
             --------=_Part_4711Test--\n"
        );
    }

    #[test]
    fn test_one_text_part_collapses() {
        let mut message = fixture();
        message.add_part(MimePart::new("Part #1", "text/plain"));

        let expected = format!(
            "Mime-Version: 1.0\n\
             Content-Type: text/plain;\n\
             \tcharset=\"utf-8\"\n\
             X-Priority: 3 (Normal)\n\
             Date: {}\n",
            message.date.to_rfc2822()
        );
        assert_eq!(message.header_string().unwrap(), expected);
        assert_eq!(message.body().unwrap(), b"Part #1");
        assert!(message.is_simple().unwrap());
        assert_eq!(message.content_type().unwrap(), "text/plain");
    }

    #[test]
    fn test_one_image_part_collapses() {
        let mut message = fixture();
        message.add_part(MimePart::new("Part #1", "image/gif"));

        let headers = message.header_string().unwrap();
        assert!(headers.starts_with("Mime-Version: 1.0\nContent-Type: image/gif;\n\tcharset=\"utf-8\"\n"));
        assert_eq!(message.body().unwrap(), b"Part #1");
    }

    #[test]
    fn test_single_attachment_does_not_collapse() {
        let mut message = fixture();
        message.add_part(MimePart::attachment("x", "image/gif", None, "a.gif"));
        assert!(!message.is_simple().unwrap());
        assert!(
            message
                .header_string()
                .unwrap()
                .contains("Content-Type: multipart/mixed; boundary=\"------=_Part_4711Test\"")
        );
    }

    #[test]
    fn test_two_text_parts() {
        let mut message = fixture();
        message.add_part(MimePart::new("Part #1", "text/plain"));
        message.add_part(MimePart::new("Part #2", "text/plain"));

        let expected = format!(
            "Mime-Version: 1.0\n\
             Content-Type: multipart/mixed; boundary=\"------=_Part_4711Test\";\n\
             \tcharset=\"utf-8\"\n\
             X-Priority: 3 (Normal)\n\
             Date: {}\n",
            message.date.to_rfc2822()
        );
        assert_eq!(message.header_string().unwrap(), expected);
        assert_eq!(
            String::from_utf8(message.body().unwrap()).unwrap(),
            "This is a multi-part message in MIME format.\n\
             \n\
             --------=_Part_4711Test\n\
             Content-Type: text/plain; charset=\"utf-8\"\n\
             \n\
             Part #1\n\
             \n\
             --------=_Part_4711Test\n\
             Content-Type: text/plain; charset=\"utf-8\"\n\
             \n\
             Part #2\n\
             \n\
             --------=_Part_4711Test--\n"
        );
    }

    #[test]
    fn test_single_container_contributes_boundary() {
        let mut alternative = MultiPart::new();
        alternative.boundary = "alt".to_string();
        alternative.add_part(MimePart::new("Text", "text/plain"));
        alternative.add_part(MimePart::new("<p>Text</p>", "text/html"));

        let mut message = fixture();
        message.add_part(alternative);

        let headers = message.header_string().unwrap();
        assert!(headers.contains("Content-Type: multipart/alternative; boundary=\"alt\"\n"));
        let body = String::from_utf8(message.body().unwrap()).unwrap();
        assert!(body.starts_with("--alt\nContent-Type: text/plain"));
        assert!(body.ends_with("--alt--\n"));
    }

    #[test]
    fn test_set_header_string_reads_boundary() {
        let mut message = fixture();
        message.set_header_string(
            "Mime-Version: 1.0\n\
             To: a@example.com\n\
             Content-Type: multipart/mixed; boundary=\"abc\";\n\tcharset=\"utf-8\"\n\n",
        );
        assert_eq!(message.boundary(), "abc");
        assert_eq!(message.content_type, "multipart/mixed");
        assert_eq!(message.recipients(RecipientType::To), &[Address::new("a@example.com").unwrap()]);
    }

    #[test]
    fn test_from_store_loads_once() {
        let structure = PartStructure::multipart(
            "MIXED",
            vec![PartStructure::leaf("TEXT", "PLAIN"), PartStructure::leaf("TEXT", "HTML")],
        );
        let store = Arc::new(MemoryStore::new(structure));
        let message = MimeMessage::from_store(store.clone(), 42);

        assert_eq!(message.parts().unwrap().len(), 2);
        assert_eq!(message.part(1).unwrap().unwrap().id(), Some("2"));
        let _ = message.body().unwrap();
        assert_eq!(store.structure_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.requests(), vec!["1", "2"]);
    }

    #[test]
    fn test_from_store_retries_after_failure() {
        let store = Arc::new(MemoryStore::new(PartStructure::leaf("TEXT", "PLAIN")));
        store.fail_structure.store(1, Ordering::SeqCst);
        let message = MimeMessage::from_store(store.clone(), 1);

        assert!(message.parts().is_err());
        assert_eq!(message.parts().unwrap().len(), 1);
        assert_eq!(message.body().unwrap(), b"body 1");
        assert_eq!(store.structure_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_added_part_suppresses_loading() {
        let store = Arc::new(MemoryStore::new(PartStructure::leaf("TEXT", "PLAIN")));
        let mut message = MimeMessage::from_store(store.clone(), 1);
        message.add_part(MimePart::new("local", "text/plain"));

        assert_eq!(message.body().unwrap(), b"local");
        assert_eq!(store.structure_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_mail_trait() {
        let mut message = fixture();
        message.set_body("Hi");
        let mail: &dyn Mail = &message;
        assert_eq!(mail.body().unwrap(), b"Hi");
        assert!(mail.header_string().unwrap().starts_with("Mime-Version: 1.0\n"));
        assert_eq!(mail.message().content_type, "multipart/mixed");
    }
}

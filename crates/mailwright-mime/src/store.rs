//! Message store contract and part tree loading.
//!
//! Stores (IMAP, Maildir, mbox) live outside this crate. They describe a
//! message as a [`PartStructure`] tree and hand out raw part content by part
//! id. Part ids follow IMAP section numbering: `1`, `2`, `1.1`, `1.2`, ...

use crate::content_type::find_parameter;
use crate::encoding::TransferEncoding;
use crate::error::Result;
use crate::part::{Disposition, MimePart, MultiPart, Part};

/// Source of message structure and part content.
///
/// Implementations must return the same content for the same
/// `(uid, part_id)` every time.
pub trait MessageStore: Send + Sync {
    /// Returns the part tree of a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read.
    fn message_structure(&self, uid: u32) -> Result<PartStructure>;

    /// Returns the raw content of one part.
    ///
    /// For `<id>.0` the header block of container `<id>` is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the part cannot be read.
    fn message_part(&self, uid: u32, part_id: &str) -> Result<Vec<u8>>;
}

/// Structure description of one node of a message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartStructure {
    /// Main type, e.g. `TEXT`.
    pub main_type: String,
    /// Subtype, e.g. `PLAIN` or `MIXED`.
    pub sub_type: String,
    /// Transfer encoding of the content.
    pub encoding: Option<TransferEncoding>,
    /// Content-Type parameters.
    pub parameters: Vec<(String, String)>,
    /// Disposition, if the part declares one.
    pub disposition: Option<Disposition>,
    /// Content-Disposition parameters.
    pub disposition_parameters: Vec<(String, String)>,
    /// Children; empty for leaves.
    pub parts: Vec<Self>,
}

impl PartStructure {
    /// Creates a leaf description.
    #[must_use]
    pub fn leaf(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            ..Self::default()
        }
    }

    /// Creates a multipart description.
    #[must_use]
    pub fn multipart(sub_type: impl Into<String>, parts: Vec<Self>) -> Self {
        Self {
            main_type: "multipart".to_string(),
            sub_type: sub_type.into(),
            parts,
            ..Self::default()
        }
    }

    fn content_type(&self) -> String {
        format!(
            "{}/{}",
            self.main_type.to_lowercase(),
            self.sub_type.to_lowercase()
        )
    }
}

/// Loads the part tree of message `uid`.
///
/// A message without children is loaded as its single body part `1`.
pub(crate) fn load_parts(store: &dyn MessageStore, uid: u32) -> Result<Vec<Part>> {
    let structure = store.message_structure(uid)?;
    let parts = if structure.parts.is_empty() {
        load_level(store, uid, std::slice::from_ref(&structure), "")?
    } else {
        load_level(store, uid, &structure.parts, "")?
    };
    tracing::debug!(uid, parts = parts.len(), "loaded message structure");
    Ok(parts)
}

fn load_level(
    store: &dyn MessageStore,
    uid: u32,
    structures: &[PartStructure],
    prefix: &str,
) -> Result<Vec<Part>> {
    let mut parts = Vec::with_capacity(structures.len());

    for (index, structure) in structures.iter().enumerate() {
        let id = format!("{prefix}{}", index + 1);

        if structure.parts.is_empty() {
            let body = store.message_part(uid, &id)?;
            tracing::trace!(uid, id = %id, bytes = body.len(), "loaded part");
            parts.push(Part::Leaf(leaf_part(structure, id, body)));
            continue;
        }

        // Nested multipart/mixed children are numbered under the parent
        let child_prefix =
            if id.contains('.') && structure.sub_type.eq_ignore_ascii_case("mixed") {
                prefix.to_string()
            } else {
                format!("{id}.")
            };

        let mut container = MultiPart {
            content_type: structure.content_type(),
            id: Some(id),
            ..MultiPart::default()
        };
        if let Some(boundary) = find_parameter(&structure.parameters, "boundary") {
            container.boundary = boundary.to_string();
        }
        container.parts = load_level(store, uid, &structure.parts, &child_prefix)?;

        let header_id = format!("{child_prefix}0");
        let header = store.message_part(uid, &header_id)?;
        container.set_header_string(&String::from_utf8_lossy(&header));

        parts.push(Part::Container(container));
    }

    Ok(parts)
}

fn leaf_part(structure: &PartStructure, id: String, body: Vec<u8>) -> MimePart {
    let lookup = |key| find_parameter(&structure.disposition_parameters, key).map(str::to_string);
    MimePart {
        content_type: structure.content_type(),
        charset: find_parameter(&structure.parameters, "charset").map(str::to_string),
        name: lookup("name"),
        filename: lookup("filename"),
        encoding: structure.encoding,
        disposition: structure.disposition.unwrap_or_default(),
        body,
        id: Some(id),
        ..MimePart::default()
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
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store recording every request.
    pub struct MemoryStore {
        pub structure: PartStructure,
        pub fail_structure: AtomicUsize,
        pub structure_calls: AtomicUsize,
        pub requests: Mutex<Vec<String>>,
    }

    impl MemoryStore {
        pub fn new(structure: PartStructure) -> Self {
            Self {
                structure,
                fail_structure: AtomicUsize::new(0),
                structure_calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl MessageStore for MemoryStore {
        fn message_structure(&self, _uid: u32) -> Result<PartStructure> {
            self.structure_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_structure.load(Ordering::SeqCst) > 0 {
                self.fail_structure.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::store("connection lost"));
            }
            Ok(self.structure.clone())
        }

        fn message_part(&self, _uid: u32, part_id: &str) -> Result<Vec<u8>> {
            self.requests.lock().unwrap().push(part_id.to_string());
            if part_id.ends_with(".0") {
                Ok(format!("Content-Type: multipart/x; boundary=\"b{part_id}\"\n\n").into_bytes())
            } else {
                Ok(format!("body {part_id}").into_bytes())
            }
        }
    }

    fn text() -> PartStructure {
        let mut leaf = PartStructure::leaf("TEXT", "PLAIN");
        leaf.parameters.push(("CHARSET".to_string(), "iso-8859-1".to_string()));
        leaf
    }

    #[test]
    fn test_flat_numbering() {
        let mut image = PartStructure::leaf("IMAGE", "GIF");
        image.encoding = Some(TransferEncoding::Base64);
        image.disposition = Some(Disposition::Attachment);
        image
            .disposition_parameters
            .push(("FILENAME".to_string(), "test.gif".to_string()));

        let store = MemoryStore::new(PartStructure::multipart("MIXED", vec![text(), image]));
        let parts = load_parts(&store, 7).unwrap();

        assert_eq!(store.requests(), vec!["1", "2"]);
        let first = parts[0].as_leaf().unwrap();
        assert_eq!(first.content_type, "text/plain");
        assert_eq!(first.charset.as_deref(), Some("iso-8859-1"));
        assert_eq!(first.body, b"body 1");

        let second = parts[1].as_leaf().unwrap();
        assert_eq!(second.content_type, "image/gif");
        assert_eq!(second.encoding, Some(TransferEncoding::Base64));
        assert_eq!(second.disposition, Disposition::Attachment);
        assert_eq!(second.filename.as_deref(), Some("test.gif"));
        assert!(second.is_attachment());
        assert_eq!(second.id.as_deref(), Some("2"));
    }

    #[test]
    fn test_nested_alternative_numbering() {
        let alternative =
            PartStructure::multipart("ALTERNATIVE", vec![text(), PartStructure::leaf("TEXT", "HTML")]);
        let store = MemoryStore::new(PartStructure::multipart(
            "MIXED",
            vec![alternative, PartStructure::leaf("IMAGE", "PNG")],
        ));
        let parts = load_parts(&store, 1).unwrap();

        assert_eq!(store.requests(), vec!["1.1", "1.2", "1.0", "2"]);
        let container = parts[0].as_container().unwrap();
        assert_eq!(container.content_type, "multipart/x");
        assert_eq!(container.boundary, "b1.0");
        assert_eq!(container.id.as_deref(), Some("1"));
        assert_eq!(container.parts[1].id(), Some("1.2"));
    }

    #[test]
    fn test_nested_mixed_reuses_parent_prefix() {
        let inner = PartStructure::multipart("MIXED", vec![text(), text()]);
        let outer = PartStructure::multipart("RELATED", vec![text(), inner]);
        let store = MemoryStore::new(PartStructure::multipart("MIXED", vec![outer]));

        let parts = load_parts(&store, 1).unwrap();
        assert_eq!(
            store.requests(),
            vec!["1.1", "1.1", "1.2", "1.0", "1.0"]
        );
        let outer = parts[0].as_container().unwrap();
        let inner = outer.parts[1].as_container().unwrap();
        assert_eq!(inner.id.as_deref(), Some("1.2"));
        assert_eq!(inner.parts[0].id(), Some("1.1"));
    }

    #[test]
    fn test_single_part_message() {
        let store = MemoryStore::new(text());
        let parts = load_parts(&store, 1).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(store.requests(), vec!["1"]);
    }

    #[test]
    fn test_structure_failure() {
        let store = MemoryStore::new(text());
        store.fail_structure.store(1, Ordering::SeqCst);
        assert!(matches!(load_parts(&store, 1), Err(Error::Store(_))));
    }
}

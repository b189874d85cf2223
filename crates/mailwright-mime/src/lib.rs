//! # mailwright-mime
//!
//! In-memory model of RFC 2822 messages and their MIME multipart variant.
//!
//! ## Features
//!
//! - **Headers**: ordered, case-insensitive multimap with folding and RFC 2047 decoding
//! - **Addresses**: `Name <local@domain>` parsing, comma-safe lists, encoded display names
//! - **Bodies**: Base64 and Quoted-Printable transfer encodings
//! - **Multipart**: composition with boundaries, collapse of single inline parts
//! - **Stores**: lazy part tree loading from an external [`MessageStore`]
//!
//! ## Quick Start
//!
//! ### Building a Message
//!
//! ```
//! use mailwright_mime::{Address, Message, RecipientType};
//!
//! let mut message = Message::new();
//! message.from = Some(Address::parse("Alex Kiesel <kiesel@example.com>")?);
//! message.add_recipient(RecipientType::To, Address::parse("friebe@example.com")?);
//! message.subject = Some("Hällo".to_string());
//! message.set_body("Hello, World!");
//!
//! let headers = message.header_string();
//! assert!(headers.contains("Subject: =?utf-8?Q?H=C3=A4llo?=\n"));
//! # Ok::<(), mailwright_mime::Error>(())
//! ```
//!
//! ### Multipart Messages
//!
//! ```
//! use mailwright_mime::{MimeMessage, MimePart, TransferEncoding};
//!
//! let mut message = MimeMessage::new();
//! message.add_part(MimePart::new("See attachment.", "text/plain"));
//! message.add_part(MimePart::attachment(
//!     "R0lGODlh",
//!     "image/gif",
//!     Some(TransferEncoding::Base64),
//!     "logo.gif",
//! ));
//!
//! let body = message.body()?;
//! assert!(body.starts_with(b"This is a multi-part message in MIME format."));
//! # Ok::<(), mailwright_mime::Error>(())
//! ```
//!
//! ### Parsing Headers
//!
//! ```
//! use mailwright_mime::Headers;
//!
//! let headers = Headers::parse("Subject: =?utf-8?Q?H=C3=A4llo?=\r\nX-Empty:\r\n\r\n");
//! assert_eq!(headers.get("subject"), Some("Hällo"));
//! assert_eq!(headers.get_entry("x-empty"), Some(None));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod content_type;
mod error;
mod header;
mod message;
mod mime_message;
mod part;
mod store;

pub mod encoding;

pub use address::Address;
pub use content_type::ContentType;
pub use encoding::TransferEncoding;
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Mail, Message, Priority, RecipientType};
pub use mime_message::MimeMessage;
pub use part::{Disposition, MimePart, MultiPart, Part, generate_boundary};
pub use store::{MessageStore, PartStructure};

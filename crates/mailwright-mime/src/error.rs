//! Error types for message and MIME operations.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Text that should hold a mail address does not.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The message cannot be used this way, e.g. it has no sender.
    #[error("{0}")]
    Messaging(String),

    /// The message store failed to deliver structure or content.
    #[error("Store error: {0}")]
    Store(String),
}

impl Error {
    /// Creates a messaging error.
    pub fn messaging(message: impl Into<String>) -> Self {
        Self::Messaging(message.into())
    }

    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::InvalidAddress("nobody".into()).to_string(),
            "Invalid address: nobody"
        );
        assert_eq!(
            Error::messaging("No sender defined").to_string(),
            "No sender defined"
        );
        assert_eq!(Error::store("gone").to_string(), "Store error: gone");
    }

    #[test]
    fn test_base64_conversion() {
        let err = crate::encoding::decode_base64("!!").unwrap_err();
        assert!(matches!(err, Error::Base64Decode(_)));
    }
}

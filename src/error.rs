//! Error types for flvcast

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for flvcast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for flvcast
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A source could not be opened as FLV
    #[error("Open error: {0}")]
    Open(#[from] OpenError),

    /// A tag failed structural validation
    #[error("Tag error: {0}")]
    Tag(#[from] TagError),

    /// The transport session failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Source enumeration failed
    #[error("Source error: {0}")]
    Source(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

impl Error {
    /// Create a source error
    pub fn source_error<S: Into<String>>(msg: S) -> Self {
        Error::Source(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}

/// Failure to open a source as an FLV stream
///
/// Fatal to the current source only.
#[derive(Error, Debug)]
pub enum OpenError {
    /// The file could not be opened
    #[error("failed to open {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source could not be read
    #[error("failed to read FLV header: {0}")]
    Io(#[source] std::io::Error),

    /// The first four bytes are not `FLV\x01`
    #[error("not a valid FLV1 file (got {found:08x})")]
    BadSignature { found: u32 },

    /// Seeking to the declared data offset failed
    #[error("failed to seek to data offset {offset}: {source}")]
    Seek {
        offset: u32,
        #[source]
        source: std::io::Error,
    },
}

impl OpenError {
    /// Wrap a failure to open `path`
    pub fn file(path: &Path, source: std::io::Error) -> Self {
        OpenError::File {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Structural failure while reading a tag
///
/// Fatal to the current stream; no resynchronisation is attempted.
#[derive(Error, Debug)]
pub enum TagError {
    /// The source ended in the middle of a tag
    #[error("truncated tag {part}: expected {expected} bytes, got {got}")]
    Truncated {
        part: &'static str,
        expected: usize,
        got: usize,
    },

    /// The trailing size footer does not match the header
    #[error("tag size {stored} does not match calculated tag size {expected}")]
    SizeMismatch { stored: u32, expected: u32 },

    /// The declared payload exceeds the configured ceiling
    #[error("tag payload of {declared} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { declared: u32, limit: u32 },

    /// Underlying read failure
    #[error("failed to read tag: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport session failure
///
/// Fatal to the whole session; nothing is retried.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid stream URL: {0}")]
    Setup(String),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("poll failed: {0}")]
    Poll(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not connected")]
    NotConnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        TransportError::Protocol(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_display() {
        let err = OpenError::BadSignature { found: 0x464C5602 };
        assert_eq!(err.to_string(), "not a valid FLV1 file (got 464c5602)");
    }

    #[test]
    fn test_open_error_names_file() {
        let err = OpenError::File {
            path: PathBuf::from("/media/gone.flv"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let message = err.to_string();
        assert!(message.starts_with("failed to open /media/gone.flv: "));
        assert!(!message.contains("FLV header"));
    }

    #[test]
    fn test_tag_error_converts() {
        let err: Error = TagError::SizeMismatch {
            stored: 12,
            expected: 11,
        }
        .into();
        assert!(matches!(err, Error::Tag(TagError::SizeMismatch { .. })));
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_transport_error_converts() {
        let err: Error = TransportError::NotConnected.into();
        assert!(matches!(err, Error::Transport(TransportError::NotConnected)));
    }
}

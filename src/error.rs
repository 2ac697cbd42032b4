//! Error types for imap-bulk-decrypt

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Login, transport failure, or use of a session that is not open.
    #[error("No connection: {0}")]
    NoConnection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server rejected a folder path (select, create).
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("No folder selected")]
    NoFolderSelected,

    #[error("Invalid message id: {0}")]
    InvalidMsgId(String),

    /// The server rejected an append, store, copy or expunge.
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// The server refused the search criteria (NO/BAD). Callers treat
    /// this as an empty result.
    #[error("Search rejected: {0}")]
    SearchRejected(String),

    #[error("Message is not encrypted")]
    NotEncrypted,

    #[error("Unsupported multipart layout: {0}")]
    MultipartEncrypted(String),

    #[error("No secret key available")]
    NoSecretKey,

    #[error("GPG error: {0}")]
    Gpg(String),

    #[error("Message encoding error: {0}")]
    Encoding(String),

    #[error("Local store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error leaves the session unusable, so a bulk run
    /// must stop instead of moving on to the next message.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(self, Self::NoConnection(_) | Self::Tls(_) | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

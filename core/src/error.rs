//! Error types for the WebDAV client.
//!
//! # Design
//! Every failure is a value. Transport problems (`Connect`, `Io`,
//! `ShortWrite`, `ShortRead`) are kept apart from protocol problems
//! (`Framing`, `MalformedStatusLine`, `Status`) so callers can decide whether
//! re-issuing the whole operation makes sense. Header lookups distinguish "no
//! response retained" from "header absent" from "header unparsable".

use std::io;
use std::path::PathBuf;

/// Errors returned by `Connection`, the sinks, `WebDavClient` and the storage
/// backends.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The TCP connection could not be established.
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A write transferred fewer bytes than requested.
    #[error("short write: sent {sent} of {expected} bytes")]
    ShortWrite { sent: usize, expected: usize },

    /// A bounded read ended before the requested number of bytes arrived.
    #[error("short read: got {got} of {expected} bytes")]
    ShortRead { got: usize, expected: usize },

    /// A socket or upload-source I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended before the `\r\n\r\n` header terminator was seen.
    #[error("response ended after {read} bytes without a header terminator")]
    Framing { read: usize },

    /// The first response line is not `<protocol> <status> <reason>`.
    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),

    /// The server answered with a status outside `200..300`.
    #[error("unexpected response: {line}")]
    Status { code: u16, line: String },

    /// `put_file` could not determine a nonzero upload size.
    #[error("invalid upload size for {}", path.display())]
    InvalidUploadSize { path: PathBuf },

    /// A local file could not be opened, written or removed.
    #[error("file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No successful response has been retained yet.
    #[error("no response headers retained")]
    NoResponse,

    /// The retained response does not carry the named header.
    #[error("header {0:?} not found")]
    MissingHeader(String),

    /// The named header is present but its value cannot be interpreted.
    #[error("header {name:?} has invalid value {value:?}")]
    InvalidHeader { name: String, value: String },

    /// Client or storage configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::File {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Synchronous WebDAV client over a raw TCP socket.
//!
//! # Overview
//! Speaks just enough HTTP/1.1 to drive GET, PUT, DELETE, HEAD and MOVE
//! against a file-storage server, one connection per request with
//! `Connection: close`. No HTTP library is involved: requests are written by
//! hand and responses are framed by locating the blank line that ends the
//! header block.
//!
//! # Design
//! - `Connection` does the socket I/O: lazy open, 64 KiB chunks, one
//!   whole-payload resend on a short write, one tolerated empty read.
//! - `ResponseSink` receives body bytes, either in memory (`MemorySink`) or
//!   in a file that is deleted unless committed (`FileSink`).
//! - `WebDavClient` builds requests, validates the status line and returns a
//!   `Response`; failures are `Error` values, never panics.
//! - `storage` maps object names onto sharded paths on a local directory or
//!   a WebDAV server.
//! - Events are emitted with `tracing`; installing a subscriber is up to the
//!   binary.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod sink;
pub mod storage;

#[cfg(test)]
mod testing;

pub use client::{WebDavClient, DEFAULT_TIMEOUT};
pub use config::ClientConfig;
pub use connection::{Connection, Connector, Framed, TcpConnector, CHUNK_SIZE};
pub use error::{Error, Result};
pub use http::{HttpRequest, Method, Response, ResponseHead};
pub use sink::{FileSink, MemorySink, ResponseSink};
pub use storage::{shard_path, FileStorage, Storage, WebDavStorage};

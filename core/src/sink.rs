//! Destinations for response bodies.
//!
//! # Design
//! `MemorySink` collects the body in a `Vec<u8>`. `FileSink` appends it to a
//! file under its final name and deletes that file again unless the download
//! is explicitly `release`d, so an abandoned transfer never leaves a partial
//! file behind that looks complete.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Consumes response body bytes as they arrive.
pub trait ResponseSink {
    /// Store the whole chunk, or fail.
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;
}

/// In-memory body buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    buf: Vec<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl ResponseSink for MemorySink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(chunk);
        Ok(())
    }
}

/// File-backed body writer with delete-on-drop.
///
/// The tracked path is cleared by `release`; while it is still set, `reset`
/// and `Drop` remove the file.
#[derive(Debug)]
pub struct FileSink {
    file: Option<File>,
    path: Option<PathBuf>,
}

impl FileSink {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let mut sink = Self {
            file: None,
            path: None,
        };
        sink.reset(Some(path.as_ref()))?;
        Ok(sink)
    }

    /// The file that will be removed unless released.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the handle, keeping the file tracked.
    pub fn close(&mut self) {
        self.file = None;
    }

    /// Commit the file: close it and stop tracking it, so it survives drop.
    pub fn release(&mut self) -> Option<PathBuf> {
        self.close();
        self.path.take()
    }

    /// Close the handle and delete the tracked file, then bind to `path`
    /// if one is given.
    pub fn reset(&mut self, path: Option<&Path>) -> Result<()> {
        self.discard();
        if let Some(path) = path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::file(path, e))?;
            self.file = Some(file);
            self.path = Some(path.to_path_buf());
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.close();
        if let Some(path) = self.path.take() {
            remove_partial(&path);
        }
    }
}

impl ResponseSink for FileSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let path = self.path.as_deref().unwrap_or(Path::new(""));
        let Some(file) = self.file.as_mut() else {
            return Err(Error::file(path, io::Error::new(io::ErrorKind::NotConnected, "sink is closed")));
        };
        file.write_all(chunk).map_err(|e| Error::file(path, e))
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        self.discard();
    }
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed partial file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            if path.exists() {
                warn!(path = %path.display(), error = %e, "cannot remove partial file");
            }
        }
    }
}

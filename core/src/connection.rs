//! Blocking socket connection with chunked I/O and bounded retries.
//!
//! # Design
//! A `Connection` owns at most one stream to a single `host:port`. Every
//! send/receive opens the stream lazily, and the stream is closed on drop.
//! Streams are produced by a `Connector`, which is the seam where tests swap
//! the TCP socket for a scripted transport.
//!
//! Retry policy:
//! - `send` retries a short write exactly once, on a fresh connection, with
//!   the whole payload.
//! - `send_stream` never retries; a short write aborts the upload.
//! - the readers tolerate one transient empty read (`WouldBlock` or
//!   `TimedOut`) per call; the next one ends the read with what has been
//!   accumulated so far.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::sink::ResponseSink;

/// Size of every socket read and of every upload chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Separator between the response header block and the body.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Opens byte streams to a remote endpoint.
pub trait Connector {
    type Stream: Read + Write;

    fn connect(&self, host: &str, port: u16, timeout: Duration) -> io::Result<Self::Stream>;
}

/// Plain TCP connector. The timeout bounds the connect and every later
/// read and write on the socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
        let timeout = (!timeout.is_zero()).then_some(timeout);
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(timeout)?;
                    stream.set_write_timeout(timeout)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, format!("{host} did not resolve"))
        }))
    }
}

/// Result of `Connection::read_framed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framed {
    /// Everything before the `\r\n\r\n` terminator.
    pub head: Vec<u8>,
    /// Number of bytes handed to the sink.
    pub body_len: u64,
}

/// One connection to `host:port`, used for a single request.
pub struct Connection<C: Connector = TcpConnector> {
    host: String,
    port: u16,
    timeout: Duration,
    connector: C,
    stream: Option<C::Stream>,
}

impl<C: Connector> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl Connection<TcpConnector> {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self::with_connector(host, port, timeout, TcpConnector)
    }
}

impl<C: Connector> Connection<C> {
    pub fn with_connector(host: &str, port: u16, timeout: Duration, connector: C) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
            connector,
            stream: None,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Return the live stream, connecting first if needed. With
    /// `force_reopen` an existing stream is closed and replaced.
    pub fn open(&mut self, force_reopen: bool) -> Result<&mut C::Stream> {
        if force_reopen {
            self.close();
        }
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.connect()?,
        };
        Ok(self.stream.insert(stream))
    }

    fn connect(&self) -> Result<C::Stream> {
        match self.connector.connect(&self.host, self.port, self.timeout) {
            Ok(stream) => {
                debug!(server = %self.addr(), "connected");
                Ok(stream)
            }
            Err(source) => {
                warn!(server = %self.addr(), error = %source, "connect failed");
                Err(Error::Connect {
                    addr: self.addr(),
                    source,
                })
            }
        }
    }

    /// Close the stream. Safe to call on a closed connection.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(server = %self.addr(), "closed");
        }
    }

    /// Write the whole payload. A short write reopens the connection and
    /// sends the entire payload once more; a second shortfall is an error.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let sent = write_attempt(self.open(false)?, bytes);
        if sent == bytes.len() {
            return Ok(());
        }

        warn!(
            server = %self.addr(),
            sent,
            expected = bytes.len(),
            "short write, resending on a new connection"
        );
        let sent = write_attempt(self.open(true)?, bytes);
        if sent == bytes.len() {
            return Ok(());
        }

        error!(server = %self.addr(), sent, expected = bytes.len(), "resend failed");
        Err(Error::ShortWrite {
            sent,
            expected: bytes.len(),
        })
    }

    /// Copy `source` to the socket in `CHUNK_SIZE` pieces. Any short write
    /// aborts the transfer. Returns the number of bytes sent.
    pub fn send_stream<R: Read>(&mut self, mut source: R) -> Result<u64> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(server = %self.addr(), sent = total, error = %e, "reading upload source failed");
                    return Err(Error::Io(e));
                }
            };
            let sent = write_attempt(self.open(false)?, &buf[..n]);
            if sent != n {
                error!(server = %self.addr(), sent = total + sent as u64, "short write while streaming");
                return Err(Error::ShortWrite { sent, expected: n });
            }
            total += n as u64;
        }
        Ok(total)
    }

    /// Stream the contents of a local file to the socket.
    pub fn send_file(&mut self, path: &Path) -> Result<u64> {
        let started = Instant::now();
        let file = File::open(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "cannot open upload source");
            Error::file(path, e)
        })?;
        let sent = self.send_stream(file)?;
        debug!(
            path = %path.display(),
            bytes = sent,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "file sent"
        );
        Ok(sent)
    }

    /// Read until end of stream. Stops early, without failing, when reads
    /// keep coming back empty.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let server = self.addr();
        let stream = self.open(false)?;
        let mut pending = PendingRead::unbounded();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut out = Vec::new();
        while let Some(n) = pending.next(stream, &mut buf, &server) {
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    /// Read exactly `len` bytes.
    pub fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let server = self.addr();
        let stream = self.open(false)?;
        let mut pending = PendingRead::exact(len);
        let mut buf = vec![0u8; CHUNK_SIZE.min(len.max(1))];
        let mut out = Vec::with_capacity(len);
        while let Some(n) = pending.next(stream, &mut buf, &server) {
            out.extend_from_slice(&buf[..n]);
        }
        if out.len() < len {
            return Err(Error::ShortRead {
                got: out.len(),
                expected: len,
            });
        }
        Ok(out)
    }

    /// Read an HTTP response. Bytes up to the `\r\n\r\n` terminator are
    /// collected as the header block; everything after it goes to `sink`.
    pub fn read_framed<S: ResponseSink + ?Sized>(&mut self, sink: &mut S) -> Result<Framed> {
        let server = self.addr();
        let stream = self.open(false)?;
        let mut pending = PendingRead::unbounded();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut head = Vec::new();
        let mut body_len: Option<u64> = None;

        while let Some(n) = pending.next(stream, &mut buf, &server) {
            let chunk = &buf[..n];
            if let Some(len) = body_len.as_mut() {
                sink.write_chunk(chunk)?;
                *len += n as u64;
                continue;
            }

            // The terminator may straddle the previous chunk boundary.
            let search_from = head.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
            head.extend_from_slice(chunk);
            if let Some(pos) = find_terminator(&head[search_from..]) {
                let split = search_from + pos;
                let body = head.split_off(split + HEADER_TERMINATOR.len());
                head.truncate(split);
                if !body.is_empty() {
                    sink.write_chunk(&body)?;
                }
                body_len = Some(body.len() as u64);
            }
        }

        match body_len {
            Some(body_len) => Ok(Framed { head, body_len }),
            None => {
                warn!(server = %server, read = head.len(), "response has no header terminator");
                Err(Error::Framing { read: head.len() })
            }
        }
    }
}

impl<C: Connector> Drop for Connection<C> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Position of the first `\r\n\r\n` in `haystack`.
pub(crate) fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

/// Write as much of `bytes` as the stream accepts in one attempt. The
/// attempt stops at the first `Ok(0)` or error.
fn write_attempt<W: Write + ?Sized>(stream: &mut W, bytes: &[u8]) -> usize {
    let mut sent = 0;
    while sent < bytes.len() {
        match stream.write(&bytes[sent..]) {
            Ok(0) => break,
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(sent, expected = bytes.len(), error = %e, "write failed");
                break;
            }
        }
    }
    sent
}

/// State of one read call: how much is still wanted, and whether the single
/// transient empty read has been spent.
#[derive(Debug)]
struct PendingRead {
    remaining: Option<usize>,
    retries_left: u32,
}

impl PendingRead {
    fn unbounded() -> Self {
        Self {
            remaining: None,
            retries_left: 1,
        }
    }

    fn exact(len: usize) -> Self {
        Self {
            remaining: Some(len),
            retries_left: 1,
        }
    }

    /// Read the next chunk into `buf`. `None` means the read is over: the
    /// requested length was reached, the peer closed, or the retry budget
    /// ran out.
    fn next<R: Read + ?Sized>(&mut self, stream: &mut R, buf: &mut [u8], server: &str) -> Option<usize> {
        let want = match self.remaining {
            Some(0) => return None,
            Some(remaining) => remaining.min(buf.len()),
            None => buf.len(),
        };
        loop {
            match stream.read(&mut buf[..want]) {
                Ok(0) => return None,
                Ok(n) => {
                    if let Some(remaining) = self.remaining.as_mut() {
                        *remaining -= n;
                    }
                    return Some(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_transient(&e) && self.retries_left > 0 => {
                    self.retries_left -= 1;
                    debug!(server, error = %e, "empty read, retrying once");
                }
                Err(e) => {
                    warn!(server, error = %e, "read from socket failed");
                    return None;
                }
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::testing::{ReadStep, ScriptedConnector};

    fn connection(connector: &ScriptedConnector) -> Connection<ScriptedConnector> {
        Connection::with_connector("dav.test", 80, Duration::from_secs(1), connector.clone())
    }

    #[test]
    fn open_is_lazy_and_reused() {
        let connector = ScriptedConnector::new();
        let mut conn = connection(&connector);
        assert!(!conn.is_open());
        conn.open(false).unwrap();
        conn.open(false).unwrap();
        assert!(conn.is_open());
        assert_eq!(connector.connects(), 1);
        conn.open(true).unwrap();
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn close_is_idempotent() {
        let connector = ScriptedConnector::new();
        let mut conn = connection(&connector);
        conn.open(false).unwrap();
        conn.close();
        conn.close();
        assert!(!conn.is_open());
    }

    #[test]
    fn connect_failure_is_an_error_value() {
        let connector = ScriptedConnector::new();
        connector.refuse();
        let mut conn = connection(&connector);
        let err = conn.send(b"x").unwrap_err();
        assert!(matches!(err, Error::Connect { ref addr, .. } if addr == "dav.test:80"));
        assert!(!conn.is_open());
    }

    #[test]
    fn send_writes_payload_once() {
        let connector = ScriptedConnector::new();
        let mut conn = connection(&connector);
        conn.send(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.written(0), b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn short_write_resends_whole_payload_on_new_connection() {
        let connector = ScriptedConnector::new();
        connector.limit_writes(&[Some(3)]);
        let mut conn = connection(&connector);
        conn.send(b"hello world").unwrap();
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.written(0), b"hel");
        assert_eq!(connector.written(1), b"hello world");
    }

    #[test]
    fn second_short_write_fails_without_third_attempt() {
        let connector = ScriptedConnector::new();
        connector.limit_writes(&[Some(3), Some(5)]);
        let mut conn = connection(&connector);
        let err = conn.send(b"hello world").unwrap_err();
        assert!(matches!(err, Error::ShortWrite { sent: 5, expected: 11 }));
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn send_stream_chunks_and_counts() {
        let connector = ScriptedConnector::new();
        let mut conn = connection(&connector);
        let payload: Vec<u8> = (0..CHUNK_SIZE * 2 + 10).map(|i| (i % 251) as u8).collect();
        let sent = conn.send_stream(&payload[..]).unwrap();
        assert_eq!(sent, payload.len() as u64);
        assert_eq!(connector.written(0), payload);
    }

    #[test]
    fn send_stream_does_not_retry_short_write() {
        let connector = ScriptedConnector::new();
        connector.limit_writes(&[Some(CHUNK_SIZE + 1)]);
        let mut conn = connection(&connector);
        let payload = vec![7u8; CHUNK_SIZE * 3];
        let err = conn.send_stream(&payload[..]).unwrap_err();
        assert!(matches!(err, Error::ShortWrite { sent: 1, expected: CHUNK_SIZE }));
        assert_eq!(connector.connects(), 1);
    }

    #[test]
    fn read_all_tolerates_one_transient_read() {
        let connector = ScriptedConnector::new();
        connector.push_read(ReadStep::Data(b"abc".to_vec()));
        connector.push_read(ReadStep::Transient);
        connector.push_read(ReadStep::Data(b"def".to_vec()));
        let mut conn = connection(&connector);
        assert_eq!(conn.read_all().unwrap(), b"abcdef");
    }

    #[test]
    fn read_all_stops_on_second_transient_read() {
        let connector = ScriptedConnector::new();
        connector.push_read(ReadStep::Data(b"abc".to_vec()));
        connector.push_read(ReadStep::Transient);
        connector.push_read(ReadStep::Data(b"def".to_vec()));
        connector.push_read(ReadStep::Transient);
        connector.push_read(ReadStep::Data(b"ghi".to_vec()));
        let mut conn = connection(&connector);
        assert_eq!(conn.read_all().unwrap(), b"abcdef");
    }

    #[test]
    fn read_all_returns_partial_data_on_reset() {
        let connector = ScriptedConnector::new();
        connector.push_read(ReadStep::Data(b"abc".to_vec()));
        connector.push_read(ReadStep::Fail);
        let mut conn = connection(&connector);
        assert_eq!(conn.read_all().unwrap(), b"abc");
    }

    #[test]
    fn read_exact_returns_only_requested_bytes() {
        let connector = ScriptedConnector::new();
        connector.respond_in_chunks(b"0123456789", &[4, 4]);
        let mut conn = connection(&connector);
        assert_eq!(conn.read_exact(6).unwrap(), b"012345");
        assert_eq!(conn.read_all().unwrap(), b"6789");
    }

    #[test]
    fn read_exact_fails_when_stream_ends_early() {
        let connector = ScriptedConnector::new();
        connector.respond(b"0123");
        let mut conn = connection(&connector);
        let err = conn.read_exact(6).unwrap_err();
        assert!(matches!(err, Error::ShortRead { got: 4, expected: 6 }));
    }

    #[test]
    fn read_framed_splits_head_and_body() {
        let connector = ScriptedConnector::new();
        connector.respond(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nbody");
        let mut conn = connection(&connector);
        let mut sink = MemorySink::new();
        let framed = conn.read_framed(&mut sink).unwrap();
        assert_eq!(framed.head, b"HTTP/1.1 200 OK\r\nContent-Length: 4");
        assert_eq!(framed.body_len, 4);
        assert_eq!(sink.as_bytes(), b"body");
    }

    #[test]
    fn read_framed_is_independent_of_chunk_boundaries() {
        let response: &[u8] = b"HTTP/1.1 200 OK\r\nX-A: 1\r\n\r\npayload\r\n\r\nmore";
        let marker = find_terminator(response).unwrap();
        for split in marker.saturating_sub(2)..=marker + HEADER_TERMINATOR.len() + 1 {
            let connector = ScriptedConnector::new();
            connector.respond_in_chunks(response, &[split]);
            let mut conn = connection(&connector);
            let mut sink = MemorySink::new();
            let framed = conn.read_framed(&mut sink).unwrap();
            assert_eq!(framed.head, b"HTTP/1.1 200 OK\r\nX-A: 1", "split at {split}");
            assert_eq!(sink.as_bytes(), b"payload\r\n\r\nmore", "split at {split}");
        }
    }

    #[test]
    fn read_framed_handles_byte_at_a_time_delivery() {
        let response: &[u8] = b"HTTP/1.1 204 No Content\r\n\r\nxy";
        let connector = ScriptedConnector::new();
        connector.respond_in_chunks(response, &vec![1; response.len()]);
        let mut conn = connection(&connector);
        let mut sink = MemorySink::new();
        let framed = conn.read_framed(&mut sink).unwrap();
        assert_eq!(framed.head, b"HTTP/1.1 204 No Content");
        assert_eq!(sink.as_bytes(), b"xy");
    }

    #[test]
    fn read_framed_without_terminator_is_framing_error() {
        let connector = ScriptedConnector::new();
        let truncated: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n";
        connector.respond(truncated);
        let mut conn = connection(&connector);
        let mut sink = MemorySink::new();
        let err = conn.read_framed(&mut sink).unwrap_err();
        assert!(matches!(err, Error::Framing { read } if read == truncated.len()));
        assert!(sink.is_empty());
    }

    #[test]
    fn drop_closes_stream() {
        let connector = ScriptedConnector::new();
        {
            let mut conn = connection(&connector);
            conn.open(false).unwrap();
            assert_eq!(connector.closes(), 0);
        }
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.closes(), 1);
    }

    #[test]
    fn force_reopen_closes_previous_stream() {
        let connector = ScriptedConnector::new();
        let mut conn = connection(&connector);
        conn.open(false).unwrap();
        conn.open(true).unwrap();
        assert_eq!(connector.closes(), 1);
        conn.close();
        assert_eq!(connector.closes(), 2);
    }

    #[test]
    fn each_connection_reads_its_own_response() {
        let connector = ScriptedConnector::new();
        connector.respond(b"first");
        connector.respond(b"second");
        let mut conn = connection(&connector);
        assert_eq!(conn.read_all().unwrap(), b"first");
        conn.open(true).unwrap();
        assert_eq!(conn.read_all().unwrap(), b"second");
    }
}

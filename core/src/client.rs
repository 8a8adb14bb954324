//! WebDAV client over a raw socket.
//!
//! # Design
//! Each operation opens its own `Connection`, sends the request head (and
//! body for PUT), reads the response through `read_framed` into a sink, and
//! validates the status. The parsed `Response` is returned to the caller;
//! the headers of the last successful response are also kept on the client
//! for `last_size` / `last_modified`. Every call clears that cache first, so
//! after a failure it is empty.
//!
//! Every operation logs one event on completion with the elapsed time. The
//! log level never affects the returned `Result`.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::connection::{Connection, Connector, TcpConnector};
use crate::error::{Error, Result};
use crate::http::{format_http_date, HttpRequest, Method, Response, ResponseHead};
use crate::sink::{FileSink, MemorySink, ResponseSink};

/// Default I/O timeout for every socket operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

enum Body<'a> {
    Empty,
    Bytes(&'a [u8]),
    File(&'a Path),
}

/// Synchronous WebDAV client for one server.
///
/// `host` goes into the `Host` header; `server_addr` is what the socket
/// connects to. They differ when several virtual hosts share one address.
#[derive(Debug, Clone)]
pub struct WebDavClient<C: Connector + Clone = TcpConnector> {
    host: String,
    server_addr: String,
    port: u16,
    timeout: Duration,
    connector: C,
    last: Option<ResponseHead>,
}

impl WebDavClient<TcpConnector> {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            server_addr: host.to_string(),
            port,
            timeout,
            connector: TcpConnector,
            last: None,
        }
    }
}

impl<C: Connector + Clone> WebDavClient<C> {
    /// Replace the transport used to open connections.
    pub fn with_connector<D: Connector + Clone>(self, connector: D) -> WebDavClient<D> {
        WebDavClient {
            host: self.host,
            server_addr: self.server_addr,
            port: self.port,
            timeout: self.timeout,
            connector,
            last: None,
        }
    }

    /// Connect to `addr` instead of `host`, keeping `host` for the `Host`
    /// header.
    pub fn with_server_addr(mut self, addr: &str) -> Self {
        self.server_addr = addr.to_string();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch `path` into memory.
    pub fn get(&mut self, path: &str) -> Result<Response> {
        let started = Instant::now();
        let request = HttpRequest::new(Method::Get, path);
        let mut sink = MemorySink::new();
        let result = self.execute(&request, Body::Empty, &mut sink).map(|mut response| {
            response.body = sink.into_bytes();
            response
        });
        self.finish(Method::Get, path, started, result.as_ref().ok().map(|r| r.body_len), &result);
        result
    }

    /// Fetch `path` straight into the file at `destination`. The file is
    /// kept only if the whole operation succeeds.
    pub fn get_file(&mut self, path: &str, destination: impl AsRef<Path>) -> Result<Response> {
        let started = Instant::now();
        let request = HttpRequest::new(Method::Get, path);
        self.last = None;
        let result = FileSink::create(destination.as_ref()).and_then(|mut sink| {
            let response = self.execute(&request, Body::Empty, &mut sink)?;
            sink.release();
            Ok(response)
        });
        self.finish(Method::Get, path, started, result.as_ref().ok().map(|r| r.body_len), &result);
        result
    }

    /// Upload `content` to `path`, optionally stamping it with `mod_time`.
    pub fn put(&mut self, path: &str, content: &[u8], mod_time: Option<DateTime<Utc>>) -> Result<Response> {
        let started = Instant::now();
        let request = put_request(path, content.len() as u64, mod_time);
        let result = self.execute(&request, Body::Bytes(content), &mut MemorySink::new());
        self.finish(Method::Put, path, started, Some(content.len() as u64), &result);
        result
    }

    /// Upload the file at `source` to `path`. The size comes from
    /// `size_hint` when given, otherwise from the file's metadata; a zero or
    /// unknown size is rejected before connecting.
    pub fn put_file(
        &mut self,
        path: &str,
        source: impl AsRef<Path>,
        mod_time: Option<DateTime<Utc>>,
        size_hint: Option<u64>,
    ) -> Result<Response> {
        let started = Instant::now();
        let source = source.as_ref();
        let size = size_hint
            .filter(|&size| size > 0)
            .or_else(|| fs::metadata(source).ok().map(|meta| meta.len()))
            .unwrap_or(0);

        let result = if size == 0 {
            warn!(source = %source.display(), "cannot determine upload size");
            self.last = None;
            Err(Error::InvalidUploadSize {
                path: source.to_path_buf(),
            })
        } else {
            let request = put_request(path, size, mod_time);
            self.execute(&request, Body::File(source), &mut MemorySink::new())
        };
        self.finish(Method::Put, path, started, Some(size), &result);
        result
    }

    pub fn delete(&mut self, path: &str) -> Result<Response> {
        self.simple(HttpRequest::new(Method::Delete, path))
    }

    pub fn head(&mut self, path: &str) -> Result<Response> {
        self.simple(HttpRequest::new(Method::Head, path))
    }

    /// Rename `path` to `destination` on the server.
    pub fn move_to(&mut self, path: &str, destination: &str) -> Result<Response> {
        self.simple(HttpRequest::new(Method::Move, path).header("Destination", destination))
    }

    /// `Content-Length` of the last successful response.
    pub fn last_size(&self) -> Result<u64> {
        self.last_head()?.content_length()
    }

    /// `Last-Modified` of the last successful response.
    pub fn last_modified(&self) -> Result<DateTime<Utc>> {
        self.last_head()?.last_modified()
    }

    /// Headers of the last successful response, if the last call succeeded.
    pub fn last_response(&self) -> Option<&ResponseHead> {
        self.last.as_ref()
    }

    fn last_head(&self) -> Result<&ResponseHead> {
        self.last.as_ref().ok_or(Error::NoResponse)
    }

    fn simple(&mut self, request: HttpRequest) -> Result<Response> {
        let started = Instant::now();
        let result = self.execute(&request, Body::Empty, &mut MemorySink::new());
        self.finish(request.method, &request.path, started, None, &result);
        result
    }

    fn execute<S: ResponseSink>(&mut self, request: &HttpRequest, body: Body<'_>, sink: &mut S) -> Result<Response> {
        self.last = None;
        let mut conn = Connection::with_connector(&self.server_addr, self.port, self.timeout, self.connector.clone());
        conn.open(false)?;

        conn.send(&request.encode(&self.host)).inspect_err(|e| {
            warn!(error = %e, "sending request headers failed");
        })?;
        let sent = match body {
            Body::Empty | Body::Bytes([]) => Ok(()),
            Body::Bytes(bytes) => conn.send(bytes),
            Body::File(path) => conn.send_file(path).map(|_| ()),
        };
        sent.inspect_err(|e| warn!(error = %e, "sending request body failed"))?;

        let framed = conn.read_framed(sink)?;
        conn.close();

        let head = ResponseHead::parse(&framed.head).inspect_err(|e| warn!(error = %e, "unreadable response"))?;
        head.check_status()
            .inspect_err(|_| warn!(status_line = %head.status_line, "not OK response"))?;

        self.last = Some(head.clone());
        Ok(Response {
            head,
            body: Vec::new(),
            body_len: framed.body_len,
        })
    }

    fn finish<T>(&self, method: Method, path: &str, started: Instant, bytes: Option<u64>, result: &Result<T>) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let server = format!("{}:{}", self.host, self.port);
        match result {
            Ok(_) => debug!(%method, path, %server, bytes, elapsed_ms, "request done"),
            Err(e) if matches!(method, Method::Head | Method::Move) => {
                warn!(%method, path, %server, bytes, elapsed_ms, error = %e, "request failed")
            }
            Err(e) => error!(%method, path, %server, bytes, elapsed_ms, error = %e, "request failed"),
        }
    }
}

fn put_request(path: &str, size: u64, mod_time: Option<DateTime<Utc>>) -> HttpRequest {
    let request = HttpRequest::new(Method::Put, path).header("Content-Length", size);
    match mod_time {
        Some(time) => request.header("Date", format_http_date(time)),
        None => request,
    }
}

//! HTTP/1.1 request and response framing for the WebDAV verbs.
//!
//! # Design
//! `HttpRequest` is plain data that encodes to the request line and header
//! block sent on the wire. `ResponseHead` is the parsed header block of a
//! response: the status line plus the raw header lines in order. Header
//! lookups are case-insensitive on the name.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// The verbs spoken by `WebDavClient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Delete,
    Head,
    Move,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Move => "MOVE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request line plus method-specific headers.
///
/// `Host` and `Connection: close` are appended by `encode`, after the
/// headers added here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Wire form of the request head, terminated by the blank line.
    pub fn encode(&self, host: &str) -> Vec<u8> {
        let mut out = format!("{} {} HTTP/1.1\r\n", self.method, self.path);
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("Host: ");
        out.push_str(host);
        out.push_str("\r\nConnection: close\r\n\r\n");
        out.into_bytes()
    }
}

/// Parsed status line and header lines of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub protocol: String,
    pub status: u16,
    pub reason: String,
    pub status_line: String,
    /// Raw `Name: value` lines, status line excluded.
    pub headers: Vec<String>,
}

impl ResponseHead {
    /// Parse a header block (without the trailing `\r\n\r\n`).
    pub fn parse(block: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(block);
        let mut lines = text.split("\r\n");
        let status_line = lines.next().unwrap_or_default().to_string();

        let mut parts = status_line.splitn(3, ' ');
        let protocol = parts.next().unwrap_or_default();
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|_| protocol.starts_with("HTTP/"));
        let Some(status) = status else {
            return Err(Error::MalformedStatusLine(status_line));
        };
        let reason = parts.next().unwrap_or_default().to_string();

        Ok(Self {
            protocol: protocol.to_string(),
            status,
            reason,
            headers: lines.filter(|line| !line.is_empty()).map(str::to_string).collect(),
            status_line,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail with `Error::Status` unless the status is in `200..300`.
    pub fn check_status(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }
        Err(Error::Status {
            code: self.status,
            line: self.status_line.clone(),
        })
    }

    /// Value of the first header called `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    fn require(&self, name: &str) -> Result<&str> {
        self.header(name).ok_or_else(|| Error::MissingHeader(name.to_string()))
    }

    pub fn content_length(&self) -> Result<u64> {
        let value = self.require("Content-Length")?;
        value.parse().map_err(|_| Error::InvalidHeader {
            name: "Content-Length".to_string(),
            value: value.to_string(),
        })
    }

    pub fn last_modified(&self) -> Result<DateTime<Utc>> {
        let value = self.require("Last-Modified")?;
        parse_http_date(value).ok_or_else(|| Error::InvalidHeader {
            name: "Last-Modified".to_string(),
            value: value.to_string(),
        })
    }
}

/// A validated response. `body` is empty when the body was streamed to a
/// file; `body_len` always counts the body bytes received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub head: ResponseHead,
    pub body: Vec<u8>,
    pub body_len: u64,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.head.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    pub fn content_length(&self) -> Result<u64> {
        self.head.content_length()
    }

    pub fn last_modified(&self) -> Result<DateTime<Utc>> {
        self.head.last_modified()
    }
}

/// Format as an RFC 1123 date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

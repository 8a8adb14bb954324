//! Scripted in-memory transport used by the unit tests.
//!
//! A `ScriptedConnector` hands out `ScriptedStream`s that share one `Script`.
//! Each connection can be given a write limit (bytes accepted before writes
//! start returning `Ok(0)`), and reads are served from a queue of steps that
//! is shared across connections. `respond` ends each response with an
//! `End` step, so the next connection starts reading at the next response.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::Duration;

use crate::connection::Connector;

#[derive(Debug)]
pub enum ReadStep {
    Data(Vec<u8>),
    Transient,
    Fail,
    /// Peer closed the stream: one read returns `Ok(0)`.
    End,
}

#[derive(Debug, Default)]
pub struct Script {
    pub connects: usize,
    /// Streams dropped so far.
    pub closes: usize,
    pub refuse: bool,
    /// Bytes accepted by each connection, in connection order.
    pub written: Vec<Vec<u8>>,
    /// Per-connection write limit; `None` (or an exhausted queue) is unlimited.
    pub write_limits: VecDeque<Option<usize>>,
    pub reads: VecDeque<ReadStep>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    pub script: Rc<RefCell<Script>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full response to be served in chunks of the given sizes.
    pub fn respond_in_chunks(&self, response: &[u8], sizes: &[usize]) {
        let mut script = self.script.borrow_mut();
        let mut rest = response;
        for &size in sizes {
            let take = size.min(rest.len());
            script.reads.push_back(ReadStep::Data(rest[..take].to_vec()));
            rest = &rest[take..];
        }
        if !rest.is_empty() {
            script.reads.push_back(ReadStep::Data(rest.to_vec()));
        }
        script.reads.push_back(ReadStep::End);
    }

    pub fn respond(&self, response: &[u8]) {
        self.respond_in_chunks(response, &[]);
    }

    pub fn push_read(&self, step: ReadStep) {
        self.script.borrow_mut().reads.push_back(step);
    }

    pub fn limit_writes(&self, limits: &[Option<usize>]) {
        self.script.borrow_mut().write_limits.extend(limits.iter().copied());
    }

    pub fn refuse(&self) {
        self.script.borrow_mut().refuse = true;
    }

    pub fn connects(&self) -> usize {
        self.script.borrow().connects
    }

    pub fn closes(&self) -> usize {
        self.script.borrow().closes
    }

    pub fn written(&self, connection: usize) -> Vec<u8> {
        self.script.borrow().written[connection].clone()
    }
}

impl Connector for ScriptedConnector {
    type Stream = ScriptedStream;

    fn connect(&self, _host: &str, _port: u16, _timeout: Duration) -> io::Result<ScriptedStream> {
        let mut script = self.script.borrow_mut();
        if script.refuse {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        let index = script.connects;
        script.connects += 1;
        script.written.push(Vec::new());
        let limit = script.write_limits.pop_front().flatten();
        Ok(ScriptedStream {
            script: Rc::clone(&self.script),
            index,
            limit,
            accepted: 0,
        })
    }
}

#[derive(Debug)]
pub struct ScriptedStream {
    script: Rc<RefCell<Script>>,
    index: usize,
    limit: Option<usize>,
    accepted: usize,
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.limit.map_or(buf.len(), |limit| limit.saturating_sub(self.accepted));
        let n = room.min(buf.len());
        self.accepted += n;
        self.script.borrow_mut().written[self.index].extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut script = self.script.borrow_mut();
        match script.reads.pop_front() {
            None | Some(ReadStep::End) => Ok(0),
            Some(ReadStep::Transient) => Err(io::Error::new(io::ErrorKind::WouldBlock, "no data yet")),
            Some(ReadStep::Fail) => Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Some(ReadStep::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    script.reads.push_front(ReadStep::Data(data[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.script.borrow_mut().closes += 1;
    }
}

//! Named-object storage on a local directory or a WebDAV server.
//!
//! Object names are spread over nested directories by `shard_path`, so with
//! two levels `12345.jpg` lives at `5/45/12345.jpg`.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use filetime::FileTime;
use tracing::warn;
use url::Url;

use crate::client::WebDavClient;
use crate::connection::{Connector, TcpConnector};
use crate::error::{Error, Result};

/// Relative location of `name` with `levels` directory levels.
///
/// The leading digits of `name` form an id; level `i` is `id mod 10^i`.
/// Names without leading digits use id 0.
pub fn shard_path(name: &str, levels: u32) -> String {
    if levels == 0 {
        return name.to_string();
    }
    let digits: &str = &name[..name.bytes().take_while(u8::is_ascii_digit).count()];
    let id = if digits.is_empty() {
        0
    } else {
        digits.parse::<u64>().unwrap_or(u64::MAX)
    };

    let mut segments: Vec<String> = (1..=levels)
        .map(|level| match 10u64.checked_pow(level) {
            Some(modulus) => (id % modulus).to_string(),
            None => id.to_string(),
        })
        .collect();
    segments.push(name.to_string());
    segments.join("/")
}

/// Common operations over a store of named objects.
pub trait Storage {
    fn get(&mut self, name: &str) -> Result<Vec<u8>>;

    /// Copy the object into `out`, returning the number of bytes written.
    fn get_file(&mut self, name: &str, out: &Path) -> Result<u64>;

    fn put(&mut self, name: &str, content: &[u8], mod_time: Option<DateTime<Utc>>) -> Result<()>;

    fn put_file(
        &mut self,
        name: &str,
        source: &Path,
        mod_time: Option<DateTime<Utc>>,
        size_hint: Option<u64>,
    ) -> Result<()>;

    fn exists(&mut self, name: &str) -> Result<bool>;

    fn size(&mut self, name: &str) -> Result<u64>;

    fn modified(&mut self, name: &str) -> Result<DateTime<Utc>>;

    fn delete(&mut self, name: &str) -> Result<()>;

    /// Set the modification time, to now when `mod_time` is `None`.
    fn touch(&mut self, name: &str, mod_time: Option<DateTime<Utc>>) -> Result<()>;

    fn move_to(&mut self, name: &str, new_name: &str) -> Result<()>;

    /// Public URI under which the object is served.
    fn external_uri(&self, name: &str) -> String;
}

/// Objects stored under a local directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    base: PathBuf,
    external_base: Option<String>,
    levels: u32,
}

impl FileStorage {
    pub fn new(base: impl Into<PathBuf>, levels: u32) -> Self {
        Self {
            base: base.into(),
            external_base: None,
            levels,
        }
    }

    pub fn with_external_base(mut self, uri: &str) -> Self {
        self.external_base = Some(uri.to_string());
        self
    }

    pub fn local_path(&self, name: &str) -> PathBuf {
        self.base.join(shard_path(name, self.levels))
    }

    fn writable_path(&self, name: &str) -> Result<PathBuf> {
        let path = self.local_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::file(parent, e))?;
        }
        Ok(path)
    }
}

fn set_mtime(path: &Path, mod_time: DateTime<Utc>) -> Result<()> {
    let time = FileTime::from_unix_time(mod_time.timestamp(), mod_time.timestamp_subsec_nanos());
    filetime::set_file_mtime(path, time).map_err(|e| Error::file(path, e))
}

impl Storage for FileStorage {
    fn get(&mut self, name: &str) -> Result<Vec<u8>> {
        let path = self.local_path(name);
        fs::read(&path).map_err(|e| Error::file(path, e))
    }

    fn get_file(&mut self, name: &str, out: &Path) -> Result<u64> {
        let path = self.local_path(name);
        fs::copy(&path, out).map_err(|e| Error::file(path, e))
    }

    fn put(&mut self, name: &str, content: &[u8], mod_time: Option<DateTime<Utc>>) -> Result<()> {
        let path = self.writable_path(name)?;
        fs::write(&path, content).map_err(|e| Error::file(&path, e))?;
        match mod_time {
            Some(time) => set_mtime(&path, time),
            None => Ok(()),
        }
    }

    fn put_file(
        &mut self,
        name: &str,
        source: &Path,
        mod_time: Option<DateTime<Utc>>,
        _size_hint: Option<u64>,
    ) -> Result<()> {
        let path = self.writable_path(name)?;
        fs::copy(source, &path).map_err(|e| Error::file(source, e))?;
        match mod_time {
            Some(time) => set_mtime(&path, time),
            None => Ok(()),
        }
    }

    fn exists(&mut self, name: &str) -> Result<bool> {
        Ok(self.local_path(name).exists())
    }

    fn size(&mut self, name: &str) -> Result<u64> {
        let path = self.local_path(name);
        fs::metadata(&path).map(|meta| meta.len()).map_err(|e| Error::file(path, e))
    }

    fn modified(&mut self, name: &str) -> Result<DateTime<Utc>> {
        let path = self.local_path(name);
        fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .map_err(|e| Error::file(path, e))
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        let path = self.local_path(name);
        fs::remove_file(&path).map_err(|e| Error::file(path, e))
    }

    fn touch(&mut self, name: &str, mod_time: Option<DateTime<Utc>>) -> Result<()> {
        let path = self.writable_path(name)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::file(&path, e))?;
        set_mtime(&path, mod_time.unwrap_or_else(Utc::now))
    }

    fn move_to(&mut self, name: &str, new_name: &str) -> Result<()> {
        let from = self.local_path(name);
        let to = self.writable_path(new_name)?;
        fs::rename(&from, &to).map_err(|e| Error::file(from, e))
    }

    fn external_uri(&self, name: &str) -> String {
        format!(
            "{}{}",
            self.external_base.as_deref().unwrap_or_default(),
            shard_path(name, self.levels)
        )
    }
}

/// Objects stored on a WebDAV server below `base_path`.
#[derive(Debug, Clone)]
pub struct WebDavStorage<C: Connector + Clone = TcpConnector> {
    client: WebDavClient<C>,
    base_path: String,
    external_base: Option<String>,
    levels: u32,
}

impl WebDavStorage<TcpConnector> {
    /// Build from a server URL such as `http://dav.example.com:8080/files/`.
    /// The port defaults to 80 and the base path to `/`.
    pub fn from_url(server: &str, timeout: Duration, levels: u32) -> Result<Self> {
        let url = Url::parse(server).map_err(|e| Error::Config(format!("{server}: {e}")))?;
        if url.scheme() != "http" {
            return Err(Error::Config(format!("{server}: only http is supported")));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("{server}: missing host")))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let client = WebDavClient::new(host, port, timeout);
        Ok(Self::with_client(client, url.path(), levels))
    }
}

impl<C: Connector + Clone> WebDavStorage<C> {
    pub fn with_client(client: WebDavClient<C>, base_path: &str, levels: u32) -> Self {
        let mut base_path = base_path.to_string();
        if !base_path.ends_with('/') {
            base_path.push('/');
        }
        Self {
            client,
            base_path,
            external_base: None,
            levels,
        }
    }

    pub fn with_external_base(mut self, uri: &str) -> Self {
        self.external_base = Some(uri.to_string());
        self
    }

    pub fn client(&self) -> &WebDavClient<C> {
        &self.client
    }

    /// Server-side path of `name`.
    pub fn remote_path(&self, name: &str) -> String {
        format!("{}{}", self.base_path, shard_path(name, self.levels))
    }
}

impl<C: Connector + Clone> Storage for WebDavStorage<C> {
    fn get(&mut self, name: &str) -> Result<Vec<u8>> {
        let path = self.remote_path(name);
        Ok(self.client.get(&path)?.body)
    }

    fn get_file(&mut self, name: &str, out: &Path) -> Result<u64> {
        let path = self.remote_path(name);
        Ok(self.client.get_file(&path, out)?.body_len)
    }

    fn put(&mut self, name: &str, content: &[u8], mod_time: Option<DateTime<Utc>>) -> Result<()> {
        let path = self.remote_path(name);
        self.client.put(&path, content, mod_time).map(|_| ())
    }

    fn put_file(
        &mut self,
        name: &str,
        source: &Path,
        mod_time: Option<DateTime<Utc>>,
        size_hint: Option<u64>,
    ) -> Result<()> {
        let path = self.remote_path(name);
        self.client.put_file(&path, source, mod_time, size_hint).map(|_| ())
    }

    fn exists(&mut self, name: &str) -> Result<bool> {
        let path = self.remote_path(name);
        match self.client.head(&path) {
            Ok(_) => Ok(true),
            Err(Error::Status { code: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn size(&mut self, name: &str) -> Result<u64> {
        let path = self.remote_path(name);
        self.client.head(&path)?.content_length()
    }

    fn modified(&mut self, name: &str) -> Result<DateTime<Utc>> {
        let path = self.remote_path(name);
        self.client.head(&path)?.last_modified()
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        let path = self.remote_path(name);
        self.client.delete(&path).map(|_| ())
    }

    /// WebDAV has no touch; the object is downloaded and uploaded again.
    fn touch(&mut self, name: &str, mod_time: Option<DateTime<Utc>>) -> Result<()> {
        warn!(name, "touch over WebDAV re-uploads the whole object");
        let content = self.get(name)?;
        self.put(name, &content, Some(mod_time.unwrap_or_else(Utc::now)))
    }

    fn move_to(&mut self, name: &str, new_name: &str) -> Result<()> {
        let from = self.remote_path(name);
        let to = self.remote_path(new_name);
        self.client.move_to(&from, &to).map(|_| ())
    }

    fn external_uri(&self, name: &str) -> String {
        match &self.external_base {
            Some(base) => format!("{base}{}", shard_path(name, self.levels)),
            None => {
                let port = match self.client.port() {
                    80 => String::new(),
                    port => format!(":{port}"),
                };
                format!("http://{}{port}{}", self.client.server_addr(), self.remote_path(name))
            }
        }
    }
}

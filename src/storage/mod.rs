//! Named byte objects behind one async interface.
//!
//! Names are `/`-separated paths. A name behaves like a directory when
//! other objects live under `name/`, which is how job outputs (one object
//! per reduce partition) and scratch space are laid out.

use std::fmt;
use std::io;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub mod local;
pub mod memory;
pub mod s3;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use s3::S3Storage;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("`{0}` not found")]
    NotFound(String),

    #[error("`{0}` has children; delete it recursively")]
    NotEmpty(String),

    /// Transient backend failure. The caller may retry.
    #[error("`{name}`: {source}")]
    Unavailable {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StorageError {
    pub fn unavailable(
        name: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StorageError::Unavailable {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Maps an I/O error, keeping `NotFound` distinguishable.
    pub fn from_io(name: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => StorageError::unavailable(name, err),
        }
    }

    /// The object name the error is about.
    pub fn name(&self) -> &str {
        match self {
            StorageError::NotFound(name) | StorageError::NotEmpty(name) => name,
            StorageError::Unavailable { name, .. } => name,
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    /// Read a whole object.
    async fn open(&self, name: &str) -> StorageResult<Bytes>;

    /// Read `range` of an object. The range is clamped to the object length.
    async fn open_range(&self, name: &str, range: Range<u64>) -> StorageResult<Bytes> {
        let data = self.open(name).await?;
        let (start, end) = clamp(range, data.len() as u64);
        Ok(data.slice(start as usize..end as usize))
    }

    /// Write a whole object, replacing any previous content.
    async fn put(&self, name: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object. With `recursive`, everything under `name/` goes too.
    async fn delete(&self, name: &str, recursive: bool) -> StorageResult<()>;

    /// Names of every object equal to `prefix` or under `prefix/`, sorted.
    /// An empty prefix lists the whole namespace.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Whether `name` is an object or has objects under it.
    async fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Length of an object in bytes.
    async fn len(&self, name: &str) -> StorageResult<u64>;
}

/// Open a writable stream for `name`. Nothing is visible until
/// [`ObjectWriter::commit`] succeeds.
pub fn create(storage: &Arc<dyn Storage>, name: &str) -> ObjectWriter {
    ObjectWriter {
        storage: Arc::clone(storage),
        name: normalize(name),
        buf: BytesMut::new(),
    }
}

/// Buffered object writer. The object is published in one `put`, so a
/// reader never observes a half-written object and an abandoned writer
/// leaves nothing behind.
pub struct ObjectWriter {
    storage: Arc<dyn Storage>,
    name: String,
    buf: BytesMut,
}

impl ObjectWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn put_slice(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn written(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Publish the object, returning the number of bytes written.
    pub async fn commit(self) -> StorageResult<u64> {
        let len = self.buf.len() as u64;
        self.storage.put(&self.name, self.buf.freeze()).await?;
        Ok(len)
    }
}

impl io::Write for ObjectWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.put_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for ObjectWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectWriter")
            .field("name", &self.name)
            .field("buffered", &self.buf.len())
            .finish()
    }
}

/// Strip leading and trailing separators.
pub fn normalize(name: &str) -> String {
    name.trim_matches('/').to_string()
}

/// Join two name segments with a single separator.
pub fn join(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    match (base.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{name}"),
    }
}

/// Whether `name` is `prefix` itself or lives under `prefix/`.
pub fn is_under(name: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    prefix.is_empty()
        || name == prefix
        || (name.starts_with(prefix) && name.as_bytes().get(prefix.len()) == Some(&b'/'))
}

/// Final path component of a name.
pub fn file_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

pub(crate) fn clamp(range: Range<u64>, len: u64) -> (u64, u64) {
    let start = range.start.min(len);
    let end = range.end.min(len).max(start);
    (start, end)
}

//! Framed, splittable key-value record encoding.
//!
//! ```text
//! header  := "MRLS" version:u8 sync:[u8; 16]
//! record  := key_len:u32be value_len:u32be key value
//! sync    := 0xFFFFFFFF sync:[u8; 16]
//! ```
//!
//! A sync block precedes a record whenever `sync_interval` bytes were
//! written since the last one. A reader that starts at an arbitrary byte
//! offset scans forward to the next sync block, so a file can be cut into
//! byte ranges that each decode to whole records: a range owns the records
//! following every sync point that begins inside it, where the header
//! counts as the sync point at offset 0.

use std::ops::Range;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use uuid::Uuid;

use crate::KeyValue;

pub const MAGIC: &[u8; 4] = b"MRLS";
pub const VERSION: u8 = 1;
pub const SYNC_LEN: usize = 16;
pub const HEADER_LEN: usize = MAGIC.len() + 1 + SYNC_LEN;
pub const DEFAULT_SYNC_INTERVAL: usize = 2000;

const SYNC_ESCAPE: u32 = u32::MAX;
const SYNC_BLOCK_LEN: usize = 4 + SYNC_LEN;
const MAX_FIELD_LEN: usize = (u32::MAX - 1) as usize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("not a record file (bad magic)")]
    BadMagic,

    #[error("unsupported record file version {0}")]
    UnsupportedVersion(u8),

    #[error("record truncated at byte {0}")]
    Truncated(u64),

    #[error("corrupt sync block at byte {0}")]
    BadSync(u64),

    #[error("field of {0} bytes is too large to encode")]
    FieldTooLarge(usize),
}

/// The parsed file header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub sync: [u8; SYNC_LEN],
}

impl Header {
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_LEN || &data[..MAGIC.len()] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let version = data[MAGIC.len()];
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let mut sync = [0u8; SYNC_LEN];
        sync.copy_from_slice(&data[MAGIC.len() + 1..HEADER_LEN]);
        Ok(Self { sync })
    }
}

/// Appends records to an in-memory buffer.
pub struct RecordWriter {
    buf: BytesMut,
    sync: [u8; SYNC_LEN],
    sync_interval: usize,
    last_sync: usize,
    records: u64,
}

impl RecordWriter {
    pub fn new() -> Self {
        Self::with_sync_interval(DEFAULT_SYNC_INTERVAL)
    }

    pub fn with_sync_interval(sync_interval: usize) -> Self {
        let sync = Uuid::new_v4().into_bytes();
        let mut buf = BytesMut::with_capacity(HEADER_LEN + sync_interval);
        buf.put_slice(MAGIC);
        buf.put_u8(VERSION);
        buf.put_slice(&sync);
        Self {
            buf,
            sync,
            sync_interval: sync_interval.max(1),
            last_sync: 0,
            records: 0,
        }
    }

    pub fn append(&mut self, kv: &KeyValue) -> Result<(), CodecError> {
        for field in [&kv.key, &kv.value] {
            if field.len() > MAX_FIELD_LEN {
                return Err(CodecError::FieldTooLarge(field.len()));
            }
        }
        if self.buf.len() - self.last_sync >= self.sync_interval {
            self.last_sync = self.buf.len();
            self.buf.put_u32(SYNC_ESCAPE);
            self.buf.put_slice(&self.sync);
        }
        self.buf.reserve(8 + kv.key.len() + kv.value.len());
        self.buf.put_u32(kv.key.len() as u32);
        self.buf.put_u32(kv.value.len() as u32);
        self.buf.put_slice(&kv.key);
        self.buf.put_slice(&kv.value);
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for RecordWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a whole sequence of records.
pub fn encode<'a>(records: impl IntoIterator<Item = &'a KeyValue>) -> Result<Bytes, CodecError> {
    let mut writer = RecordWriter::new();
    for kv in records {
        writer.append(kv)?;
    }
    Ok(writer.finish())
}

/// Lazily decodes records from an encoded buffer or a byte range of one.
pub struct RecordReader {
    body: Bytes,
    /// Absolute file offset of `body[0]`.
    base: u64,
    pos: usize,
    /// Stop at the first sync block that starts at or after this offset.
    end: u64,
    sync: [u8; SYNC_LEN],
    failed: bool,
}

impl RecordReader {
    /// Read every record of a complete encoded file.
    pub fn new(data: Bytes) -> Result<Self, CodecError> {
        let header = Header::parse(&data)?;
        let body = data.slice(HEADER_LEN..);
        Ok(Self {
            body,
            base: HEADER_LEN as u64,
            pos: 0,
            end: u64::MAX,
            sync: header.sync,
            failed: false,
        })
    }

    /// Read the records owned by the byte range `split` of a file.
    ///
    /// `body` holds the file bytes from absolute offset `body_offset` to the
    /// end of the file, where `body_offset <= max(split.start, HEADER_LEN)`.
    pub fn for_split(
        header: Header,
        body: Bytes,
        body_offset: u64,
        split: Range<u64>,
    ) -> Self {
        let mut reader = Self {
            body,
            base: body_offset,
            pos: 0,
            end: split.end,
            sync: header.sync,
            failed: false,
        };
        if split.start >= split.end {
            reader.pos = reader.body.len();
        } else if split.start == 0 {
            // the header is this split's sync point
            reader.pos = (HEADER_LEN as u64).saturating_sub(body_offset) as usize;
        } else {
            let from = split.start.saturating_sub(body_offset) as usize;
            reader.pos = reader.find_sync(from).unwrap_or(reader.body.len());
        }
        reader
    }

    fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    /// Position of the first sync block at or after `from`.
    fn find_sync(&self, from: usize) -> Option<usize> {
        let mut marker = [0u8; SYNC_BLOCK_LEN];
        marker[..4].copy_from_slice(&SYNC_ESCAPE.to_be_bytes());
        marker[4..].copy_from_slice(&self.sync);
        let hay = self.body.get(from..)?;
        hay.windows(SYNC_BLOCK_LEN)
            .position(|window| window == marker)
            .map(|at| from + at)
    }

    fn read_record(&mut self) -> Result<Option<KeyValue>, CodecError> {
        loop {
            let rest = &self.body[self.pos..];
            if rest.is_empty() {
                return Ok(None);
            }
            if rest.len() < 8 {
                return Err(CodecError::Truncated(self.offset()));
            }
            let mut head = &rest[..8];
            let key_len = head.get_u32();
            if key_len == SYNC_ESCAPE {
                if self.offset() >= self.end {
                    return Ok(None);
                }
                if rest.len() < SYNC_BLOCK_LEN || rest[4..SYNC_BLOCK_LEN] != self.sync {
                    return Err(CodecError::BadSync(self.offset()));
                }
                self.pos += SYNC_BLOCK_LEN;
                continue;
            }
            let key_len = key_len as usize;
            let value_len = head.get_u32() as usize;
            let total = 8 + key_len + value_len;
            if rest.len() < total {
                return Err(CodecError::Truncated(self.offset()));
            }
            let start = self.pos + 8;
            let key = self.body.slice(start..start + key_len);
            let value = self.body.slice(start + key_len..start + key_len + value_len);
            self.pos += total;
            return Ok(Some(KeyValue { key, value }));
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<KeyValue, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_record() {
            Ok(record) => record.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Decode every record of a complete encoded file.
pub fn decode(data: Bytes) -> Result<Vec<KeyValue>, CodecError> {
    RecordReader::new(data)?.collect()
}

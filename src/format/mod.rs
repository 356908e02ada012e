//! Input splitting and decoding, output encoding.

use std::fmt;
use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{self, Header, RecordReader, RecordWriter, HEADER_LEN};
use crate::storage::{is_under, normalize, Storage, StorageResult};
use crate::{Error, KeyValue, Result};

pub mod parquet;
pub mod text;

/// How a key or value field is interpreted when rendered as text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Utf8,
    /// 8 big-endian bytes, see [`crate::utils::u64_to_bytes`].
    U64,
    /// Opaque bytes, rendered as hex.
    Bytes,
}

impl FieldType {
    /// Text fields are copied byte for byte, so invalid UTF-8 stays
    /// distinguishable.
    pub fn render(&self, data: &[u8], out: &mut BytesMut) {
        use std::fmt::Write;
        match self {
            FieldType::U64 if data.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(data);
                let _ = write!(out, "{}", u64::from_be_bytes(raw));
            }
            FieldType::Utf8 | FieldType::U64 => out.put_slice(data),
            FieldType::Bytes => {
                for b in data {
                    let _ = write!(out, "{b:02x}");
                }
            }
        }
    }
}

/// The key and value types of a record stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub key: FieldType,
    pub value: FieldType,
}

impl Schema {
    pub const fn new(key: FieldType, value: FieldType) -> Self {
        Self { key, value }
    }

    /// Byte offset and line, as produced by [`InputFormat::Text`].
    pub const LINES: Schema = Schema::new(FieldType::U64, FieldType::Utf8);

    /// Word and count.
    pub const COUNTS: Schema = Schema::new(FieldType::Utf8, FieldType::U64);

    pub fn inverse(self) -> Self {
        Schema::new(self.value, self.key)
    }
}

impl Default for Schema {
    fn default() -> Self {
        Schema::new(FieldType::Utf8, FieldType::Utf8)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputFormat {
    /// One record per line: byte offset (u64) and the line.
    #[default]
    Text,
    /// The framed format of [`crate::codec`].
    Sequence,
    /// Two binary columns, `key` and `value`. Not splittable.
    Parquet,
}

impl InputFormat {
    pub fn is_splittable(&self) -> bool {
        !matches!(self, InputFormat::Parquet)
    }

    /// The schema this format always produces, if it fixes one.
    pub fn fixed_schema(&self) -> Option<Schema> {
        match self {
            InputFormat::Text => Some(Schema::LINES),
            InputFormat::Sequence | InputFormat::Parquet => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// `key<TAB>value` lines, rendered with the job's output schema.
    #[default]
    Text,
    Sequence,
    Parquet,
}

impl OutputFormat {
    /// The input format that reads this output back.
    pub fn reader(&self) -> Option<InputFormat> {
        match self {
            OutputFormat::Text => None,
            OutputFormat::Sequence => Some(InputFormat::Sequence),
            OutputFormat::Parquet => Some(InputFormat::Parquet),
        }
    }
}

/// A byte range of one input object: the unit of map parallelism.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSplit {
    pub index: usize,
    pub name: String,
    pub range: Range<u64>,
    pub format: InputFormat,
}

impl fmt::Display for InputSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}+{}",
            self.name,
            self.range.start,
            self.range.end - self.range.start
        )
    }
}

fn has_wildcards(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Names whose final component starts with `_` or `.` (success markers,
/// staging files) are never job input.
fn is_hidden(name: &str, below: &str) -> bool {
    let rest = name.strip_prefix(below).unwrap_or(name);
    rest.split('/')
        .filter(|c| !c.is_empty())
        .any(|c| c.starts_with('_') || c.starts_with('.'))
}

/// Expand job inputs into object names. An input is an object, a
/// directory-like prefix, or a glob pattern.
pub async fn resolve_inputs(storage: &dyn Storage, inputs: &[String]) -> Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for input in inputs {
        let input = normalize(input);
        let found: Vec<String> = if has_wildcards(&input) {
            let pattern = Pattern::new(&input)
                .map_err(|err| Error::InvalidJob(format!("bad input pattern `{input}`: {err}")))?;
            let base: Vec<&str> = input
                .split('/')
                .take_while(|c| !has_wildcards(c))
                .collect();
            let base = base.join("/");
            let options = MatchOptions {
                require_literal_separator: true,
                ..MatchOptions::new()
            };
            storage
                .list(&base)
                .await?
                .into_iter()
                .filter(|name| pattern.matches_with(name, options) && !is_hidden(name, &base))
                .collect()
        } else {
            storage
                .list(&input)
                .await?
                .into_iter()
                .filter(|name| is_under(name, &input) && !is_hidden(name, &input))
                .collect()
        };
        if found.is_empty() {
            return Err(Error::NotFound(input));
        }
        for name in found {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    debug!(inputs = ?inputs, objects = names.len(), "resolved job input");
    Ok(names)
}

/// Cut every input object into splits of at most `split_size` bytes when
/// the format allows it.
pub async fn plan_splits(
    storage: &dyn Storage,
    names: &[String],
    format: InputFormat,
    split_size: u64,
) -> Result<Vec<InputSplit>> {
    let split_size = split_size.max(1);
    let mut splits = Vec::new();
    for name in names {
        let len = storage.len(name).await?;
        let mut ranges = Vec::new();
        if format.is_splittable() && len > split_size {
            let mut start = 0;
            while start < len {
                let end = (start + split_size).min(len);
                ranges.push(start..end);
                start = end;
            }
        } else {
            ranges.push(0..len);
        }
        for range in ranges {
            splits.push(InputSplit {
                index: splits.len(),
                name: name.clone(),
                range,
                format,
            });
        }
    }
    Ok(splits)
}

/// The bytes a split needs, fetched from storage.
#[derive(Debug)]
pub struct SplitData {
    format: InputFormat,
    range: Range<u64>,
    /// Absolute offset of `body[0]`.
    base: u64,
    header: Option<Bytes>,
    body: Bytes,
}

/// Lazily decoded split records.
pub type SplitRecords = Box<dyn Iterator<Item = anyhow::Result<KeyValue>> + Send>;

impl SplitData {
    /// Fetch what `split` needs. Only I/O happens here; decoding is left
    /// to [`SplitData::records`] so it can run off the async runtime.
    pub async fn fetch(storage: &dyn Storage, split: &InputSplit) -> StorageResult<Self> {
        let range = split.range.clone();
        let data = match split.format {
            InputFormat::Text => {
                let (base, body) = text::fetch_lines(storage, &split.name, range.clone()).await?;
                SplitData {
                    format: split.format,
                    range,
                    base,
                    header: None,
                    body,
                }
            }
            InputFormat::Sequence => {
                let header = storage
                    .open_range(&split.name, 0..HEADER_LEN as u64)
                    .await?;
                let body = storage
                    .open_range(&split.name, range.start..u64::MAX)
                    .await?;
                SplitData {
                    format: split.format,
                    base: range.start,
                    range,
                    header: Some(header),
                    body,
                }
            }
            InputFormat::Parquet => SplitData {
                format: split.format,
                range,
                base: 0,
                header: None,
                body: storage.open(&split.name).await?,
            },
        };
        Ok(data)
    }

    pub fn records(self) -> anyhow::Result<SplitRecords> {
        match self.format {
            InputFormat::Text => Ok(Box::new(
                text::LineReader::new(self.body, self.base, self.range).map(Ok),
            )),
            InputFormat::Sequence => {
                let header = Header::parse(self.header.as_deref().unwrap_or_default())?;
                let reader = RecordReader::for_split(header, self.body, self.base, self.range);
                Ok(Box::new(reader.map(|r| r.map_err(anyhow::Error::from))))
            }
            InputFormat::Parquet => {
                let records = parquet::read(self.body)?;
                Ok(Box::new(records.into_iter().map(Ok)))
            }
        }
    }
}

/// Encodes one output part.
pub enum RecordSink {
    Text { buf: BytesMut, schema: Schema },
    Sequence(RecordWriter),
    Parquet(Vec<KeyValue>),
}

impl RecordSink {
    pub fn new(format: OutputFormat, schema: Schema, sync_interval: usize) -> Self {
        match format {
            OutputFormat::Text => RecordSink::Text {
                buf: BytesMut::new(),
                schema,
            },
            OutputFormat::Sequence => {
                RecordSink::Sequence(RecordWriter::with_sync_interval(sync_interval))
            }
            OutputFormat::Parquet => RecordSink::Parquet(Vec::new()),
        }
    }

    pub fn append(&mut self, kv: KeyValue) -> anyhow::Result<()> {
        match self {
            RecordSink::Text { buf, schema } => {
                schema.key.render(&kv.key, buf);
                buf.put_u8(b'\t');
                schema.value.render(&kv.value, buf);
                buf.put_u8(b'\n');
            }
            RecordSink::Sequence(writer) => writer.append(&kv)?,
            RecordSink::Parquet(rows) => rows.push(kv),
        }
        Ok(())
    }

    pub fn finish(self) -> anyhow::Result<Bytes> {
        match self {
            RecordSink::Text { buf, .. } => Ok(buf.freeze()),
            RecordSink::Sequence(writer) => Ok(writer.finish()),
            RecordSink::Parquet(rows) => parquet::write(&rows),
        }
    }
}

/// Decode a complete output part written with `format`.
pub fn read_part(format: OutputFormat, data: Bytes) -> anyhow::Result<Vec<KeyValue>> {
    match format {
        OutputFormat::Sequence => Ok(codec::decode(data)?),
        OutputFormat::Parquet => parquet::read(data),
        OutputFormat::Text => Ok(text::LineReader::new(data, 0, 0..u64::MAX).collect()),
    }
}

//! Line-oriented input.
//!
//! A line belongs to the split that contains its first byte. A split that
//! does not start at offset 0 begins at the first line start after its
//! first byte, and a split reads past its end to finish its last line.

use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};

use crate::storage::{Storage, StorageResult};
use crate::utils::u64_to_bytes;
use crate::KeyValue;

const READ_AHEAD: u64 = 64 * 1024;

/// Fetch the bytes a line split needs. Returns the absolute offset of the
/// first returned byte and the bytes.
pub async fn fetch_lines(
    storage: &dyn Storage,
    name: &str,
    range: Range<u64>,
) -> StorageResult<(u64, Bytes)> {
    if range.start >= range.end {
        return Ok((range.start, Bytes::new()));
    }
    // one byte back, to see whether the split starts on a line boundary
    let base = range.start.saturating_sub(1);
    let first = storage.open_range(name, base..range.end).await?;
    if first.last() == Some(&b'\n') || (first.len() as u64) < range.end - base {
        return Ok((base, first));
    }

    let mut buf = BytesMut::from(first.as_ref());
    let mut at = range.end;
    loop {
        let chunk = storage.open_range(name, at..at + READ_AHEAD).await?;
        match chunk.iter().position(|&b| b == b'\n') {
            Some(newline) => {
                buf.put_slice(&chunk[..=newline]);
                break;
            }
            None => {
                buf.put_slice(&chunk);
                if (chunk.len() as u64) < READ_AHEAD {
                    break;
                }
                at += READ_AHEAD;
            }
        }
    }
    Ok((base, buf.freeze()))
}

/// Iterates over the lines of a split as (offset, line) records. Line
/// terminators (`\n` or `\r\n`) are stripped.
pub struct LineReader {
    data: Bytes,
    base: u64,
    pos: usize,
    end: u64,
}

impl LineReader {
    pub fn new(data: Bytes, base: u64, range: Range<u64>) -> Self {
        let pos = if range.start >= range.end {
            data.len()
        } else if range.start <= base {
            0
        } else {
            // data starts one byte before the split; skip the partial line
            let skip = (range.start - 1 - base) as usize;
            data.get(skip..)
                .and_then(|rest| rest.iter().position(|&b| b == b'\n'))
                .map_or(data.len(), |newline| skip + newline + 1)
        };
        Self {
            data,
            base,
            pos,
            end: range.end,
        }
    }
}

impl Iterator for LineReader {
    type Item = KeyValue;

    fn next(&mut self) -> Option<KeyValue> {
        let offset = self.base + self.pos as u64;
        if self.pos >= self.data.len() || offset >= self.end {
            return None;
        }
        let rest = &self.data[self.pos..];
        let (line_len, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(newline) => (newline, newline + 1),
            None => (rest.len(), rest.len()),
        };
        let mut line = self.data.slice(self.pos..self.pos + line_len);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        self.pos += consumed;
        Some(KeyValue {
            key: u64_to_bytes(offset),
            value: line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::utils::u64_from_bytes;

    const TEXT: &str = "the cat sat\nthe dog ran\r\n\nlast line without newline";

    async fn lines_of(storage: &MemoryStorage, range: Range<u64>) -> Vec<(u64, String)> {
        let (base, data) = fetch_lines(storage, "f", range.clone()).await.unwrap();
        LineReader::new(data, base, range)
            .map(|kv| {
                (
                    u64_from_bytes(&kv.key).unwrap(),
                    String::from_utf8(kv.value.to_vec()).unwrap(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn whole_file() {
        let storage = MemoryStorage::new();
        storage.put("f", Bytes::from(TEXT)).await.unwrap();
        let lines = lines_of(&storage, 0..TEXT.len() as u64).await;
        assert_eq!(
            lines,
            vec![
                (0, "the cat sat".to_string()),
                (12, "the dog ran".to_string()),
                (25, String::new()),
                (26, "last line without newline".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn every_cut_point_keeps_each_line_once() {
        let storage = MemoryStorage::new();
        storage.put("f", Bytes::from(TEXT)).await.unwrap();
        let len = TEXT.len() as u64;
        let expected = lines_of(&storage, 0..len).await;
        for cut in 0..=len {
            let mut lines = lines_of(&storage, 0..cut).await;
            lines.extend(lines_of(&storage, cut..len).await);
            assert_eq!(lines, expected, "cut at {cut}");
        }
    }
}

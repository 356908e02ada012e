//! Utility functions that may be helpful for implementing
//! and testing MapReduce workloads.

use anyhow::{bail, Result};
use bytes::Bytes;

/// Encode a count as 8 big-endian bytes. Big-endian keeps bytewise order
/// equal to numeric order.
#[inline]
pub fn u64_to_bytes(n: u64) -> Bytes {
    Bytes::copy_from_slice(&n.to_be_bytes())
}

/// Decode a value written by [`u64_to_bytes`].
pub fn u64_from_bytes(buf: &[u8]) -> Result<u64> {
    match <[u8; 8]>::try_from(buf) {
        Ok(raw) => Ok(u64::from_be_bytes(raw)),
        Err(_) => bail!("expected an 8-byte count, got {} bytes", buf.len()),
    }
}

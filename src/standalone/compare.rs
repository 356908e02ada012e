//! Key orderings used by the sort and merge steps.

use std::cmp::Ordering;

/// Total order on keys. Two keys belong to the same reduce group when the
/// comparator says they are equal.
pub type CompareFn = fn(&[u8], &[u8]) -> Ordering;

/// Bytewise ascending.
pub fn ascending(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Bytewise descending. On big-endian counts this is decreasing numeric
/// order.
pub fn descending(a: &[u8], b: &[u8]) -> Ordering {
    b.cmp(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::u64_to_bytes;

    #[test]
    fn descending_counts() {
        let mut counts: Vec<_> = [3u64, 10, 1, 256].iter().map(|&n| u64_to_bytes(n)).collect();
        counts.sort_by(|a, b| descending(a, b));
        let sorted: Vec<_> = counts.iter().map(|c| c[7] as u64 + c[6] as u64 * 256).collect();
        assert_eq!(sorted, vec![256, 10, 3, 1]);
    }
}

//! Fresh partition of a file into equal blocks.

use super::BlockSnapshot;

/// Splits `file_size` bytes into `block_count` blocks of `file_size / block_count`
/// bytes each; the last block also takes the remainder.
///
/// Returns an empty vec if `block_count` is 0.
pub fn plan_blocks(file_size: u64, block_count: usize) -> Vec<BlockSnapshot> {
    if block_count == 0 {
        return Vec::new();
    }

    let n = block_count as u64;
    let base = file_size / n;
    let remainder = file_size % n;

    (0..n)
        .map(|i| {
            let size = if i == n - 1 { base + remainder } else { base };
            BlockSnapshot::new((i * base) as i64, size as i64)
        })
        .collect()
}

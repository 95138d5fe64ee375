//! Record-aligned shard layout for a slow query log file.
//!
//! The file is memory-mapped read-only and scanned for record-start markers;
//! the sorted marker offsets are then cut into roughly equal spans. Every
//! shard begins on a record start, so no record ever straddles two shards.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use memchr::memmem;
use memmap2::Mmap;

const TIME_MARKER: &[u8] = b"# Time:";
const QTIME_MARKER: &[u8] = b"# Query_time:";

/// Scans `path` for record starts and cuts at most `max_parts` shards.
///
/// A record starts at the `#` of a `# Time:` line; in loose mode a
/// `# Query_time:` line also counts, for logs whose writer omits the time
/// header. Returns the shard spans as `(start, end)` byte offsets, the number
/// of record starts found and the file size. A file without any marker
/// becomes a single whole-file shard.
pub fn compute_boundaries(
    path: &Path,
    max_parts: usize,
    loose_start: bool,
) -> Result<(Vec<(u64, u64)>, usize, u64)> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let size = file
        .metadata()
        .with_context(|| format!("cannot stat {}", path.display()))?
        .len();
    if size == 0 {
        return Ok((vec![(0, 0)], 0, 0));
    }
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("cannot mmap {}", path.display()))?;
    let bytes = &mmap[..];

    let mut starts: Vec<usize> = Vec::new();
    if bytes.starts_with(TIME_MARKER) || (loose_start && bytes.starts_with(QTIME_MARKER)) {
        starts.push(0);
    }
    // The needle includes the preceding newline; +1 points back at '#'.
    for pos in memmem::find_iter(bytes, b"\n# Time:") {
        starts.push(pos + 1);
    }
    if loose_start {
        for pos in memmem::find_iter(bytes, b"\n# Query_time:") {
            starts.push(pos + 1);
        }
    }
    starts.sort_unstable();
    starts.dedup();

    if starts.is_empty() {
        return Ok((vec![(0, size)], 0, size));
    }

    let n = starts.len();
    let parts = max_parts.clamp(1, n);
    let mut idxs: Vec<usize> = (0..=parts)
        .map(|i| (((i * n) as f64 / parts as f64).round() as usize).min(n))
        .collect();
    idxs.dedup();

    let mut shards = Vec::with_capacity(parts);
    for pair in idxs.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let start = starts[a] as u64;
        let end = if b < n { starts[b] as u64 } else { size };
        shards.push((start, end));
    }
    if shards.is_empty() {
        shards.push((0, size));
    }
    Ok((shards, n, size))
}

//! # Parallel MySQL Slow Query Log Aggregator
//!
//! This crate parses a MySQL slow query log file and aggregates its entries
//! by a canonical fingerprint of the SQL text, producing per-group latency
//! and row statistics. Large files are memory-mapped, cut into record-aligned
//! shards, and parsed on a worker pool; per-shard maps are merged into one
//! result afterwards.
//!
//! The pipeline, in order:
//!
//! 1. [`sampler`] — optional head/middle/tail probe deciding whether a
//!    requested time window can match the file at all.
//! 2. [`boundary`] — locates record-start markers and cuts shard spans.
//! 3. [`shard`] — parses one byte range into a local fingerprint map.
//! 4. [`aggregate`] — merges the per-shard maps and counters.
//! 5. [`report`] — derives means, exact p95 and share percentages.
//! 6. [`emit`] — CSV and Markdown writers for the final rows.

pub mod aggregate;
pub mod boundary;
pub mod emit;
pub mod normalize;
pub mod report;
pub mod sampler;
pub mod shard;
pub mod timeparse;

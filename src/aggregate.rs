//! Per-fingerprint aggregation state and the shard-map merger.

use std::collections::HashMap;

use crate::normalize::{extract_main_table, normalize_sql};

/// Example queries are cut off after this many characters.
pub const EXAMPLE_QUERY_MAX: usize = 1500;

/// Counters kept by each shard parser and summed across shards.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParseStats {
    pub time_lines: u64,
    pub qtime_lines: u64,
    pub parsed_records: u64,
    pub filtered_min_time: u64,
    pub filtered_dumps: u64,
    pub truncated_records: u64,
    pub filtered_time_range: u64,
}

impl ParseStats {
    pub fn accumulate(&mut self, other: &ParseStats) {
        self.time_lines += other.time_lines;
        self.qtime_lines += other.qtime_lines;
        self.parsed_records += other.parsed_records;
        self.filtered_min_time += other.filtered_min_time;
        self.filtered_dumps += other.filtered_dumps;
        self.truncated_records += other.truncated_records;
        self.filtered_time_range += other.filtered_time_range;
    }
}

/// Aggregated state for one query fingerprint.
///
/// `durations` keeps every observed query time verbatim so the exact p95 can
/// be computed later. `first_seen`/`last_seen` are compared as opaque
/// strings; all supported timestamp dialects are lexicographically monotonic
/// on their own, but a group mixing dialects can come out non-chronological.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryGroup {
    pub samples: u64,
    pub total_time_s: f64,
    pub max_time_s: f64,
    pub sum_lock_time_s: f64,
    pub rows_examined_total: u64,
    pub rows_sent_total: u64,
    pub durations: Vec<f64>,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    pub norm_sql: String,
    pub example_query: String,
    pub db: Option<String>,
    pub user_host: Option<String>,
    pub main_table: Option<String>,
    pub has_truncated: bool,
}

impl QueryGroup {
    /// Fresh group seeded from the first raw SQL observed for a fingerprint.
    pub fn new(sql: &str, truncated: bool) -> Self {
        QueryGroup {
            samples: 0,
            total_time_s: 0.0,
            max_time_s: 0.0,
            sum_lock_time_s: 0.0,
            rows_examined_total: 0,
            rows_sent_total: 0,
            durations: Vec::new(),
            first_seen: None,
            last_seen: None,
            norm_sql: normalize_sql(sql),
            example_query: sql.chars().take(EXAMPLE_QUERY_MAX).collect(),
            db: None,
            user_host: None,
            main_table: extract_main_table(sql),
            has_truncated: truncated,
        }
    }

    /// Folds one accepted record into the group.
    pub fn record_sample(
        &mut self,
        query_time: f64,
        lock_time: Option<f64>,
        rows_examined: Option<u64>,
        rows_sent: Option<u64>,
    ) {
        self.samples += 1;
        self.total_time_s += query_time;
        self.durations.push(query_time);
        if query_time > self.max_time_s {
            self.max_time_s = query_time;
        }
        if let Some(lock) = lock_time {
            self.sum_lock_time_s += lock;
        }
        if let Some(rows) = rows_examined {
            self.rows_examined_total += rows;
        }
        if let Some(rows) = rows_sent {
            self.rows_sent_total += rows;
        }
    }

    /// Widens the seen-time envelope with one raw timestamp string.
    pub fn note_seen(&mut self, stamp: &str) {
        match &self.first_seen {
            Some(first) if first.as_str() <= stamp => {}
            _ => self.first_seen = Some(stamp.to_string()),
        }
        match &self.last_seen {
            Some(last) if last.as_str() >= stamp => {}
            _ => self.last_seen = Some(stamp.to_string()),
        }
    }

    /// Merges another shard's group for the same fingerprint into this one.
    pub fn absorb(&mut self, other: QueryGroup) {
        self.samples += other.samples;
        self.total_time_s += other.total_time_s;
        self.max_time_s = self.max_time_s.max(other.max_time_s);
        self.sum_lock_time_s += other.sum_lock_time_s;
        self.rows_examined_total += other.rows_examined_total;
        self.rows_sent_total += other.rows_sent_total;
        self.durations.extend(other.durations);
        if let Some(first) = other.first_seen {
            match &self.first_seen {
                Some(cur) if cur.as_str() <= first.as_str() => {}
                _ => self.first_seen = Some(first),
            }
        }
        if let Some(last) = other.last_seen {
            match &self.last_seen {
                Some(cur) if cur.as_str() >= last.as_str() => {}
                _ => self.last_seen = Some(last),
            }
        }
        if other.has_truncated {
            self.has_truncated = true;
        }
        fill_if_empty(&mut self.db, other.db);
        fill_if_empty(&mut self.user_host, other.user_host);
        fill_if_empty(&mut self.main_table, other.main_table);
    }
}

fn fill_if_empty(slot: &mut Option<String>, value: Option<String>) {
    let empty = slot.as_deref().is_none_or(str::is_empty);
    if empty && value.as_deref().is_some_and(|v| !v.is_empty()) {
        *slot = value;
    }
}

/// Combines per-shard `(map, stats)` pairs into a single pair.
///
/// Counters sum field-wise; groups with the same fingerprint are absorbed in
/// shard order, so tie-breaking fields like `db` stay left-biased.
pub fn merge_results(
    parts: Vec<(HashMap<String, QueryGroup>, ParseStats)>,
) -> (HashMap<String, QueryGroup>, ParseStats) {
    let mut merged: HashMap<String, QueryGroup> = HashMap::new();
    let mut totals = ParseStats::default();
    for (map, stats) in parts {
        totals.accumulate(&stats);
        for (fingerprint, group) in map {
            match merged.get_mut(&fingerprint) {
                Some(existing) => existing.absorb(group),
                None => {
                    merged.insert(fingerprint, group);
                }
            }
        }
    }
    (merged, totals)
}

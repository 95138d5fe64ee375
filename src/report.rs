//! Derived metrics over the merged fingerprint map.

use std::collections::HashMap;

use crate::aggregate::QueryGroup;

/// One output row: the group's raw aggregates plus derived metrics.
#[derive(Debug, Clone)]
pub struct ReportRow {
    pub fingerprint: String,
    pub samples: u64,
    pub total_time_s: f64,
    pub avg_time_s: f64,
    pub p95_time_s: f64,
    pub max_time_s: f64,
    pub time_share_pct: f64,
    pub count_share_pct: f64,
    pub avg_lock_time_s: f64,
    pub rows_examined_total: u64,
    pub rows_examined_avg: f64,
    pub rows_sent_total: u64,
    pub rows_sent_avg: f64,
    pub first_seen: String,
    pub last_seen: String,
    pub example_query: String,
    pub norm_sql: String,
    pub db: String,
    pub user_host: String,
    pub main_table: String,
    pub has_truncated: bool,
}

/// Exact percentile with linear interpolation between order statistics
/// (the inclusive definition). `sorted` must be ascending and non-empty.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = pct / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
    }
}

/// Turns the merged map into sorted report rows.
///
/// Rows are ordered by total time, then sample count, both descending;
/// fingerprint breaks remaining ties so output is deterministic.
pub fn build_report(merged: HashMap<String, QueryGroup>) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = merged
        .into_iter()
        .filter(|(_, group)| group.samples > 0)
        .map(|(fingerprint, group)| {
            let samples = group.samples as f64;
            let mut durations = group.durations;
            durations.sort_by(f64::total_cmp);
            let p95 = if durations.is_empty() { 0.0 } else { percentile(&durations, 95.0) };
            ReportRow {
                fingerprint,
                samples: group.samples,
                total_time_s: group.total_time_s,
                avg_time_s: group.total_time_s / samples,
                p95_time_s: p95,
                max_time_s: group.max_time_s,
                time_share_pct: 0.0,
                count_share_pct: 0.0,
                avg_lock_time_s: group.sum_lock_time_s / samples,
                rows_examined_total: group.rows_examined_total,
                rows_examined_avg: group.rows_examined_total as f64 / samples,
                rows_sent_total: group.rows_sent_total,
                rows_sent_avg: group.rows_sent_total as f64 / samples,
                first_seen: group.first_seen.unwrap_or_default(),
                last_seen: group.last_seen.unwrap_or_default(),
                example_query: group.example_query,
                norm_sql: group.norm_sql,
                db: group.db.unwrap_or_default(),
                user_host: group.user_host.unwrap_or_default(),
                main_table: group.main_table.unwrap_or_default(),
                has_truncated: group.has_truncated,
            }
        })
        .collect();

    let grand_time: f64 = rows.iter().map(|r| r.total_time_s).sum();
    let grand_count: u64 = rows.iter().map(|r| r.samples).sum();
    for row in &mut rows {
        if grand_time > 0.0 {
            row.time_share_pct = round3(row.total_time_s / grand_time * 100.0);
        }
        if grand_count > 0 {
            row.count_share_pct = round3(row.samples as f64 / grand_count as f64 * 100.0);
        }
    }

    rows.sort_by(|a, b| {
        b.total_time_s
            .total_cmp(&a.total_time_s)
            .then(b.samples.cmp(&a.samples))
            .then(a.fingerprint.cmp(&b.fingerprint))
    });
    rows
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

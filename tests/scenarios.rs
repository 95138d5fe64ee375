//! End-to-end fixtures driving the scan → parse → merge → report pipeline.

use std::collections::HashMap;
use std::io::Write;

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use slow_query_aggregator::aggregate::{ParseStats, QueryGroup, merge_results};
use slow_query_aggregator::boundary::compute_boundaries;
use slow_query_aggregator::report::build_report;
use slow_query_aggregator::shard::{ShardJob, parse_shard};

struct Options {
    min_time: f64,
    exclude_dumps: bool,
    mark_truncated: bool,
    loose_start: bool,
    max_parts: usize,
    time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            min_time: 0.0,
            exclude_dumps: false,
            mark_truncated: false,
            loose_start: false,
            max_parts: 1,
            time_range: None,
        }
    }
}

/// Runs the whole pipeline (boundary scan, shard parse, merge) over `content`.
fn aggregate(content: &str, opts: &Options) -> (HashMap<String, QueryGroup>, ParseStats) {
    let mut tmp = NamedTempFile::new().unwrap();
    tmp.write_all(content.as_bytes()).unwrap();
    let (shards, _, _) =
        compute_boundaries(tmp.path(), opts.max_parts, opts.loose_start).unwrap();
    let parts = shards
        .iter()
        .map(|&(start, end)| {
            parse_shard(&ShardJob {
                path: tmp.path().to_path_buf(),
                start,
                end,
                min_time: opts.min_time,
                exclude_dumps: opts.exclude_dumps,
                mark_truncated: opts.mark_truncated,
                loose_start: opts.loose_start,
                time_range: opts.time_range,
            })
            .unwrap()
        })
        .collect();
    merge_results(parts)
}

const SINGLE_RECORD: &str = "# Time: 2024-01-15T10:30:00Z\n\
# User@Host: root[root] @ localhost []\n\
# Query_time: 1.500000  Lock_time: 0.000100 Rows_sent: 1  Rows_examined: 1000\n\
SET timestamp=1705314600;\n\
SELECT * FROM users WHERE id = 1;\n";

const TWO_LITERAL_VARIANTS: &str = "# Time: 2024-01-15T10:30:00Z\n\
# Query_time: 1.0 Lock_time: 0.0 Rows_sent: 1 Rows_examined: 10\n\
SELECT * FROM t WHERE id = 1;\n\
# Time: 2024-01-15T10:30:05Z\n\
# Query_time: 3.0 Lock_time: 0.0 Rows_sent: 1 Rows_examined: 10\n\
SELECT * FROM t WHERE id = 999;\n";

#[test]
fn single_record_happy_path() {
    let (merged, stats) = aggregate(SINGLE_RECORD, &Options::default());
    assert_eq!(stats.parsed_records, 1);

    let rows = build_report(merged);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.samples, 1);
    assert!((row.total_time_s - 1.5).abs() < 1e-9);
    assert!((row.p95_time_s - 1.5).abs() < 1e-9);
    assert_eq!(row.main_table, "users");
    assert_eq!(row.norm_sql, "select * from users where id = ?");
    assert!(!row.has_truncated);
    assert_eq!(row.time_share_pct, 100.0);
}

#[test]
fn literal_variants_share_a_fingerprint() {
    let (merged, _) = aggregate(TWO_LITERAL_VARIANTS, &Options::default());
    let rows = build_report(merged);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.samples, 2);
    assert!((row.total_time_s - 4.0).abs() < 1e-9);
    assert!((row.avg_time_s - 2.0).abs() < 1e-9);
    assert!((row.p95_time_s - 2.9).abs() < 1e-9);
    assert_eq!(row.max_time_s, 3.0);
}

#[test]
fn dump_traffic_is_filtered_out() {
    let content = "# Time: 2024-01-15T10:30:00Z\n\
# Query_time: 1.0 Lock_time: 0.0 Rows_sent: 1 Rows_examined: 10\n\
SELECT /*!40001 SQL_NO_CACHE */ * FROM t;\n";
    let opts = Options { exclude_dumps: true, ..Default::default() };
    let (merged, stats) = aggregate(content, &opts);
    assert!(merged.is_empty());
    assert_eq!(stats.filtered_dumps, 1);
}

#[test]
fn min_time_keeps_only_slow_samples() {
    let opts = Options { min_time: 2.0, ..Default::default() };
    let (merged, stats) = aggregate(TWO_LITERAL_VARIANTS, &opts);
    assert_eq!(stats.filtered_min_time, 1);
    let rows = build_report(merged);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].samples, 1);
    assert_eq!(rows[0].max_time_s, 3.0);
}

#[test]
fn tail_truncation_is_counted_and_marked() {
    let content = "# Time: 2024-01-15T10:30:00Z\n\
# Query_time: 1.0 Lock_time: 0.0 Rows_sent: 1 Rows_examined: 10\n\
SELECT * FROM t WHERE id = 1";
    let opts = Options { mark_truncated: true, ..Default::default() };
    let (merged, stats) = aggregate(content, &opts);
    assert_eq!(stats.truncated_records, 1);
    let group = merged.values().next().unwrap();
    assert!(group.has_truncated);
    assert!(group.example_query.ends_with(" /* TRUNCATED */"));
    assert!(group.norm_sql.ends_with(" /* truncated */"));
}

#[test]
fn loose_start_recovers_headerless_leading_record() {
    let content = "# Query_time: 1.0 Lock_time: 0.0 Rows_sent: 1 Rows_examined: 10\n\
SELECT * FROM t WHERE id = 1;\n\
# Time: 2024-01-15T10:30:05Z\n\
# Query_time: 2.0 Lock_time: 0.0 Rows_sent: 1 Rows_examined: 10\n\
SELECT * FROM u WHERE id = 2;\n";

    let strict = aggregate(content, &Options::default());
    // strict sharding starts at the first '# Time:', dropping the leader
    assert_eq!(strict.0.len(), 1);
    assert_eq!(strict.1.parsed_records, 1);

    let loose = aggregate(content, &Options { loose_start: true, ..Default::default() });
    assert_eq!(loose.0.len(), 2);
    assert_eq!(loose.1.parsed_records, 2);
}

#[test]
fn sharded_parse_matches_whole_file_parse() {
    let mut content = String::new();
    for i in 0..40 {
        content.push_str(&format!(
            "# Time: 2024-01-15T10:{:02}:00Z\n\
# Query_time: {}.5 Lock_time: 0.01 Rows_sent: {} Rows_examined: 100\n\
SELECT * FROM t{} WHERE id = {};\n",
            i % 60,
            i % 4,
            i % 3,
            i % 3,
            i * 7
        ));
    }

    let (whole, whole_stats) = aggregate(&content, &Options::default());
    for parts in [2, 3, 5, 8] {
        let opts = Options { max_parts: parts, ..Default::default() };
        let (sharded, sharded_stats) = aggregate(&content, &opts);
        assert_eq!(sharded_stats, whole_stats, "stats differ at {parts} shards");
        assert_eq!(sharded.len(), whole.len());
        for (fingerprint, group) in &whole {
            let other = &sharded[fingerprint];
            assert_eq!(other.samples, group.samples);
            assert!((other.total_time_s - group.total_time_s).abs() < 1e-9 * group.samples as f64);
            assert_eq!(other.max_time_s, group.max_time_s);
            assert_eq!(other.first_seen, group.first_seen);
            assert_eq!(other.last_seen, group.last_seen);
            assert_eq!(other.norm_sql, group.norm_sql);
            assert_eq!(other.has_truncated, group.has_truncated);

            let mut a = other.durations.clone();
            let mut b = group.durations.clone();
            a.sort_by(f64::total_cmp);
            b.sort_by(f64::total_cmp);
            assert_eq!(a, b);
        }
    }
}

#[test]
fn merge_permutations_agree() {
    let mut content = String::new();
    for i in 0..12 {
        content.push_str(&format!(
            "# Time: 2024-01-15T10:{i:02}:00Z\n\
# Query_time: 1.0 Lock_time: 0.0 Rows_sent: 1 Rows_examined: 10\n\
SELECT * FROM t WHERE id = {i};\n"
        ));
    }
    let mut tmp = NamedTempFile::new().unwrap();
    tmp.write_all(content.as_bytes()).unwrap();
    let (shards, _, _) = compute_boundaries(tmp.path(), 4, false).unwrap();
    assert!(shards.len() > 1);

    let parse = |&(start, end): &(u64, u64)| {
        parse_shard(&ShardJob {
            path: tmp.path().to_path_buf(),
            start,
            end,
            min_time: 0.0,
            exclude_dumps: false,
            mark_truncated: false,
            loose_start: false,
            time_range: None,
        })
        .unwrap()
    };

    let forward = merge_results(shards.iter().map(parse).collect());
    let backward = merge_results(shards.iter().rev().map(parse).collect());

    assert_eq!(forward.1, backward.1);
    assert_eq!(forward.0.len(), backward.0.len());
    for (fingerprint, group) in &forward.0 {
        let other = &backward.0[fingerprint];
        assert_eq!(other.samples, group.samples);
        assert!((other.total_time_s - group.total_time_s).abs() < 1e-9);
        assert_eq!(other.first_seen, group.first_seen);
        assert_eq!(other.last_seen, group.last_seen);
    }
}

#[test]
fn group_invariants_hold_over_mixed_input() {
    let mut content = String::new();
    for i in 0..30 {
        content.push_str(&format!(
            "# Time: 2024-01-15T11:{:02}:00Z\n\
# Query_time: {}.25 Lock_time: 0.002 Rows_sent: 5 Rows_examined: 50\n\
SELECT name FROM accounts WHERE id = {} AND tier = '{}';\n",
            i % 60,
            1 + i % 5,
            i,
            i % 2
        ));
    }
    let opts = Options { max_parts: 4, ..Default::default() };
    let (merged, _) = aggregate(&content, &opts);
    for group in merged.values() {
        assert!(group.samples > 0);
        assert_eq!(group.samples as usize, group.durations.len());
        let sum: f64 = group.durations.iter().sum();
        assert!((group.total_time_s - sum).abs() < 1e-9 * group.samples as f64);
        let max = group.durations.iter().cloned().fold(f64::MIN, f64::max);
        assert_eq!(group.max_time_s, max);
        if let (Some(first), Some(last)) = (&group.first_seen, &group.last_seen) {
            assert!(first <= last);
        }
    }
}

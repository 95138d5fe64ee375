//! Parses one byte range of the log into a local fingerprint map.
//!
//! The slow log is line-oriented with lax framing: a record is a run of `#`
//! header lines followed by one or more SQL lines, opened by `# Time:` (or
//! `# Query_time:` in loose mode). The parser walks the shard's lines,
//! keeping a scratch record under construction, and flushes it whenever the
//! next record opens or the shard ends.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::aggregate::{ParseStats, QueryGroup};
use crate::normalize::fingerprint;
use crate::timeparse::parse_mysql_time;

// Statically compiled regular expressions for header-line fields.
static RE_USER_HOST: Lazy<Regex> = Lazy::new(|| Regex::new(r"^# User@Host:\s*(.*)").unwrap());
static RE_QUERY_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"Query_time:\s*([\d.]+)").unwrap());
static RE_LOCK_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"Lock_time:\s*([\d.]+)").unwrap());
static RE_ROWS_SENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"Rows_sent:\s*(\d+)").unwrap());
static RE_ROWS_EXAMINED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Rows_examined:\s*(\d+)").unwrap());
static RE_START_TS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Start:\s*(\S+)").unwrap());
static RE_END_TS: Lazy<Regex> = Lazy::new(|| Regex::new(r"End:\s*(\S+)").unwrap());
static RE_USE_DB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)^\s*use\s+([`"\w.\-]+);"#).unwrap());
static RE_SET_TIMESTAMP: Lazy<Regex> = Lazy::new(|| Regex::new(r"SET timestamp=(\d+);").unwrap());

/// One shard's worth of work, as handed to a pool worker.
#[derive(Debug, Clone)]
pub struct ShardJob {
    pub path: PathBuf,
    pub start: u64,
    pub end: u64,
    pub min_time: f64,
    pub exclude_dumps: bool,
    pub mark_truncated: bool,
    pub loose_start: bool,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Scratch state for the record currently under construction.
#[derive(Debug, Default, Clone)]
struct RawRecord {
    time: Option<String>,
    user_host: Option<String>,
    query_time: Option<f64>,
    lock_time: Option<f64>,
    rows_sent: Option<u64>,
    rows_examined: Option<u64>,
    start: Option<String>,
    end: Option<String>,
    db: Option<String>,
    set_timestamp: Option<String>,
}

struct ShardParser<'a> {
    job: &'a ShardJob,
    map: HashMap<String, QueryGroup>,
    stats: ParseStats,
    current: RawRecord,
    sql_buf: Vec<String>,
    last_db: Option<String>,
    started: bool,
}

impl<'a> ShardParser<'a> {
    fn new(job: &'a ShardJob) -> Self {
        ShardParser {
            job,
            map: HashMap::new(),
            stats: ParseStats::default(),
            current: RawRecord::default(),
            sql_buf: Vec::new(),
            last_db: None,
            started: false,
        }
    }

    fn handle_line(&mut self, line: &str) {
        if let Some(rest) = line.strip_prefix("# Time:") {
            self.stats.time_lines += 1;
            if !self.sql_buf.is_empty() && self.started {
                self.flush(false);
            }
            self.started = true;
            self.current.time = Some(rest.trim().to_string());
            return;
        }
        if line.starts_with("# Query_time:") {
            self.stats.qtime_lines += 1;
            if self.job.loose_start && !self.started {
                if !self.sql_buf.is_empty() {
                    self.flush(false);
                }
                self.started = true;
            }
            if let Some(caps) = RE_QUERY_TIME.captures(line) {
                self.current.query_time = caps[1].parse().ok();
            }
            if let Some(caps) = RE_LOCK_TIME.captures(line) {
                self.current.lock_time = caps[1].parse().ok();
            }
            if let Some(caps) = RE_ROWS_SENT.captures(line) {
                self.current.rows_sent = caps[1].parse().ok();
            }
            if let Some(caps) = RE_ROWS_EXAMINED.captures(line) {
                self.current.rows_examined = caps[1].parse().ok();
            }
            if let Some(caps) = RE_START_TS.captures(line) {
                self.current.start = Some(caps[1].to_string());
            }
            if let Some(caps) = RE_END_TS.captures(line) {
                self.current.end = Some(caps[1].to_string());
            }
            return;
        }
        if let Some(caps) = RE_USER_HOST.captures(line) {
            self.current.user_host = Some(caps[1].trim().to_string());
            return;
        }
        if let Some(caps) = RE_USE_DB.captures(line) {
            let db = caps[1].trim_matches(['`', '"']).to_string();
            self.current.db = Some(db.clone());
            self.last_db = Some(db);
            return;
        }
        if line.starts_with("SET timestamp=") {
            if let Some(caps) = RE_SET_TIMESTAMP.captures(line) {
                self.current.set_timestamp = Some(caps[1].to_string());
            }
            return;
        }
        if line.starts_with("# ") {
            return;
        }
        if line.trim().is_empty() {
            return;
        }
        self.sql_buf.push(line.to_string());
    }

    /// Closes the record under construction and hands it to the filter chain.
    fn flush(&mut self, truncated: bool) {
        let sql = self.sql_buf.join("\n").trim().to_string();
        if !sql.is_empty() {
            let mut record = std::mem::take(&mut self.current);
            if record.db.is_none() {
                record.db = self.last_db.clone();
            }
            self.add_entry(record, sql, truncated);
            self.stats.parsed_records += 1;
        } else {
            self.current = RawRecord::default();
        }
        self.sql_buf.clear();
    }

    /// Filter chain: dumps, missing query time, min time, time window.
    /// Rejected records only touch the counters.
    fn add_entry(&mut self, record: RawRecord, mut sql: String, truncated: bool) {
        if self.job.exclude_dumps
            && sql.to_lowercase().contains("sql_no_cache")
            && sql.contains("/*!")
        {
            self.stats.filtered_dumps += 1;
            return;
        }
        let query_time = match record.query_time {
            Some(qt) => qt,
            None => return,
        };
        if query_time < self.job.min_time {
            self.stats.filtered_min_time += 1;
            return;
        }
        if let Some((window_start, window_end)) = self.job.time_range {
            if !record_in_window(&record, window_start, window_end) {
                self.stats.filtered_time_range += 1;
                return;
            }
        }
        if truncated && self.job.mark_truncated {
            sql.push_str(" /* TRUNCATED */");
        }

        let key = fingerprint(&sql);
        let group = self.map.entry(key).or_insert_with(|| {
            let mut group = QueryGroup::new(&sql, truncated);
            group.db = record.db.clone();
            group.user_host = record.user_host.clone();
            group
        });
        if truncated {
            group.has_truncated = true;
        }
        group.record_sample(
            query_time,
            record.lock_time,
            record.rows_examined,
            record.rows_sent,
        );
        for stamp in [&record.time, &record.start, &record.end, &record.set_timestamp] {
            if let Some(value) = stamp.as_deref().filter(|v| !v.is_empty()) {
                group.note_seen(value);
            }
        }
    }

    /// Closes out the shard. A record still open at the end of the input is
    /// flushed; it only counts as truncated when the input stops mid-line,
    /// so a shard ending cleanly on a record boundary stays indistinguishable
    /// from a whole-file parse.
    fn finish(mut self, ends_mid_line: bool) -> (HashMap<String, QueryGroup>, ParseStats) {
        if !self.sql_buf.is_empty() {
            if ends_mid_line {
                self.stats.truncated_records += 1;
                self.flush(true);
            } else {
                self.flush(false);
            }
        }
        (self.map, self.stats)
    }
}

/// True when any of the record's time fields parses into the window.
/// The `# Time:` header is checked first; `SET timestamp`, `Start:` and
/// `End:` are fallbacks.
fn record_in_window(record: &RawRecord, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    let candidates = [
        record.time.as_deref(),
        record.set_timestamp.as_deref(),
        record.start.as_deref(),
        record.end.as_deref(),
    ];
    for value in candidates.into_iter().flatten() {
        if let Some(moment) = parse_mysql_time(value) {
            if start <= moment && moment <= end {
                return true;
            }
        }
    }
    false
}

/// Parses the byte range `[job.start, job.end)` of the log file.
///
/// Bytes are decoded as UTF-8 with malformed sequences replaced; content
/// never fails the parse, only host I/O does.
pub fn parse_shard(job: &ShardJob) -> Result<(HashMap<String, QueryGroup>, ParseStats)> {
    let mut file = File::open(&job.path)
        .with_context(|| format!("cannot open {}", job.path.display()))?;
    file.seek(SeekFrom::Start(job.start))
        .with_context(|| format!("cannot seek {}", job.path.display()))?;
    let mut buf = Vec::with_capacity((job.end - job.start) as usize);
    file.take(job.end - job.start)
        .read_to_end(&mut buf)
        .with_context(|| format!("cannot read {}", job.path.display()))?;
    let ends_mid_line = buf.last().is_some_and(|&b| b != b'\n');
    let text = String::from_utf8_lossy(&buf);

    let mut parser = ShardParser::new(job);
    for line in text.lines() {
        parser.handle_line(line);
    }
    Ok(parser.finish(ends_mid_line))
}

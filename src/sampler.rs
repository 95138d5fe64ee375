//! Head/middle/tail sampling of the log's time envelope.
//!
//! When the user asks for a narrow time window there is no point scanning a
//! multi-gigabyte file whose records all predate it. The sampler reads up to
//! ~10 MiB at three positions, collects the timestamps it can see and judges
//! whether the window can match at all. The verdict is advisory only; the
//! shard parsers still filter every record exactly.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::timeparse::parse_mysql_time;

const MAX_SAMPLE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LINES_PER_REGION: usize = 200;

static RE_SET_TIMESTAMP: Lazy<Regex> = Lazy::new(|| Regex::new(r"SET timestamp=(\d+);").unwrap());

/// The sampler's verdict on a target time window.
#[derive(Debug, Clone)]
pub struct RangeCheck {
    pub has_data_in_range: bool,
    pub estimated_coverage: f64,
    pub coverage_type: String,
    pub file_time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub sample_count: usize,
    pub note: Option<String>,
}

/// Probes `path` and judges whether `range` can contain data.
///
/// Never fails: an unreadable file degrades to "data may be in range" with
/// full assumed coverage and the error attached as a note.
pub fn check_time_range(path: &Path, range: (DateTime<Utc>, DateTime<Utc>)) -> RangeCheck {
    match sample_file(path, range) {
        Ok(check) => check,
        Err(err) => RangeCheck {
            has_data_in_range: true,
            estimated_coverage: 1.0,
            coverage_type: "sample_error".to_string(),
            file_time_range: None,
            sample_count: 0,
            note: Some(format!("{err:#}")),
        },
    }
}

fn sample_file(path: &Path, range: (DateTime<Utc>, DateTime<Utc>)) -> Result<RangeCheck> {
    let mut file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let file_size = file.metadata()?.len();
    let sample_size = MAX_SAMPLE_BYTES.min(file_size / 3);

    let positions = [
        0,
        (file_size / 2).saturating_sub(sample_size / 2),
        file_size.saturating_sub(sample_size),
    ];

    let mut moments: Vec<DateTime<Utc>> = Vec::new();
    let mut buf = Vec::with_capacity(sample_size as usize);
    for pos in positions {
        file.seek(SeekFrom::Start(pos))?;
        buf.clear();
        file.by_ref().take(sample_size).read_to_end(&mut buf)?;
        let chunk = String::from_utf8_lossy(&buf);
        for line in chunk.split('\n').take(MAX_LINES_PER_REGION) {
            let stamp = if let Some(rest) = line.strip_prefix("# Time:") {
                parse_mysql_time(rest)
            } else if line.starts_with("SET timestamp=") {
                RE_SET_TIMESTAMP
                    .captures(line)
                    .and_then(|caps| parse_mysql_time(&caps[1]))
            } else {
                None
            };
            if let Some(moment) = stamp {
                moments.push(moment);
            }
        }
    }

    if moments.is_empty() {
        return Ok(RangeCheck {
            has_data_in_range: true,
            estimated_coverage: 0.0,
            coverage_type: "unknown".to_string(),
            file_time_range: None,
            sample_count: 0,
            note: Some("no_timestamps_found".to_string()),
        });
    }

    let file_start = moments.iter().min().copied().expect("moments is non-empty");
    let file_end = moments.iter().max().copied().expect("moments is non-empty");
    let (target_start, target_end) = range;
    let has_data = moments
        .iter()
        .any(|moment| target_start <= *moment && *moment <= target_end);

    let mut coverage = 0.0;
    let mut coverage_type = "unknown";
    if has_data {
        let overlap_start = file_start.max(target_start);
        let overlap_end = file_end.min(target_end);
        if overlap_start <= overlap_end {
            if file_start >= target_start && file_end <= target_end {
                coverage = 1.0;
                coverage_type = "full_file_in_range";
            } else if target_start >= file_start && target_end <= file_end {
                coverage = 1.0;
                coverage_type = "full_range_covered";
            } else {
                let file_duration = (file_end - file_start).num_milliseconds() as f64 / 1000.0;
                if file_duration > 0.0 {
                    let overlap = (overlap_end - overlap_start).num_milliseconds() as f64 / 1000.0;
                    let ratio = overlap / file_duration;
                    if ratio > 0.8 {
                        coverage = 0.9;
                        coverage_type = "mostly_covered";
                    } else if ratio > 0.5 {
                        coverage = 0.7;
                        coverage_type = "partially_covered";
                    } else {
                        coverage = ratio * 0.5;
                        coverage_type = "limited_overlap";
                    }
                }
            }
        } else {
            coverage_type = "no_overlap";
        }
    }

    Ok(RangeCheck {
        has_data_in_range: has_data,
        estimated_coverage: coverage,
        coverage_type: coverage_type.to_string(),
        file_time_range: Some((file_start, file_end)),
        sample_count: moments.len(),
        note: None,
    })
}

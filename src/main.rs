//! # Parallel MySQL Slow Query Log Aggregator
//!
//! This program parses a MySQL slow query log file, groups its entries by a
//! canonical fingerprint of the SQL text and writes per-group statistics
//! (count, total/avg/p95/max latency, rows scanned and returned, lock time,
//! first/last seen, example query) as CSV and optionally Markdown. Large
//! files are cut into record-aligned shards and parsed in parallel.

use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use log::debug;

use slow_query_aggregator::aggregate::merge_results;
use slow_query_aggregator::boundary::compute_boundaries;
use slow_query_aggregator::emit::{write_csv, write_markdown};
use slow_query_aggregator::report::build_report;
use slow_query_aggregator::sampler::check_time_range;
use slow_query_aggregator::shard::{ShardJob, parse_shard};
use slow_query_aggregator::timeparse::calculate_time_range;

/// Defines the command-line arguments accepted by the program.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "A utility to aggregate MySQL slow query logs by SQL fingerprint, in parallel."
)]
struct Args {
    /// Path to the MySQL slow query log file.
    logfile: PathBuf,

    /// Path for the CSV summary output.
    #[arg(long, default_value = "slowlog_summary.csv")]
    out_csv: PathBuf,

    /// Optional path for a Top-N Markdown report.
    #[arg(long)]
    out_md: Option<PathBuf>,

    /// Number of rows in the Markdown report.
    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Drop records with a query time below this many seconds.
    #[arg(long, default_value_t = 0.0)]
    min_time: f64,

    /// Drop mysqldump traffic (queries carrying SQL_NO_CACHE inside a hint).
    #[arg(long)]
    exclude_dumps: bool,

    /// Upper bound on worker threads (default = CPU count).
    #[arg(long)]
    jobs: Option<usize>,

    /// Treat '# Query_time:' as a valid record start when '# Time:' is missing.
    #[arg(long)]
    loose_start: bool,

    /// Append /* TRUNCATED */ to SQL that was cut off at the end of the file.
    #[arg(long)]
    mark_truncated: bool,

    /// Print processing counters and per-phase timings.
    #[arg(long)]
    stats: bool,

    /// Analyze the last N days (0 = today only).
    #[arg(long, group = "window")]
    days: Option<i64>,

    /// Analyze today only (same as --days 0).
    #[arg(long, group = "window")]
    today: bool,

    /// Analyze all records (default, no time filtering).
    #[arg(long, group = "window")]
    all: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let time_range = if args.today || args.days == Some(0) {
        let range = calculate_time_range(0);
        eprintln!("time filter: today only ({})", range.0.format("%Y-%m-%d"));
        Some(range)
    } else if let Some(days) = args.days.filter(|d| *d > 0) {
        let range = calculate_time_range(days);
        eprintln!(
            "time filter: last {days} days ({} to {})",
            range.0.format("%Y-%m-%d"),
            range.1.format("%Y-%m-%d")
        );
        Some(range)
    } else {
        if !args.all {
            debug!("no time window flag given, defaulting to all records");
        }
        eprintln!("time filter: all records");
        None
    };

    let run_started = Instant::now();

    if let Some(range) = time_range {
        let check = check_time_range(&args.logfile, range);
        debug!("sampler verdict: {check:?}");
        if !check.has_data_in_range {
            eprintln!("sampling found no data inside the requested time range");
            if let Some((file_start, file_end)) = check.file_time_range {
                eprintln!(
                    "  file time range  : {} to {}",
                    file_start.format("%Y-%m-%d %H:%M"),
                    file_end.format("%Y-%m-%d %H:%M")
                );
            }
            eprintln!(
                "  target time range: {} to {}",
                range.0.format("%Y-%m-%d %H:%M"),
                range.1.format("%Y-%m-%d %H:%M")
            );
            eprintln!("  sampled {} timestamps", check.sample_count);
            return Ok(());
        }
        match check.coverage_type.as_str() {
            "full_file_in_range" => eprintln!("file data lies entirely inside the target range"),
            "full_range_covered" => eprintln!("target range is entirely covered by the file"),
            _ => {
                eprintln!(
                    "found data in range (estimated coverage: {:.0}%)",
                    check.estimated_coverage * 100.0
                );
                if check.estimated_coverage < 0.3 {
                    eprintln!("note: most of the target range may hold no data");
                }
            }
        }
        if let Some(note) = check.note {
            eprintln!("sampler note: {note}");
        }
    }

    let jobs = args
        .jobs
        .unwrap_or_else(|| thread::available_parallelism().map(usize::from).unwrap_or(1));
    let (shards, record_starts, file_size) =
        compute_boundaries(&args.logfile, jobs, args.loose_start)?;
    let scan_elapsed = run_started.elapsed();
    debug!("{record_starts} record starts across {} shards", shards.len());

    let shard_jobs: Vec<ShardJob> = shards
        .iter()
        .map(|&(start, end)| ShardJob {
            path: args.logfile.clone(),
            start,
            end,
            min_time: args.min_time,
            exclude_dumps: args.exclude_dumps,
            mark_truncated: args.mark_truncated,
            loose_start: args.loose_start,
            time_range,
        })
        .collect();
    let workers = jobs.min(shard_jobs.len()).max(1);

    let parse_started = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
    let parts = pool.install(|| {
        use rayon::prelude::*;
        shard_jobs
            .par_iter()
            .map(parse_shard)
            .collect::<Result<Vec<_>>>()
    })?;
    let parse_elapsed = parse_started.elapsed();

    let merge_started = Instant::now();
    let (merged, totals) = merge_results(parts);
    let merge_elapsed = merge_started.elapsed();

    if merged.is_empty() {
        eprintln!("no slow queries matched the requested window and filters");
        if let Some(range) = time_range {
            eprintln!(
                "  time range: {} to {}",
                range.0.format("%Y-%m-%d"),
                range.1.format("%Y-%m-%d")
            );
        }
        eprintln!("  min query time: {}s", args.min_time);
        if args.stats {
            println!("\n[stats] ==========");
            println!("file size        : {file_size} bytes");
            println!("record starts    : {record_starts}");
            println!("parsed records   : {}", totals.parsed_records);
            println!("filtered < min   : {}", totals.filtered_min_time);
            println!("filtered dumps   : {}", totals.filtered_dumps);
            println!("filtered window  : {}", totals.filtered_time_range);
            println!("remaining        : 0");
        }
        return Ok(());
    }

    let build_started = Instant::now();
    let rows = build_report(merged);
    let build_elapsed = build_started.elapsed();

    let write_started = Instant::now();
    write_csv(&rows, &args.out_csv)?;
    eprintln!("saved CSV: {}", args.out_csv.display());
    if let Some(out_md) = &args.out_md {
        write_markdown(&rows, out_md, args.top)?;
        eprintln!("saved Markdown: {}", out_md.display());
    }
    let write_elapsed = write_started.elapsed();

    if args.stats {
        let total_samples: u64 = rows.iter().map(|r| r.samples).sum();
        let total_time: f64 = rows.iter().map(|r| r.total_time_s).sum();
        println!("\n[stats] ==========");
        println!("file size        : {file_size} bytes");
        println!("record starts    : {record_starts}");
        println!("shards           : {}; workers: {workers}", shard_jobs.len());
        println!("Time lines       : {}", totals.time_lines);
        println!("Query_time lines : {}", totals.qtime_lines);
        println!("parsed records   : {}", totals.parsed_records);
        println!("filtered < min   : {}", totals.filtered_min_time);
        println!("filtered dumps   : {}", totals.filtered_dumps);
        println!("filtered window  : {}", totals.filtered_time_range);
        println!("tail truncated   : {}", totals.truncated_records);
        println!("fingerprints     : {}", rows.len());
        println!("total samples    : {total_samples}");
        println!("total time (s)   : {total_time:.3}");
        println!("[timings] ==========");
        println!("boundary scan    : {:.1} ms", scan_elapsed.as_secs_f64() * 1e3);
        println!("parallel parse   : {:.3} s", parse_elapsed.as_secs_f64());
        println!("merge            : {:.1} ms", merge_elapsed.as_secs_f64() * 1e3);
        println!("build report     : {:.1} ms", build_elapsed.as_secs_f64() * 1e3);
        println!("write outputs    : {:.1} ms", write_elapsed.as_secs_f64() * 1e3);
        println!("total            : {:.3} s", run_started.elapsed().as_secs_f64());
    }

    Ok(())
}

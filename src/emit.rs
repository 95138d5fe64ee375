//! CSV and Markdown writers for the final report rows.

use std::fs::File;
use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use crate::report::ReportRow;

const CSV_HEADER: [&str; 21] = [
    "fingerprint",
    "samples",
    "total_time_s",
    "avg_time_s",
    "p95_time_s",
    "max_time_s",
    "time_share_pct",
    "count_share_pct",
    "avg_lock_time_s",
    "rows_examined_total",
    "rows_examined_avg",
    "rows_sent_total",
    "rows_sent_avg",
    "first_seen",
    "last_seen",
    "db",
    "user_host",
    "main_table",
    "norm_sql",
    "example_query",
    "has_truncated",
];

/// Writes the full report as CSV. The query columns are quoted so multiline
/// examples import cleanly into spreadsheet software.
pub fn write_csv(rows: &[ReportRow], path: &Path) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::NonNumeric)
        .from_path(path)
        .with_context(|| format!("cannot create {}", path.display()))?;

    wtr.write_record(CSV_HEADER)?;
    for row in rows {
        wtr.write_record(&[
            row.fingerprint.clone(),
            row.samples.to_string(),
            row.total_time_s.to_string(),
            row.avg_time_s.to_string(),
            row.p95_time_s.to_string(),
            row.max_time_s.to_string(),
            row.time_share_pct.to_string(),
            row.count_share_pct.to_string(),
            row.avg_lock_time_s.to_string(),
            row.rows_examined_total.to_string(),
            row.rows_examined_avg.to_string(),
            row.rows_sent_total.to_string(),
            row.rows_sent_avg.to_string(),
            row.first_seen.clone(),
            row.last_seen.clone(),
            row.db.clone(),
            row.user_host.clone(),
            row.main_table.clone(),
            row.norm_sql.clone(),
            row.example_query.clone(),
            row.has_truncated.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes a Top-N Markdown table ranked by total time.
pub fn write_markdown(rows: &[ReportRow], path: &Path, top: usize) -> Result<()> {
    let mut out = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    if rows.is_empty() {
        writeln!(out, "# MySQL slow log summary\n\n(no data)")?;
        return Ok(());
    }

    let top_n = top.min(rows.len());
    let total_samples: u64 = rows.iter().map(|r| r.samples).sum();
    let total_time: f64 = rows.iter().map(|r| r.total_time_s).sum();

    writeln!(out, "# MySQL slow log summary (Top {top_n} by total time)\n")?;
    writeln!(out, "- total samples: **{total_samples}**")?;
    writeln!(out, "- total time: **{total_time:.3} s**\n")?;
    writeln!(
        out,
        "| rank | samples | total(s) | avg(s) | p95(s) | max(s) | time share(%) | table | db | fingerprint | normalized SQL (first 120 chars) |"
    )?;
    writeln!(out, "|---:|---:|---:|---:|---:|---:|---:|---|---|---|---|")?;
    for (rank, row) in rows.iter().take(top_n).enumerate() {
        let norm_short: String = row.norm_sql.chars().take(120).collect();
        let norm_short = norm_short.replace('|', "\\|");
        writeln!(
            out,
            "| {} | {} | {:.3} | {:.3} | {:.3} | {:.3} | {} | {} | {} | `{}` | {} |",
            rank + 1,
            row.samples,
            row.total_time_s,
            row.avg_time_s,
            row.p95_time_s,
            row.max_time_s,
            row.time_share_pct,
            row.main_table,
            row.db,
            row.fingerprint,
            norm_short,
        )?;
    }
    Ok(())
}

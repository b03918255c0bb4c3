//! Statistics collection and reporting for shard runs.
//!
//! - Shard-level: [`ShardStats`], returned by every pipeline run
//! - Run-level: [`RunSummary`], aggregated by the runner

use std::time::Duration;

use comfy_table::{Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use crate::progress::fmt_num;

/// Per-shard counters for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardStats {
    pub stem: String,
    /// Identifiers in the shard file
    pub total: usize,
    /// Already in the checkpoint at startup
    pub skipped: usize,
    /// Sent to the remote client this run
    pub attempted: usize,
    /// Remote fetch calls issued
    pub remote_batches: usize,
    /// Canonical records written to the sink and checkpointed
    pub written: usize,
    /// Records a failed batch wrote before aborting. They reach the output
    /// with the next flush but not the checkpoint, so a rerun writes them again.
    pub unchecked: usize,
    /// Records rejected by the sanitizer
    pub rejected: usize,
    /// Per-record errors surfaced inline by the client
    pub record_errors: usize,
    /// Batches aborted by a connectivity error
    pub transient_failures: usize,
    /// Batches aborted by any other remote error
    pub other_failures: usize,
    /// Stopped early on shutdown request
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl ShardStats {
    pub fn failed_batches(&self) -> usize {
        self.transient_failures + self.other_failures
    }

    /// Identifiers requested but absent from the output (removed, unknown, rejected)
    pub fn missing(&self) -> usize {
        self.attempted.saturating_sub(self.written + self.unchecked)
    }

    /// Log shard completion (non-TTY mode only).
    pub fn log(&self) {
        let pct = if self.attempted > 0 {
            self.written as f64 / self.attempted as f64 * 100.0
        } else {
            0.0
        };
        log::info!(
            "{}: {} / {} written ({:.1}%), {} skipped, {} rejected, {} failed batches, {} unchecked{} [{:.1}s]",
            self.stem,
            fmt_num(self.written),
            fmt_num(self.attempted),
            pct,
            fmt_num(self.skipped),
            fmt_num(self.rejected),
            self.failed_batches(),
            fmt_num(self.unchecked),
            if self.interrupted { ", interrupted" } else { "" },
            self.elapsed.as_secs_f64()
        );
    }
}

/// Aggregated statistics over all shards of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub total_shards: usize,
    pub completed_shards: usize,
    pub failed_shards: usize,
    pub interrupted_shards: usize,
    pub ids_total: usize,
    pub skipped: usize,
    pub attempted: usize,
    pub written: usize,
    pub unchecked: usize,
    pub rejected: usize,
    pub record_errors: usize,
    pub transient_failures: usize,
    pub other_failures: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Aggregate from individual shard stats.
    pub fn from_shards(shards: &[ShardStats], total: usize, failed: usize) -> Self {
        let mut stats = Self {
            total_shards: total,
            failed_shards: failed,
            ..Default::default()
        };
        for s in shards {
            if s.interrupted {
                stats.interrupted_shards += 1;
            } else {
                stats.completed_shards += 1;
            }
            stats.ids_total += s.total;
            stats.skipped += s.skipped;
            stats.attempted += s.attempted;
            stats.written += s.written;
            stats.unchecked += s.unchecked;
            stats.rejected += s.rejected;
            stats.record_errors += s.record_errors;
            stats.transient_failures += s.transient_failures;
            stats.other_failures += s.other_failures;
            stats.elapsed = stats.elapsed.max(s.elapsed); // wall-clock approx
        }
        stats
    }

    /// Format summary table as a string.
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Scrape Summary")
                    .fg(Color::Cyan)
                    .add_attribute(Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
                Cell::new("%").fg(Color::Cyan),
            ]);

        let mut shards = format!(
            "{}/{} ({} failed",
            self.completed_shards, self.total_shards, self.failed_shards
        );
        if self.interrupted_shards > 0 {
            shards.push_str(&format!(", {} interrupted", self.interrupted_shards));
        }
        shards.push(')');
        table.add_row(vec![Cell::new("Shards"), Cell::new(shards), Cell::new("")]);
        table.add_row(vec![
            Cell::new("Ids in shards"),
            Cell::new(fmt_num(self.ids_total)),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Already done"),
            Cell::new(fmt_num(self.skipped)),
            Cell::new(format!("{:.1}", pct(self.skipped, self.ids_total))),
        ]);
        table.add_row(vec![
            Cell::new("Attempted"),
            Cell::new(fmt_num(self.attempted)),
            Cell::new(format!("{:.1}", pct(self.attempted, self.ids_total))),
        ]);
        table.add_row(vec![
            Cell::new("Records written").fg(Color::Green),
            Cell::new(fmt_num(self.written)).fg(Color::Green),
            Cell::new(format!("{:.1}", pct(self.written, self.attempted))).fg(Color::Green),
        ]);
        if self.unchecked > 0 {
            table.add_row(vec![
                Cell::new("Unchecked records").fg(Color::Yellow),
                Cell::new(fmt_num(self.unchecked)).fg(Color::Yellow),
                Cell::new(""),
            ]);
        }
        table.add_row(vec![
            Cell::new("Rejected"),
            Cell::new(fmt_num(self.rejected)),
            Cell::new(format!("{:.3}", pct(self.rejected, self.attempted))),
        ]);
        table.add_row(vec![
            Cell::new("Record errors"),
            Cell::new(fmt_num(self.record_errors)),
            Cell::new(""),
        ]);
        let failed = self.transient_failures + self.other_failures;
        let failed_cell = Cell::new(format!(
            "{} ({} connection)",
            fmt_num(failed),
            fmt_num(self.transient_failures)
        ));
        table.add_row(vec![
            Cell::new("Failed batches"),
            if failed > 0 {
                failed_cell.fg(Color::Yellow)
            } else {
                failed_cell
            },
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Elapsed"),
            Cell::new(format!("{:.1}s", self.elapsed.as_secs_f64())),
            Cell::new(""),
        ]);

        format!("\n{table}")
    }

    /// Print the table to stderr (TTY mode).
    pub fn print(&self) {
        eprintln!("{}", self.format_table());
    }

    /// Log minimal summary (non-TTY mode).
    pub fn log(&self) {
        log::info!(
            "Scrape complete: {} records from {} ids ({}/{} shards, {} failed batches)",
            fmt_num(self.written),
            fmt_num(self.attempted),
            self.completed_shards,
            self.total_shards,
            self.transient_failures + self.other_failures
        );
    }
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

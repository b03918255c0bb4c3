//! Status subcommand - checkpoint progress per shard

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{
    Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use refetch_core::progress::fmt_num;
use refetch_core::{Checkpoint, ShardLayout, ShardSelection, ShardSpec};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Dataset name
    #[arg(short, long)]
    pub dataset: String,

    /// Root folder holding data/ and log/
    #[arg(short, long)]
    pub basefolder: Option<PathBuf>,

    /// Inclusive shard number range, e.g. "1,10"
    #[arg(short = 'r', long)]
    pub split_range: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardStatus {
    pub stem: String,
    pub total: usize,
    /// Shard ids present in the checkpoint
    pub done: usize,
    pub output_bytes: Option<u64>,
}

impl ShardStatus {
    fn state(&self) -> &'static str {
        match (self.done, self.total) {
            (0, _) if self.output_bytes.is_none() => "pending",
            (d, t) if d >= t => "done",
            _ => "partial",
        }
    }
}

/// Compare each shard's ids with its checkpoint
pub fn collect(shards: &[ShardSpec]) -> Result<Vec<ShardStatus>> {
    shards
        .iter()
        .map(|spec| {
            let ids = spec
                .read_ids()
                .with_context(|| format!("cannot read {}", spec.path.display()))?;
            let checkpoint = Checkpoint::load(&spec.checkpoint_path).with_context(|| {
                format!("cannot read {}", spec.checkpoint_path.display())
            })?;
            Ok(ShardStatus {
                stem: spec.stem.clone(),
                total: ids.len(),
                done: ids.iter().filter(|id| checkpoint.contains(id)).count(),
                output_bytes: std::fs::metadata(&spec.output_path).ok().map(|m| m.len()),
            })
        })
        .collect()
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let base_dir = args
        .basefolder
        .unwrap_or_else(|| config.output.base_dir.clone());
    let layout = ShardLayout::new(base_dir, &args.dataset, config.output.sink_format()?);
    let selection = match &args.split_range {
        Some(range) => ShardSelection::parse_range(range)?,
        None => ShardSelection::All,
    };
    let rows = collect(&layout.select(&selection)?)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Shard").fg(Color::Cyan),
            Cell::new("Ids").fg(Color::Cyan),
            Cell::new("Checkpointed").fg(Color::Cyan),
            Cell::new("Output").fg(Color::Cyan),
            Cell::new("State").fg(Color::Cyan),
        ]);

    let (mut total, mut done) = (0, 0);
    for row in &rows {
        total += row.total;
        done += row.done;
        let state = match row.state() {
            "done" => Cell::new("done").fg(Color::Green),
            "partial" => Cell::new("partial").fg(Color::Yellow),
            other => Cell::new(other),
        };
        table.add_row(vec![
            Cell::new(&row.stem),
            Cell::new(fmt_num(row.total)).set_alignment(CellAlignment::Right),
            Cell::new(fmt_num(row.done)).set_alignment(CellAlignment::Right),
            Cell::new(
                row.output_bytes
                    .map(|b| format!("{:.1} MiB", b as f64 / (1024.0 * 1024.0)))
                    .unwrap_or_else(|| "-".into()),
            )
            .set_alignment(CellAlignment::Right),
            state,
        ]);
    }
    table.add_row(vec![
        Cell::new("Total").fg(Color::Cyan),
        Cell::new(fmt_num(total)).set_alignment(CellAlignment::Right),
        Cell::new(fmt_num(done)).set_alignment(CellAlignment::Right),
        Cell::new(""),
        Cell::new(format!("{}/{} done", rows.iter().filter(|r| r.state() == "done").count(), rows.len())),
    ]);

    eprintln!("\n{table}");
    Ok(())
}

//! Split subcommand - cut an id list into numbered shard files

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use refetch_core::progress::fmt_num;
use refetch_core::shard::split;

#[derive(Args, Debug)]
pub struct SplitArgs {
    /// One-column CSV or text file of submission ids
    #[arg(short, long)]
    pub filename: PathBuf,

    /// File of ids to leave out (e.g. ids already scraped elsewhere)
    #[arg(short, long)]
    pub remove: Option<PathBuf>,

    /// Ids per shard
    #[arg(short, long, default_value_t = 1_000_000)]
    pub batch_size: usize,
}

pub fn run(args: SplitArgs) -> Result<()> {
    let outcome = split(&args.filename, args.batch_size, args.remove.as_deref())?;
    eprintln!(
        "{} ids -> {} shards in {}",
        fmt_num(outcome.ids),
        outcome.shards.len(),
        outcome.shard_dir.display()
    );
    if outcome.removed > 0 {
        eprintln!("{} ids removed", fmt_num(outcome.removed));
    }
    Ok(())
}

//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: one indicatif bar per shard, counting identifiers attempted.
//! Non-TTY mode: hidden bars; shard completion is reported through the log.

use std::io::IsTerminal;
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Per-shard bar: identifiers attempted out of the shard total
fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<24.dim} {bar:30.green/dim} {human_pos:>9}/{human_len:9} {per_sec:>10} {eta:>4} {wide_msg:.dim}")
        .expect("invalid template")
        .progress_chars("--")
}

/// First 24 characters of `name`, keeping bars aligned
fn bar_prefix(name: &str) -> &str {
    match name.char_indices().nth(24) {
        Some((end, _)) => &name[..end],
        None => name,
    }
}

/// Central progress context managing multi-progress bars.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty: std::io::stderr().is_terminal(),
        }
    }

    /// Context that never draws (tests, library callers)
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty: false,
        }
    }

    /// Create a per-shard bar sized to the shard's identifier count.
    ///
    /// Non-TTY: hidden (no-op), but position is still tracked.
    pub fn shard_bar(&self, name: &str, total: u64) -> ProgressBar {
        if !self.is_tty {
            let pb = ProgressBar::hidden();
            pb.set_length(total);
            return pb;
        }
        let pb = self.multi.add(ProgressBar::new(total));
        pb.set_style(bar_style());
        pb.set_prefix(bar_prefix(name).to_string());
        pb
    }

    /// Print a line above managed progress bars (avoids interference).
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.is_tty {
            let _ = self.multi.println(msg);
        } else {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Whether running in TTY mode.
    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for `ProgressContext`.
pub type SharedProgress = Arc<ProgressContext>;

/// Format number with thousand separators.
pub fn fmt_num(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_num_small() {
        assert_eq!(fmt_num(0), "0");
        assert_eq!(fmt_num(123), "123");
    }

    #[test]
    fn fmt_num_thousands() {
        assert_eq!(fmt_num(1_000), "1,000");
        assert_eq!(fmt_num(123_456), "123,456");
        assert_eq!(fmt_num(1_234_567), "1,234,567");
    }

    #[test]
    fn hidden_bar_tracks_position() {
        let ctx = ProgressContext::hidden();
        let pb = ctx.shard_bar("submission_ids_x_1", 250);
        pb.inc(100);
        assert_eq!(pb.position(), 100);
        assert_eq!(pb.length(), Some(250));
    }

    #[test]
    fn bar_prefix_cuts_on_char_boundary() {
        assert_eq!(bar_prefix("submission_ids_x_1"), "submission_ids_x_1");
        let name = "submission_ids_日本語データ_123";
        let prefix = bar_prefix(name);
        assert_eq!(prefix.chars().count(), 24);
        assert!(name.starts_with(prefix));
        let odd = format!("a{}", "é".repeat(30));
        assert_eq!(bar_prefix(&odd), format!("a{}", "é".repeat(23)));
    }
}

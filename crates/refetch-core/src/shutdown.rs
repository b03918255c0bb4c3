//! Graceful shutdown support via atomic flag.
//!
//! Workers stop claiming shards and pipelines stop between remote batches once
//! the flag is set; the batch in flight finishes its flush/checkpoint cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

static FLAG: LazyLock<Arc<AtomicBool>> = LazyLock::new(|| Arc::new(AtomicBool::new(false)));

/// Global shutdown flag, set by the SIGTERM/SIGINT handler
pub fn shutdown_flag() -> &'static AtomicBool {
    &FLAG
}

/// Owned handle to the global flag
pub fn shared_flag() -> Arc<AtomicBool> {
    Arc::clone(&FLAG)
}

/// Check if shutdown was requested
pub fn is_shutdown_requested() -> bool {
    FLAG.load(Ordering::Relaxed)
}

/// Request shutdown (for signal handlers and tests)
pub fn request_shutdown() {
    FLAG.store(true, Ordering::Relaxed);
}

/// Route SIGINT/SIGTERM to the shutdown flag.
///
/// A second SIGINT while the flag is already set terminates immediately.
pub fn install_signal_handlers() -> std::io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};

    signal_hook::flag::register_conditional_shutdown(SIGINT, 130, Arc::clone(&FLAG))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&FLAG))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&FLAG))?;
    Ok(())
}

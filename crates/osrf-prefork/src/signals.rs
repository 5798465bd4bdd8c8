//! Child-termination notification.
//!
//! The only concurrency inside the parent process is the asynchronous
//! delivery of `SIGCHLD`. Rather than doing any real work in the signal
//! handler, a single atomic flag is set; the dispatch loop observes it
//! between blocking waits and reaps at its own pace. This is the
//! "signal sets a flag, code acts on it later" pattern required of any
//! async-signal-safe handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::SIGCHLD;
use signal_hook::flag;

use crate::errors::Result;

/// Installs the `SIGCHLD` handler and hands back the flag it sets.
///
/// Call once in the parent before spawning any workers. The returned flag
/// reads `true` after at least one child has terminated since the last time
/// it was cleared.
pub fn install_child_death_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    flag::register(SIGCHLD, Arc::clone(&flag))?;
    Ok(flag)
}

/// Read-and-clear the flag, returning whether a child death was observed
/// since the last check.
pub fn take(flag: &AtomicBool) -> bool {
    flag.swap(false, Ordering::SeqCst)
}

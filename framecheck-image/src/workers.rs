//! Worker pool bootstrap.
//!
//! The blur and correlation loops run data-parallel on the global rayon
//! pool. An embedding host that blocks OS signals in its main thread must be
//! able to create every worker *before* changing the signal mask, so
//! [`spawn`] does not return until all requested threads are actually alive,
//! not merely requested.

use anyhow::{Context, Result};

/// Default worker count: `min(available_parallelism, physical cores - 1)`,
/// at least 1. One physical core is left alone so the pool does not contend
/// with the thread that feeds it.
pub fn default_worker_count() -> usize {
    let logical = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    logical.min(num_cpus::get_physical().saturating_sub(1)).max(1)
}

/// Builds the global worker pool with `threads` workers (default:
/// [`default_worker_count`]) and blocks until every worker is alive and
/// idling. Returns the worker count.
///
/// Call once at process start; a second call fails because the global pool
/// already exists.
pub fn spawn(threads: Option<usize>) -> Result<usize> {
    let n = threads.unwrap_or_else(default_worker_count);
    rayon::ThreadPoolBuilder::new()
        .num_threads(n)
        .thread_name(|i| format!("framecheck-worker-{i}"))
        .build_global()
        .context("global worker pool already initialized")?;
    // broadcast() runs on every pool thread and only returns once all of
    // them have executed it, which proves each worker has been spawned.
    rayon::broadcast(|_| {});
    tracing::debug!("worker pool ready with {n} threads");
    Ok(n)
}

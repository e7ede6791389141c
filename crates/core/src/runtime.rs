//! Single-threaded runtime for one extension context
//!
//! Each context (background, one page) is its own event loop. Sessions are
//! `!Send`, so everything runs on a current-thread runtime inside a
//! `LocalSet`.

use std::future::Future;

use tokio::runtime::{Builder, Runtime};
use tokio::task::LocalSet;

use crate::errors::Result;

/// A current-thread runtime with timers enabled
pub fn build() -> Result<Runtime> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

/// Run `future` to completion on a fresh runtime, with `spawn_local`
/// available to it
pub fn run_local<F: Future>(future: F) -> Result<F::Output> {
    let runtime = build()?;
    let local = LocalSet::new();
    Ok(local.block_on(&runtime, future))
}

//! Process-wide caught-up flag.
//!
//! A single atomic word, exactly as spec'd: initialized to 0 at startup,
//! mutated only by the follower loop's `getBatchFetchSeqCount` step, read
//! by [`crate::store`] (to tag writes durable) and [`crate::commit_tracker`]
//! (to decide whether to act). No ordering guarantee beyond the atomic
//! itself is required — the flag is advisory.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct CaughtUpFlag(AtomicU32);

impl CaughtUpFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(CaughtUpFlag(AtomicU32::new(0)))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed) != 0
    }

    pub fn set(&self, caught_up: bool) {
        self.0.store(caught_up as u32, Ordering::Relaxed);
    }
}

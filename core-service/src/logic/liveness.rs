//! Liveness counters for background side-channels

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts one live background instance for as long as it is held.
#[derive(Debug)]
pub struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    pub fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// A process-wide unique ID for a node.
///
/// Cheap to mint from any thread, and `Option<UniqueId>` is no bigger than the ID itself.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct UniqueId(NonZeroU64);

impl UniqueId {
    pub fn new() -> UniqueId {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let got = COUNTER.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and would take centuries to wrap.
        UniqueId(NonZeroU64::new(got).unwrap_or(NonZeroU64::MIN))
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        UniqueId::new()
    }
}

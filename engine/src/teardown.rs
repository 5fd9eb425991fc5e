use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot teardown signal shared between a view and the bootstrap it
/// started. Set once, never cleared.
#[derive(Debug, Clone, Default)]
pub struct Teardown(Arc<AtomicBool>);

impl Teardown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        if !self.0.swap(true, Ordering::AcqRel) {
            tracing::debug!("Teardown signalled");
        }
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

//! Hook implementations for the visit counter plugin.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cms_plugin_sdk::prelude::*;

/// Hook point fired by the host each time an article is served.
pub const ARTICLE_VIEW: &str = "article_view";

/// Name of the counting hook, used to remove it again.
pub const COUNT_HOOK: &str = "visit-counter.count";

/// Priority of the counting hook.
pub const COUNT_PRIORITY: i32 = 10;

/// Counter shared between the plugin and its hook closure.
#[derive(Debug)]
pub struct ViewCounter {
    running: AtomicBool,
    step: AtomicU64,
    total: AtomicU64,
}

impl Default for ViewCounter {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(false),
            step: AtomicU64::new(1),
            total: AtomicU64::new(0),
        }
    }
}

impl ViewCounter {
    /// Starts counting with the given increment.
    pub fn resume(&self, step: u64) {
        self.step.store(step, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    /// Stops counting. The total is kept.
    pub fn pause(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Records one view. `None` while paused.
    pub fn record(&self) -> Option<u64> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        let step = self.step.load(Ordering::SeqCst);
        Some(self.total.fetch_add(step, Ordering::SeqCst) + step)
    }

    /// Views counted so far.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

/// Builds the `article_view` hook: returns the new total as `u64`.
pub fn count_hook(counter: Arc<ViewCounter>) -> Hook {
    Hook::new(COUNT_HOOK, COUNT_PRIORITY, move |_| {
        counter.record().map(hook_value)
    })
}

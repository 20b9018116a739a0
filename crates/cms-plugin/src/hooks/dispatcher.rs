//! Hook dispatch over a snapshot of a point's hook list.
//!
//! Callers take the snapshot under the manager's read lock and dispatch after
//! releasing it, so callbacks are free to add or remove hooks, or toggle
//! plugins, without deadlocking.

use tracing::trace;

use super::definitions::{Hook, HookValue};

/// Invokes every hook in order and returns the result of the last one.
///
/// Every earlier result is discarded: the lowest-priority hook determines the
/// outcome. Host call sites depend on this aggregation.
pub fn apply(point: &str, hooks: &[Hook], args: &[HookValue]) -> Option<HookValue> {
    let mut result = None;
    for hook in hooks {
        trace!(hook_point = %point, hook = %hook.name, priority = hook.priority, "Invoking hook");
        result = hook.call(args);
    }
    result
}

/// Invokes every hook in order and returns each result in execution order.
pub fn collect(point: &str, hooks: &[Hook], args: &[HookValue]) -> Vec<Option<HookValue>> {
    hooks
        .iter()
        .map(|hook| {
            trace!(hook_point = %point, hook = %hook.name, priority = hook.priority, "Invoking hook");
            hook.call(args)
        })
        .collect()
}

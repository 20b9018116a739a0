//! Hook table — per hook point, a priority-ordered list of callbacks.
//!
//! Each point's list is stored as an immutable `Arc<[Hook]>` and replaced
//! wholesale on mutation. A snapshot taken for dispatch therefore never
//! observes a partially applied change.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::definitions::Hook;

/// Registry of hooks organized by hook-point name.
#[derive(Debug, Default)]
pub struct HookTable {
    /// Hook point → hooks sorted by non-increasing priority.
    points: HashMap<String, Arc<[Hook]>>,
}

impl HookTable {
    /// Creates an empty hook table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hook and re-sorts the point by descending priority.
    ///
    /// The sort is stable, so hooks with equal priority keep insertion order.
    pub fn add(&mut self, point: &str, hook: Hook) {
        let mut entries = self
            .points
            .get(point)
            .map(|entries| entries.to_vec())
            .unwrap_or_default();

        debug!(
            hook_point = %point,
            hook = %hook.name,
            priority = hook.priority,
            "Hook registered"
        );

        entries.push(hook);
        entries.sort_by_key(|entry| Reverse(entry.priority));
        self.points.insert(point.to_string(), entries.into());
    }

    /// Removes every hook named `name` from `point`. Returns how many were removed.
    ///
    /// No match is a silent no-op. A point left without hooks is dropped.
    pub fn remove(&mut self, point: &str, name: &str) -> usize {
        let Some(entries) = self.points.get(point) else {
            return 0;
        };

        let kept: Vec<Hook> = entries
            .iter()
            .filter(|entry| entry.name != name)
            .cloned()
            .collect();
        let removed = entries.len() - kept.len();

        if removed == 0 {
            return 0;
        }

        if kept.is_empty() {
            self.points.remove(point);
        } else {
            self.points.insert(point.to_string(), kept.into());
        }

        debug!(hook_point = %point, hook = %name, removed, "Hook removed");
        removed
    }

    /// Returns the current ordered list for a point.
    pub fn snapshot(&self, point: &str) -> Option<Arc<[Hook]>> {
        self.points.get(point).cloned()
    }

    /// Returns whether any hook is registered at `point`. Empty points are
    /// never kept, so this is `false` once the last hook is removed.
    pub fn contains(&self, point: &str) -> bool {
        self.points.get(point).is_some_and(|entries| !entries.is_empty())
    }

    /// Returns the number of hooks registered at `point`.
    pub fn len(&self, point: &str) -> usize {
        self.points.get(point).map_or(0, |entries| entries.len())
    }

    /// Returns all hook-point names, sorted.
    pub fn points(&self) -> Vec<String> {
        let mut points: Vec<String> = self.points.keys().cloned().collect();
        points.sort();
        points
    }
}
